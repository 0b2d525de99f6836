//! A minimal SMB2 client that drives the engine over an in-process stream.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use smb2_engine::auth::{
    build_authenticate_message, build_negotiate_message, build_ntlmv2_response, parse_challenge,
};
use smb2_engine::clock::ManualClock;
use smb2_engine::config::{Config, ShareBackend, ShareConfig, UserConfig};
use smb2_engine::error::ServerError;
use smb2_engine::server::{handle_connection, Engine};
use smb2_engine::signing::{sign_message, SESSION_KEY_LEN};
use smb2_engine::smb2::close::{CloseRequest, CloseResponse, CLOSE_FLAG_POSTQUERY_ATTRIB};
use smb2_engine::smb2::create::{CreateRequest, CreateResponse, FILE_SHARE_READ, FILE_SHARE_WRITE};
use smb2_engine::smb2::header::{decode_message, encode_message, Smb2Header, FLAGS_SIGNED};
use smb2_engine::smb2::negotiate::{NegotiateRequest, DIALECT_SMB2_0_2, DIALECT_SMB2_1};
use smb2_engine::smb2::query::{QueryDirectoryRequest, QueryInfoRequest, SetInfoRequest};
use smb2_engine::smb2::read::{ReadRequest, ReadResponse};
use smb2_engine::smb2::session::{SessionSetupRequest, SessionSetupResponse, SESSION_FLAG_IS_GUEST};
use smb2_engine::smb2::status::NtStatus;
use smb2_engine::smb2::tree::TreeConnectRequest;
use smb2_engine::smb2::write::{WriteRequest, WriteResponse};
use smb2_engine::smb2::{FileId, Smb2Command};
use smb2_engine::transport::{read_frame, write_frame};

pub const PASSWORD: &str = "secret";
pub const CLIENT_CHALLENGE: [u8; 8] = *b"clientch";

/// 2023-11-14T22:13:20Z
pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)))
}

pub fn memory_share(name: &str) -> ShareConfig {
    ShareConfig {
        name: name.to_string(),
        path: None,
        backend: ShareBackend::Memory,
        read_only: false,
        guest_ok: false,
    }
}

/// Shares "data" (users only), "public" (guests allowed) and "ro"
/// (read-only), all in memory, plus the account alice/secret.
pub fn test_config() -> Config {
    let mut config = Config::new("testsrv", 0);
    config.shares.push(memory_share("data"));
    config.shares.push(ShareConfig {
        guest_ok: true,
        ..memory_share("public")
    });
    config.shares.push(ShareConfig {
        read_only: true,
        ..memory_share("ro")
    });
    config.users.push(UserConfig {
        username: "alice".to_string(),
        password: PASSWORD.to_string(),
    });
    config
}

pub fn engine(config: Config) -> Arc<Engine> {
    Arc::new(Engine::new(config, test_clock()).expect("engine"))
}

/// One decoded response.
#[derive(Debug)]
pub struct Reply {
    pub header: Smb2Header,
    pub body: Bytes,
    /// The whole message as received, for signature checks.
    pub raw: Bytes,
}

impl Reply {
    pub fn status(&self) -> NtStatus {
        self.header.status
    }

    pub fn is_signed(&self) -> bool {
        self.header.flags & FLAGS_SIGNED != 0
    }
}

/// A running connection task plus the client end of its stream.
pub struct Connection {
    pub client: TestClient<DuplexStream>,
    pub task: JoinHandle<Result<(), ServerError>>,
    /// Held so the connection is not told to shut down.
    pub shutdown: watch::Sender<bool>,
}

pub fn connect(engine: Arc<Engine>) -> Connection {
    let (client_end, server_end) = tokio::io::duplex(1 << 20);
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(handle_connection(server_end, engine, rx));
    Connection {
        client: TestClient::new(client_end),
        task,
        shutdown,
    }
}

pub struct TestClient<S> {
    stream: S,
    next_message_id: u64,
    pub session_id: u64,
    pub tree_id: u32,
    pub signing_key: Option<[u8; SESSION_KEY_LEN]>,
    /// Sign every request once a key is known.
    pub sign_requests: bool,
    /// Credits requested in each header.
    pub credits: u16,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        TestClient {
            stream,
            next_message_id: 0,
            session_id: 0,
            tree_id: 0,
            signing_key: None,
            sign_requests: false,
            credits: 1,
        }
    }

    /// A request header with the next message id and the client's
    /// current session and tree.
    pub fn header(&mut self, command: Smb2Command) -> Smb2Header {
        let mut header = Smb2Header::request(
            command.as_u16(),
            self.next_message_id,
            self.session_id,
            self.tree_id,
        );
        header.credits = self.credits;
        self.next_message_id += 1;
        header
    }

    pub async fn send_message(&mut self, header: &Smb2Header, body: &[u8]) {
        let key = self.signing_key.filter(|_| self.sign_requests);
        let mut header = header.clone();
        if key.is_some() {
            header.flags |= FLAGS_SIGNED;
        }
        let mut message = encode_message(&header, body).to_vec();
        if let Some(key) = key {
            sign_message(&key, &mut message);
        }
        self.send_raw(&message).await;
    }

    pub async fn send_raw(&mut self, frame: &[u8]) {
        write_frame(&mut self.stream, frame).await.expect("write frame");
    }

    pub async fn recv(&mut self) -> Reply {
        let frame = read_frame(&mut self.stream).await.expect("read frame");
        let (header, body) = decode_message(&frame).expect("decode response");
        Reply {
            header,
            body: Bytes::copy_from_slice(body),
            raw: frame,
        }
    }

    /// The connection was closed by the server.
    pub async fn closed(&mut self) -> bool {
        read_frame(&mut self.stream).await.is_err()
    }

    pub async fn call(&mut self, command: Smb2Command, body: Bytes) -> Reply {
        let header = self.header(command);
        self.send_message(&header, &body).await;
        self.recv().await
    }

    pub async fn negotiate_with(&mut self, security_mode: u16, dialects: Vec<u16>) -> Reply {
        let request = NegotiateRequest {
            security_mode,
            capabilities: 0,
            client_guid: [7; 16],
            dialects,
        };
        self.call(Smb2Command::Negotiate, request.encode()).await
    }

    pub async fn negotiate(&mut self) -> Reply {
        let reply = self
            .negotiate_with(0x0001, vec![DIALECT_SMB2_0_2, DIALECT_SMB2_1])
            .await;
        assert_eq!(reply.status(), NtStatus::Success);
        reply
    }

    pub async fn session_setup(&mut self, security_mode: u8, token: Vec<u8>) -> Reply {
        let request = SessionSetupRequest {
            flags: 0,
            security_mode,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer: token,
        };
        self.call(Smb2Command::SessionSetup, request.encode()).await
    }

    /// Run both NTLM legs for `user` with `password`, adopting the session
    /// id from the first response. Returns the final reply.
    pub async fn login_with(&mut self, user: &str, password: &str, security_mode: u8) -> Reply {
        let first = self.session_setup(security_mode, build_negotiate_message()).await;
        assert_eq!(first.status(), NtStatus::MoreProcessingRequired);
        assert_ne!(first.header.session_id, 0);
        self.session_id = first.header.session_id;

        let token = SessionSetupResponse::decode(&first.body)
            .expect("session setup response")
            .security_buffer;
        let challenge = parse_challenge(&token).expect("challenge");

        let (nt_response, session_key) =
            build_ntlmv2_response(password, user, "WORKGROUP", &challenge, &CLIENT_CHALLENGE, 0);
        let reply = self
            .session_setup(security_mode, build_authenticate_message(user, "WORKGROUP", &nt_response))
            .await;
        if reply.status() == NtStatus::Success {
            let flags = SessionSetupResponse::decode(&reply.body)
                .expect("session setup response")
                .session_flags;
            // Guests get no key.
            self.signing_key = (flags & SESSION_FLAG_IS_GUEST == 0).then_some(session_key);
        }
        reply
    }

    pub async fn login_with_mode(&mut self, user: &str, security_mode: u8) -> Reply {
        self.login_with(user, PASSWORD, security_mode).await
    }

    pub async fn login(&mut self, user: &str) -> Reply {
        self.login_with_mode(user, 0x01).await
    }

    pub async fn tree_connect(&mut self, share: &str) -> Reply {
        let request = TreeConnectRequest {
            path: format!(r"\\testsrv\{share}"),
        };
        let reply = self.call(Smb2Command::TreeConnect, request.encode()).await;
        if reply.status() == NtStatus::Success {
            self.tree_id = reply.header.tree_id;
        }
        reply
    }

    /// Negotiate, log in as alice and connect to `share`.
    pub async fn mount(&mut self, share: &str) {
        self.negotiate().await;
        assert_eq!(self.login("alice").await.status(), NtStatus::Success);
        assert_eq!(self.tree_connect(share).await.status(), NtStatus::Success);
    }

    pub async fn create_raw(
        &mut self,
        name: &str,
        desired_access: u32,
        disposition: u32,
        options: u32,
    ) -> Reply {
        let request = CreateRequest {
            requested_oplock_level: 0,
            impersonation_level: 2,
            desired_access,
            file_attributes: 0,
            share_access: FILE_SHARE_READ | FILE_SHARE_WRITE,
            create_disposition: disposition,
            create_options: options,
            name: name.to_string(),
        };
        self.call(Smb2Command::Create, request.encode()).await
    }

    pub async fn create(
        &mut self,
        name: &str,
        desired_access: u32,
        disposition: u32,
        options: u32,
    ) -> Result<CreateResponse, NtStatus> {
        let reply = self.create_raw(name, desired_access, disposition, options).await;
        match reply.status() {
            NtStatus::Success => Ok(CreateResponse::decode(&reply.body).expect("create response")),
            status => Err(status),
        }
    }

    pub async fn close(&mut self, file_id: FileId) -> Reply {
        let request = CloseRequest {
            flags: 0,
            file_id,
        };
        self.call(Smb2Command::Close, request.encode()).await
    }

    pub async fn close_with_attributes(&mut self, file_id: FileId) -> CloseResponse {
        let request = CloseRequest {
            flags: CLOSE_FLAG_POSTQUERY_ATTRIB,
            file_id,
        };
        let reply = self.call(Smb2Command::Close, request.encode()).await;
        assert_eq!(reply.status(), NtStatus::Success);
        CloseResponse::decode(&reply.body).expect("close response")
    }

    pub async fn write(&mut self, file_id: FileId, offset: u64, data: &[u8]) -> Result<u32, NtStatus> {
        let request = WriteRequest {
            offset,
            file_id,
            flags: 0,
            data: Bytes::copy_from_slice(data),
        };
        let reply = self.call(Smb2Command::Write, request.encode()).await;
        match reply.status() {
            NtStatus::Success => Ok(WriteResponse::decode(&reply.body).expect("write response").count),
            status => Err(status),
        }
    }

    pub async fn read(&mut self, file_id: FileId, offset: u64, length: u32) -> Result<Bytes, NtStatus> {
        let request = ReadRequest {
            length,
            offset,
            file_id,
            minimum_count: 0,
        };
        let reply = self.call(Smb2Command::Read, request.encode()).await;
        match reply.status() {
            NtStatus::Success => Ok(ReadResponse::decode(&reply.body).expect("read response").data),
            status => Err(status),
        }
    }

    pub async fn query_directory(
        &mut self,
        file_id: FileId,
        class: u8,
        flags: u8,
        pattern: &str,
        output_buffer_length: u32,
    ) -> Reply {
        let request = QueryDirectoryRequest {
            file_information_class: class,
            flags,
            file_index: 0,
            file_id,
            pattern: pattern.to_string(),
            output_buffer_length,
        };
        self.call(Smb2Command::QueryDirectory, request.encode()).await
    }

    pub async fn query_info(&mut self, file_id: FileId, info_type: u8, class: u8, output_buffer_length: u32) -> Reply {
        let request = QueryInfoRequest {
            info_type,
            file_info_class: class,
            output_buffer_length,
            additional_information: 0,
            flags: 0,
            file_id,
        };
        self.call(Smb2Command::QueryInfo, request.encode()).await
    }

    pub async fn set_info(&mut self, file_id: FileId, info_type: u8, class: u8, buffer: Vec<u8>) -> Reply {
        let request = SetInfoRequest {
            info_type,
            file_info_class: class,
            additional_information: 0,
            file_id,
            buffer: Bytes::from(buffer),
        };
        self.call(Smb2Command::SetInfo, request.encode()).await
    }
}
