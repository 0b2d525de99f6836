//! Per-message dispatch.
//!
//! Decodes one frame, checks message ordering and request signatures,
//! grants credits, routes the message through the opcode table, then
//! builds (and if required signs) the response.

use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{build_error_response_body, ServerError};
use crate::handlers;
use crate::signing::{sign_message, verify_signature, SESSION_KEY_LEN};
use crate::smb2::header::{
    decode_message, encode_message, Smb2Header, FLAGS_RELATED_OPERATIONS, FLAGS_SIGNED,
    SMB1_MAGIC, SMB2_HEADER_SIZE,
};
use crate::smb2::status::NtStatus;
use crate::smb2::{DecodeError, Smb2Command, COMMAND_COUNT};
use crate::state::ConnectionState;

/// Fewest credits granted per response.
pub const MIN_CREDIT_GRANT: u16 = 10;
/// Most credits granted per response.
pub const MAX_CREDIT_GRANT: u16 = 8192;

/// A decoded request as handed to a command handler.
#[derive(Debug, Clone)]
pub struct Request {
    pub header: Smb2Header,
    pub body: Bytes,
}

/// What a handler produced.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: NtStatus,
    pub body: Bytes,
    /// Replaces the session id mirrored from the request.
    pub session_id: Option<u64>,
    /// Replaces the tree id mirrored from the request.
    pub tree_id: Option<u32>,
    /// Key to sign with when the session no longer holds one (LOGOFF).
    pub signing_key: Option<[u8; SESSION_KEY_LEN]>,
    /// False for commands that are never answered.
    pub reply: bool,
}

impl Response {
    pub fn ok(body: Bytes) -> Self {
        Self::with_status(NtStatus::Success, body)
    }

    /// A response whose body is sent along with a non-success status.
    pub fn with_status(status: NtStatus, body: Bytes) -> Self {
        Response {
            status,
            body,
            session_id: None,
            tree_id: None,
            signing_key: None,
            reply: true,
        }
    }

    pub fn no_reply() -> Self {
        Response {
            reply: false,
            ..Self::ok(Bytes::new())
        }
    }

    pub fn session_id(mut self, id: u64) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn tree_id(mut self, id: u32) -> Self {
        self.tree_id = Some(id);
        self
    }

    pub fn signing_key(mut self, key: Option<[u8; SESSION_KEY_LEN]>) -> Self {
        self.signing_key = key;
        self
    }
}

/// Why a handler did not produce a response body.
#[derive(Debug)]
pub enum Failure {
    /// Answer with this status and the error body.
    Status(NtStatus),
    /// The payload could not be decoded; the connection is closed.
    Malformed(DecodeError),
}

impl From<NtStatus> for Failure {
    fn from(status: NtStatus) -> Self {
        Failure::Status(status)
    }
}

impl From<DecodeError> for Failure {
    fn from(e: DecodeError) -> Self {
        Failure::Malformed(e)
    }
}

pub type HandlerResult = Result<Response, Failure>;

pub type Handler = for<'a> fn(&'a mut ConnectionState, &'a Request) -> BoxFuture<'a, HandlerResult>;

macro_rules! route {
    ($handler:path) => {{
        fn route<'a>(conn: &'a mut ConnectionState, req: &'a Request) -> BoxFuture<'a, HandlerResult> {
            Box::pin($handler(conn, req))
        }
        route as Handler
    }};
}

/// Handlers indexed by opcode.
static HANDLERS: [Handler; COMMAND_COUNT] = [
    route!(handlers::session::negotiate),      // 0x00 NEGOTIATE
    route!(handlers::session::session_setup),  // 0x01 SESSION_SETUP
    route!(handlers::session::logoff),         // 0x02 LOGOFF
    route!(handlers::tree::tree_connect),      // 0x03 TREE_CONNECT
    route!(handlers::tree::tree_disconnect),   // 0x04 TREE_DISCONNECT
    route!(handlers::file::create),            // 0x05 CREATE
    route!(handlers::file::close),             // 0x06 CLOSE
    route!(handlers::file::flush),             // 0x07 FLUSH
    route!(handlers::file::read),              // 0x08 READ
    route!(handlers::file::write),             // 0x09 WRITE
    route!(handlers::not_supported),           // 0x0A LOCK
    route!(handlers::not_supported),           // 0x0B IOCTL
    route!(handlers::session::cancel),         // 0x0C CANCEL
    route!(handlers::session::echo),           // 0x0D ECHO
    route!(handlers::info::query_directory),   // 0x0E QUERY_DIRECTORY
    route!(handlers::not_supported),           // 0x0F CHANGE_NOTIFY
    route!(handlers::info::query_info),        // 0x10 QUERY_INFO
    route!(handlers::info::set_info),          // 0x11 SET_INFO
    route!(handlers::not_supported),           // 0x12 OPLOCK_BREAK
];

/// Credits granted for a request asking for `requested`.
pub fn grant_credits(requested: u16) -> u16 {
    requested.clamp(MIN_CREDIT_GRANT, MAX_CREDIT_GRANT)
}

/// Whether a response must be signed.
///
/// Requires a session key, and either a signing requirement or a signed
/// request. NEGOTIATE is never signed, nor is a SESSION_SETUP response
/// that does not complete authentication.
pub fn should_sign(
    has_key: bool,
    signing_required: bool,
    request_signed: bool,
    command: Smb2Command,
    status: NtStatus,
) -> bool {
    has_key
        && (signing_required || request_signed)
        && command != Smb2Command::Negotiate
        && !(command == Smb2Command::SessionSetup && status != NtStatus::Success)
}

/// Process one transport frame. Returns the response message to send, or
/// `None` when the request is not answered.
///
/// Errors are connection-fatal.
pub async fn dispatch(conn: &mut ConnectionState, frame: Bytes) -> Result<Option<Bytes>, ServerError> {
    if frame.starts_with(&SMB1_MAGIC) {
        return Err(ServerError::Protocol("SMB1 is not supported".into()));
    }
    let (header, body) = decode_message(&frame)?;
    let message_len = SMB2_HEADER_SIZE + body.len();
    let request = Request {
        header,
        body: frame.slice(SMB2_HEADER_SIZE..message_len),
    };
    let header = &request.header;

    if header.is_response() {
        return Err(ServerError::Protocol("received a response message".into()));
    }
    let command = Smb2Command::from_u16(header.command);
    if conn.dialect.is_none() && command != Some(Smb2Command::Negotiate) {
        return Err(ServerError::Protocol(format!(
            "command 0x{:04x} before NEGOTIATE",
            header.command
        )));
    }
    // CANCEL reuses the message id of the request it targets.
    if command != Some(Smb2Command::Cancel) {
        if let Some(last) = conn.last_message_id {
            if header.message_id <= last {
                return Err(ServerError::Protocol(format!(
                    "message id {} does not follow {}",
                    header.message_id, last
                )));
            }
        }
        conn.last_message_id = Some(header.message_id);
    }

    let credits = grant_credits(header.credits);
    conn.credits_granted += u64::from(credits);

    let span = info_span!(
        "request",
        command = command.map(Smb2Command::name).unwrap_or("UNKNOWN"),
        message_id = header.message_id,
        session_id = header.session_id,
        tree_id = header.tree_id,
    );
    process(conn, &request, command, credits, &frame[..message_len])
        .instrument(span)
        .await
}

async fn process(
    conn: &mut ConnectionState,
    request: &Request,
    command: Option<Smb2Command>,
    credits: u16,
    message: &[u8],
) -> Result<Option<Bytes>, ServerError> {
    let header = &request.header;
    debug!("Received request");

    let outcome = if header.next_command != 0 || header.flags & FLAGS_RELATED_OPERATIONS != 0 {
        warn!(next_command = header.next_command, "Compound request rejected");
        Err(Failure::Status(NtStatus::NotSupported))
    } else if let Some(status) = check_signature(conn, header, command, message) {
        Err(Failure::Status(status))
    } else {
        match command {
            Some(cmd) => HANDLERS[cmd.as_u16() as usize](conn, request).await,
            None => {
                debug!(command = header.command, "Unknown command");
                Err(Failure::Status(NtStatus::NotSupported))
            }
        }
    };

    let response = match outcome {
        Ok(response) => response,
        Err(Failure::Status(status)) => {
            Response::with_status(status, Bytes::from(build_error_response_body()))
        }
        Err(Failure::Malformed(e)) => {
            warn!(error = %e, "Malformed request");
            return Err(e.into());
        }
    };
    if !response.reply {
        debug!("No response");
        return Ok(None);
    }

    let mut resp_header = Smb2Header::new_response(header, response.status, credits);
    if let Some(id) = response.session_id {
        resp_header.session_id = id;
    }
    if let Some(id) = response.tree_id {
        resp_header.tree_id = id;
    }

    let key = response
        .signing_key
        .or_else(|| conn.signing_key(resp_header.session_id).copied());
    let sign = command.is_some_and(|cmd| {
        should_sign(
            key.is_some(),
            conn.signing_required || conn.session_requires_signing(resp_header.session_id),
            header.is_signed(),
            cmd,
            response.status,
        )
    });
    if sign {
        resp_header.flags |= FLAGS_SIGNED;
    }

    let encoded = encode_message(&resp_header, &response.body);
    let encoded = match key {
        Some(key) if sign => {
            let mut signed = encoded.to_vec();
            sign_message(&key, &mut signed);
            Bytes::from(signed)
        }
        _ => encoded,
    };

    if response.status.is_error() {
        debug!(status = %response.status, "Request failed");
    } else {
        debug!(status = %response.status, signed = sign, "Request complete");
    }
    Ok(Some(encoded))
}

/// Verify the signature of a signed request, and refuse unsigned requests
/// on sessions that require signing. Returns the status to fail with.
fn check_signature(
    conn: &ConnectionState,
    header: &Smb2Header,
    command: Option<Smb2Command>,
    message: &[u8],
) -> Option<NtStatus> {
    let key = conn.signing_key(header.session_id)?;
    if header.is_signed() {
        if !verify_signature(key, message) {
            warn!("Request signature does not verify");
            return Some(NtStatus::AccessDenied);
        }
        return None;
    }
    let exempt = matches!(
        command,
        Some(Smb2Command::Negotiate | Smb2Command::SessionSetup | Smb2Command::Cancel)
    );
    if !exempt && (conn.signing_required || conn.session_requires_signing(header.session_id)) {
        warn!("Unsigned request on a session that requires signing");
        return Some(NtStatus::AccessDenied);
    }
    None
}
