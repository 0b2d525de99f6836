mod common;

use std::collections::HashSet;

use bytes::Bytes;
use tempfile::TempDir;

use common::{connect, engine, memory_share, test_config};
use smb2_engine::config::{Config, ShareBackend, ShareConfig, UserConfig};
use smb2_engine::signing::verify_signature;
use smb2_engine::smb2::create::{
    CreateResponse, DELETE, FILE_CREATE, FILE_CREATED, FILE_DELETE_ON_CLOSE, FILE_DIRECTORY_FILE,
    FILE_NON_DIRECTORY_FILE, FILE_OPEN, FILE_OPENED, FILE_OPEN_IF, FILE_OVERWRITE_IF,
    FILE_OVERWRITTEN, GENERIC_ALL, GENERIC_READ, GENERIC_WRITE,
};
use smb2_engine::smb2::echo::{encode_cancel, encode_echo};
use smb2_engine::smb2::header::{encode_message, FLAGS_SIGNED, SMB1_MAGIC};
use smb2_engine::smb2::info::{
    parse_directory_names, RenameInfo, FILE_DISPOSITION_INFORMATION, FILE_END_OF_FILE_INFORMATION,
    FILE_FS_VOLUME_INFORMATION,
    FILE_NAMES_INFORMATION, FILE_RENAME_INFORMATION, FILE_STANDARD_INFORMATION, SMB2_0_INFO_FILE,
    SMB2_0_INFO_FILESYSTEM, SMB2_0_INFO_SECURITY,
};
use smb2_engine::smb2::negotiate::{
    NegotiateResponse, CAP_LARGE_MTU, DIALECT_SMB2_0_2, DIALECT_SMB2_1, SECURITY_SIGNING_REQUIRED,
};
use smb2_engine::smb2::query::{OutputBufferResponse, SL_RESTART_SCAN};
use smb2_engine::smb2::session::{encode_logoff, SessionSetupResponse, SESSION_FLAG_IS_GUEST};
use smb2_engine::smb2::status::NtStatus;
use smb2_engine::smb2::tree::encode_tree_disconnect;
use smb2_engine::smb2::Smb2Command;
use smb2_engine::vfs::BackingStore;

const RW: u32 = GENERIC_READ | GENERIC_WRITE;

fn standard_end_of_file(reply: &common::Reply) -> u64 {
    let data = OutputBufferResponse::decode(&reply.body).unwrap().data;
    u64::from_le_bytes(data[8..16].try_into().unwrap())
}

#[tokio::test]
async fn test_negotiate_prefers_smb21() {
    let mut conn = connect(engine(test_config()));
    let reply = conn.client.negotiate().await;
    let resp = NegotiateResponse::decode(&reply.body).unwrap();
    assert_eq!(resp.dialect, DIALECT_SMB2_1);
    assert_ne!(resp.capabilities & CAP_LARGE_MTU, 0);
    assert_eq!(resp.security_mode & SECURITY_SIGNING_REQUIRED, 0);
    assert!(!resp.security_buffer.is_empty());

    let again = conn.client.negotiate_with(0x0001, vec![DIALECT_SMB2_1]).await;
    assert_eq!(again.status(), NtStatus::InvalidParameter);
}

#[tokio::test]
async fn test_negotiate_smb202_caps_io_sizes() {
    let mut conn = connect(engine(test_config()));
    let reply = conn.client.negotiate_with(0x0001, vec![DIALECT_SMB2_0_2]).await;
    assert_eq!(reply.status(), NtStatus::Success);
    let resp = NegotiateResponse::decode(&reply.body).unwrap();
    assert_eq!(resp.dialect, DIALECT_SMB2_0_2);
    assert_eq!(resp.max_read_size, 65536);
    assert_eq!(resp.max_write_size, 65536);
    assert_eq!(resp.capabilities & CAP_LARGE_MTU, 0);
}

#[tokio::test]
async fn test_negotiate_without_common_dialect() {
    let mut conn = connect(engine(test_config()));
    let reply = conn.client.negotiate_with(0x0001, vec![0x0300, 0x0302]).await;
    assert_eq!(reply.status(), NtStatus::NotSupported);
}

#[tokio::test]
async fn test_credit_grant_is_clamped() {
    let mut conn = connect(engine(test_config()));
    conn.client.credits = 0;
    let reply = conn.client.negotiate().await;
    assert_eq!(reply.header.credits, 10);

    conn.client.credits = 100;
    let reply = conn.client.call(Smb2Command::Echo, encode_echo()).await;
    assert_eq!(reply.header.credits, 100);

    conn.client.credits = 9000;
    let reply = conn.client.call(Smb2Command::Echo, encode_echo()).await;
    assert_eq!(reply.header.credits, 8192);
}

#[tokio::test]
async fn test_user_login_and_tree_connect() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;
    let reply = conn.client.login("alice").await;
    assert_eq!(reply.status(), NtStatus::Success);
    let resp = SessionSetupResponse::decode(&reply.body).unwrap();
    assert_eq!(resp.session_flags & SESSION_FLAG_IS_GUEST, 0);
    assert_eq!(reply.header.session_id, conn.client.session_id);

    let tree = conn.client.tree_connect("DATA").await;
    assert_eq!(tree.status(), NtStatus::Success);
    assert_ne!(tree.header.tree_id, 0);
}

#[tokio::test]
async fn test_unknown_user_becomes_guest() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;
    let reply = conn.client.login("visitor").await;
    assert_eq!(reply.status(), NtStatus::Success);
    let resp = SessionSetupResponse::decode(&reply.body).unwrap();
    assert_ne!(resp.session_flags & SESSION_FLAG_IS_GUEST, 0);

    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::AccessDenied);
    assert_eq!(conn.client.tree_connect("public").await.status(), NtStatus::Success);
}

#[tokio::test]
async fn test_logon_failure_without_guest_access() {
    let mut config = Config::new("testsrv", 0);
    config.shares.push(memory_share("data"));
    config.users.push(UserConfig {
        username: "alice".to_string(),
        password: "secret".to_string(),
    });
    let mut conn = connect(engine(config));
    conn.client.negotiate().await;

    let reply = conn.client.login("mallory").await;
    assert_eq!(reply.status(), NtStatus::LogonFailure);
    // The failed session is gone.
    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::SessionExpired);
}

#[tokio::test]
async fn test_wrong_password_is_logon_failure() {
    // Guest access is on, but a known account must still prove its password.
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;

    let reply = conn.client.login_with("alice", "not-the-password", 0x01).await;
    assert_eq!(reply.status(), NtStatus::LogonFailure);
    assert!(conn.client.signing_key.is_none());
    assert_eq!(conn.client.tree_connect("public").await.status(), NtStatus::SessionExpired);

    conn.client.session_id = 0;
    assert_eq!(conn.client.login("alice").await.status(), NtStatus::Success);
    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::Success);
}

#[tokio::test]
async fn test_unknown_session_is_expired() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;
    let fid = conn.client.create("f.txt", RW, FILE_CREATE, 0).await.unwrap().file_id;

    conn.client.session_id = 0xDEAD_BEEF;
    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::SessionExpired);
    assert_eq!(conn.client.create_raw("g.txt", RW, FILE_CREATE, 0).await.status(), NtStatus::SessionExpired);
    assert_eq!(conn.client.write(fid, 0, b"x").await, Err(NtStatus::SessionExpired));
    assert_eq!(conn.client.read(fid, 0, 1).await, Err(NtStatus::SessionExpired));
    assert_eq!(
        conn.client.query_info(fid, SMB2_0_INFO_FILE, FILE_STANDARD_INFORMATION, 1024).await.status(),
        NtStatus::SessionExpired
    );
    assert_eq!(conn.client.close(fid).await.status(), NtStatus::SessionExpired);
    assert_eq!(
        conn.client.call(Smb2Command::Logoff, encode_logoff()).await.status(),
        NtStatus::SessionExpired
    );
}

#[tokio::test]
async fn test_unknown_share_and_ipc_are_refused() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;
    conn.client.login("alice").await;
    assert_eq!(conn.client.tree_connect("nosuch").await.status(), NtStatus::BadNetworkName);
    assert_eq!(conn.client.tree_connect("IPC$").await.status(), NtStatus::BadNetworkName);
}

#[tokio::test]
async fn test_session_limit() {
    let mut config = test_config();
    config.max_sessions_per_connection = 1;
    let mut conn = connect(engine(config));
    conn.client.negotiate().await;
    assert_eq!(conn.client.login("alice").await.status(), NtStatus::Success);

    conn.client.session_id = 0;
    let reply = conn
        .client
        .session_setup(0x01, smb2_engine::auth::build_negotiate_message())
        .await;
    assert_eq!(reply.status(), NtStatus::InsufficientResources);
}

#[tokio::test]
async fn test_write_then_read_at_offsets() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let created = conn
        .client
        .create("hello.txt", RW, FILE_CREATE, FILE_NON_DIRECTORY_FILE)
        .await
        .unwrap();
    assert_eq!(created.create_action, FILE_CREATED);
    let fid = created.file_id;

    assert_eq!(conn.client.write(fid, 0, b"hello world").await, Ok(11));
    assert_eq!(conn.client.write(fid, 6, b"there").await, Ok(5));
    assert_eq!(conn.client.read(fid, 0, 100).await.unwrap(), Bytes::from_static(b"hello there"));
    assert_eq!(conn.client.read(fid, 6, 5).await.unwrap(), Bytes::from_static(b"there"));
    assert_eq!(conn.client.read(fid, 100, 10).await, Err(NtStatus::EndOfFile));

    // Offset 0xFFFFFFFFFFFFFFFF appends.
    assert_eq!(conn.client.write(fid, u64::MAX, b"!").await, Ok(1));
    let closed = conn.client.close_with_attributes(fid).await;
    assert_eq!(closed.attributes.unwrap().end_of_file, 12);

    let reopened = conn
        .client
        .create("hello.txt", GENERIC_READ, FILE_OPEN, 0)
        .await
        .unwrap();
    assert_eq!(reopened.create_action, FILE_OPENED);
    assert_eq!(reopened.info.end_of_file, 12);
}

#[tokio::test]
async fn test_huge_write_offset_on_memory_share() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;
    let fid = conn.client.create("sparse.bin", RW, FILE_CREATE, 0).await.unwrap().file_id;

    assert_eq!(conn.client.write(fid, 1 << 46, b"x").await, Err(NtStatus::DiskFull));
    let mut eof = (1u64 << 46).to_le_bytes().to_vec();
    let reply = conn.client.set_info(fid, SMB2_0_INFO_FILE, FILE_END_OF_FILE_INFORMATION, eof.clone()).await;
    assert_eq!(reply.status(), NtStatus::DiskFull);

    // The connection is still serving requests.
    assert_eq!(conn.client.write(fid, 0, b"fine").await, Ok(4));
    assert_eq!(&conn.client.read(fid, 0, 4).await.unwrap()[..], b"fine");
    eof = 2u64.to_le_bytes().to_vec();
    let reply = conn.client.set_info(fid, SMB2_0_INFO_FILE, FILE_END_OF_FILE_INFORMATION, eof).await;
    assert_eq!(reply.status(), NtStatus::Success);
    assert_eq!(&conn.client.read(fid, 0, 4).await.unwrap()[..], b"fi");
}

#[tokio::test]
async fn test_create_dispositions() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let fid = conn
        .client
        .create("file.txt", RW, FILE_CREATE, 0)
        .await
        .unwrap()
        .file_id;
    conn.client.write(fid, 0, b"contents").await.unwrap();
    conn.client.close(fid).await;

    assert_eq!(
        conn.client.create("file.txt", RW, FILE_CREATE, 0).await,
        Err(NtStatus::ObjectNameCollision)
    );
    assert_eq!(
        conn.client.create("absent.txt", GENERIC_READ, FILE_OPEN, 0).await,
        Err(NtStatus::ObjectNameNotFound)
    );
    assert_eq!(
        conn.client.create("nodir\\absent.txt", GENERIC_READ, FILE_OPEN, 0).await,
        Err(NtStatus::ObjectPathNotFound)
    );
    assert_eq!(
        conn.client.create("nodir\\new.txt", RW, FILE_CREATE, 0).await,
        Err(NtStatus::ObjectPathNotFound)
    );
    assert_eq!(
        conn.client.create("file.txt", GENERIC_READ, FILE_OPEN, FILE_DIRECTORY_FILE).await,
        Err(NtStatus::NotADirectory)
    );

    let overwritten: CreateResponse = conn
        .client
        .create("file.txt", RW, FILE_OVERWRITE_IF, 0)
        .await
        .unwrap();
    assert_eq!(overwritten.create_action, FILE_OVERWRITTEN);
    assert_eq!(overwritten.info.end_of_file, 0);
}

#[tokio::test]
async fn test_read_only_share_refuses_writes() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("ro").await;
    assert_eq!(
        conn.client.create("new.txt", RW, FILE_OPEN_IF, 0).await,
        Err(NtStatus::AccessDenied)
    );
    assert_eq!(
        conn.client.create("new.txt", GENERIC_READ, FILE_CREATE, 0).await,
        Err(NtStatus::AccessDenied)
    );
}

#[tokio::test]
async fn test_open_file_limit() {
    let mut config = test_config();
    config.max_open_files_per_tree = 2;
    let mut conn = connect(engine(config));
    conn.client.mount("data").await;

    conn.client.create("a", RW, FILE_CREATE, 0).await.unwrap();
    conn.client.create("b", RW, FILE_CREATE, 0).await.unwrap();
    assert_eq!(
        conn.client.create("c", RW, FILE_CREATE, 0).await,
        Err(NtStatus::InsufficientResources)
    );
}

#[tokio::test]
async fn test_directory_listing_pages() {
    const FILES: usize = 10;
    const PER_PAGE: usize = 3;

    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let dir = conn
        .client
        .create("listing", GENERIC_ALL, FILE_CREATE, FILE_DIRECTORY_FILE)
        .await
        .unwrap();
    conn.client.close(dir.file_id).await;
    for i in 0..FILES {
        let name = format!("listing\\file{i:02}");
        let fid = conn.client.create(&name, RW, FILE_CREATE, 0).await.unwrap().file_id;
        conn.client.close(fid).await;
    }

    let dir = conn
        .client
        .create("listing", GENERIC_READ, FILE_OPEN, FILE_DIRECTORY_FILE)
        .await
        .unwrap()
        .file_id;

    // FileNamesInformation entries for "fileNN" are 12 + 12 bytes.
    let buffer = (24 * PER_PAGE) as u32;
    let mut names = Vec::new();
    let mut calls = 0;
    loop {
        let reply = conn
            .client
            .query_directory(dir, FILE_NAMES_INFORMATION, 0, "*", buffer)
            .await;
        if reply.status() == NtStatus::NoMoreFiles {
            break;
        }
        assert_eq!(reply.status(), NtStatus::Success);
        calls += 1;
        let data = OutputBufferResponse::decode(&reply.body).unwrap().data;
        assert!(data.len() <= buffer as usize);
        names.extend(parse_directory_names(FILE_NAMES_INFORMATION, &data).unwrap());
    }
    assert_eq!(calls, FILES.div_ceil(PER_PAGE));
    assert_eq!(names.len(), FILES);
    assert_eq!(names.iter().collect::<HashSet<_>>().len(), FILES);

    // A restart lists again from the beginning, with the new pattern.
    let reply = conn
        .client
        .query_directory(dir, FILE_NAMES_INFORMATION, SL_RESTART_SCAN, "*.txt", 4096)
        .await;
    assert_eq!(reply.status(), NtStatus::NoMoreFiles);
    let reply = conn
        .client
        .query_directory(dir, FILE_NAMES_INFORMATION, SL_RESTART_SCAN, "file0?", 4096)
        .await;
    let data = OutputBufferResponse::decode(&reply.body).unwrap().data;
    assert_eq!(parse_directory_names(FILE_NAMES_INFORMATION, &data).unwrap().len(), FILES);
}

#[tokio::test]
async fn test_directory_listing_buffer_too_small() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;
    conn.client.create("long-file-name.txt", RW, FILE_CREATE, 0).await.unwrap();
    let root = conn
        .client
        .create("", GENERIC_READ, FILE_OPEN, FILE_DIRECTORY_FILE)
        .await
        .unwrap()
        .file_id;

    let reply = conn
        .client
        .query_directory(root, FILE_NAMES_INFORMATION, 0, "*", 16)
        .await;
    assert_eq!(reply.status(), NtStatus::BufferTooSmall);
}

#[tokio::test]
async fn test_tree_disconnect_closes_handles() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;
    let fid = conn.client.create("f.txt", RW, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.write(fid, 0, b"data").await.unwrap();

    let old_tree = conn.client.tree_id;
    let reply = conn
        .client
        .call(Smb2Command::TreeDisconnect, encode_tree_disconnect())
        .await;
    assert_eq!(reply.status(), NtStatus::Success);
    assert_eq!(conn.client.read(fid, 0, 4).await, Err(NtStatus::NetworkNameDeleted));

    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::Success);
    assert_ne!(conn.client.tree_id, old_tree);
    assert_eq!(conn.client.read(fid, 0, 4).await, Err(NtStatus::FileClosed));
}

#[tokio::test]
async fn test_signing_required_responses_are_signed() {
    let mut config = test_config();
    config.signing_required = true;
    let mut conn = connect(engine(config));

    let reply = conn.client.negotiate().await;
    assert!(!reply.is_signed());
    let resp = NegotiateResponse::decode(&reply.body).unwrap();
    assert_ne!(resp.security_mode & SECURITY_SIGNING_REQUIRED, 0);

    let first = conn
        .client
        .session_setup(0x01, smb2_engine::auth::build_negotiate_message())
        .await;
    assert_eq!(first.status(), NtStatus::MoreProcessingRequired);
    assert!(!first.is_signed());

    let reply = conn.client.login("alice").await;
    assert_eq!(reply.status(), NtStatus::Success);
    let key = conn.client.signing_key.unwrap();
    assert!(reply.is_signed());
    assert!(verify_signature(&key, &reply.raw));

    conn.client.sign_requests = true;
    let tree = conn.client.tree_connect("data").await;
    assert_eq!(tree.status(), NtStatus::Success);
    assert!(tree.is_signed());
    assert!(verify_signature(&key, &tree.raw));

    conn.client.sign_requests = false;
    let unsigned = conn.client.call(Smb2Command::Echo, encode_echo()).await;
    assert_eq!(unsigned.status(), NtStatus::AccessDenied);

    // Tampering after signing breaks verification.
    let mut header = conn.client.header(Smb2Command::Echo);
    header.flags |= FLAGS_SIGNED;
    let mut message = encode_message(&header, &encode_echo()).to_vec();
    smb2_engine::signing::sign_message(&key, &mut message);
    message[64] ^= 0xFF;
    conn.client.send_raw(&message).await;
    assert_eq!(conn.client.recv().await.status(), NtStatus::AccessDenied);

    // LOGOFF drops the key, but its own response is still signed with it.
    conn.client.sign_requests = true;
    let logoff = conn.client.call(Smb2Command::Logoff, encode_logoff()).await;
    assert_eq!(logoff.status(), NtStatus::Success);
    assert!(logoff.is_signed());
    assert!(verify_signature(&key, &logoff.raw));
}

#[tokio::test]
async fn test_logoff_twice() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let reply = conn.client.call(Smb2Command::Logoff, encode_logoff()).await;
    assert_eq!(reply.status(), NtStatus::Success);
    let reply = conn.client.call(Smb2Command::Logoff, encode_logoff()).await;
    assert_eq!(reply.status(), NtStatus::UserSessionDeleted);
    assert_eq!(conn.client.tree_connect("data").await.status(), NtStatus::SessionExpired);
}

#[tokio::test]
async fn test_identifiers_are_never_reused() {
    let engine = engine(test_config());
    let mut a = connect(engine.clone());
    let mut b = connect(engine);
    a.client.mount("data").await;
    b.client.mount("data").await;
    assert_ne!(a.client.session_id, b.client.session_id);
    assert_ne!(a.client.tree_id, b.client.tree_id);

    let mut handles = HashSet::new();
    for name in ["one", "two"] {
        let fid = a.client.create(name, RW, FILE_CREATE, 0).await.unwrap().file_id;
        assert!(handles.insert(fid));
        a.client.close(fid).await;
        let fid = a.client.create(name, GENERIC_READ, FILE_OPEN, 0).await.unwrap().file_id;
        assert!(handles.insert(fid));
        a.client.close(fid).await;
    }
    let fid = b.client.create("three", RW, FILE_CREATE, 0).await.unwrap().file_id;
    assert!(handles.insert(fid));
}

#[tokio::test]
async fn test_unknown_and_unsupported_commands() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;

    let mut header = conn.client.header(Smb2Command::Echo);
    header.command = 0x0013;
    conn.client.send_message(&header, &encode_echo()).await;
    let reply = conn.client.recv().await;
    assert_eq!(reply.status(), NtStatus::NotSupported);
    assert_eq!(reply.body.len(), 9);
    assert_eq!(reply.body[0], 9);

    let reply = conn
        .client
        .call(Smb2Command::Lock, Bytes::from_static(&[48, 0, 0, 0]))
        .await;
    assert_eq!(reply.status(), NtStatus::NotSupported);

    // The connection is still usable.
    let reply = conn.client.call(Smb2Command::Echo, encode_echo()).await;
    assert_eq!(reply.status(), NtStatus::Success);
}

#[tokio::test]
async fn test_cancel_gets_no_response() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;

    let header = conn.client.header(Smb2Command::Cancel);
    conn.client.send_message(&header, &encode_cancel()).await;
    let reply = conn.client.call(Smb2Command::Echo, encode_echo()).await;
    assert_eq!(reply.header.command, Smb2Command::Echo.as_u16());
    assert_eq!(reply.status(), NtStatus::Success);
}

#[tokio::test]
async fn test_compound_request_not_supported() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;

    let mut first = conn.client.header(Smb2Command::Echo);
    first.next_command = 72;
    let second = conn.client.header(Smb2Command::Echo);
    let mut frame = encode_message(&first, &encode_echo()).to_vec();
    frame.resize(72, 0);
    frame.extend_from_slice(&encode_message(&second, &encode_echo()));
    conn.client.send_raw(&frame).await;

    let reply = conn.client.recv().await;
    assert_eq!(reply.header.message_id, first.message_id);
    assert_eq!(reply.status(), NtStatus::NotSupported);
}

#[tokio::test]
async fn test_message_id_replay_closes_connection() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;

    let mut header = conn.client.header(Smb2Command::Echo);
    header.message_id = 0;
    conn.client.send_message(&header, &encode_echo()).await;
    assert!(conn.client.closed().await);
    assert!(conn.task.await.unwrap().is_err());
}

#[tokio::test]
async fn test_request_before_negotiate_closes_connection() {
    let mut conn = connect(engine(test_config()));
    let header = conn.client.header(Smb2Command::Echo);
    conn.client.send_message(&header, &encode_echo()).await;
    assert!(conn.client.closed().await);
    assert!(conn.task.await.unwrap().is_err());
}

#[tokio::test]
async fn test_smb1_closes_connection() {
    let mut conn = connect(engine(test_config()));
    let mut frame = SMB1_MAGIC.to_vec();
    frame.resize(64, 0);
    conn.client.send_raw(&frame).await;
    assert!(conn.client.closed().await);
    assert!(conn.task.await.unwrap().is_err());
}

#[tokio::test]
async fn test_delete_on_close() {
    let engine = engine(test_config());
    let mut conn = connect(engine.clone());
    conn.client.mount("data").await;

    let fid = conn
        .client
        .create("temp.txt", RW | DELETE, FILE_CREATE, FILE_DELETE_ON_CLOSE)
        .await
        .unwrap()
        .file_id;
    conn.client.write(fid, 0, b"scratch").await.unwrap();
    assert_eq!(conn.client.close(fid).await.status(), NtStatus::Success);
    assert_eq!(
        conn.client.create("temp.txt", GENERIC_READ, FILE_OPEN, 0).await,
        Err(NtStatus::ObjectNameNotFound)
    );

    // Delete-on-close without DELETE access is refused.
    assert_eq!(
        conn.client.create("temp.txt", RW, FILE_CREATE, FILE_DELETE_ON_CLOSE).await,
        Err(NtStatus::AccessDenied)
    );
    assert!(engine.share("data").unwrap().store.stat("temp.txt").await.is_err());
}

#[tokio::test]
async fn test_disposition_and_non_empty_directory() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let fid = conn.client.create("gone.txt", RW | DELETE, FILE_CREATE, 0).await.unwrap().file_id;
    let reply = conn
        .client
        .set_info(fid, SMB2_0_INFO_FILE, FILE_DISPOSITION_INFORMATION, vec![1])
        .await;
    assert_eq!(reply.status(), NtStatus::Success);
    conn.client.close(fid).await;
    assert_eq!(
        conn.client.create("gone.txt", GENERIC_READ, FILE_OPEN, 0).await,
        Err(NtStatus::ObjectNameNotFound)
    );

    let dir = conn
        .client
        .create("full", GENERIC_ALL, FILE_CREATE, FILE_DIRECTORY_FILE)
        .await
        .unwrap()
        .file_id;
    let child = conn.client.create("full\\a", RW, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.close(child).await;
    let reply = conn
        .client
        .set_info(dir, SMB2_0_INFO_FILE, FILE_DISPOSITION_INFORMATION, vec![1])
        .await;
    assert_eq!(reply.status(), NtStatus::DirectoryNotEmpty);
}

#[tokio::test]
async fn test_rename() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;

    let b = conn.client.create("b.txt", RW, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.close(b).await;
    let a = conn.client.create("a.txt", RW | DELETE, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.write(a, 0, b"from a").await.unwrap();

    let rename = |replace_if_exists| {
        RenameInfo {
            replace_if_exists,
            file_name: "b.txt".to_string(),
        }
        .encode()
    };
    let reply = conn
        .client
        .set_info(a, SMB2_0_INFO_FILE, FILE_RENAME_INFORMATION, rename(false))
        .await;
    assert_eq!(reply.status(), NtStatus::ObjectNameCollision);

    let reply = conn
        .client
        .set_info(a, SMB2_0_INFO_FILE, FILE_RENAME_INFORMATION, rename(true))
        .await;
    assert_eq!(reply.status(), NtStatus::Success);

    // The open handle follows the file.
    assert_eq!(conn.client.read(a, 0, 64).await.unwrap(), Bytes::from_static(b"from a"));
    assert_eq!(
        conn.client.create("a.txt", GENERIC_READ, FILE_OPEN, 0).await,
        Err(NtStatus::ObjectNameNotFound)
    );
}

#[tokio::test]
async fn test_query_info_classes() {
    let mut conn = connect(engine(test_config()));
    conn.client.mount("data").await;
    let fid = conn.client.create("q.txt", RW, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.write(fid, 0, &[0u8; 1000]).await.unwrap();

    let reply = conn
        .client
        .query_info(fid, SMB2_0_INFO_FILE, FILE_STANDARD_INFORMATION, 1024)
        .await;
    assert_eq!(reply.status(), NtStatus::Success);
    assert_eq!(standard_end_of_file(&reply), 1000);

    let reply = conn
        .client
        .query_info(fid, SMB2_0_INFO_FILE, FILE_STANDARD_INFORMATION, 4)
        .await;
    assert_eq!(reply.status(), NtStatus::BufferOverflow);
    assert_eq!(OutputBufferResponse::decode(&reply.body).unwrap().data.len(), 4);

    let reply = conn
        .client
        .query_info(fid, SMB2_0_INFO_FILESYSTEM, FILE_FS_VOLUME_INFORMATION, 1024)
        .await;
    assert_eq!(reply.status(), NtStatus::Success);

    let reply = conn.client.query_info(fid, SMB2_0_INFO_SECURITY, 0, 1024).await;
    assert_eq!(reply.status(), NtStatus::NotSupported);
}

#[tokio::test]
async fn test_disconnect_runs_delete_on_close() {
    let engine = engine(test_config());
    let common::Connection {
        mut client,
        task,
        shutdown: _shutdown,
    } = connect(engine.clone());
    client.mount("data").await;
    client
        .create("doomed.txt", RW | DELETE, FILE_CREATE, FILE_DELETE_ON_CLOSE)
        .await
        .unwrap();
    client.create("kept.txt", RW, FILE_CREATE, 0).await.unwrap();

    drop(client);
    task.await.unwrap().unwrap();

    let store = engine.share("data").unwrap().store.clone();
    assert!(store.stat("doomed.txt").await.is_err());
    assert!(store.stat("kept.txt").await.is_ok());
}

#[tokio::test]
async fn test_shutdown_ends_connection() {
    let mut conn = connect(engine(test_config()));
    conn.client.negotiate().await;
    conn.shutdown.send(true).unwrap();
    conn.task.await.unwrap().unwrap();
    assert!(conn.client.closed().await);
}

#[tokio::test]
async fn test_local_share_writes_to_disk() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("existing.txt"), b"on disk").unwrap();

    let mut config = test_config();
    config.shares.push(ShareConfig {
        name: "disk".to_string(),
        path: Some(tmp.path().to_path_buf()),
        backend: ShareBackend::Local,
        read_only: false,
        guest_ok: false,
    });
    let mut conn = connect(engine(config));
    conn.client.mount("disk").await;

    let existing = conn
        .client
        .create("existing.txt", GENERIC_READ, FILE_OPEN, 0)
        .await
        .unwrap();
    assert_eq!(existing.info.end_of_file, 7);
    assert_eq!(
        conn.client.read(existing.file_id, 0, 64).await.unwrap(),
        Bytes::from_static(b"on disk")
    );

    let fid = conn.client.create("new.txt", RW, FILE_CREATE, 0).await.unwrap().file_id;
    conn.client.write(fid, 0, b"written over smb").await.unwrap();
    conn.client.close(fid).await;
    assert_eq!(std::fs::read(tmp.path().join("new.txt")).unwrap(), b"written over smb");
}
