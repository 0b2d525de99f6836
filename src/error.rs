//! Error types for the SMB2 engine.
//!
//! Connection-fatal failures are [`ServerError`]s. Everything a client
//! can recover from is reported as an [`NtStatus`] in the response header;
//! backing-store I/O errors are mapped to the nearest status here.

use std::io::{self, ErrorKind};

use thiserror::Error;

use crate::smb2::status::NtStatus;
use crate::smb2::DecodeError;

/// Errors that terminate a connection.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Map an `std::io::Error` to the most appropriate NT status code.
pub fn io_to_ntstatus(e: &io::Error) -> NtStatus {
    match e.kind() {
        ErrorKind::NotFound => NtStatus::ObjectNameNotFound,
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => NtStatus::AccessDenied,
        ErrorKind::AlreadyExists => NtStatus::ObjectNameCollision,
        ErrorKind::InvalidInput => NtStatus::ObjectNameInvalid,
        ErrorKind::UnexpectedEof => NtStatus::EndOfFile,
        ErrorKind::DirectoryNotEmpty => NtStatus::DirectoryNotEmpty,
        ErrorKind::NotADirectory => NtStatus::NotADirectory,
        ErrorKind::IsADirectory => NtStatus::FileIsADirectory,
        ErrorKind::StorageFull | ErrorKind::FileTooLarge => NtStatus::DiskFull,
        ErrorKind::Unsupported => NtStatus::NotSupported,
        ErrorKind::OutOfMemory => NtStatus::InsufficientResources,
        _ => NtStatus::Unsuccessful,
    }
}

/// Status reported for a connection-level error, used in traces.
pub fn error_to_ntstatus(e: &ServerError) -> NtStatus {
    match e {
        ServerError::Io(io_err) => io_to_ntstatus(io_err),
        ServerError::Decode(_) => NtStatus::InvalidParameter,
        ServerError::Protocol(_) => NtStatus::InvalidParameter,
    }
}

/// Build the 9-byte SMB2 error response body (no error data).
/// MS-SMB2 2.2.2
pub fn build_error_response_body() -> Vec<u8> {
    let mut buf = vec![0u8; 9];
    buf[0] = 9;
    // ErrorContextCount, Reserved, ByteCount and the one byte of ErrorData
    // stay zero.
    buf
}
