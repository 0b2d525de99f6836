//! Command handlers, one per SMB2 opcode.
//!
//! Each handler decodes its request body, validates the session, tree and
//! handle it refers to, performs its state transition (calling into the
//! tree's backing store where needed) and returns the encoded response
//! body or a failure status.

pub mod file;
pub mod info;
pub mod session;
pub mod tree;

use std::io;

use tracing::debug;

use crate::dispatch::{Failure, HandlerResult, Request};
use crate::error::io_to_ntstatus;
use crate::smb2::status::NtStatus;
use crate::state::{ConnectionState, TreeConnection};

/// Map a backing-store error to the status reported to the client.
pub(crate) fn io_failure(e: io::Error) -> Failure {
    let status = io_to_ntstatus(&e);
    debug!(error = %e, status = %status, "Backing store error");
    Failure::Status(status)
}

/// Resolve the session and tree named in the request header.
pub(crate) fn tree_of<'a>(
    conn: &'a mut ConnectionState,
    req: &Request,
) -> Result<&'a mut TreeConnection, NtStatus> {
    conn.validate_session(req.header.session_id)?
        .validate_tree(req.header.tree_id)
}

/// LOCK, IOCTL, CHANGE_NOTIFY and OPLOCK_BREAK.
pub async fn not_supported(_conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    debug!(command = req.header.command, "Command not supported");
    Err(Failure::Status(NtStatus::NotSupported))
}
