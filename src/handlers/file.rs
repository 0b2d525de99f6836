//! CREATE, CLOSE, FLUSH, READ and WRITE.

use std::io::ErrorKind;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::dispatch::{Failure, HandlerResult, Request, Response};
use crate::handlers::{io_failure, tree_of};
use crate::smb2::close::{CloseRequest, CloseResponse};
use crate::smb2::create::{
    CreateRequest, CreateResponse, DELETE, FILE_APPEND_DATA, FILE_CREATE, FILE_CREATED,
    FILE_OPEN, FILE_OPENED, FILE_OPEN_IF, FILE_OVERWRITE, FILE_OVERWRITE_IF, FILE_OVERWRITTEN,
    FILE_READ_ATTRIBUTES, FILE_READ_DATA, FILE_SUPERSEDE, FILE_SUPERSEDED, FILE_WRITE_DATA,
    GENERIC_ALL, GENERIC_READ, GENERIC_WRITE, MAXIMUM_ALLOWED,
};
use crate::smb2::flush::{encode_flush_response, FlushRequest};
use crate::smb2::info::FileInfo;
use crate::smb2::read::{ReadRequest, ReadResponse};
use crate::smb2::status::NtStatus;
use crate::smb2::tree::{MAXIMAL_ACCESS_FULL, MAXIMAL_ACCESS_READ};
use crate::smb2::write::{WriteRequest, WriteResponse};
use crate::smb2::FileId;
use crate::state::{ConnectionState, FileHandle};
use crate::vfs::{normalize_path, parent_path, BackingStore, FileStat, OpenOptions};

const GENERIC_EXECUTE: u32 = 0x2000_0000;
const FILE_GENERIC_WRITE: u32 = 0x0012_0116;
const FILE_GENERIC_EXECUTE: u32 = 0x0012_00A0;

/// A WRITE at this offset appends at end of file.
const APPEND_OFFSET: u64 = u64::MAX;

/// Expand generic rights in a desired-access mask into the rights a handle
/// holds. Read-only shares never grant modifying rights.
pub(crate) fn grant_access(desired: u32, read_only: bool) -> u32 {
    let mut granted = if desired & (GENERIC_ALL | MAXIMUM_ALLOWED) != 0 {
        MAXIMAL_ACCESS_FULL
    } else {
        desired & MAXIMAL_ACCESS_FULL
    };
    if desired & GENERIC_READ != 0 {
        granted |= MAXIMAL_ACCESS_READ;
    }
    if desired & GENERIC_WRITE != 0 {
        granted |= FILE_GENERIC_WRITE;
    }
    if desired & GENERIC_EXECUTE != 0 {
        granted |= FILE_GENERIC_EXECUTE;
    }
    if read_only {
        granted &= MAXIMAL_ACCESS_READ;
    }
    granted | FILE_READ_ATTRIBUTES
}

/// Status for a path that does not exist: a missing parent is reported
/// differently from a missing final component.
async fn missing(store: &dyn BackingStore, path: &str) -> Failure {
    match store.stat(parent_path(path)).await {
        Ok(parent) if parent.is_dir => NtStatus::ObjectNameNotFound.into(),
        _ => NtStatus::ObjectPathNotFound.into(),
    }
}

/// Apply the create disposition to `path`, returning the resulting
/// metadata and the create action.
async fn open_path(
    store: &dyn BackingStore,
    path: &str,
    request: &CreateRequest,
    read_only: bool,
) -> Result<(FileStat, u32), Failure> {
    let disposition = request.create_disposition;
    let existing = match store.stat(path).await {
        Ok(stat) => Some(stat),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(io_failure(e)),
    };

    match existing {
        Some(_) if disposition == FILE_CREATE => Err(NtStatus::ObjectNameCollision.into()),
        Some(stat) if stat.is_dir => {
            if request.non_directory_required() {
                return Err(NtStatus::FileIsADirectory.into());
            }
            if disposition != FILE_OPEN && disposition != FILE_OPEN_IF {
                return Err(NtStatus::FileIsADirectory.into());
            }
            Ok((stat, FILE_OPENED))
        }
        Some(stat) => {
            if request.directory_required() {
                return Err(NtStatus::NotADirectory.into());
            }
            if disposition == FILE_OPEN || disposition == FILE_OPEN_IF {
                return Ok((stat, FILE_OPENED));
            }
            if read_only {
                return Err(NtStatus::AccessDenied.into());
            }
            let truncate = OpenOptions {
                truncate: true,
                ..Default::default()
            };
            let stat = store.open(path, truncate).await.map_err(io_failure)?;
            let action = if disposition == FILE_SUPERSEDE {
                FILE_SUPERSEDED
            } else {
                FILE_OVERWRITTEN
            };
            Ok((stat, action))
        }
        None => {
            if disposition == FILE_OPEN || disposition == FILE_OVERWRITE {
                return Err(missing(store, path).await);
            }
            if read_only {
                return Err(NtStatus::AccessDenied.into());
            }
            match store.stat(parent_path(path)).await {
                Ok(parent) if parent.is_dir => {}
                Ok(_) => return Err(NtStatus::ObjectPathNotFound.into()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(NtStatus::ObjectPathNotFound.into())
                }
                Err(e) => return Err(io_failure(e)),
            }
            let stat = if request.directory_required() {
                store.mkdir(path).await
            } else {
                let create = OpenOptions {
                    create_new: true,
                    ..Default::default()
                };
                store.open(path, create).await
            }
            .map_err(io_failure)?;
            Ok((stat, FILE_CREATED))
        }
    }
}

pub async fn create(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = CreateRequest::decode(&req.body)?;
    let engine = conn.engine.clone();
    let tree = tree_of(conn, req)?;

    if request.create_disposition > FILE_OVERWRITE_IF
        || (request.directory_required() && request.non_directory_required())
    {
        return Err(NtStatus::InvalidParameter.into());
    }
    let path = normalize_path(&request.name)?;
    if tree.read_only && (request.wants_write() || request.delete_on_close()) {
        debug!(path = %path, "Write access refused on read-only share");
        return Err(NtStatus::AccessDenied.into());
    }
    let granted_access = grant_access(request.desired_access, tree.read_only);
    if request.delete_on_close() && granted_access & DELETE == 0 {
        return Err(NtStatus::AccessDenied.into());
    }
    if tree.handles.len() >= engine.config.max_open_files_per_tree {
        warn!(limit = engine.config.max_open_files_per_tree, "Open file limit reached");
        return Err(NtStatus::InsufficientResources.into());
    }

    let store = tree.store.clone();
    let (stat, create_action) = open_path(store.as_ref(), &path, &request, tree.read_only).await?;
    let id = engine.ids.handle_id()?;
    debug!(handle = id, path = %path, action = create_action, "Opened");

    tree.handles.insert(
        id,
        FileHandle {
            id,
            path,
            is_directory: stat.is_dir,
            granted_access,
            delete_on_close: request.delete_on_close(),
            cursor: None,
        },
    );

    let resp = CreateResponse {
        oplock_level: 0,
        create_action,
        info: FileInfo::from_stat(&stat),
        file_id: FileId::from_handle(id),
    };
    Ok(Response::ok(resp.encode()))
}

pub async fn close(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = CloseRequest::decode(&req.body)?;
    let tree = tree_of(conn, req)?;
    let handle = tree.take_handle(request.file_id)?;
    let store = tree.store.clone();

    let attributes = if request.wants_post_query() && !handle.delete_on_close {
        match store.stat(&handle.path).await {
            Ok(stat) => Some(FileInfo::from_stat(&stat)),
            Err(e) => {
                debug!(path = %handle.path, error = %e, "Post-query failed");
                None
            }
        }
    } else {
        None
    };

    debug!(handle = handle.id, path = %handle.path, "Closed");
    handle.release(store.as_ref()).await;
    Ok(Response::ok(CloseResponse { attributes }.encode()))
}

pub async fn flush(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = FlushRequest::decode(&req.body)?;
    let tree = tree_of(conn, req)?;
    let store = tree.store.clone();
    let handle = tree.validate_handle(request.file_id)?;
    if !handle.is_directory {
        store.flush(&handle.path).await.map_err(io_failure)?;
    }
    Ok(Response::ok(encode_flush_response()))
}

pub async fn read(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = ReadRequest::decode(&req.body)?;
    let max_read = conn.engine.config.max_read_size;
    let tree = tree_of(conn, req)?;
    let store = tree.store.clone();
    let handle = tree.validate_handle(request.file_id)?;

    if handle.is_directory {
        return Err(NtStatus::InvalidDeviceRequest.into());
    }
    if request.length > max_read {
        return Err(NtStatus::InvalidParameter.into());
    }
    if handle.granted_access & FILE_READ_DATA == 0 {
        return Err(NtStatus::AccessDenied.into());
    }

    let data: Bytes = store
        .read(&handle.path, request.offset, request.length)
        .await
        .map_err(io_failure)?;
    if (data.is_empty() && request.length > 0) || (data.len() as u32) < request.minimum_count {
        return Err(NtStatus::EndOfFile.into());
    }
    debug!(offset = request.offset, len = data.len(), "Read");
    Ok(Response::ok(ReadResponse { data }.encode()))
}

pub async fn write(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = WriteRequest::decode(&req.body)?;
    let max_write = conn.engine.config.max_write_size;
    let tree = tree_of(conn, req)?;
    if tree.read_only {
        return Err(NtStatus::AccessDenied.into());
    }
    let store = tree.store.clone();
    let handle = tree.validate_handle(request.file_id)?;

    if handle.is_directory {
        return Err(NtStatus::InvalidDeviceRequest.into());
    }
    if request.data.len() > max_write as usize {
        return Err(NtStatus::InvalidParameter.into());
    }
    if handle.granted_access & (FILE_WRITE_DATA | FILE_APPEND_DATA) == 0 {
        return Err(NtStatus::AccessDenied.into());
    }

    let offset = if request.offset == APPEND_OFFSET {
        store.stat(&handle.path).await.map_err(io_failure)?.size
    } else {
        request.offset
    };
    let count = store
        .write(&handle.path, offset, &request.data)
        .await
        .map_err(io_failure)?;
    debug!(offset, count, "Wrote");
    Ok(Response::ok(WriteResponse { count }.encode()))
}
