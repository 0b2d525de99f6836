//! QUERY_DIRECTORY, QUERY_INFO and SET_INFO.

use bytes::Bytes;
use tracing::debug;

use crate::clock::{filetime, from_filetime};
use crate::dispatch::{Failure, HandlerResult, Request, Response};
use crate::handlers::{io_failure, tree_of};
use crate::smb2::create::{DELETE, FILE_WRITE_ATTRIBUTES, FILE_WRITE_DATA};
use crate::smb2::info::{
    self, decode_disposition, decode_u64_info, encode_directory_entry, is_directory_class,
    BasicInfo, DirectoryBuffer, FileInfo, RenameInfo, FILE_ALLOCATION_INFORMATION,
    FILE_ALL_INFORMATION, FILE_ATTRIBUTE_READONLY, FILE_ATTRIBUTE_TAG_INFORMATION,
    FILE_BASIC_INFORMATION, FILE_DISPOSITION_INFORMATION, FILE_EA_INFORMATION,
    FILE_END_OF_FILE_INFORMATION, FILE_FS_ATTRIBUTE_INFORMATION, FILE_FS_DEVICE_INFORMATION,
    FILE_FS_FULL_SIZE_INFORMATION, FILE_FS_SIZE_INFORMATION, FILE_FS_VOLUME_INFORMATION,
    FILE_INTERNAL_INFORMATION, FILE_NETWORK_OPEN_INFORMATION, FILE_RENAME_INFORMATION,
    FILE_STANDARD_INFORMATION, FILE_STREAM_INFORMATION, SMB2_0_INFO_FILE, SMB2_0_INFO_FILESYSTEM,
};
use crate::smb2::query::{
    encode_set_info_response, OutputBufferResponse, QueryDirectoryRequest, QueryInfoRequest,
    SetInfoRequest,
};
use crate::smb2::status::NtStatus;
use crate::state::{ConnectionState, DirCursor};
use crate::vfs::{glob_match, join_path, normalize_path};

fn output(data: Vec<u8>) -> Bytes {
    OutputBufferResponse {
        data: Bytes::from(data),
    }
    .encode()
}

/// Client-visible name of a store path: backslash separated, rooted at
/// the share.
fn wire_name(path: &str) -> String {
    format!("\\{}", path.replace('/', "\\"))
}

pub async fn query_directory(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = QueryDirectoryRequest::decode(&req.body)?;
    let class = request.file_information_class;
    let limit = request
        .output_buffer_length
        .min(conn.engine.config.max_transact_size) as usize;
    if !is_directory_class(class) {
        debug!(class, "Unsupported directory information class");
        return Err(NtStatus::InvalidInfoClass.into());
    }

    let tree = tree_of(conn, req)?;
    let store = tree.store.clone();
    let handle = tree.validate_handle(request.file_id)?;
    if !handle.is_directory {
        return Err(NtStatus::InvalidParameter.into());
    }

    let mut cursor = match handle.cursor.take() {
        Some(cursor) if !request.restart_scan() => cursor,
        previous => {
            let entries = match store.read_dir(&handle.path).await {
                Ok(entries) => entries,
                Err(e) => {
                    handle.cursor = previous;
                    return Err(io_failure(e));
                }
            };
            let pattern = if request.pattern.is_empty() {
                "*".to_string()
            } else {
                request.pattern.clone()
            };
            debug!(path = %handle.path, entries = entries.len(), pattern = %pattern, "Directory scan started");
            DirCursor::new(entries, pattern)
        }
    };

    let mut page = DirectoryBuffer::new(limit);
    while let Some(entry) = cursor.entries.get(cursor.next) {
        if !glob_match(&cursor.pattern, &entry.name) {
            cursor.next += 1;
            continue;
        }
        let info = FileInfo::from_stat(&entry.stat);
        let Some(encoded) = encode_directory_entry(class, &entry.name, &info, (cursor.next + 1) as u32)
        else {
            break;
        };
        if !page.push(&encoded) {
            break;
        }
        cursor.next += 1;
        if request.single_entry() {
            break;
        }
    }

    let exhausted = cursor.is_exhausted();
    handle.cursor = Some(cursor);
    if page.is_empty() {
        return Err(if exhausted {
            NtStatus::NoMoreFiles
        } else {
            NtStatus::BufferTooSmall
        }
        .into());
    }
    debug!(entries = page.len(), "Directory page");
    Ok(Response::ok(output(page.into_bytes())))
}

pub async fn query_info(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = QueryInfoRequest::decode(&req.body)?;
    let engine = conn.engine.clone();
    let tree = tree_of(conn, req)?;
    let store = tree.store.clone();
    let label = tree.share_name.clone();
    let handle = tree.validate_handle(request.file_id)?;

    let stat = store.stat(&handle.path).await.map_err(io_failure)?;
    let mut file = FileInfo::from_stat(&stat);
    file.delete_pending = handle.delete_on_close;

    let data = match (request.info_type, request.file_info_class) {
        (SMB2_0_INFO_FILE, FILE_BASIC_INFORMATION) => info::file_basic_info(&file),
        (SMB2_0_INFO_FILE, FILE_STANDARD_INFORMATION) => info::file_standard_info(&file),
        (SMB2_0_INFO_FILE, FILE_INTERNAL_INFORMATION) => info::file_internal_info(&file),
        (SMB2_0_INFO_FILE, FILE_EA_INFORMATION) => info::file_ea_info(),
        (SMB2_0_INFO_FILE, FILE_NETWORK_OPEN_INFORMATION) => info::file_network_open_info(&file),
        (SMB2_0_INFO_FILE, FILE_ATTRIBUTE_TAG_INFORMATION) => info::file_attribute_tag_info(&file),
        (SMB2_0_INFO_FILE, FILE_STREAM_INFORMATION) => info::file_stream_info(&file),
        (SMB2_0_INFO_FILE, FILE_ALL_INFORMATION) => {
            info::file_all_info(&file, &wire_name(&handle.path), handle.granted_access)
        }
        (SMB2_0_INFO_FILESYSTEM, FILE_FS_VOLUME_INFORMATION) => {
            info::fs_volume_info(&label, filetime(engine.start_time))
        }
        (SMB2_0_INFO_FILESYSTEM, FILE_FS_SIZE_INFORMATION) => info::fs_size_info(),
        (SMB2_0_INFO_FILESYSTEM, FILE_FS_FULL_SIZE_INFORMATION) => info::fs_full_size_info(),
        (SMB2_0_INFO_FILESYSTEM, FILE_FS_ATTRIBUTE_INFORMATION) => info::fs_attribute_info(),
        (SMB2_0_INFO_FILESYSTEM, FILE_FS_DEVICE_INFORMATION) => info::fs_device_info(),
        (info_type, class) => {
            debug!(info_type, class, "Unsupported QueryInfo");
            return Err(NtStatus::NotSupported.into());
        }
    };

    let limit = request.output_buffer_length as usize;
    if data.len() > limit {
        debug!(needed = data.len(), limit, "QueryInfo output truncated");
        let mut data = data;
        data.truncate(limit);
        return Ok(Response::with_status(NtStatus::BufferOverflow, output(data)));
    }
    Ok(Response::ok(output(data)))
}

/// A FILETIME from SET_INFO, where 0 and -1 both mean "leave unchanged".
fn requested_time(ft: u64) -> Option<std::time::SystemTime> {
    match ft {
        0 | u64::MAX => None,
        ft => from_filetime(ft),
    }
}

fn info_length(_: crate::smb2::DecodeError) -> Failure {
    NtStatus::InfoLengthMismatch.into()
}

pub async fn set_info(conn: &mut ConnectionState, req: &Request) -> HandlerResult {
    let request = SetInfoRequest::decode(&req.body)?;
    let tree = tree_of(conn, req)?;
    if request.info_type != SMB2_0_INFO_FILE {
        debug!(info_type = request.info_type, "Unsupported SetInfo type");
        return Err(NtStatus::NotSupported.into());
    }
    if tree.read_only {
        return Err(NtStatus::AccessDenied.into());
    }
    let store = tree.store.clone();
    let (path, is_directory, access) = {
        let handle = tree.validate_handle(request.file_id)?;
        (handle.path.clone(), handle.is_directory, handle.granted_access)
    };
    let require = |right: u32| -> Result<(), Failure> {
        if access & right == 0 {
            Err(NtStatus::AccessDenied.into())
        } else {
            Ok(())
        }
    };

    match request.file_info_class {
        FILE_BASIC_INFORMATION => {
            require(FILE_WRITE_ATTRIBUTES)?;
            let basic = BasicInfo::decode(&request.buffer).map_err(info_length)?;
            store
                .set_times(
                    &path,
                    requested_time(basic.last_access_time),
                    requested_time(basic.last_write_time),
                )
                .await
                .map_err(io_failure)?;
            if basic.attributes != 0 {
                let stat = store.stat(&path).await.map_err(io_failure)?;
                let mode = if basic.attributes & FILE_ATTRIBUTE_READONLY != 0 {
                    stat.mode & !0o222
                } else {
                    stat.mode | 0o200
                };
                if mode != stat.mode {
                    store.set_mode(&path, mode).await.map_err(io_failure)?;
                }
            }
            debug!(path = %path, "Basic information updated");
        }
        FILE_RENAME_INFORMATION => {
            require(DELETE)?;
            let rename = RenameInfo::decode(&request.buffer).map_err(info_length)?;
            let target = normalize_path(&rename.file_name)?;
            if target.is_empty() || path.is_empty() {
                return Err(NtStatus::AccessDenied.into());
            }
            store
                .rename(&path, &target, rename.replace_if_exists)
                .await
                .map_err(io_failure)?;
            let prefix = format!("{path}/");
            for open in tree.handles.values_mut() {
                if open.path == path {
                    open.path = target.clone();
                } else if let Some(rest) = open.path.strip_prefix(&prefix) {
                    open.path = join_path(&target, rest);
                }
            }
            debug!(from = %path, to = %target, "Renamed");
        }
        FILE_DISPOSITION_INFORMATION => {
            require(DELETE)?;
            let delete = decode_disposition(&request.buffer).map_err(info_length)?;
            if delete && path.is_empty() {
                return Err(NtStatus::AccessDenied.into());
            }
            if delete && is_directory && !store.read_dir(&path).await.map_err(io_failure)?.is_empty() {
                return Err(NtStatus::DirectoryNotEmpty.into());
            }
            let handle = tree.validate_handle(request.file_id)?;
            handle.delete_on_close = delete;
            debug!(path = %path, delete, "Disposition set");
        }
        FILE_END_OF_FILE_INFORMATION => {
            require(FILE_WRITE_DATA)?;
            let len = decode_u64_info(&request.buffer, "EndOfFile").map_err(info_length)?;
            if is_directory {
                return Err(NtStatus::InvalidParameter.into());
            }
            store.set_len(&path, len).await.map_err(io_failure)?;
            debug!(path = %path, len, "End of file set");
        }
        FILE_ALLOCATION_INFORMATION => {
            let size = decode_u64_info(&request.buffer, "AllocationSize").map_err(info_length)?;
            debug!(path = %path, size, "Allocation size accepted");
        }
        class => {
            debug!(class, "Unsupported SetInfo class");
            return Err(NtStatus::NotSupported.into());
        }
    }
    Ok(Response::ok(encode_set_info_response()))
}
