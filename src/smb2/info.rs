//! File, filesystem and directory information structures.
//! MS-FSCC Sections 2.4 and 2.5

use bytes::{BufMut, BytesMut};

use crate::clock::filetime;
use crate::smb2::{get_bytes, get_u32, get_u64, get_u8, put_u32, string_to_utf16le, utf16le_to_string, DecodeError};
use crate::vfs::FileStat;

// Info types (SMB2_0_INFO_*)
pub const SMB2_0_INFO_FILE: u8 = 1;
pub const SMB2_0_INFO_FILESYSTEM: u8 = 2;
pub const SMB2_0_INFO_SECURITY: u8 = 3;
pub const SMB2_0_INFO_QUOTA: u8 = 4;

// Directory enumeration classes
pub const FILE_DIRECTORY_INFORMATION: u8 = 1;
pub const FILE_FULL_DIRECTORY_INFORMATION: u8 = 2;
pub const FILE_BOTH_DIRECTORY_INFORMATION: u8 = 3;
pub const FILE_NAMES_INFORMATION: u8 = 12;
pub const FILE_ID_BOTH_DIRECTORY_INFORMATION: u8 = 37;
pub const FILE_ID_FULL_DIRECTORY_INFORMATION: u8 = 38;

// File classes for QUERY_INFO / SET_INFO
pub const FILE_BASIC_INFORMATION: u8 = 4;
pub const FILE_STANDARD_INFORMATION: u8 = 5;
pub const FILE_INTERNAL_INFORMATION: u8 = 6;
pub const FILE_EA_INFORMATION: u8 = 7;
pub const FILE_RENAME_INFORMATION: u8 = 10;
pub const FILE_DISPOSITION_INFORMATION: u8 = 13;
pub const FILE_ALL_INFORMATION: u8 = 18;
pub const FILE_ALLOCATION_INFORMATION: u8 = 19;
pub const FILE_END_OF_FILE_INFORMATION: u8 = 20;
pub const FILE_STREAM_INFORMATION: u8 = 22;
pub const FILE_NETWORK_OPEN_INFORMATION: u8 = 34;
pub const FILE_ATTRIBUTE_TAG_INFORMATION: u8 = 35;

// Filesystem classes
pub const FILE_FS_VOLUME_INFORMATION: u8 = 1;
pub const FILE_FS_SIZE_INFORMATION: u8 = 3;
pub const FILE_FS_DEVICE_INFORMATION: u8 = 4;
pub const FILE_FS_ATTRIBUTE_INFORMATION: u8 = 5;
pub const FILE_FS_FULL_SIZE_INFORMATION: u8 = 7;

// File attributes
pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;

const ALLOCATION_UNIT: u64 = 4096;
const VOLUME_SERIAL: u32 = 0x5342_3245;
const TOTAL_UNITS: u64 = 1024 * 1024;
const FREE_UNITS: u64 = 512 * 1024;

/// Metadata in wire units: FILETIME timestamps and NT attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub attributes: u32,
    pub file_id: u64,
    pub links: u32,
    pub is_directory: bool,
    pub delete_pending: bool,
}

impl FileInfo {
    pub fn from_stat(stat: &FileStat) -> Self {
        let mut attributes = if stat.is_dir {
            FILE_ATTRIBUTE_DIRECTORY
        } else {
            FILE_ATTRIBUTE_ARCHIVE
        };
        if stat.mode & 0o200 == 0 {
            attributes |= FILE_ATTRIBUTE_READONLY;
        }
        FileInfo {
            creation_time: filetime(stat.created),
            last_access_time: filetime(stat.accessed),
            last_write_time: filetime(stat.modified),
            change_time: filetime(stat.changed),
            end_of_file: if stat.is_dir { 0 } else { stat.size },
            allocation_size: if stat.is_dir {
                0
            } else {
                stat.size.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT
            },
            attributes,
            file_id: stat.file_id,
            links: stat.nlink,
            is_directory: stat.is_dir,
            delete_pending: false,
        }
    }

    /// Creation/access/write/change times then allocation, EOF and
    /// attributes: the block shared by CREATE, CLOSE and
    /// FileNetworkOpenInformation.
    pub(crate) fn put_network_open(&self, buf: &mut BytesMut) {
        self.put_times(buf);
        buf.put_u64_le(self.allocation_size);
        buf.put_u64_le(self.end_of_file);
        buf.put_u32_le(self.attributes);
    }

    pub(crate) fn decode_network_open(buf: &[u8], offset: usize) -> Result<Self, DecodeError> {
        Ok(FileInfo {
            creation_time: get_u64(buf, offset, "CreationTime")?,
            last_access_time: get_u64(buf, offset + 8, "LastAccessTime")?,
            last_write_time: get_u64(buf, offset + 16, "LastWriteTime")?,
            change_time: get_u64(buf, offset + 24, "ChangeTime")?,
            allocation_size: get_u64(buf, offset + 32, "AllocationSize")?,
            end_of_file: get_u64(buf, offset + 40, "EndOfFile")?,
            attributes: get_u32(buf, offset + 48, "FileAttributes")?,
            ..Default::default()
        })
    }

    fn put_times(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.creation_time);
        buf.put_u64_le(self.last_access_time);
        buf.put_u64_le(self.last_write_time);
        buf.put_u64_le(self.change_time);
    }
}

// ---- QUERY_INFO file classes ----

/// FileBasicInformation (MS-FSCC 2.4.7): 40 bytes.
pub fn file_basic_info(info: &FileInfo) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(40);
    info.put_times(&mut buf);
    buf.put_u32_le(info.attributes);
    buf.put_u32_le(0); // Reserved
    buf.to_vec()
}

/// FileStandardInformation (MS-FSCC 2.4.41): 24 bytes.
pub fn file_standard_info(info: &FileInfo) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(24);
    put_standard(&mut buf, info);
    buf.to_vec()
}

fn put_standard(buf: &mut BytesMut, info: &FileInfo) {
    buf.put_u64_le(info.allocation_size);
    buf.put_u64_le(info.end_of_file);
    buf.put_u32_le(info.links.max(1));
    buf.put_u8(info.delete_pending as u8);
    buf.put_u8(info.is_directory as u8);
    buf.put_u16_le(0); // Reserved
}

/// FileInternalInformation (MS-FSCC 2.4.20): 8 bytes.
pub fn file_internal_info(info: &FileInfo) -> Vec<u8> {
    info.file_id.to_le_bytes().to_vec()
}

/// FileEaInformation (MS-FSCC 2.4.12): 4 bytes. No extended attributes.
pub fn file_ea_info() -> Vec<u8> {
    vec![0; 4]
}

/// FileNetworkOpenInformation (MS-FSCC 2.4.29): 56 bytes.
pub fn file_network_open_info(info: &FileInfo) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(56);
    info.put_network_open(&mut buf);
    buf.put_u32_le(0); // Reserved
    buf.to_vec()
}

/// FileAttributeTagInformation (MS-FSCC 2.4.6): 8 bytes.
pub fn file_attribute_tag_info(info: &FileInfo) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(info.attributes);
    buf.put_u32_le(0); // ReparseTag
    buf.to_vec()
}

/// FileStreamInformation (MS-FSCC 2.4.43). Files expose the single
/// unnamed data stream; directories have none.
pub fn file_stream_info(info: &FileInfo) -> Vec<u8> {
    if info.is_directory {
        return Vec::new();
    }
    let stream_name = string_to_utf16le("::$DATA");
    let mut buf = BytesMut::with_capacity(24 + stream_name.len());
    buf.put_u32_le(0); // NextEntryOffset
    buf.put_u32_le(stream_name.len() as u32);
    buf.put_u64_le(info.end_of_file);
    buf.put_u64_le(info.allocation_size);
    buf.put_slice(&stream_name);
    buf.to_vec()
}

/// FileAllInformation (MS-FSCC 2.4.2): basic, standard, internal, EA,
/// access, position, mode, alignment and name blocks back to back.
pub fn file_all_info(info: &FileInfo, name: &str, granted_access: u32) -> Vec<u8> {
    let name_utf16 = string_to_utf16le(name);
    let mut buf = BytesMut::with_capacity(100 + name_utf16.len());
    buf.put_slice(&file_basic_info(info));
    put_standard(&mut buf, info);
    buf.put_u64_le(info.file_id);
    buf.put_u32_le(0); // EaSize
    buf.put_u32_le(granted_access);
    buf.put_u64_le(0); // CurrentByteOffset
    buf.put_u32_le(0); // Mode
    buf.put_u32_le(0); // AlignmentRequirement
    buf.put_u32_le(name_utf16.len() as u32);
    buf.put_slice(&name_utf16);
    buf.to_vec()
}

// ---- QUERY_INFO filesystem classes ----

/// FileFsVolumeInformation (MS-FSCC 2.5.9).
pub fn fs_volume_info(label: &str, created: u64) -> Vec<u8> {
    let label_utf16 = string_to_utf16le(label);
    let mut buf = BytesMut::with_capacity(18 + label_utf16.len());
    buf.put_u64_le(created);
    buf.put_u32_le(VOLUME_SERIAL);
    buf.put_u32_le(label_utf16.len() as u32);
    buf.put_u8(0); // SupportsObjects
    buf.put_u8(0); // Reserved
    buf.put_slice(&label_utf16);
    buf.to_vec()
}

/// FileFsSizeInformation (MS-FSCC 2.5.8): 24 bytes.
pub fn fs_size_info() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u64_le(TOTAL_UNITS);
    buf.put_u64_le(FREE_UNITS);
    buf.put_u32_le(8); // SectorsPerAllocationUnit
    buf.put_u32_le(512); // BytesPerSector
    buf.to_vec()
}

/// FileFsFullSizeInformation (MS-FSCC 2.5.4): 32 bytes.
pub fn fs_full_size_info() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(32);
    buf.put_u64_le(TOTAL_UNITS);
    buf.put_u64_le(FREE_UNITS);
    buf.put_u64_le(FREE_UNITS);
    buf.put_u32_le(8);
    buf.put_u32_le(512);
    buf.to_vec()
}

/// FileFsAttributeInformation (MS-FSCC 2.5.1).
pub fn fs_attribute_info() -> Vec<u8> {
    let fs_name = string_to_utf16le("NTFS");
    let mut buf = BytesMut::with_capacity(12 + fs_name.len());
    // FILE_CASE_PRESERVED_NAMES | FILE_UNICODE_ON_DISK
    buf.put_u32_le(0x0000_0006);
    buf.put_u32_le(255); // MaximumComponentNameLength
    buf.put_u32_le(fs_name.len() as u32);
    buf.put_slice(&fs_name);
    buf.to_vec()
}

/// FileFsDeviceInformation (MS-FSCC 2.5.10): 8 bytes.
pub fn fs_device_info() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32_le(0x07); // FILE_DEVICE_DISK
    buf.put_u32_le(0x20); // FILE_DEVICE_IS_MOUNTED
    buf.to_vec()
}

// ---- Directory entries ----

/// Bytes before the file name for each supported enumeration class.
fn directory_fixed_size(class: u8) -> Option<usize> {
    match class {
        FILE_DIRECTORY_INFORMATION => Some(64),
        FILE_FULL_DIRECTORY_INFORMATION => Some(68),
        FILE_BOTH_DIRECTORY_INFORMATION => Some(94),
        FILE_NAMES_INFORMATION => Some(12),
        FILE_ID_BOTH_DIRECTORY_INFORMATION => Some(104),
        FILE_ID_FULL_DIRECTORY_INFORMATION => Some(80),
        _ => None,
    }
}

/// Offset of the FileNameLength field for each class.
fn directory_name_length_offset(class: u8) -> usize {
    if class == FILE_NAMES_INFORMATION {
        8
    } else {
        60
    }
}

pub fn is_directory_class(class: u8) -> bool {
    directory_fixed_size(class).is_some()
}

/// Encode one unpadded directory entry with NextEntryOffset left at 0.
/// Returns `None` for classes this server does not enumerate.
pub fn encode_directory_entry(class: u8, name: &str, info: &FileInfo, file_index: u32) -> Option<Vec<u8>> {
    let fixed = directory_fixed_size(class)?;
    let name_utf16 = string_to_utf16le(name);
    let mut buf = BytesMut::with_capacity(fixed + name_utf16.len());
    buf.put_u32_le(0); // NextEntryOffset, patched by DirectoryBuffer
    buf.put_u32_le(file_index);
    if class == FILE_NAMES_INFORMATION {
        buf.put_u32_le(name_utf16.len() as u32);
        buf.put_slice(&name_utf16);
        return Some(buf.to_vec());
    }

    info.put_times(&mut buf);
    buf.put_u64_le(info.end_of_file);
    buf.put_u64_le(info.allocation_size);
    buf.put_u32_le(info.attributes);
    buf.put_u32_le(name_utf16.len() as u32);
    if class != FILE_DIRECTORY_INFORMATION {
        buf.put_u32_le(0); // EaSize
    }
    match class {
        FILE_BOTH_DIRECTORY_INFORMATION | FILE_ID_BOTH_DIRECTORY_INFORMATION => {
            buf.put_u8(0); // ShortNameLength
            buf.put_u8(0); // Reserved1
            buf.put_slice(&[0u8; 24]); // ShortName
            if class == FILE_ID_BOTH_DIRECTORY_INFORMATION {
                buf.put_u16_le(0); // Reserved2
                buf.put_u64_le(info.file_id);
            }
        }
        FILE_ID_FULL_DIRECTORY_INFORMATION => {
            buf.put_u32_le(0); // Reserved
            buf.put_u64_le(info.file_id);
        }
        _ => {}
    }
    debug_assert_eq!(buf.len(), fixed);
    buf.put_slice(&name_utf16);
    Some(buf.to_vec())
}

/// Accumulates directory entries into one output buffer, aligning each
/// entry to 8 bytes and chaining them through NextEntryOffset.
#[derive(Debug)]
pub struct DirectoryBuffer {
    buf: Vec<u8>,
    last_entry: Option<usize>,
    limit: usize,
    count: usize,
}

impl DirectoryBuffer {
    pub fn new(limit: usize) -> Self {
        DirectoryBuffer {
            buf: Vec::new(),
            last_entry: None,
            limit,
            count: 0,
        }
    }

    /// Append an entry; returns false and leaves the buffer unchanged when
    /// it does not fit in the remaining space.
    pub fn push(&mut self, entry: &[u8]) -> bool {
        let start = self.buf.len().next_multiple_of(8);
        if start + entry.len() > self.limit {
            return false;
        }
        self.buf.resize(start, 0);
        if let Some(prev) = self.last_entry {
            put_u32(&mut self.buf, prev, (start - prev) as u32);
        }
        self.buf.extend_from_slice(entry);
        self.last_entry = Some(start);
        self.count += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Walk a directory output buffer and collect the entry names.
pub fn parse_directory_names(class: u8, buf: &[u8]) -> Result<Vec<String>, DecodeError> {
    let fixed = directory_fixed_size(class).ok_or(DecodeError::OutOfBounds {
        what: "directory information class",
        offset: class as usize,
        length: 0,
    })?;
    let mut names = Vec::new();
    let mut offset = 0usize;
    if buf.is_empty() {
        return Ok(names);
    }
    loop {
        let next = get_u32(buf, offset, "NextEntryOffset")? as usize;
        let name_len = get_u32(buf, offset + directory_name_length_offset(class), "FileNameLength")? as usize;
        let name = get_bytes(buf, offset + fixed, name_len, "FileName")?;
        names.push(utf16le_to_string(name));
        if next == 0 {
            return Ok(names);
        }
        offset += next;
    }
}

// ---- SET_INFO payloads ----

/// FileBasicInformation as sent in SET_INFO. Zero times mean "leave
/// unchanged"; an attribute value of 0 likewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicInfo {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub attributes: u32,
}

impl BasicInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(BasicInfo {
            creation_time: get_u64(buf, 0, "CreationTime")?,
            last_access_time: get_u64(buf, 8, "LastAccessTime")?,
            last_write_time: get_u64(buf, 16, "LastWriteTime")?,
            change_time: get_u64(buf, 24, "ChangeTime")?,
            attributes: get_u32(buf, 32, "FileAttributes")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_u64_le(self.creation_time);
        buf.put_u64_le(self.last_access_time);
        buf.put_u64_le(self.last_write_time);
        buf.put_u64_le(self.change_time);
        buf.put_u32_le(self.attributes);
        buf.put_u32_le(0);
        buf.to_vec()
    }
}

/// FileRenameInformation, SMB2 layout (MS-FSCC 2.4.37.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameInfo {
    pub replace_if_exists: bool,
    pub file_name: String,
}

impl RenameInfo {
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let replace_if_exists = get_u8(buf, 0, "ReplaceIfExists")? != 0;
        let name_len = get_u32(buf, 16, "FileNameLength")? as usize;
        let name = get_bytes(buf, 20, name_len, "FileName")?;
        Ok(RenameInfo {
            replace_if_exists,
            file_name: utf16le_to_string(name),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let name = string_to_utf16le(&self.file_name);
        let mut buf = BytesMut::with_capacity(20 + name.len());
        buf.put_u8(self.replace_if_exists as u8);
        buf.put_slice(&[0u8; 7]); // Reserved
        buf.put_u64_le(0); // RootDirectory
        buf.put_u32_le(name.len() as u32);
        buf.put_slice(&name);
        buf.to_vec()
    }
}

/// FileDispositionInformation: a single DeletePending byte.
pub fn decode_disposition(buf: &[u8]) -> Result<bool, DecodeError> {
    Ok(get_u8(buf, 0, "DeletePending")? != 0)
}

/// FileEndOfFileInformation / FileAllocationInformation: one u64.
pub fn decode_u64_info(buf: &[u8], what: &'static str) -> Result<u64, DecodeError> {
    get_u64(buf, 0, what)
}
