//! SMB2 CREATE command (open or create a file/directory).
//! MS-SMB2 Section 2.2.13 (Request) and 2.2.14 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::info::FileInfo;
use crate::smb2::{
    expect_structure_size, get_buffer, get_u16, get_u32, get_u8, string_to_utf16le, utf16le_to_string,
    DecodeError, FileId,
};

// Create disposition values
pub const FILE_SUPERSEDE: u32 = 0;
pub const FILE_OPEN: u32 = 1;
pub const FILE_CREATE: u32 = 2;
pub const FILE_OPEN_IF: u32 = 3;
pub const FILE_OVERWRITE: u32 = 4;
pub const FILE_OVERWRITE_IF: u32 = 5;

// Create options flags
pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;
pub const FILE_DELETE_ON_CLOSE: u32 = 0x0000_1000;

// Create action values (response)
pub const FILE_SUPERSEDED: u32 = 0;
pub const FILE_OPENED: u32 = 1;
pub const FILE_CREATED: u32 = 2;
pub const FILE_OVERWRITTEN: u32 = 3;

// Desired access flags
pub const FILE_READ_DATA: u32 = 0x0000_0001;
pub const FILE_WRITE_DATA: u32 = 0x0000_0002;
pub const FILE_APPEND_DATA: u32 = 0x0000_0004;
pub const FILE_WRITE_EA: u32 = 0x0000_0010;
pub const FILE_READ_ATTRIBUTES: u32 = 0x0000_0080;
pub const FILE_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
pub const DELETE: u32 = 0x0001_0000;
pub const GENERIC_ALL: u32 = 0x1000_0000;
pub const GENERIC_WRITE: u32 = 0x4000_0000;
pub const GENERIC_READ: u32 = 0x8000_0000;
pub const MAXIMUM_ALLOWED: u32 = 0x0200_0000;

// Share access flags
pub const FILE_SHARE_READ: u32 = 0x0000_0001;
pub const FILE_SHARE_WRITE: u32 = 0x0000_0002;
pub const FILE_SHARE_DELETE: u32 = 0x0000_0004;

const REQUEST_FIXED_SIZE: usize = 56;

/// Parsed CREATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub requested_oplock_level: u8,
    pub impersonation_level: u32,
    pub desired_access: u32,
    pub file_attributes: u32,
    pub share_access: u32,
    pub create_disposition: u32,
    pub create_options: u32,
    /// Backslash-separated path relative to the share; empty for the root.
    pub name: String,
}

impl CreateRequest {
    /// StructureSize(2) SecurityFlags(1) RequestedOplockLevel(1)
    /// ImpersonationLevel(4) SmbCreateFlags(8) Reserved(8) DesiredAccess(4)
    /// FileAttributes(4) ShareAccess(4) CreateDisposition(4) CreateOptions(4)
    /// NameOffset(2) NameLength(2) CreateContextsOffset(4) CreateContextsLength(4)
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 57, "CREATE request")?;
        let name_offset = get_u16(body, 44, "NameOffset")? as usize;
        let name_len = get_u16(body, 46, "NameLength")? as usize;
        let name = get_buffer(body, name_offset, name_len, "Name")?;
        Ok(CreateRequest {
            requested_oplock_level: get_u8(body, 3, "RequestedOplockLevel")?,
            impersonation_level: get_u32(body, 4, "ImpersonationLevel")?,
            desired_access: get_u32(body, 24, "DesiredAccess")?,
            file_attributes: get_u32(body, 28, "FileAttributes")?,
            share_access: get_u32(body, 32, "ShareAccess")?,
            create_disposition: get_u32(body, 36, "CreateDisposition")?,
            create_options: get_u32(body, 40, "CreateOptions")?,
            name: utf16le_to_string(name),
        })
    }

    pub fn encode(&self) -> Bytes {
        let name = string_to_utf16le(&self.name);
        let mut buf = BytesMut::with_capacity(REQUEST_FIXED_SIZE + name.len().max(1));
        buf.put_u16_le(57); // StructureSize
        buf.put_u8(0); // SecurityFlags
        buf.put_u8(self.requested_oplock_level);
        buf.put_u32_le(self.impersonation_level);
        buf.put_u64_le(0); // SmbCreateFlags
        buf.put_u64_le(0); // Reserved
        buf.put_u32_le(self.desired_access);
        buf.put_u32_le(self.file_attributes);
        buf.put_u32_le(self.share_access);
        buf.put_u32_le(self.create_disposition);
        buf.put_u32_le(self.create_options);
        buf.put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16);
        buf.put_u16_le(name.len() as u16);
        buf.put_u32_le(0); // CreateContextsOffset
        buf.put_u32_le(0); // CreateContextsLength
        if name.is_empty() {
            buf.put_u8(0); // Buffer must hold at least one byte
        } else {
            buf.put_slice(&name);
        }
        buf.freeze()
    }

    pub fn directory_required(&self) -> bool {
        self.create_options & FILE_DIRECTORY_FILE != 0
    }

    pub fn non_directory_required(&self) -> bool {
        self.create_options & FILE_NON_DIRECTORY_FILE != 0
    }

    pub fn delete_on_close(&self) -> bool {
        self.create_options & FILE_DELETE_ON_CLOSE != 0
    }

    /// Returns true if the caller asks for any access that modifies the file.
    pub fn wants_write(&self) -> bool {
        self.desired_access
            & (FILE_WRITE_DATA
                | FILE_APPEND_DATA
                | FILE_WRITE_EA
                | FILE_WRITE_ATTRIBUTES
                | GENERIC_WRITE
                | GENERIC_ALL
                | DELETE)
            != 0
    }
}

/// CREATE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub oplock_level: u8,
    pub create_action: u32,
    pub info: FileInfo,
    pub file_id: FileId,
}

impl CreateResponse {
    /// 88 bytes on the wire; StructureSize counts one byte of the
    /// (empty) create-context buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(88);
        buf.put_u16_le(89); // StructureSize
        buf.put_u8(self.oplock_level);
        buf.put_u8(0); // Flags
        buf.put_u32_le(self.create_action);
        self.info.put_network_open(&mut buf);
        buf.put_u32_le(0); // Reserved2
        self.file_id.put(&mut buf);
        buf.put_u32_le(0); // CreateContextsOffset
        buf.put_u32_le(0); // CreateContextsLength
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 89, "CREATE response")?;
        Ok(CreateResponse {
            oplock_level: get_u8(body, 2, "OplockLevel")?,
            create_action: get_u32(body, 4, "CreateAction")?,
            info: FileInfo::decode_network_open(body, 8)?,
            file_id: FileId::decode(body, 64)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            requested_oplock_level: 0,
            impersonation_level: 2,
            desired_access: FILE_READ_DATA | FILE_WRITE_DATA,
            file_attributes: 0,
            share_access: FILE_SHARE_READ,
            create_disposition: FILE_OPEN_IF,
            create_options: FILE_DIRECTORY_FILE,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_create_request_roundtrip() {
        let req = request(r"docs\report.txt");
        assert_eq!(CreateRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn test_create_request_share_root() {
        let req = request("");
        let encoded = req.encode();
        assert_eq!(encoded.len(), 57);
        assert_eq!(CreateRequest::decode(&encoded).unwrap().name, "");
    }

    #[test]
    fn test_create_request_flags() {
        let req = request("x");
        assert!(req.directory_required());
        assert!(!req.non_directory_required());
        assert!(req.wants_write());
    }

    #[test]
    fn test_create_request_name_outside_body() {
        let mut encoded = request("abc").encode().to_vec();
        encoded[46] = 0xFF;
        assert!(matches!(
            CreateRequest::decode(&encoded),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_create_response_size() {
        let resp = CreateResponse {
            oplock_level: 0,
            create_action: FILE_OPENED,
            info: FileInfo {
                end_of_file: 100,
                allocation_size: 4096,
                ..Default::default()
            },
            file_id: FileId::from_handle(5),
        };
        let buf = resp.encode();
        assert_eq!(buf.len(), 88);
        let decoded = CreateResponse::decode(&buf).unwrap();
        assert_eq!(decoded.file_id, FileId::from_handle(5));
        assert_eq!(decoded.info.end_of_file, 100);
    }
}
