//! SMB2 TREE_CONNECT and TREE_DISCONNECT commands.
//! MS-SMB2 Section 2.2.9-2.2.12

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{
    expect_structure_size, get_buffer, get_u16, get_u32, get_u8, string_to_utf16le, utf16le_to_string,
    DecodeError,
};

pub const SHARE_TYPE_DISK: u8 = 0x01;

/// MaximalAccess granted on writable and read-only shares.
pub const MAXIMAL_ACCESS_FULL: u32 = 0x001F_01FF;
pub const MAXIMAL_ACCESS_READ: u32 = 0x0012_00A9;

const REQUEST_FIXED_SIZE: usize = 8;

/// Parsed TREE_CONNECT request. The path is UTF-16LE on the wire, e.g.
/// `\\server\share`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConnectRequest {
    pub path: String,
}

impl TreeConnectRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 9, "TREE_CONNECT request")?;
        let path_offset = get_u16(body, 4, "PathOffset")? as usize;
        let path_len = get_u16(body, 6, "PathLength")? as usize;
        let raw = get_buffer(body, path_offset, path_len, "Path")?;
        Ok(TreeConnectRequest {
            path: utf16le_to_string(raw),
        })
    }

    pub fn encode(&self) -> Bytes {
        let path = string_to_utf16le(&self.path);
        let mut buf = BytesMut::with_capacity(REQUEST_FIXED_SIZE + path.len());
        buf.put_u16_le(9); // StructureSize
        buf.put_u16_le(0); // Flags
        buf.put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16);
        buf.put_u16_le(path.len() as u16);
        buf.put_slice(&path);
        buf.freeze()
    }

    /// Share component of the UNC path: the text after the last backslash.
    pub fn share_name(&self) -> &str {
        self.path
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(self.path.as_str())
    }
}

/// TREE_CONNECT response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConnectResponse {
    pub share_type: u8,
    pub share_flags: u32,
    pub capabilities: u32,
    pub maximal_access: u32,
}

impl TreeConnectResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u16_le(16); // StructureSize
        buf.put_u8(self.share_type);
        buf.put_u8(0); // Reserved
        buf.put_u32_le(self.share_flags);
        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(self.maximal_access);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 16, "TREE_CONNECT response")?;
        Ok(TreeConnectResponse {
            share_type: get_u8(body, 2, "ShareType")?,
            share_flags: get_u32(body, 4, "ShareFlags")?,
            capabilities: get_u32(body, 8, "Capabilities")?,
            maximal_access: get_u32(body, 12, "MaximalAccess")?,
        })
    }
}

/// TREE_DISCONNECT request and response share the same 4-byte body.
pub fn encode_tree_disconnect() -> Bytes {
    super::encode_empty_body()
}

pub fn decode_tree_disconnect(body: &[u8]) -> Result<(), DecodeError> {
    expect_structure_size(body, 4, "TREE_DISCONNECT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_connect_path_roundtrip() {
        let req = TreeConnectRequest {
            path: r"\\localhost\public".to_string(),
        };
        let decoded = TreeConnectRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.share_name(), "public");
    }

    #[test]
    fn test_share_name_without_unc_prefix() {
        let req = TreeConnectRequest {
            path: "data".to_string(),
        };
        assert_eq!(req.share_name(), "data");
    }

    #[test]
    fn test_tree_connect_response_size() {
        let resp = TreeConnectResponse {
            share_type: SHARE_TYPE_DISK,
            share_flags: 0,
            capabilities: 0,
            maximal_access: MAXIMAL_ACCESS_FULL,
        };
        let buf = resp.encode();
        assert_eq!(buf.len(), 16);
        assert_eq!(TreeConnectResponse::decode(&buf).unwrap(), resp);
    }
}
