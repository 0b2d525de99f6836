//! SMB2 CLOSE command.
//! MS-SMB2 Section 2.2.15 (Request) and 2.2.16 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::info::FileInfo;
use crate::smb2::{expect_structure_size, get_u16, DecodeError, FileId};

/// Flag: request post-close attribute query.
pub const CLOSE_FLAG_POSTQUERY_ATTRIB: u16 = 0x0001;

/// Parsed CLOSE request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseRequest {
    pub flags: u16,
    pub file_id: FileId,
}

impl CloseRequest {
    /// StructureSize(2) + Flags(2) + Reserved(4) + FileId(16)
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 24, "CLOSE request")?;
        Ok(CloseRequest {
            flags: get_u16(body, 2, "Flags")?,
            file_id: FileId::decode(body, 8)?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u16_le(24);
        buf.put_u16_le(self.flags);
        buf.put_u32_le(0);
        self.file_id.put(&mut buf);
        buf.freeze()
    }

    pub fn wants_post_query(&self) -> bool {
        self.flags & CLOSE_FLAG_POSTQUERY_ATTRIB != 0
    }
}

/// CLOSE response. Attributes are reported only when the client asked for
/// them; otherwise every field after Reserved is zero.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseResponse {
    pub attributes: Option<FileInfo>,
}

impl CloseResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(60);
        buf.put_u16_le(60); // StructureSize
        match &self.attributes {
            Some(info) => {
                buf.put_u16_le(CLOSE_FLAG_POSTQUERY_ATTRIB);
                buf.put_u32_le(0); // Reserved
                info.put_network_open(&mut buf);
            }
            None => {
                buf.put_u16_le(0);
                buf.put_bytes(0, 56);
            }
        }
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 60, "CLOSE response")?;
        let flags = get_u16(body, 2, "Flags")?;
        let attributes = if flags & CLOSE_FLAG_POSTQUERY_ATTRIB != 0 {
            Some(FileInfo::decode_network_open(body, 8)?)
        } else {
            None
        };
        Ok(CloseResponse { attributes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_response_size() {
        let buf = CloseResponse::default().encode();
        assert_eq!(buf.len(), 60);
        assert_eq!(u16::from_le_bytes([buf[0], buf[1]]), 60);
    }

    #[test]
    fn test_close_response_with_attributes() {
        let info = FileInfo {
            end_of_file: 11,
            attributes: 0x20,
            ..Default::default()
        };
        let buf = CloseResponse {
            attributes: Some(info.clone()),
        }
        .encode();
        assert_eq!(buf.len(), 60);
        let decoded = CloseResponse::decode(&buf).unwrap().attributes.unwrap();
        assert_eq!(decoded.end_of_file, 11);
        assert_eq!(decoded.attributes, 0x20);
    }

    #[test]
    fn test_close_request_parse() {
        let req = CloseRequest {
            flags: CLOSE_FLAG_POSTQUERY_ATTRIB,
            file_id: FileId {
                persistent: 42,
                volatile: 99,
            },
        };
        let decoded = CloseRequest::decode(&req.encode()).unwrap();
        assert!(decoded.wants_post_query());
        assert_eq!(decoded.file_id.persistent, 42);
        assert_eq!(decoded.file_id.volatile, 99);
    }
}
