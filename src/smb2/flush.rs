//! SMB2 FLUSH command.
//! MS-SMB2 Section 2.2.17 (Request) and 2.2.18 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::{expect_structure_size, DecodeError, FileId};

/// Parsed FLUSH request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRequest {
    pub file_id: FileId,
}

impl FlushRequest {
    /// StructureSize(2) + Reserved1(2) + Reserved2(4) + FileId(16)
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 24, "FLUSH request")?;
        Ok(FlushRequest {
            file_id: FileId::decode(body, 8)?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u16_le(24);
        buf.put_u16_le(0);
        buf.put_u32_le(0);
        self.file_id.put(&mut buf);
        buf.freeze()
    }
}

/// FLUSH response: StructureSize(2) + Reserved(2).
pub fn encode_flush_response() -> Bytes {
    super::encode_empty_body()
}
