//! SMB2 WRITE command.
//! MS-SMB2 Section 2.2.21 (Request) and 2.2.22 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{expect_structure_size, get_buffer, get_u16, get_u32, get_u64, DecodeError, FileId};

const REQUEST_FIXED_SIZE: usize = 48;

/// Parsed WRITE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub offset: u64,
    pub file_id: FileId,
    pub flags: u32,
    pub data: Bytes,
}

impl WriteRequest {
    /// StructureSize(2) DataOffset(2) Length(4) Offset(8) FileId(16)
    /// Channel(4) RemainingBytes(4) WriteChannelInfoOffset(2)
    /// WriteChannelInfoLength(2) Flags(4), then the data.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 49, "WRITE request")?;
        let data_offset = get_u16(body, 2, "DataOffset")? as usize;
        let len = get_u32(body, 4, "Length")? as usize;
        Ok(WriteRequest {
            offset: get_u64(body, 8, "Offset")?,
            file_id: FileId::decode(body, 16)?,
            flags: get_u32(body, 44, "Flags")?,
            data: Bytes::copy_from_slice(get_buffer(body, data_offset, len, "Data")?),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_FIXED_SIZE + self.data.len());
        buf.put_u16_le(49);
        buf.put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_u64_le(self.offset);
        self.file_id.put(&mut buf);
        buf.put_u32_le(0); // Channel
        buf.put_u32_le(0); // RemainingBytes
        buf.put_u16_le(0); // WriteChannelInfoOffset
        buf.put_u16_le(0); // WriteChannelInfoLength
        buf.put_u32_le(self.flags);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// WRITE response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub count: u32,
}

impl WriteResponse {
    /// StructureSize(2) Reserved(2) Count(4) Remaining(4)
    /// WriteChannelInfoOffset(2) WriteChannelInfoLength(2)
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u16_le(17);
        buf.put_u16_le(0);
        buf.put_u32_le(self.count);
        buf.put_u32_le(0);
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 17, "WRITE response")?;
        Ok(WriteResponse {
            count: get_u32(body, 4, "Count")?,
        })
    }
}
