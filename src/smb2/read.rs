//! SMB2 READ command.
//! MS-SMB2 Section 2.2.19 (Request) and 2.2.20 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{expect_structure_size, get_buffer, get_u32, get_u64, get_u8, DecodeError, FileId};

const RESPONSE_FIXED_SIZE: usize = 16;

/// Parsed READ request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
}

impl ReadRequest {
    /// StructureSize(2) Padding(1) Flags(1) Length(4) Offset(8) FileId(16)
    /// MinimumCount(4) Channel(4) RemainingBytes(4) ReadChannelInfoOffset(2)
    /// ReadChannelInfoLength(2) Buffer(1)
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 49, "READ request")?;
        Ok(ReadRequest {
            length: get_u32(body, 4, "Length")?,
            offset: get_u64(body, 8, "Offset")?,
            file_id: FileId::decode(body, 16)?,
            minimum_count: get_u32(body, 32, "MinimumCount")?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(49);
        buf.put_u16_le(49);
        buf.put_u8(0); // Padding
        buf.put_u8(0); // Flags
        buf.put_u32_le(self.length);
        buf.put_u64_le(self.offset);
        self.file_id.put(&mut buf);
        buf.put_u32_le(self.minimum_count);
        buf.put_u32_le(0); // Channel
        buf.put_u32_le(0); // RemainingBytes
        buf.put_u16_le(0); // ReadChannelInfoOffset
        buf.put_u16_le(0); // ReadChannelInfoLength
        buf.put_u8(0); // Buffer
        buf.freeze()
    }
}

/// READ response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub data: Bytes,
}

impl ReadResponse {
    /// StructureSize(2) DataOffset(1) Reserved(1) DataLength(4)
    /// DataRemaining(4) Reserved2(4), then the data.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_FIXED_SIZE + self.data.len());
        buf.put_u16_le(17);
        buf.put_u8((SMB2_HEADER_SIZE + RESPONSE_FIXED_SIZE) as u8);
        buf.put_u8(0);
        buf.put_u32_le(self.data.len() as u32);
        buf.put_u32_le(0);
        buf.put_u32_le(0);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 17, "READ response")?;
        let offset = get_u8(body, 2, "DataOffset")? as usize;
        let len = get_u32(body, 4, "DataLength")? as usize;
        Ok(ReadResponse {
            data: Bytes::copy_from_slice(get_buffer(body, offset, len, "Data")?),
        })
    }
}
