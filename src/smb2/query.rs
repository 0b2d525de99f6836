//! SMB2 QUERY_DIRECTORY, QUERY_INFO, and SET_INFO commands.
//! MS-SMB2 Sections 2.2.33-2.2.40

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{
    expect_structure_size, get_buffer, get_u16, get_u32, get_u8, string_to_utf16le, utf16le_to_string,
    DecodeError, FileId,
};

// QueryDirectory flags
pub const SL_RESTART_SCAN: u8 = 0x01;
pub const SL_RETURN_SINGLE_ENTRY: u8 = 0x02;
pub const SL_INDEX_SPECIFIED: u8 = 0x04;
pub const SL_REOPEN: u8 = 0x10;

const QUERY_DIRECTORY_FIXED_SIZE: usize = 32;
const QUERY_INFO_FIXED_SIZE: usize = 40;
const SET_INFO_FIXED_SIZE: usize = 32;
const OUTPUT_FIXED_SIZE: usize = 8;

// ---- QUERY_DIRECTORY ----

/// Parsed QUERY_DIRECTORY request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDirectoryRequest {
    pub file_information_class: u8,
    pub flags: u8,
    pub file_index: u32,
    pub file_id: FileId,
    /// Search pattern; empty when the client sent none.
    pub pattern: String,
    pub output_buffer_length: u32,
}

impl QueryDirectoryRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 33, "QUERY_DIRECTORY request")?;
        let name_offset = get_u16(body, 24, "FileNameOffset")? as usize;
        let name_len = get_u16(body, 26, "FileNameLength")? as usize;
        let pattern = get_buffer(body, name_offset, name_len, "FileName")?;
        Ok(QueryDirectoryRequest {
            file_information_class: get_u8(body, 2, "FileInformationClass")?,
            flags: get_u8(body, 3, "Flags")?,
            file_index: get_u32(body, 4, "FileIndex")?,
            file_id: FileId::decode(body, 8)?,
            pattern: utf16le_to_string(pattern),
            output_buffer_length: get_u32(body, 28, "OutputBufferLength")?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let pattern = string_to_utf16le(&self.pattern);
        let mut buf = BytesMut::with_capacity(QUERY_DIRECTORY_FIXED_SIZE + pattern.len().max(1));
        buf.put_u16_le(33);
        buf.put_u8(self.file_information_class);
        buf.put_u8(self.flags);
        buf.put_u32_le(self.file_index);
        self.file_id.put(&mut buf);
        buf.put_u16_le((SMB2_HEADER_SIZE + QUERY_DIRECTORY_FIXED_SIZE) as u16);
        buf.put_u16_le(pattern.len() as u16);
        buf.put_u32_le(self.output_buffer_length);
        if pattern.is_empty() {
            buf.put_u8(0);
        } else {
            buf.put_slice(&pattern);
        }
        buf.freeze()
    }

    pub fn restart_scan(&self) -> bool {
        self.flags & (SL_RESTART_SCAN | SL_REOPEN) != 0
    }

    pub fn single_entry(&self) -> bool {
        self.flags & SL_RETURN_SINGLE_ENTRY != 0
    }
}

/// QUERY_DIRECTORY and QUERY_INFO responses share one layout:
/// StructureSize(2) OutputBufferOffset(2) OutputBufferLength(4) Buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBufferResponse {
    pub data: Bytes,
}

impl OutputBufferResponse {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(OUTPUT_FIXED_SIZE + self.data.len().max(1));
        buf.put_u16_le(9);
        buf.put_u16_le((SMB2_HEADER_SIZE + OUTPUT_FIXED_SIZE) as u16);
        buf.put_u32_le(self.data.len() as u32);
        if self.data.is_empty() {
            buf.put_u8(0);
        } else {
            buf.put_slice(&self.data);
        }
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 9, "output buffer response")?;
        let offset = get_u16(body, 2, "OutputBufferOffset")? as usize;
        let len = get_u32(body, 4, "OutputBufferLength")? as usize;
        Ok(OutputBufferResponse {
            data: Bytes::copy_from_slice(get_buffer(body, offset, len, "OutputBuffer")?),
        })
    }
}

// ---- QUERY_INFO ----

/// Parsed QUERY_INFO request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryInfoRequest {
    pub info_type: u8,
    pub file_info_class: u8,
    pub output_buffer_length: u32,
    pub additional_information: u32,
    pub flags: u32,
    pub file_id: FileId,
}

impl QueryInfoRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 41, "QUERY_INFO request")?;
        Ok(QueryInfoRequest {
            info_type: get_u8(body, 2, "InfoType")?,
            file_info_class: get_u8(body, 3, "FileInfoClass")?,
            output_buffer_length: get_u32(body, 4, "OutputBufferLength")?,
            additional_information: get_u32(body, 16, "AdditionalInformation")?,
            flags: get_u32(body, 20, "Flags")?,
            file_id: FileId::decode(body, 24)?,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(QUERY_INFO_FIXED_SIZE + 1);
        buf.put_u16_le(41);
        buf.put_u8(self.info_type);
        buf.put_u8(self.file_info_class);
        buf.put_u32_le(self.output_buffer_length);
        buf.put_u16_le(0); // InputBufferOffset
        buf.put_u16_le(0); // Reserved
        buf.put_u32_le(0); // InputBufferLength
        buf.put_u32_le(self.additional_information);
        buf.put_u32_le(self.flags);
        self.file_id.put(&mut buf);
        buf.put_u8(0);
        buf.freeze()
    }
}

// ---- SET_INFO ----

/// Parsed SET_INFO request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetInfoRequest {
    pub info_type: u8,
    pub file_info_class: u8,
    pub additional_information: u32,
    pub file_id: FileId,
    pub buffer: Bytes,
}

impl SetInfoRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 33, "SET_INFO request")?;
        let len = get_u32(body, 4, "BufferLength")? as usize;
        let offset = get_u16(body, 8, "BufferOffset")? as usize;
        Ok(SetInfoRequest {
            info_type: get_u8(body, 2, "InfoType")?,
            file_info_class: get_u8(body, 3, "FileInfoClass")?,
            additional_information: get_u32(body, 12, "AdditionalInformation")?,
            file_id: FileId::decode(body, 16)?,
            buffer: Bytes::copy_from_slice(get_buffer(body, offset, len, "Buffer")?),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SET_INFO_FIXED_SIZE + self.buffer.len());
        buf.put_u16_le(33);
        buf.put_u8(self.info_type);
        buf.put_u8(self.file_info_class);
        buf.put_u32_le(self.buffer.len() as u32);
        buf.put_u16_le((SMB2_HEADER_SIZE + SET_INFO_FIXED_SIZE) as u16);
        buf.put_u16_le(0); // Reserved
        buf.put_u32_le(self.additional_information);
        self.file_id.put(&mut buf);
        buf.put_slice(&self.buffer);
        buf.freeze()
    }
}

/// SET_INFO response: StructureSize(2) only.
pub fn encode_set_info_response() -> Bytes {
    Bytes::from_static(&[2, 0])
}
