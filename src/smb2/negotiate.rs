//! SMB2 NEGOTIATE command.
//! MS-SMB2 Section 2.2.3 (Request) and 2.2.4 (Response)

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{expect_structure_size, get_buffer, get_bytes, get_u16, get_u32, get_u64, DecodeError};

/// Dialect revisions this engine understands.
pub const DIALECT_SMB2_0_2: u16 = 0x0202;
pub const DIALECT_SMB2_1: u16 = 0x0210;

/// SecurityMode bits.
pub const SECURITY_SIGNING_ENABLED: u16 = 0x0001;
pub const SECURITY_SIGNING_REQUIRED: u16 = 0x0002;

/// Capabilities advertised for SMB 2.1.
pub const CAP_LARGE_MTU: u32 = 0x0000_0004;

const REQUEST_FIXED_SIZE: usize = 36;
const RESPONSE_FIXED_SIZE: usize = 64;

/// Parsed NEGOTIATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateRequest {
    pub security_mode: u16,
    pub capabilities: u32,
    pub client_guid: [u8; 16],
    pub dialects: Vec<u16>,
}

impl NegotiateRequest {
    /// Parse from the body bytes (after the 64-byte SMB2 header).
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 36, "NEGOTIATE request")?;
        let dialect_count = get_u16(body, 2, "DialectCount")? as usize;
        let security_mode = get_u16(body, 4, "SecurityMode")?;
        let capabilities = get_u32(body, 8, "Capabilities")?;
        let mut client_guid = [0u8; 16];
        client_guid.copy_from_slice(get_bytes(body, 12, 16, "ClientGuid")?);

        let dialects = (0..dialect_count)
            .map(|i| get_u16(body, REQUEST_FIXED_SIZE + i * 2, "Dialects"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NegotiateRequest {
            security_mode,
            capabilities,
            client_guid,
            dialects,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_FIXED_SIZE + self.dialects.len() * 2);
        buf.put_u16_le(36); // StructureSize
        buf.put_u16_le(self.dialects.len() as u16);
        buf.put_u16_le(self.security_mode);
        buf.put_u16_le(0); // Reserved
        buf.put_u32_le(self.capabilities);
        buf.put_slice(&self.client_guid);
        buf.put_u64_le(0); // ClientStartTime
        for d in &self.dialects {
            buf.put_u16_le(*d);
        }
        buf.freeze()
    }
}

/// NEGOTIATE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
    pub server_guid: [u8; 16],
    pub capabilities: u32,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    /// FILETIME values supplied by the engine's clock.
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_buffer: Vec<u8>,
}

impl NegotiateResponse {
    /// The security buffer offset is relative to the start of the SMB2 header.
    pub fn encode(&self) -> Bytes {
        let sec_offset = (SMB2_HEADER_SIZE + RESPONSE_FIXED_SIZE) as u16;
        let mut buf = BytesMut::with_capacity(RESPONSE_FIXED_SIZE + self.security_buffer.len());
        buf.put_u16_le(65); // StructureSize
        buf.put_u16_le(self.security_mode);
        buf.put_u16_le(self.dialect);
        buf.put_u16_le(0); // NegotiateContextCount
        buf.put_slice(&self.server_guid);
        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(self.max_transact_size);
        buf.put_u32_le(self.max_read_size);
        buf.put_u32_le(self.max_write_size);
        buf.put_u64_le(self.system_time);
        buf.put_u64_le(self.server_start_time);
        buf.put_u16_le(sec_offset);
        buf.put_u16_le(self.security_buffer.len() as u16);
        buf.put_u32_le(0); // NegotiateContextOffset
        buf.put_slice(&self.security_buffer);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 65, "NEGOTIATE response")?;
        let mut server_guid = [0u8; 16];
        server_guid.copy_from_slice(get_bytes(body, 8, 16, "ServerGuid")?);
        let sec_offset = get_u16(body, 56, "SecurityBufferOffset")? as usize;
        let sec_len = get_u16(body, 58, "SecurityBufferLength")? as usize;
        Ok(NegotiateResponse {
            security_mode: get_u16(body, 2, "SecurityMode")?,
            dialect: get_u16(body, 4, "DialectRevision")?,
            server_guid,
            capabilities: get_u32(body, 24, "Capabilities")?,
            max_transact_size: get_u32(body, 28, "MaxTransactSize")?,
            max_read_size: get_u32(body, 32, "MaxReadSize")?,
            max_write_size: get_u32(body, 36, "MaxWriteSize")?,
            system_time: get_u64(body, 40, "SystemTime")?,
            server_start_time: get_u64(body, 48, "ServerStartTime")?,
            security_buffer: get_buffer(body, sec_offset, sec_len, "SecurityBuffer")?.to_vec(),
        })
    }
}
