//! SMB2 SESSION_SETUP and LOGOFF commands.
//! MS-SMB2 Section 2.2.5 - 2.2.8

use bytes::{BufMut, Bytes, BytesMut};

use crate::smb2::header::SMB2_HEADER_SIZE;
use crate::smb2::{expect_structure_size, get_buffer, get_u16, get_u32, get_u64, get_u8, DecodeError};

/// SessionFlags: the session was established as guest.
pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
/// SessionFlags: the session is anonymous.
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

const REQUEST_FIXED_SIZE: usize = 24;
const RESPONSE_FIXED_SIZE: usize = 8;

/// Parsed SESSION_SETUP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupRequest {
    pub flags: u8,
    pub security_mode: u8,
    pub capabilities: u32,
    pub previous_session_id: u64,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupRequest {
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 25, "SESSION_SETUP request")?;
        let sec_offset = get_u16(body, 12, "SecurityBufferOffset")? as usize;
        let sec_len = get_u16(body, 14, "SecurityBufferLength")? as usize;
        Ok(SessionSetupRequest {
            flags: get_u8(body, 2, "Flags")?,
            security_mode: get_u8(body, 3, "SecurityMode")?,
            capabilities: get_u32(body, 4, "Capabilities")?,
            previous_session_id: get_u64(body, 16, "PreviousSessionId")?,
            security_buffer: get_buffer(body, sec_offset, sec_len, "SecurityBuffer")?.to_vec(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let sec_offset = (SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16;
        let mut buf = BytesMut::with_capacity(REQUEST_FIXED_SIZE + self.security_buffer.len());
        buf.put_u16_le(25); // StructureSize
        buf.put_u8(self.flags);
        buf.put_u8(self.security_mode);
        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(0); // Channel
        buf.put_u16_le(sec_offset);
        buf.put_u16_le(self.security_buffer.len() as u16);
        buf.put_u64_le(self.previous_session_id);
        buf.put_slice(&self.security_buffer);
        buf.freeze()
    }
}

/// SESSION_SETUP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupResponse {
    pub session_flags: u16,
    pub security_buffer: Vec<u8>,
}

impl SessionSetupResponse {
    pub fn encode(&self) -> Bytes {
        let sec_offset = (SMB2_HEADER_SIZE + RESPONSE_FIXED_SIZE) as u16;
        let mut buf = BytesMut::with_capacity(RESPONSE_FIXED_SIZE + self.security_buffer.len());
        buf.put_u16_le(9); // StructureSize
        buf.put_u16_le(self.session_flags);
        buf.put_u16_le(sec_offset);
        buf.put_u16_le(self.security_buffer.len() as u16);
        buf.put_slice(&self.security_buffer);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        expect_structure_size(body, 9, "SESSION_SETUP response")?;
        let sec_offset = get_u16(body, 4, "SecurityBufferOffset")? as usize;
        let sec_len = get_u16(body, 6, "SecurityBufferLength")? as usize;
        Ok(SessionSetupResponse {
            session_flags: get_u16(body, 2, "SessionFlags")?,
            security_buffer: get_buffer(body, sec_offset, sec_len, "SecurityBuffer")?.to_vec(),
        })
    }
}

/// LOGOFF request and response share the same 4-byte body.
pub fn encode_logoff() -> Bytes {
    super::encode_empty_body()
}

pub fn decode_logoff(body: &[u8]) -> Result<(), DecodeError> {
    expect_structure_size(body, 4, "LOGOFF")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_setup_request_buffer_roundtrip() {
        let req = SessionSetupRequest {
            flags: 0,
            security_mode: 1,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer: b"NTLMSSP\0token".to_vec(),
        };
        let encoded = req.encode();
        assert_eq!(u16::from_le_bytes([encoded[12], encoded[13]]), 88);
        assert_eq!(SessionSetupRequest::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn test_session_setup_buffer_outside_message() {
        let mut encoded = SessionSetupRequest {
            flags: 0,
            security_mode: 0,
            capabilities: 0,
            previous_session_id: 0,
            security_buffer: vec![1, 2, 3, 4],
        }
        .encode()
        .to_vec();
        encoded[14] = 200;
        assert!(matches!(
            SessionSetupRequest::decode(&encoded),
            Err(DecodeError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_session_setup_response_offset() {
        let resp = SessionSetupResponse {
            session_flags: SESSION_FLAG_IS_GUEST,
            security_buffer: vec![0xA1, 0x00],
        };
        let buf = resp.encode();
        assert_eq!(u16::from_le_bytes([buf[4], buf[5]]), 72);
        assert_eq!(SessionSetupResponse::decode(&buf).unwrap(), resp);
    }

    #[test]
    fn test_logoff_body() {
        let body = encode_logoff();
        assert_eq!(body.len(), 4);
        assert!(decode_logoff(&body).is_ok());
    }
}
