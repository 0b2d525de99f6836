//! SMB2 ECHO and CANCEL commands.
//! MS-SMB2 Section 2.2.28 - 2.2.30

use bytes::Bytes;

use crate::smb2::{expect_structure_size, DecodeError};

/// ECHO request and response are both a bare 4-byte body.
pub fn encode_echo() -> Bytes {
    super::encode_empty_body()
}

pub fn decode_echo(body: &[u8]) -> Result<(), DecodeError> {
    expect_structure_size(body, 4, "ECHO")
}

/// CANCEL has the same body shape; the target is named by the header's
/// message id (or async id).
pub fn encode_cancel() -> Bytes {
    super::encode_empty_body()
}

pub fn decode_cancel(body: &[u8]) -> Result<(), DecodeError> {
    expect_structure_size(body, 4, "CANCEL")
}
