//! SMB2 message signing (HMAC-SHA256).
//!
//! SMB 2.0.2 and 2.1 sign with HMAC-SHA256 keyed by the session signing
//! key, truncated to 16 bytes. The signature occupies bytes 48..64 of the
//! SMB2 header and is zero while the MAC is computed.
//!
//! MS-SMB2 Section 3.1.4.1 (signing)

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::smb2::header::{SIGNATURE_LEN, SIGNATURE_OFFSET, SMB2_HEADER_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Length of a session signing key.
pub const SESSION_KEY_LEN: usize = 16;

/// MAC over the message with the signature field zeroed.
fn message_mac(key: &[u8], message: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 takes any key length"));
    mac.update(&message[..SIGNATURE_OFFSET]);
    mac.update(&[0u8; SIGNATURE_LEN]);
    mac.update(&message[SIGNATURE_OFFSET + SIGNATURE_LEN..]);
    mac
}

/// Compute and write the signature into `message` (header + body).
///
/// Messages shorter than a header, or an empty key, are left untouched.
pub fn sign_message(key: &[u8], message: &mut [u8]) {
    if key.is_empty() || message.len() < SMB2_HEADER_SIZE {
        return;
    }
    let result = message_mac(key, message).finalize().into_bytes();
    message[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN].copy_from_slice(&result[..SIGNATURE_LEN]);
}

/// Verify the signature of a received message.
///
/// Returns `true` if the signature is valid or if `key` is empty (unsigned).
pub fn verify_signature(key: &[u8], message: &[u8]) -> bool {
    if key.is_empty() {
        return true;
    }
    if message.len() < SMB2_HEADER_SIZE {
        return false;
    }
    let received = &message[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN];
    message_mac(key, message).verify_truncated_left(received).is_ok()
}
