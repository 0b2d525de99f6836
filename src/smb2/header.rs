//! SMB2 Packet Header.
//! MS-SMB2 Section 2.2.1

use bytes::{Bytes, BytesMut};

use crate::smb2::status::NtStatus;
use crate::smb2::{get_bytes, get_u16, get_u32, get_u64, put_bytes, put_u16, put_u32, put_u64};
use crate::smb2::DecodeError;

/// Size of the SMB2 header in bytes.
pub const SMB2_HEADER_SIZE: usize = 64;

/// SMB2 protocol magic: 0xFE 'S' 'M' 'B'
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB1 protocol magic, rejected on sight.
pub const SMB1_MAGIC: [u8; 4] = [0xFF, b'S', b'M', b'B'];

/// Flags: response (server to client)
pub const FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
/// Flags: asynchronous header layout
pub const FLAGS_ASYNC_COMMAND: u32 = 0x0000_0002;
/// Flags: part of a related compound chain
pub const FLAGS_RELATED_OPERATIONS: u32 = 0x0000_0004;
/// Flags: message is signed
pub const FLAGS_SIGNED: u32 = 0x0000_0008;
/// Flags: request priority (3 bits)
pub const FLAGS_PRIORITY_MASK: u32 = 0x0000_0070;

/// Byte range of the signature inside the header.
pub const SIGNATURE_OFFSET: usize = 48;
pub const SIGNATURE_LEN: usize = 16;

/// Parsed SMB2 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: NtStatus,
    pub command: u16,
    /// CreditRequest on requests, CreditResponse (the grant) on responses.
    pub credits: u16,
    pub flags: u32,
    /// Byte offset to the next compounded command; 0 if none.
    pub next_command: u32,
    pub message_id: u64,
    /// Async id; only meaningful when FLAGS_ASYNC_COMMAND is set.
    pub async_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    /// Decode an SMB2 header from the first 64 bytes of `input`.
    pub fn decode(input: &[u8]) -> Result<Self, DecodeError> {
        let raw = get_bytes(input, 0, SMB2_HEADER_SIZE, "SMB2 header")?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&raw[0..4]);
        if magic != SMB2_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let structure_size = get_u16(raw, 4, "StructureSize")?;
        if structure_size != SMB2_HEADER_SIZE as u16 {
            return Err(DecodeError::StructureSize {
                what: "SMB2 header",
                expected: SMB2_HEADER_SIZE as u16,
                actual: structure_size,
            });
        }

        let flags = get_u32(raw, 16, "Flags")?;

        // Bytes 32..40: sync requests carry Reserved + TreeId, async ones AsyncId.
        let (async_id, tree_id) = if flags & FLAGS_ASYNC_COMMAND != 0 {
            (get_u64(raw, 32, "AsyncId")?, 0)
        } else {
            (0, get_u32(raw, 36, "TreeId")?)
        };

        let mut signature = [0u8; 16];
        signature.copy_from_slice(get_bytes(raw, SIGNATURE_OFFSET, SIGNATURE_LEN, "Signature")?);

        Ok(Smb2Header {
            credit_charge: get_u16(raw, 6, "CreditCharge")?,
            status: NtStatus::from_u32(get_u32(raw, 8, "Status")?),
            command: get_u16(raw, 12, "Command")?,
            credits: get_u16(raw, 14, "CreditRequest")?,
            flags,
            next_command: get_u32(raw, 20, "NextCommand")?,
            message_id: get_u64(raw, 24, "MessageId")?,
            async_id,
            tree_id,
            session_id: get_u64(raw, 40, "SessionId")?,
            signature,
        })
    }

    /// Encode this header into its 64-byte wire form.
    pub fn encode(&self) -> [u8; SMB2_HEADER_SIZE] {
        let mut buf = [0u8; SMB2_HEADER_SIZE];
        put_bytes(&mut buf, 0, &SMB2_MAGIC);
        put_u16(&mut buf, 4, SMB2_HEADER_SIZE as u16);
        put_u16(&mut buf, 6, self.credit_charge);
        put_u32(&mut buf, 8, self.status.as_u32());
        put_u16(&mut buf, 12, self.command);
        put_u16(&mut buf, 14, self.credits);
        put_u32(&mut buf, 16, self.flags);
        put_u32(&mut buf, 20, self.next_command);
        put_u64(&mut buf, 24, self.message_id);
        if self.flags & FLAGS_ASYNC_COMMAND != 0 {
            put_u64(&mut buf, 32, self.async_id);
        } else {
            put_u32(&mut buf, 36, self.tree_id);
        }
        put_u64(&mut buf, 40, self.session_id);
        put_bytes(&mut buf, SIGNATURE_OFFSET, &self.signature);
        buf
    }

    /// A request header with everything but the routing fields zeroed.
    pub fn request(command: u16, message_id: u64, session_id: u64, tree_id: u32) -> Self {
        Smb2Header {
            credit_charge: 1,
            status: NtStatus::Success,
            command,
            credits: 1,
            flags: 0,
            next_command: 0,
            message_id,
            async_id: 0,
            tree_id,
            session_id,
            signature: [0; 16],
        }
    }

    /// Create a response header corresponding to a request header.
    ///
    /// Mirrors command, message id, session id, tree id, credit charge and
    /// priority. The SIGNED flag is never copied from the request; the
    /// dispatcher sets it when it signs the response.
    pub fn new_response(req: &Smb2Header, status: NtStatus, credits_granted: u16) -> Self {
        Smb2Header {
            credit_charge: req.credit_charge,
            status,
            command: req.command,
            credits: credits_granted,
            flags: FLAGS_SERVER_TO_REDIR | (req.flags & FLAGS_PRIORITY_MASK),
            next_command: 0,
            message_id: req.message_id,
            async_id: 0,
            tree_id: req.tree_id,
            session_id: req.session_id,
            signature: [0; 16],
        }
    }

    pub fn is_signed(&self) -> bool {
        self.flags & FLAGS_SIGNED != 0
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAGS_SERVER_TO_REDIR != 0
    }
}

/// Decode one message from a transport frame.
///
/// The payload is cut at the next-command offset when the frame carries a
/// compound chain, so a chained message is never read as part of the first
/// one's body. The offset must be 8-byte aligned and inside the frame.
pub fn decode_message(frame: &[u8]) -> Result<(Smb2Header, &[u8]), DecodeError> {
    let header = Smb2Header::decode(frame)?;
    let end = match header.next_command {
        0 => frame.len(),
        next => {
            let next_usize = next as usize;
            if next_usize < SMB2_HEADER_SIZE || next % 8 != 0 || next_usize > frame.len() {
                return Err(DecodeError::BadChainOffset(next));
            }
            next_usize
        }
    };
    Ok((header, &frame[SMB2_HEADER_SIZE..end]))
}

/// Encode a header and body into one message. Exact inverse of
/// [`decode_message`] for unchained messages.
pub fn encode_message(header: &Smb2Header, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SMB2_HEADER_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf.freeze()
}
