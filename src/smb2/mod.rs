//! SMB2 protocol types: headers, commands, and status codes.
//!
//! Every body type decodes from and encodes to plain byte buffers using
//! explicit field offsets. Reads are bounds-checked and report a
//! [`DecodeError`] instead of panicking on short input.
//! Reference: [MS-SMB2] — Server Message Block Protocol Versions 2 and 3

pub mod header;
pub mod negotiate;
pub mod session;
pub mod tree;
pub mod create;
pub mod close;
pub mod flush;
pub mod read;
pub mod write;
pub mod query;
pub mod info;
pub mod echo;
pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::smb2::header::SMB2_HEADER_SIZE;

/// Number of opcodes defined by SMB2 (NEGOTIATE through OPLOCK_BREAK).
pub const COMMAND_COUNT: usize = 19;

/// SMB2 command codes.
/// MS-SMB2 Section 2.2.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    Logoff = 0x0002,
    TreeConnect = 0x0003,
    TreeDisconnect = 0x0004,
    Create = 0x0005,
    Close = 0x0006,
    Flush = 0x0007,
    Read = 0x0008,
    Write = 0x0009,
    Lock = 0x000A,
    Ioctl = 0x000B,
    Cancel = 0x000C,
    Echo = 0x000D,
    QueryDirectory = 0x000E,
    ChangeNotify = 0x000F,
    QueryInfo = 0x0010,
    SetInfo = 0x0011,
    OplockBreak = 0x0012,
}

impl Smb2Command {
    /// All commands, indexed by opcode.
    pub const ALL: [Smb2Command; COMMAND_COUNT] = [
        Self::Negotiate,
        Self::SessionSetup,
        Self::Logoff,
        Self::TreeConnect,
        Self::TreeDisconnect,
        Self::Create,
        Self::Close,
        Self::Flush,
        Self::Read,
        Self::Write,
        Self::Lock,
        Self::Ioctl,
        Self::Cancel,
        Self::Echo,
        Self::QueryDirectory,
        Self::ChangeNotify,
        Self::QueryInfo,
        Self::SetInfo,
        Self::OplockBreak,
    ];

    pub fn from_u16(v: u16) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Protocol name used in traces.
    pub fn name(self) -> &'static str {
        match self {
            Self::Negotiate => "NEGOTIATE",
            Self::SessionSetup => "SESSION_SETUP",
            Self::Logoff => "LOGOFF",
            Self::TreeConnect => "TREE_CONNECT",
            Self::TreeDisconnect => "TREE_DISCONNECT",
            Self::Create => "CREATE",
            Self::Close => "CLOSE",
            Self::Flush => "FLUSH",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Lock => "LOCK",
            Self::Ioctl => "IOCTL",
            Self::Cancel => "CANCEL",
            Self::Echo => "ECHO",
            Self::QueryDirectory => "QUERY_DIRECTORY",
            Self::ChangeNotify => "CHANGE_NOTIFY",
            Self::QueryInfo => "QUERY_INFO",
            Self::SetInfo => "SET_INFO",
            Self::OplockBreak => "OPLOCK_BREAK",
        }
    }
}

/// Failure to decode a header or command body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{what}: need {needed} bytes, have {available}")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("bad protocol magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("{what}: structure size {actual}, expected {expected}")]
    StructureSize {
        what: &'static str,
        expected: u16,
        actual: u16,
    },
    #[error("{what}: buffer at offset {offset} length {length} lies outside the message")]
    OutOfBounds {
        what: &'static str,
        offset: usize,
        length: usize,
    },
    #[error("next command offset {0} is not a valid chained message boundary")]
    BadChainOffset(u32),
}

// ---- Bounds-checked field access ----

pub(crate) fn get_bytes<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    let end = offset.checked_add(len).ok_or(DecodeError::OutOfBounds {
        what,
        offset,
        length: len,
    })?;
    buf.get(offset..end).ok_or(DecodeError::Truncated {
        what,
        needed: end,
        available: buf.len(),
    })
}

pub(crate) fn get_u8(buf: &[u8], offset: usize, what: &'static str) -> Result<u8, DecodeError> {
    Ok(get_bytes(buf, offset, 1, what)?[0])
}

pub(crate) fn get_u16(buf: &[u8], offset: usize, what: &'static str) -> Result<u16, DecodeError> {
    let b = get_bytes(buf, offset, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn get_u32(buf: &[u8], offset: usize, what: &'static str) -> Result<u32, DecodeError> {
    let b = get_bytes(buf, offset, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn get_u64(buf: &[u8], offset: usize, what: &'static str) -> Result<u64, DecodeError> {
    let b = get_bytes(buf, offset, 8, what)?;
    let mut v = [0u8; 8];
    v.copy_from_slice(b);
    Ok(u64::from_le_bytes(v))
}

/// Check the StructureSize field at the start of a command body.
pub(crate) fn expect_structure_size(
    body: &[u8],
    expected: u16,
    what: &'static str,
) -> Result<(), DecodeError> {
    let actual = get_u16(body, 0, what)?;
    if actual != expected {
        return Err(DecodeError::StructureSize { what, expected, actual });
    }
    Ok(())
}

/// Fetch a variable-length buffer whose offset is counted from the start of
/// the SMB2 header, as all SMB2 offset fields are.
pub(crate) fn get_buffer<'a>(
    body: &'a [u8],
    offset_from_header: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], DecodeError> {
    if len == 0 {
        return Ok(&[]);
    }
    let local = offset_from_header
        .checked_sub(SMB2_HEADER_SIZE)
        .ok_or(DecodeError::OutOfBounds {
            what,
            offset: offset_from_header,
            length: len,
        })?;
    get_bytes(body, local, len, what).map_err(|_| DecodeError::OutOfBounds {
        what,
        offset: offset_from_header,
        length: len,
    })
}

// Writers operate on buffers allocated at their final size, so every offset
// below is in range by construction.

pub(crate) fn put_u16(buf: &mut [u8], offset: usize, v: u16) {
    buf[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_bytes(buf: &mut [u8], offset: usize, data: &[u8]) {
    buf[offset..offset + data.len()].copy_from_slice(data);
}

/// 16-byte file handle: persistent and volatile halves.
/// MS-SMB2 Section 2.2.14.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    /// The server hands out a single id per open and mirrors it in both halves.
    pub fn from_handle(id: u64) -> Self {
        FileId {
            persistent: id,
            volatile: id,
        }
    }

    pub(crate) fn decode(buf: &[u8], offset: usize) -> Result<Self, DecodeError> {
        Ok(FileId {
            persistent: get_u64(buf, offset, "FileId.Persistent")?,
            volatile: get_u64(buf, offset + 8, "FileId.Volatile")?,
        })
    }

    pub(crate) fn put(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.persistent);
        buf.put_u64_le(self.volatile);
    }
}

/// The 4-byte body (StructureSize 4 + Reserved) shared by LOGOFF,
/// TREE_DISCONNECT, ECHO and the FLUSH response.
pub fn encode_empty_body() -> Bytes {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u16_le(4);
    buf.put_u16_le(0);
    buf.freeze()
}

/// Decode a UTF-16LE byte slice into a Rust String.
pub fn utf16le_to_string(data: &[u8]) -> String {
    let u16s: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&u16s).trim_end_matches('\0').to_string()
}

/// Encode a Rust string as UTF-16LE bytes.
pub fn string_to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect()
}
