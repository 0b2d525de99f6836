//! NT_STATUS codes for SMB2 responses.
//! Reference: [MS-ERREF] Section 2.3

use std::fmt;

/// NT Status codes used by SMB2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NtStatus {
    Success,
    MoreProcessingRequired,
    BufferOverflow,
    NoMoreFiles,
    Unsuccessful,
    InvalidInfoClass,
    InfoLengthMismatch,
    InvalidParameter,
    NoSuchFile,
    InvalidDeviceRequest,
    EndOfFile,
    AccessDenied,
    BufferTooSmall,
    ObjectNameInvalid,
    ObjectNameNotFound,
    ObjectNameCollision,
    ObjectPathNotFound,
    LogonFailure,
    DiskFull,
    InsufficientResources,
    FileIsADirectory,
    NotSupported,
    NetworkNameDeleted,
    BadNetworkName,
    DirectoryNotEmpty,
    NotADirectory,
    Cancelled,
    FileClosed,
    UserSessionDeleted,
    SessionExpired,
    Other(u32),
}

/// The one mapping between named statuses and their wire codes.
const STATUS_TABLE: &[(NtStatus, u32, &str)] = &[
    (NtStatus::Success, 0x0000_0000, "STATUS_SUCCESS"),
    (NtStatus::MoreProcessingRequired, 0xC000_0016, "STATUS_MORE_PROCESSING_REQUIRED"),
    (NtStatus::BufferOverflow, 0x8000_0005, "STATUS_BUFFER_OVERFLOW"),
    (NtStatus::NoMoreFiles, 0x8000_0006, "STATUS_NO_MORE_FILES"),
    (NtStatus::Unsuccessful, 0xC000_0001, "STATUS_UNSUCCESSFUL"),
    (NtStatus::InvalidInfoClass, 0xC000_0003, "STATUS_INVALID_INFO_CLASS"),
    (NtStatus::InfoLengthMismatch, 0xC000_0004, "STATUS_INFO_LENGTH_MISMATCH"),
    (NtStatus::InvalidParameter, 0xC000_000D, "STATUS_INVALID_PARAMETER"),
    (NtStatus::NoSuchFile, 0xC000_000F, "STATUS_NO_SUCH_FILE"),
    (NtStatus::InvalidDeviceRequest, 0xC000_0010, "STATUS_INVALID_DEVICE_REQUEST"),
    (NtStatus::EndOfFile, 0xC000_0011, "STATUS_END_OF_FILE"),
    (NtStatus::AccessDenied, 0xC000_0022, "STATUS_ACCESS_DENIED"),
    (NtStatus::BufferTooSmall, 0xC000_0023, "STATUS_BUFFER_TOO_SMALL"),
    (NtStatus::ObjectNameInvalid, 0xC000_0033, "STATUS_OBJECT_NAME_INVALID"),
    (NtStatus::ObjectNameNotFound, 0xC000_0034, "STATUS_OBJECT_NAME_NOT_FOUND"),
    (NtStatus::ObjectNameCollision, 0xC000_0035, "STATUS_OBJECT_NAME_COLLISION"),
    (NtStatus::ObjectPathNotFound, 0xC000_003A, "STATUS_OBJECT_PATH_NOT_FOUND"),
    (NtStatus::LogonFailure, 0xC000_006D, "STATUS_LOGON_FAILURE"),
    (NtStatus::DiskFull, 0xC000_007F, "STATUS_DISK_FULL"),
    (NtStatus::InsufficientResources, 0xC000_009A, "STATUS_INSUFFICIENT_RESOURCES"),
    (NtStatus::FileIsADirectory, 0xC000_00BA, "STATUS_FILE_IS_A_DIRECTORY"),
    (NtStatus::NotSupported, 0xC000_00BB, "STATUS_NOT_SUPPORTED"),
    (NtStatus::NetworkNameDeleted, 0xC000_00C9, "STATUS_NETWORK_NAME_DELETED"),
    (NtStatus::BadNetworkName, 0xC000_00CC, "STATUS_BAD_NETWORK_NAME"),
    (NtStatus::DirectoryNotEmpty, 0xC000_0101, "STATUS_DIRECTORY_NOT_EMPTY"),
    (NtStatus::NotADirectory, 0xC000_0103, "STATUS_NOT_A_DIRECTORY"),
    (NtStatus::Cancelled, 0xC000_0120, "STATUS_CANCELLED"),
    (NtStatus::FileClosed, 0xC000_0128, "STATUS_FILE_CLOSED"),
    (NtStatus::UserSessionDeleted, 0xC000_0203, "STATUS_USER_SESSION_DELETED"),
    (NtStatus::SessionExpired, 0xC000_035C, "STATUS_NETWORK_SESSION_EXPIRED"),
];

impl NtStatus {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Other(v) => *v,
            named => STATUS_TABLE
                .iter()
                .find(|(status, _, _)| status == named)
                .map(|(_, code, _)| *code)
                .unwrap_or(0xC000_0001),
        }
    }

    pub fn from_u32(v: u32) -> Self {
        STATUS_TABLE
            .iter()
            .find(|(_, code, _)| *code == v)
            .map(|(status, _, _)| *status)
            .unwrap_or(Self::Other(v))
    }

    /// Symbolic name, e.g. `STATUS_FILE_CLOSED`.
    pub fn name(&self) -> &'static str {
        STATUS_TABLE
            .iter()
            .find(|(status, _, _)| status == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("STATUS_UNKNOWN")
    }

    /// Severity bits 11: error.
    pub fn is_error(&self) -> bool {
        (self.as_u32() >> 30) == 3
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(v) => write!(f, "0x{v:08X}"),
            named => f.write_str(named.name()),
        }
    }
}
