//! Backing stores.
//!
//! A tree connection performs every file operation through a
//! [`BackingStore`]. Stores are keyed by normalized share-relative paths:
//! components separated by `/`, no leading or trailing separator, and
//! `""` for the share root. [`normalize_path`] turns a client-supplied
//! name into that form.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use std::fmt;
use std::io;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use crate::smb2::status::NtStatus;

/// Metadata for one file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    /// POSIX permission bits; only the owner-write bit is interpreted.
    pub mode: u32,
    pub created: SystemTime,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub changed: SystemTime,
    pub nlink: u32,
    /// Stable per-object identifier (inode number or equivalent).
    pub file_id: u64,
}

/// One directory member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: FileStat,
}

/// How [`BackingStore::open`] treats existing and missing regular files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Fail with `AlreadyExists` if the file exists.
    pub create_new: bool,
    /// Truncate an existing file to zero length.
    pub truncate: bool,
}

#[async_trait]
pub trait BackingStore: Send + Sync + fmt::Debug {
    async fn stat(&self, path: &str) -> io::Result<FileStat>;

    /// Open (and optionally create or truncate) a regular file.
    async fn open(&self, path: &str, opts: OpenOptions) -> io::Result<FileStat>;

    async fn mkdir(&self, path: &str) -> io::Result<FileStat>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &str) -> io::Result<()>;

    /// Move `from` to `to` in one step. Without `replace`, an existing
    /// target yields `AlreadyExists`.
    async fn rename(&self, from: &str, to: &str, replace: bool) -> io::Result<()>;

    async fn set_mode(&self, path: &str, mode: u32) -> io::Result<()>;

    /// `None` leaves that timestamp unchanged.
    async fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> io::Result<()>;

    async fn set_len(&self, path: &str, len: u64) -> io::Result<()>;

    /// Members of a directory, sorted by name. `.` and `..` are not included.
    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Up to `len` bytes at `offset`; fewer at end of file.
    async fn read(&self, path: &str, offset: u64, len: u32) -> io::Result<Bytes>;

    /// Write `data` at `offset`, extending the file as needed.
    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<u32>;

    async fn flush(&self, _path: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Normalize a client path (backslash separated, relative to the share)
/// into store form. `.` components are dropped; `..`, stream syntax and
/// wildcard characters are rejected.
pub fn normalize_path(raw: &str) -> Result<String, NtStatus> {
    let mut parts = Vec::new();
    for component in raw.split(['\\', '/']) {
        match component {
            "" | "." => continue,
            ".." => return Err(NtStatus::ObjectNameInvalid),
            c if c.contains([':', '*', '?', '"', '<', '>', '|', '\0']) => {
                return Err(NtStatus::ObjectNameInvalid)
            }
            c => parts.push(c),
        }
    }
    Ok(parts.join("/"))
}

/// Parent of a normalized path; the root is its own parent.
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Final component of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Join a directory path and a member name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Case-insensitive wildcard match: `*` matches any run of characters,
/// `?` exactly one. An empty pattern matches everything.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() || pattern == "*" {
        return true;
    }
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let n: Vec<char> = name.to_lowercase().chars().collect();

    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ni));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ni = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
