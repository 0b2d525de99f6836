//! Local directory store.
//!
//! Maps store paths onto a directory via `tokio::fs`. Every resolved path
//! is checked to stay inside the share root, so a symlink inside the share
//! cannot lead a client out of it.

use std::fs::Metadata;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use super::{BackingStore, DirEntry, FileStat, OpenOptions};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// `root` must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                ErrorKind::NotADirectory,
                format!("share root {} is not a directory", root.display()),
            ));
        }
        Ok(LocalStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a store path inside the root.
    ///
    /// Existing paths are canonicalized and must stay under the root. For
    /// paths that do not exist yet the parent is checked instead, so that a
    /// create cannot escape either.
    async fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let candidate = if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        };

        match fs::canonicalize(&candidate).await {
            Ok(canon) => self.check_inside(canon, &candidate),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (candidate.parent(), candidate.file_name()) else {
                    return Err(e);
                };
                let parent = fs::canonicalize(parent).await?;
                let parent = self.check_inside(parent, &candidate)?;
                Ok(parent.join(name))
            }
            Err(e) => Err(e),
        }
    }

    fn check_inside(&self, canon: PathBuf, requested: &Path) -> io::Result<PathBuf> {
        if canon.starts_with(&self.root) {
            Ok(canon)
        } else {
            warn!("Path traversal detected: {:?}", requested);
            Err(io::Error::new(ErrorKind::PermissionDenied, "path escapes share root"))
        }
    }
}

fn to_stat(meta: &Metadata) -> FileStat {
    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
    let accessed = meta.accessed().unwrap_or(modified);
    let created = meta.created().unwrap_or(modified);
    FileStat {
        size: meta.len(),
        is_dir: meta.is_dir(),
        mode: mode_of(meta),
        created,
        accessed,
        modified,
        changed: changed_of(meta).unwrap_or(modified),
        nlink: nlink_of(meta),
        file_id: id_of(meta),
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn changed_of(meta: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    let secs = u64::try_from(meta.ctime()).ok()?;
    let nanos = u32::try_from(meta.ctime_nsec()).ok()?;
    UNIX_EPOCH.checked_add(std::time::Duration::new(secs, nanos))
}

#[cfg(not(unix))]
fn changed_of(_meta: &Metadata) -> Option<SystemTime> {
    None
}

#[cfg(unix)]
fn nlink_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    u32::try_from(meta.nlink()).unwrap_or(u32::MAX)
}

#[cfg(not(unix))]
fn nlink_of(_meta: &Metadata) -> u32 {
    1
}

#[cfg(unix)]
fn id_of(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn id_of(_meta: &Metadata) -> u64 {
    0
}

#[async_trait]
impl BackingStore for LocalStore {
    async fn stat(&self, path: &str) -> io::Result<FileStat> {
        let full = self.resolve(path).await?;
        Ok(to_stat(&fs::metadata(&full).await?))
    }

    async fn open(&self, path: &str, opts: OpenOptions) -> io::Result<FileStat> {
        let full = self.resolve(path).await?;
        let file = fs::OpenOptions::new()
            .read(true)
            .write(opts.create || opts.create_new || opts.truncate)
            .create(opts.create)
            .create_new(opts.create_new)
            .truncate(opts.truncate)
            .open(&full)
            .await?;
        Ok(to_stat(&file.metadata().await?))
    }

    async fn mkdir(&self, path: &str) -> io::Result<FileStat> {
        let full = self.resolve(path).await?;
        fs::create_dir(&full).await?;
        Ok(to_stat(&fs::metadata(&full).await?))
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        if path.is_empty() {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "cannot remove share root"));
        }
        let full = self.resolve(path).await?;
        if fs::metadata(&full).await?.is_dir() {
            fs::remove_dir(&full).await
        } else {
            fs::remove_file(&full).await
        }
    }

    async fn rename(&self, from: &str, to: &str, replace: bool) -> io::Result<()> {
        let src = self.resolve(from).await?;
        let dst = self.resolve(to).await?;
        if !replace && fs::symlink_metadata(&dst).await.is_ok() {
            return Err(io::Error::new(ErrorKind::AlreadyExists, "rename target exists"));
        }
        fs::rename(&src, &dst).await
    }

    #[cfg(unix)]
    async fn set_mode(&self, path: &str, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let full = self.resolve(path).await?;
        fs::set_permissions(&full, std::fs::Permissions::from_mode(mode & 0o7777)).await
    }

    #[cfg(not(unix))]
    async fn set_mode(&self, path: &str, mode: u32) -> io::Result<()> {
        let full = self.resolve(path).await?;
        let mut perms = fs::metadata(&full).await?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        fs::set_permissions(&full, perms).await
    }

    async fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> io::Result<()> {
        if accessed.is_none() && modified.is_none() {
            return Ok(());
        }
        let full = self.resolve(path).await?;
        tokio::task::spawn_blocking(move || {
            let mut times = std::fs::FileTimes::new();
            if let Some(t) = accessed {
                times = times.set_accessed(t);
            }
            if let Some(t) = modified {
                times = times.set_modified(t);
            }
            std::fs::File::open(&full)?.set_times(times)
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn set_len(&self, path: &str, len: u64) -> io::Result<()> {
        let full = self.resolve(path).await?;
        let file = fs::OpenOptions::new().write(true).open(&full).await?;
        file.set_len(len).await
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let full = self.resolve(path).await?;
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&full).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            match entry.metadata().await {
                Ok(meta) => entries.push(DirEntry {
                    name,
                    stat: to_stat(&meta),
                }),
                Err(e) => warn!("Skipping entry {:?}: {}", entry.path(), e),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str, offset: u64, len: u32) -> io::Result<Bytes> {
        let full = self.resolve(path).await?;
        let mut file = fs::File::open(&full).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<u32> {
        let full = self.resolve(path).await?;
        let mut file = fs::OpenOptions::new().write(true).open(&full).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u32)
    }

    async fn flush(&self, path: &str) -> io::Result<()> {
        let full = self.resolve(path).await?;
        let file = fs::File::open(&full).await?;
        file.sync_all().await
    }
}
