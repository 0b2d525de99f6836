//! In-memory store.
//!
//! Holds the whole tree in a `BTreeMap` keyed by normalized path. Useful
//! for scratch shares and for tests that should not touch the disk.
//! Timestamps come from the engine clock.

use std::collections::BTreeMap;
use std::io::{self, ErrorKind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use super::{file_name, parent_path, BackingStore, DirEntry, FileStat, OpenOptions};
use crate::clock::Clock;

#[derive(Debug, Clone)]
struct Node {
    stat: FileStat,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    next_id: u64,
}

#[derive(Debug)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    tree: Mutex<Tree>,
}

/// Largest file the store will hold. Writes and truncations past it fail
/// with `FileTooLarge` instead of allocating.
pub const MAX_FILE_SIZE: u64 = 1 << 30;

fn not_found() -> io::Error {
    io::Error::new(ErrorKind::NotFound, "no such file or directory")
}

/// Resize file contents to `len` bytes, zero-filling any growth.
fn set_data_len(data: &mut Vec<u8>, len: u64) -> io::Result<()> {
    if len > MAX_FILE_SIZE {
        return Err(io::Error::new(ErrorKind::FileTooLarge, "file exceeds the memory store limit"));
    }
    let len = len as usize;
    if len > data.len() {
        data.try_reserve_exact(len - data.len())
            .map_err(|_| io::Error::from(ErrorKind::OutOfMemory))?;
    }
    data.resize(len, 0);
    Ok(())
}

/// Whether `path` is `dir` itself or lies below it.
fn is_within(path: &str, dir: &str) -> bool {
    path == dir
        || dir.is_empty()
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            String::new(),
            Node {
                stat: FileStat {
                    size: 0,
                    is_dir: true,
                    mode: 0o755,
                    created: now,
                    accessed: now,
                    modified: now,
                    changed: now,
                    nlink: 1,
                    file_id: 1,
                },
                data: Vec::new(),
            },
        );
        MemoryStore {
            clock,
            tree: Mutex::new(Tree { nodes, next_id: 2 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_stat(tree: &mut Tree, is_dir: bool, now: SystemTime) -> FileStat {
        let file_id = tree.next_id;
        tree.next_id += 1;
        FileStat {
            size: 0,
            is_dir,
            mode: if is_dir { 0o755 } else { 0o644 },
            created: now,
            accessed: now,
            modified: now,
            changed: now,
            nlink: 1,
            file_id,
        }
    }

    /// The parent of `path` must exist and be a directory.
    fn check_parent(tree: &Tree, path: &str) -> io::Result<()> {
        match tree.nodes.get(parent_path(path)) {
            Some(node) if node.stat.is_dir => Ok(()),
            Some(_) => Err(io::Error::new(ErrorKind::NotADirectory, "parent is not a directory")),
            None => Err(not_found()),
        }
    }

    fn touch_parent(tree: &mut Tree, path: &str, now: SystemTime) {
        if let Some(parent) = tree.nodes.get_mut(parent_path(path)) {
            parent.stat.modified = now;
            parent.stat.changed = now;
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn stat(&self, path: &str) -> io::Result<FileStat> {
        self.lock().nodes.get(path).map(|n| n.stat.clone()).ok_or_else(not_found)
    }

    async fn open(&self, path: &str, opts: OpenOptions) -> io::Result<FileStat> {
        let now = self.clock.now();
        let mut tree = self.lock();
        if let Some(node) = tree.nodes.get_mut(path) {
            if opts.create_new {
                return Err(io::Error::new(ErrorKind::AlreadyExists, "file exists"));
            }
            if node.stat.is_dir {
                return Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"));
            }
            if opts.truncate {
                node.data.clear();
                node.stat.size = 0;
                node.stat.modified = now;
                node.stat.changed = now;
            }
            return Ok(node.stat.clone());
        }
        if !(opts.create || opts.create_new) || path.is_empty() {
            return Err(not_found());
        }
        Self::check_parent(&tree, path)?;
        let stat = Self::new_stat(&mut tree, false, now);
        tree.nodes.insert(
            path.to_string(),
            Node {
                stat: stat.clone(),
                data: Vec::new(),
            },
        );
        Self::touch_parent(&mut tree, path, now);
        Ok(stat)
    }

    async fn mkdir(&self, path: &str) -> io::Result<FileStat> {
        let now = self.clock.now();
        let mut tree = self.lock();
        if tree.nodes.contains_key(path) {
            return Err(io::Error::new(ErrorKind::AlreadyExists, "directory exists"));
        }
        Self::check_parent(&tree, path)?;
        let stat = Self::new_stat(&mut tree, true, now);
        tree.nodes.insert(
            path.to_string(),
            Node {
                stat: stat.clone(),
                data: Vec::new(),
            },
        );
        Self::touch_parent(&mut tree, path, now);
        Ok(stat)
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        if path.is_empty() {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "cannot remove share root"));
        }
        let now = self.clock.now();
        let mut tree = self.lock();
        let is_dir = tree.nodes.get(path).ok_or_else(not_found)?.stat.is_dir;
        if is_dir
            && tree
                .nodes
                .keys()
                .any(|k| k != path && is_within(k, path))
        {
            return Err(io::Error::new(ErrorKind::DirectoryNotEmpty, "directory not empty"));
        }
        tree.nodes.remove(path);
        Self::touch_parent(&mut tree, path, now);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str, replace: bool) -> io::Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(io::Error::new(ErrorKind::PermissionDenied, "cannot rename share root"));
        }
        let now = self.clock.now();
        let mut tree = self.lock();
        let src_is_dir = tree.nodes.get(from).ok_or_else(not_found)?.stat.is_dir;
        if from == to {
            return Ok(());
        }
        if src_is_dir && is_within(to, from) {
            return Err(io::Error::new(ErrorKind::InvalidInput, "cannot move a directory into itself"));
        }
        Self::check_parent(&tree, to)?;
        if let Some(existing) = tree.nodes.get(to) {
            if !replace {
                return Err(io::Error::new(ErrorKind::AlreadyExists, "rename target exists"));
            }
            if existing.stat.is_dir {
                return Err(io::Error::new(ErrorKind::IsADirectory, "rename target is a directory"));
            }
            tree.nodes.remove(to);
        }

        let moved: Vec<String> = tree
            .nodes
            .keys()
            .filter(|k| is_within(k, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(mut node) = tree.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                if old == from {
                    node.stat.changed = now;
                }
                tree.nodes.insert(new, node);
            }
        }
        Self::touch_parent(&mut tree, from, now);
        Self::touch_parent(&mut tree, to, now);
        Ok(())
    }

    async fn set_mode(&self, path: &str, mode: u32) -> io::Result<()> {
        let now = self.clock.now();
        let mut tree = self.lock();
        let node = tree.nodes.get_mut(path).ok_or_else(not_found)?;
        node.stat.mode = mode & 0o7777;
        node.stat.changed = now;
        Ok(())
    }

    async fn set_times(
        &self,
        path: &str,
        accessed: Option<SystemTime>,
        modified: Option<SystemTime>,
    ) -> io::Result<()> {
        let mut tree = self.lock();
        let node = tree.nodes.get_mut(path).ok_or_else(not_found)?;
        if let Some(t) = accessed {
            node.stat.accessed = t;
        }
        if let Some(t) = modified {
            node.stat.modified = t;
        }
        Ok(())
    }

    async fn set_len(&self, path: &str, len: u64) -> io::Result<()> {
        let now = self.clock.now();
        let mut tree = self.lock();
        let node = tree.nodes.get_mut(path).ok_or_else(not_found)?;
        if node.stat.is_dir {
            return Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"));
        }
        set_data_len(&mut node.data, len)?;
        node.stat.size = len;
        node.stat.modified = now;
        node.stat.changed = now;
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let tree = self.lock();
        match tree.nodes.get(path) {
            Some(node) if node.stat.is_dir => {}
            Some(_) => return Err(io::Error::new(ErrorKind::NotADirectory, "not a directory")),
            None => return Err(not_found()),
        }
        // BTreeMap order is byte order of the full path, which for siblings
        // is byte order of the name.
        Ok(tree
            .nodes
            .iter()
            .filter(|(k, _)| !k.is_empty() && k.as_str() != path && parent_path(k) == path)
            .map(|(k, node)| DirEntry {
                name: file_name(k).to_string(),
                stat: node.stat.clone(),
            })
            .collect())
    }

    async fn read(&self, path: &str, offset: u64, len: u32) -> io::Result<Bytes> {
        let now = self.clock.now();
        let mut tree = self.lock();
        let node = tree.nodes.get_mut(path).ok_or_else(not_found)?;
        if node.stat.is_dir {
            return Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"));
        }
        node.stat.accessed = now;
        let size = node.data.len();
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(size);
        let end = start.saturating_add(len as usize).min(size);
        Ok(Bytes::copy_from_slice(&node.data[start..end]))
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> io::Result<u32> {
        let now = self.clock.now();
        let mut tree = self.lock();
        let node = tree.nodes.get_mut(path).ok_or_else(not_found)?;
        if node.stat.is_dir {
            return Err(io::Error::new(ErrorKind::IsADirectory, "is a directory"));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| io::Error::from(ErrorKind::FileTooLarge))?;
        if end > node.data.len() as u64 {
            set_data_len(&mut node.data, end)?;
        }
        let start = offset as usize;
        node.data[start..start + data.len()].copy_from_slice(data);
        node.stat.size = node.data.len() as u64;
        node.stat.modified = now;
        node.stat.changed = now;
        Ok(data.len() as u32)
    }
}
