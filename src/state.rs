//! Connection, session, tree and handle state.
//!
//! A [`ConnectionState`] is owned by exactly one connection task and holds
//! everything that connection created. Identifiers come from the engine's
//! shared [`IdAllocator`], the only state that crosses connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::AuthState;
use crate::server::Engine;
use crate::signing::SESSION_KEY_LEN;
use crate::smb2::status::NtStatus;
use crate::smb2::FileId;
use crate::vfs::{BackingStore, DirEntry};

/// Hands out session, tree and handle identifiers. Identifiers are never
/// reused; once a counter would wrap, allocation fails.
#[derive(Debug)]
pub struct IdAllocator {
    session: AtomicU64,
    tree: AtomicU32,
    handle: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1, 1, 1)
    }

    /// Start the counters at the given values (zero is bumped to one).
    pub fn starting_at(session: u64, tree: u32, handle: u64) -> Self {
        IdAllocator {
            session: AtomicU64::new(session.max(1)),
            tree: AtomicU32::new(tree.max(1)),
            handle: AtomicU64::new(handle.max(1)),
        }
    }

    pub fn session_id(&self) -> Result<u64, NtStatus> {
        self.session
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .map_err(|_| NtStatus::InsufficientResources)
    }

    pub fn tree_id(&self) -> Result<u32, NtStatus> {
        self.tree
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .map_err(|_| NtStatus::InsufficientResources)
    }

    pub fn handle_id(&self) -> Result<u64, NtStatus> {
        self.handle
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .map_err(|_| NtStatus::InsufficientResources)
    }
}

/// Per-connection state, touched only by the connection's own task.
#[derive(Debug)]
pub struct ConnectionState {
    pub engine: Arc<Engine>,
    /// Set by NEGOTIATE; `None` until then.
    pub dialect: Option<u16>,
    pub signing_required: bool,
    pub sessions: HashMap<u64, Session>,
    pub last_message_id: Option<u64>,
    /// Running total of credits granted on this connection.
    pub credits_granted: u64,
}

impl ConnectionState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let signing_required = engine.config.signing_required;
        ConnectionState {
            engine,
            dialect: None,
            signing_required,
            sessions: HashMap::new(),
            last_message_id: None,
            credits_granted: 0,
        }
    }

    /// Sessions that are pending or valid (logged-off sessions excluded).
    pub fn live_sessions(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state != SessionState::Invalidated)
            .count()
    }

    /// Resolve a session id to a valid session.
    pub fn validate_session(&mut self, id: u64) -> Result<&mut Session, NtStatus> {
        match self.sessions.get_mut(&id) {
            Some(session) if session.state == SessionState::Valid => Ok(session),
            _ => Err(NtStatus::SessionExpired),
        }
    }

    /// Signing key of a valid session, if it has one.
    pub fn signing_key(&self, id: u64) -> Option<&[u8; SESSION_KEY_LEN]> {
        self.sessions
            .get(&id)
            .filter(|s| s.state == SessionState::Valid)
            .and_then(|s| s.signing_key.as_ref())
    }

    /// Whether responses on session `id` must be signed.
    pub fn session_requires_signing(&self, id: u64) -> bool {
        self.sessions.get(&id).is_some_and(|s| s.signing_required)
    }

    /// Invalidate every session, tree and handle this connection owns.
    pub async fn teardown(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.invalidate().await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Between the first and the final SESSION_SETUP leg.
    Pending(AuthState),
    Valid,
    /// Logged off. Kept so that a second LOGOFF can be told apart from an
    /// unknown id.
    Invalidated,
}

#[derive(Debug)]
pub struct Session {
    pub id: u64,
    pub state: SessionState,
    pub username: String,
    pub is_guest: bool,
    /// Present only once the session is valid, and never for guests.
    pub signing_key: Option<[u8; SESSION_KEY_LEN]>,
    pub signing_required: bool,
    pub trees: HashMap<u32, TreeConnection>,
}

impl Session {
    pub fn new_pending(id: u64) -> Self {
        Session {
            id,
            state: SessionState::Pending(AuthState::AwaitingNegotiate),
            username: String::new(),
            is_guest: false,
            signing_key: None,
            signing_required: false,
            trees: HashMap::new(),
        }
    }

    pub fn validate_tree(&mut self, id: u32) -> Result<&mut TreeConnection, NtStatus> {
        self.trees.get_mut(&id).ok_or(NtStatus::NetworkNameDeleted)
    }

    /// Drop the signing key and close every tree.
    pub async fn invalidate(&mut self) {
        debug!(session_id = self.id, trees = self.trees.len(), "Invalidating session");
        self.state = SessionState::Invalidated;
        self.signing_key = None;
        for (_, mut tree) in self.trees.drain() {
            tree.close_all().await;
        }
    }
}

#[derive(Debug)]
pub struct TreeConnection {
    pub id: u32,
    pub share_name: String,
    pub store: Arc<dyn BackingStore>,
    pub read_only: bool,
    pub handles: HashMap<u64, FileHandle>,
}

impl TreeConnection {
    pub fn new(id: u32, share_name: String, store: Arc<dyn BackingStore>, read_only: bool) -> Self {
        TreeConnection {
            id,
            share_name,
            store,
            read_only,
            handles: HashMap::new(),
        }
    }

    /// Both halves of a file id carry the handle id.
    pub fn validate_handle(&mut self, id: FileId) -> Result<&mut FileHandle, NtStatus> {
        if id.persistent != id.volatile {
            return Err(NtStatus::FileClosed);
        }
        self.handles.get_mut(&id.volatile).ok_or(NtStatus::FileClosed)
    }

    /// Remove a handle from the table without releasing it.
    pub fn take_handle(&mut self, id: FileId) -> Result<FileHandle, NtStatus> {
        self.validate_handle(id)?;
        self.handles.remove(&id.volatile).ok_or(NtStatus::FileClosed)
    }

    /// Release every handle, honoring delete-on-close.
    pub async fn close_all(&mut self) {
        debug!(tree_id = self.id, handles = self.handles.len(), "Closing tree handles");
        for (_, handle) in self.handles.drain() {
            handle.release(self.store.as_ref()).await;
        }
    }
}

#[derive(Debug)]
pub struct FileHandle {
    pub id: u64,
    /// Normalized store path.
    pub path: String,
    pub is_directory: bool,
    pub granted_access: u32,
    pub delete_on_close: bool,
    /// Directory enumeration position; set by the first QUERY_DIRECTORY.
    pub cursor: Option<DirCursor>,
}

impl FileHandle {
    /// Final step of a handle's life. A delete-on-close failure is logged
    /// and otherwise ignored.
    pub async fn release(self, store: &dyn BackingStore) {
        if !self.delete_on_close {
            return;
        }
        match store.remove(&self.path).await {
            Ok(()) => debug!(path = %self.path, "Deleted on close"),
            Err(e) => warn!(path = %self.path, error = %e, "Delete-on-close failed"),
        }
    }
}

/// Snapshot of a directory being enumerated.
#[derive(Debug, Clone)]
pub struct DirCursor {
    pub entries: Vec<DirEntry>,
    pub pattern: String,
    /// Index of the next entry to consider.
    pub next: usize,
}

impl DirCursor {
    pub fn new(entries: Vec<DirEntry>, pattern: String) -> Self {
        DirCursor {
            entries,
            pattern,
            next: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next >= self.entries.len()
    }
}
