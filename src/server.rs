//! SMB2 server: shared engine state, connection loop and listener.
//!
//! Each TCP connection runs as an independent async task that owns its
//! [`ConnectionState`] and processes requests strictly in arrival order.
//! Shutdown is broadcast over a watch channel: the listener stops
//! accepting, each connection finishes the request it is working on and
//! tears down its sessions, and the listener waits for every connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::clock::Clock;
use crate::config::{Config, ShareBackend};
use crate::dispatch;
use crate::error::{error_to_ntstatus, ServerError};
use crate::state::{ConnectionState, IdAllocator};
use crate::transport;
use crate::vfs::{BackingStore, LocalStore, MemoryStore};

/// One configured share bound to its store.
#[derive(Debug)]
pub struct Share {
    pub name: String,
    pub store: Arc<dyn BackingStore>,
    pub read_only: bool,
    pub guest_ok: bool,
}

/// Shared, immutable server state (one per server process), plus the
/// identifier allocator.
#[derive(Debug)]
pub struct Engine {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub ids: IdAllocator,
    pub server_guid: [u8; 16],
    pub start_time: SystemTime,
    /// Keyed by lower-cased share name.
    shares: HashMap<String, Share>,
}

impl Engine {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        Self::with_ids(config, clock, IdAllocator::new())
    }

    /// Build an engine around an existing allocator.
    pub fn with_ids(config: Config, clock: Arc<dyn Clock>, ids: IdAllocator) -> anyhow::Result<Self> {
        config.validate()?;

        let mut shares = HashMap::new();
        for share in &config.shares {
            let store: Arc<dyn BackingStore> = match share.backend {
                ShareBackend::Local => {
                    let path = share
                        .path
                        .as_ref()
                        .with_context(|| format!("Share '{}' has no path", share.name))?;
                    let store = LocalStore::new(path).with_context(|| {
                        format!("Share '{}' path {} is not usable", share.name, path.display())
                    })?;
                    Arc::new(store)
                }
                ShareBackend::Memory => Arc::new(MemoryStore::new(clock.clone())),
            };
            shares.insert(
                share.name.to_lowercase(),
                Share {
                    name: share.name.clone(),
                    store,
                    read_only: share.read_only,
                    guest_ok: share.guest_ok,
                },
            );
        }

        let mut server_guid = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut server_guid);
        let start_time = clock.now();

        Ok(Engine {
            config,
            clock,
            ids,
            server_guid,
            start_time,
            shares,
        })
    }

    /// Look up a share by name, ignoring case.
    pub fn share(&self, name: &str) -> Option<&Share> {
        self.shares.get(&name.to_lowercase())
    }

    /// Guest sessions are allowed when at least one share admits guests.
    pub fn allow_guest(&self) -> bool {
        self.shares.values().any(|s| s.guest_ok)
    }
}

/// Handle a single SMB2 client connection.
///
/// Reads frames in a loop, dispatches each, and writes the response.
/// Exits on connection close, shutdown or a fatal error; in every case the
/// connection's sessions, trees and handles are torn down before return.
pub async fn handle_connection<S>(
    mut stream: S,
    engine: Arc<Engine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = ConnectionState::new(engine);

    let result = loop {
        if *shutdown.borrow_and_update() {
            debug!("Shutdown requested");
            break Ok(());
        }
        let frame = tokio::select! {
            frame = transport::read_frame(&mut stream) => frame,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    debug!("Shutdown sender dropped");
                    break Ok(());
                }
                continue;
            }
        };
        let frame = match frame {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                break Ok(());
            }
            Err(e) => break Err(ServerError::Io(e)),
        };

        match dispatch::dispatch(&mut conn, frame).await {
            Ok(Some(response)) => {
                if let Err(e) = transport::write_frame(&mut stream, &response).await {
                    break Err(ServerError::Io(e));
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, status = %error_to_ntstatus(&e), "Closing connection");
                break Err(e);
            }
        }
    };

    conn.teardown().await;
    result
}

/// Accept connections until `shutdown` flips to true (or its sender is
/// dropped), then wait for every connection task to finish.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut tasks = JoinSet::new();
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "SMB2 server listening");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "Connection accepted");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "set_nodelay failed");
                    }
                    let engine = engine.clone();
                    let shutdown = shutdown.clone();
                    tasks.spawn(
                        async move {
                            if let Err(e) = handle_connection(stream, engine, shutdown).await {
                                error!(error = %e, "Connection error");
                            }
                            info!("Connection closed");
                        }
                        .instrument(info_span!("connection", %peer)),
                    );
                }
                Err(e) => error!("Accept error: {:?}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Connection task failed");
                }
            }
        }
    }

    drop(listener);
    info!(connections = tasks.len(), "Listener stopped; draining connections");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Connection task failed");
        }
    }
    info!("Server stopped");
    Ok(())
}
