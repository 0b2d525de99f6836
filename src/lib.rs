#![forbid(unsafe_code)]

//! An SMB2 server engine that stands in for a production file server.
//!
//! The engine speaks dialects 2.0.2 and 2.1 over NetBIOS-framed TCP:
//! negotiation, NTLM sessions, share attachment, file handles, directory
//! enumeration and metadata. Shares are served from a [`vfs::BackingStore`].

pub mod auth;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod server;
pub mod signing;
pub mod smb2;
pub mod state;
pub mod transport;
pub mod vfs;
