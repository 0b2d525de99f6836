use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

const DEFAULT_MAX_IO_SIZE: u32 = 1024 * 1024;

/// Engine configuration loaded from a TOML file.
/// See config.toml.example for format.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// TCP port to listen on (445 needs root; tests use 4450 or 0)
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Server name, used as the NTLM target and volume label
    pub server_name: String,
    /// Require every session to sign its traffic
    #[serde(default)]
    pub signing_required: bool,
    #[serde(default = "default_max_io_size")]
    pub max_read_size: u32,
    #[serde(default = "default_max_io_size")]
    pub max_write_size: u32,
    #[serde(default = "default_max_io_size")]
    pub max_transact_size: u32,
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_connection: usize,
    #[serde(default = "default_max_open_files")]
    pub max_open_files_per_tree: usize,
    pub shares: Vec<ShareConfig>,
    /// Configured user accounts (empty = guest-only)
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// Where a share keeps its files.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShareBackend {
    /// A directory on the local filesystem.
    #[default]
    Local,
    /// A process-private in-memory tree, empty at startup.
    Memory,
}

/// A single share.
#[derive(Debug, Deserialize, Clone)]
pub struct ShareConfig {
    /// Share name as seen by clients (e.g. "Public"); matched case-insensitively
    pub name: String,
    /// Local filesystem path to share (local backend only)
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub backend: ShareBackend,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub guest_ok: bool,
}

/// A configured user account.
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_io_size() -> u32 {
    DEFAULT_MAX_IO_SIZE
}

fn default_max_sessions() -> usize {
    64
}

fn default_max_open_files() -> usize {
    1024
}

impl Config {
    /// A config with defaults for every optional field and no shares.
    pub fn new(server_name: &str, port: u16) -> Self {
        Config {
            port,
            bind_address: default_bind_address(),
            server_name: server_name.to_string(),
            signing_required: false,
            max_read_size: DEFAULT_MAX_IO_SIZE,
            max_write_size: DEFAULT_MAX_IO_SIZE,
            max_transact_size: DEFAULT_MAX_IO_SIZE,
            max_sessions_per_connection: default_max_sessions(),
            max_open_files_per_tree: default_max_open_files(),
            shares: Vec::new(),
            users: Vec::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shares.is_empty() {
            anyhow::bail!("No shares configured");
        }
        let mut seen = HashSet::new();
        for share in &self.shares {
            if share.name.is_empty() {
                anyhow::bail!("Share with empty name");
            }
            if !seen.insert(share.name.to_lowercase()) {
                anyhow::bail!("Duplicate share name '{}'", share.name);
            }
            if share.backend == ShareBackend::Local && share.path.is_none() {
                anyhow::bail!("Share '{}' uses the local backend but has no path", share.name);
            }
        }
        if self.max_sessions_per_connection == 0 || self.max_open_files_per_tree == 0 {
            anyhow::bail!("Session and open-file limits must be at least 1");
        }
        Ok(())
    }
}

/// Load, parse and validate the TOML configuration file.
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path, e))?;
    config.validate()?;
    Ok(config)
}
