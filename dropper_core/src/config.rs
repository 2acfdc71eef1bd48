use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cipher::{CipherError, EncryptionKey};
use crate::transfer::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, PING_TIMEOUT, TRANSFER_PORT};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "dropper";
const APP_NAME: &str = "dropper";
const CONFIG_FILE: &str = "config.json";

const CONFIG_DIR_ENV: &str = "DROPPER_CONFIG_DIR";
const PORT_ENV: &str = "DROPPER_PORT";
const SUBNET_ENV: &str = "DROPPER_SUBNET";
const CHUNK_SIZE_ENV: &str = "DROPPER_CHUNK_SIZE";
const ENCRYPTION_KEY_ENV: &str = "DROPPER_ENCRYPTION_KEY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropConfig {
    /// Port the offering side listens on and the requesting side dials
    pub port: u16,
    pub bind_host: IpAddr,
    /// First three octets of the LAN both sides share, e.g. `192.168.1`
    pub subnet_prefix: String,
    pub chunk_size: usize,
    pub ping_timeout_secs: u64,
    pub download_dir: PathBuf,
    /// Shared AES key; both sides must agree on it
    pub encryption_key: Option<String>,
}

impl Default for DropConfig {
    fn default() -> Self {
        Self {
            port: TRANSFER_PORT,
            bind_host: IpAddr::from([0, 0, 0, 0]),
            subnet_prefix: "192.168.1".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            ping_timeout_secs: PING_TIMEOUT.as_secs(),
            download_dir: PathBuf::from("."),
            encryption_key: None,
        }
    }
}

impl DropConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Config file, then `.env`, then `DROPPER_*` environment overrides.
    /// A missing or unreadable config file yields the defaults.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    fn load_from(path: &std::path::Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var(PORT_ENV).and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(subnet) = var(SUBNET_ENV) {
            self.subnet_prefix = subnet;
        }
        if let Some(size) = var(CHUNK_SIZE_ENV).and_then(|v| v.parse().ok()) {
            self.chunk_size = size;
        }
        if let Some(key) = var(ENCRYPTION_KEY_ENV).filter(|k| !k.is_empty()) {
            self.encryption_key = Some(key);
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.port)
    }

    /// Configured chunk size, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn chunk_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.chunk_size.min(MAX_CHUNK_SIZE)).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn encryption_key(&self) -> Result<Option<EncryptionKey>, CipherError> {
        self.encryption_key
            .as_deref()
            .map(str::parse)
            .transpose()
    }
}
