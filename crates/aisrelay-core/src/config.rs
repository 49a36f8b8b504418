//! Configuration storage abstraction.
//!
//! Settings are loaded through the [`ConfigStorage`] trait so the binary can
//! read a JSON file while tests use an in-memory implementation. After
//! loading, environment variables override individual fields:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AISSTREAM_API_KEY` | `aisstream.apiKey` |
//! | `AISRELAY_HTTP_ADDR` | `httpAddr` |
//! | `AISRELAY_WS_ADDR` | `wsAddr` |
//! | `AISRELAY_DB_PATH` | `storage.path` |

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::BoundingBox;

/// Fixed aisstream.io streaming endpoint.
pub const AISSTREAM_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration was not found.
    #[error("configuration not found: {0}")]
    NotFound(String),

    /// Failed to read configuration.
    #[error("read error: {0}")]
    ReadError(String),

    /// Failed to write configuration.
    #[error("write error: {0}")]
    WriteError(String),

    /// Configuration data is invalid.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Abstract configuration storage.
pub trait ConfigStorage: Send + Sync {
    /// Load relay settings.
    fn load_settings(&self) -> Result<Settings, ConfigError>;

    /// Save relay settings.
    fn save_settings(&self, settings: &Settings) -> Result<(), ConfigError>;
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Name reported by the health endpoint.
    pub name: String,

    /// Address of the HTTP API.
    pub http_addr: SocketAddr,

    /// Address of the WebSocket subscriber endpoint.
    pub ws_addr: SocketAddr,

    /// Origins allowed by CORS on the HTTP API.
    pub cors_origins: Vec<String>,

    /// Upstream feed.
    pub aisstream: FeedSettings,

    /// Where vessels and positions are kept.
    pub storage: StorageSettings,

    /// Seconds a subscriber may take to accept one message before it is
    /// dropped.
    pub subscriber_send_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "aisrelay".to_string(),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            cors_origins: vec!["http://localhost:3000".to_string()],
            aisstream: FeedSettings::default(),
            storage: StorageSettings::default(),
            subscriber_send_timeout_secs: 5,
        }
    }
}

impl Settings {
    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("AISSTREAM_API_KEY") {
            self.aisstream.api_key = Some(key);
        }
        if let Some(addr) = lookup("AISRELAY_HTTP_ADDR") {
            self.http_addr = parse_addr("AISRELAY_HTTP_ADDR", &addr)?;
        }
        if let Some(addr) = lookup("AISRELAY_WS_ADDR") {
            self.ws_addr = parse_addr("AISRELAY_WS_ADDR", &addr)?;
        }
        if let Some(path) = lookup("AISRELAY_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }
}

fn parse_addr(var: &str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::InvalidData(format!("{var}={value}: {e}")))
}

/// aisstream.io subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Credential sent in the subscription frame. Ingestion is disabled
    /// without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Streaming endpoint.
    pub url: String,

    /// Areas to subscribe to.
    pub bounding_boxes: Vec<BoundingBox>,

    /// Optional server-side message type filter. Empty means all types.
    pub message_types: Vec<String>,

    /// Delay between a lost or failed connection and the next attempt.
    pub reconnect_delay_secs: u64,

    /// Fan out every persisted report to position-update subscribers.
    pub broadcast_positions: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url: AISSTREAM_URL.to_string(),
            bounding_boxes: vec![BoundingBox::world()],
            message_types: Vec::new(),
            reconnect_delay_secs: 5,
            broadcast_positions: true,
        }
    }
}

impl FeedSettings {
    /// The configured credential, treating a blank string as absent.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Vessel store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Kept in memory, lost on restart.
    Memory,
    /// SQLite database file at [`StorageSettings::path`].
    Sqlite,
}

/// Vessel store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub backend: StorageBackend,

    /// Database file, used by the SQLite backend.
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("./aisrelay.db"),
        }
    }
}

/// Settings stored as a single JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load_or_default(&self) -> Result<Settings, ConfigError> {
        match self.load_settings() {
            Err(ConfigError::NotFound(_)) => Ok(Settings::default()),
            other => other,
        }
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_settings(&self) -> Result<Settings, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound(self.path.display().to_string()));
        }
        let text = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::InvalidData(format!("{}: {e}", self.path.display())))
    }

    fn save_settings(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        fs::write(&self.path, json)
            .map_err(|e| ConfigError::WriteError(format!("{}: {e}", self.path.display())))
    }
}
