//! Runtime configuration.
//!
//! Two layers: [`StoreConfig`] describes where local state lives and how
//! transfers are sized, and [`SessionConfig`] is the channel credential record
//! kept as the first line of the catalog file.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transfer::planner::DEFAULT_CHUNK_SIZE;

/// Discord REST API base used by [`crate::channel::RestChannel`].
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Local storage and gateway settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Two-record catalog file (session record + manifest map)
    pub catalog_path: PathBuf,
    /// Root for journals, chunk slices and the gateway cache
    pub work_dir: PathBuf,
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Address the WebDAV gateway listens on
    pub bind_addr: SocketAddr,
    /// Channel REST API base URL
    pub api_base: String,
    /// Proxy URL for channel traffic, e.g. `http://127.0.0.1:8888`
    pub proxy: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            catalog_path: PathBuf::from("config.discord"),
            work_dir: PathBuf::from(".chanstore"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            api_base: DEFAULT_API_BASE.to_string(),
            proxy: None,
        }
    }
}

impl StoreConfig {
    /// Build a configuration from `CHANSTORE_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = StoreConfig::default();
        StoreConfig {
            catalog_path: env::var("CHANSTORE_CATALOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            work_dir: env::var("CHANSTORE_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            chunk_size: env::var("CHANSTORE_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &u64| *v > 0)
                .unwrap_or(defaults.chunk_size),
            bind_addr: env::var("CHANSTORE_BIND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            api_base: env::var("CHANSTORE_API_BASE").unwrap_or(defaults.api_base),
            proxy: env::var("CHANSTORE_PROXY").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.work_dir.join("journal")
    }

    pub fn slices_dir(&self) -> PathBuf {
        self.work_dir.join("slices")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join("cache")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.work_dir.join("tmp")
    }
}

/// Channel credentials, stored as record 1 of the catalog file.
///
/// Older catalogs use `TOKEN` / `ROOM_ID` keys; both spellings are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(alias = "TOKEN")]
    pub token: String,
    #[serde(rename = "roomId", alias = "ROOM_ID", default)]
    pub room_id: Option<String>,
}

impl SessionConfig {
    pub fn new(token: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            room_id: Some(room_id.into()),
        }
    }
}
