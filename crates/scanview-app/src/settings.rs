use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";
pub const DEFAULT_VIEWPORT_ID: &str = "scan-viewport";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Where `S` writes snapshots. Current directory when unset.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default = "default_viewport_id")]
    pub viewport_id: String,
}

fn default_version() -> u32 {
    1
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_viewport_id() -> String {
    DEFAULT_VIEWPORT_ID.to_string()
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            server_url: default_server_url(),
            tick_interval_ms: default_tick_interval_ms(),
            snapshot_dir: None,
            viewport_id: default_viewport_id(),
        }
    }
}

impl ViewerConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scanview").join("settings.json"))
    }

    pub fn load() -> Self {
        match Self::default_path() {
            Some(path) => Self::load_or_create(&path),
            None => Self::default(),
        }
    }

    /// First launch writes the defaults out so there is a file to edit.
    pub fn load_or_create(path: &Path) -> Self {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        config.save_to(path);
        log::info!("Wrote default settings to {}", path.display());
        config
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed settings at {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            if let Err(e) = std::fs::write(path, json) {
                log::warn!("Failed to save settings to {}: {e}", path.display());
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
