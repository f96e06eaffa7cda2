use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
}

/// Bearer token persisted between runs.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::at(dir.join("scanview").join("session.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Option<String> {
        let json = std::fs::read_to_string(&self.path).ok()?;
        let session: StoredSession = serde_json::from_str(&json).ok()?;
        Some(session.access_token).filter(|t| !t.is_empty())
    }

    pub fn store(&self, token: &str) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&StoredSession {
            access_token: token.to_string(),
        })?;
        std::fs::write(&self.path, json)
    }

    /// Forget the token after the server rejected it.
    pub fn invalidate(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::warn!("Session expired; sign in again with --token"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to clear session at {}: {e}", self.path.display()),
        }
    }
}
