use serde::{Deserialize, Serialize};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Processing,
    Done,
    InvalidExtension,
}

impl ScanStatus {
    pub fn label(self) -> &'static str {
        match self {
            ScanStatus::Processing => "Processing",
            ScanStatus::Done => "Done",
            ScanStatus::InvalidExtension => "Invalid extension",
        }
    }
}

/// Scan metadata as served by `GET /files/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub status: ScanStatus,
    pub stored_path: String,
    #[serde(default)]
    pub result_text: Option<String>,
    /// JSON object encoded as a string.
    #[serde(default)]
    pub result_table: Option<String>,
    #[serde(default)]
    pub result_file: Option<String>,
}

impl ScanInfo {
    /// Name under `/upload/` the container is served from.
    pub fn stored_filename(&self) -> Option<&str> {
        self.stored_path
            .split_once("uploads/")
            .map(|(_, name)| name)
            .filter(|name| !name.is_empty())
    }

    pub fn extension(&self) -> String {
        self.stored_path
            .split('.')
            .nth(1)
            .filter(|ext| !ext.is_empty())
            .map_or_else(|| "-".to_string(), str::to_uppercase)
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }

    pub fn mask_filename(&self) -> Option<&str> {
        self.result_file.as_deref().filter(|f| !f.is_empty())
    }

    /// Key/value rows of the report table, in key order.
    pub fn result_rows(&self) -> Result<Vec<(String, String)>, FetchError> {
        let Some(raw) = self.result_table.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(Vec::new());
        };
        let table: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(raw).map_err(|e| FetchError::Decode(format!("result table: {e}")))?;
        Ok(table
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect())
    }
}

/// Bytes received so far for one download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchProgress {
    pub loaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

impl FetchProgress {
    /// Whole percent, when the server announced a length.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total_bytes.filter(|&t| t > 0)?;
        let pct = (self.loaded_bytes.saturating_mul(100) + total / 2) / total;
        Some(pct.min(100) as u8)
    }
}
