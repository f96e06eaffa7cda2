use std::io::Read;
use std::time::Duration;

use serde::Deserialize;

use super::types::{FetchProgress, ScanInfo};
use crate::error::FetchError;

/// Largest container we accept from the server.
const MAX_SCAN_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const CHUNK_SIZE: usize = 64 * 1024;
const MULTIPART_BOUNDARY: &str = "scanview-form-boundary-7d3c1a";

/// Backend operations the viewer needs. Blocking; called from worker threads.
pub trait ScanTransport: Send + Sync {
    fn scan_info(&self, scan_id: u64) -> Result<ScanInfo, FetchError>;

    /// Download a container. `on_progress` runs after every chunk; returning
    /// `false` aborts with `FetchError::Cancelled`.
    fn fetch_scan(
        &self,
        filename: &str,
        on_progress: &mut dyn FnMut(FetchProgress) -> bool,
    ) -> Result<Vec<u8>, FetchError>;

    fn fetch_mask(&self, filename: &str) -> Result<Vec<u8>, FetchError>;

    /// Upload a new scan, returning its id.
    fn upload(&self, filename: &str, bytes: &[u8]) -> Result<u64, FetchError>;
}

#[derive(Deserialize)]
struct UploadResponse {
    id: u64,
}

/// HTTP client for the scan REST backend.
pub struct ScanApi {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl ScanApi {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(10)))
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }

    fn get(&self, path: &str) -> ureq::RequestBuilder<ureq::typestate::WithoutBody> {
        let request = self.agent.get(self.url(path));
        match self.bearer() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        }
    }
}

fn map_ureq(e: ureq::Error) -> FetchError {
    match e {
        ureq::Error::StatusCode(401) => FetchError::Unauthorized,
        ureq::Error::StatusCode(code) => FetchError::Status(code),
        other => FetchError::Transport(other.to_string()),
    }
}

/// Read `reader` to the end in fixed chunks, reporting after each one.
fn read_with_progress(
    reader: &mut dyn Read,
    total_bytes: Option<u64>,
    on_progress: &mut dyn FnMut(FetchProgress) -> bool,
) -> Result<Vec<u8>, FetchError> {
    let capacity = total_bytes.map_or(0, |t| t.min(MAX_SCAN_BYTES) as usize);
    let mut bytes = Vec::with_capacity(capacity);
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut chunk)
            .map_err(|e| FetchError::Body(e.to_string()))?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
        let progress = FetchProgress {
            loaded_bytes: bytes.len() as u64,
            total_bytes,
        };
        if !on_progress(progress) {
            return Err(FetchError::Cancelled);
        }
    }
    Ok(bytes)
}

fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/dicom\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

impl ScanTransport for ScanApi {
    fn scan_info(&self, scan_id: u64) -> Result<ScanInfo, FetchError> {
        let mut response = self
            .get(&format!("/files/{scan_id}"))
            .call()
            .map_err(map_ureq)?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| FetchError::Body(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn fetch_scan(
        &self,
        filename: &str,
        on_progress: &mut dyn FnMut(FetchProgress) -> bool,
    ) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .get(&format!("/upload/{filename}"))
            .header("Accept", "application/dicom")
            .call()
            .map_err(map_ureq)?;
        let total_bytes = response.body().content_length();
        log::info!(
            "Downloading {}: {}",
            filename,
            total_bytes.map_or_else(|| "unknown size".to_string(), |t| format!("{t} bytes"))
        );
        let mut reader = response
            .body_mut()
            .with_config()
            .limit(MAX_SCAN_BYTES)
            .reader();
        read_with_progress(&mut reader, total_bytes, on_progress)
    }

    fn fetch_mask(&self, filename: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self
            .get(&format!("/upload/{filename}"))
            .call()
            .map_err(map_ureq)?;
        response
            .body_mut()
            .with_config()
            .limit(MAX_SCAN_BYTES)
            .read_to_vec()
            .map_err(|e| FetchError::Body(e.to_string()))
    }

    fn upload(&self, filename: &str, bytes: &[u8]) -> Result<u64, FetchError> {
        let body = multipart_body("file", filename, bytes);
        let request = self.agent.post(self.url("/files/upload")).header(
            "Content-Type",
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        );
        let request = match self.bearer() {
            Some(auth) => request.header("Authorization", auth),
            None => request,
        };
        let mut response = request.send(&body[..]).map_err(map_ureq)?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| FetchError::Body(e.to_string()))?;
        let parsed: UploadResponse =
            serde_json::from_str(&text).map_err(|e| FetchError::Decode(e.to_string()))?;
        log::info!("Uploaded {} as scan {}", filename, parsed.id);
        Ok(parsed.id)
    }
}
