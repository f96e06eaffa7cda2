use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::ScanSource;
use crate::dicom::RawContainer;
use crate::fetch::{FetchCoordinator, ScanInfo};

/// Local files are cached under ids the server never hands out.
pub const LOCAL_ID_BASE: u64 = 1 << 63;

#[derive(Debug)]
pub struct LocalIds {
    next: u64,
}

impl LocalIds {
    pub fn new() -> Self {
        Self { next: LOCAL_ID_BASE }
    }

    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(LOCAL_ID_BASE);
        id
    }
}

impl Default for LocalIds {
    fn default() -> Self {
        Self::new()
    }
}

/// A scan id plus the stored filename to download it by, when it is not cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScan {
    pub scan_id: u64,
    pub filename: Option<String>,
}

/// Turn the launch source into something a `ScanSession` can open.
pub fn resolve(
    coordinator: &FetchCoordinator,
    source: &ScanSource,
    local_ids: &mut LocalIds,
    export_mask: Option<&Path>,
) -> Result<Option<ResolvedScan>> {
    match source {
        ScanSource::None => Ok(None),
        ScanSource::Remote(scan_id) => {
            let info = coordinator
                .transport()
                .scan_info(*scan_id)
                .with_context(|| format!("failed to load metadata for scan {scan_id}"))?;
            log_scan_info(&info);
            if let Some(path) = export_mask {
                export_mask_file(coordinator, &info, path)?;
            }
            Ok(Some(ResolvedScan {
                scan_id: *scan_id,
                filename: info.stored_filename().map(str::to_string),
            }))
        }
        ScanSource::Upload(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let filename = file_name(path);
            let scan_id = coordinator
                .upload(&filename, bytes)
                .with_context(|| format!("failed to upload {}", path.display()))?;
            Ok(Some(ResolvedScan {
                scan_id,
                filename: Some(filename),
            }))
        }
        ScanSource::Local(path) => Ok(Some(open_local(coordinator, path, local_ids)?)),
    }
}

/// Read a file from disk straight into the session cache.
pub fn open_local(
    coordinator: &FetchCoordinator,
    path: &Path,
    local_ids: &mut LocalIds,
) -> Result<ResolvedScan> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let scan_id = local_ids.allocate();
    let container = RawContainer::new(bytes);
    log::info!(
        "Opened {} ({:.1} MB) as local scan {scan_id}",
        path.display(),
        container.size_mb()
    );
    coordinator.cache().insert(scan_id, container);
    Ok(ResolvedScan {
        scan_id,
        filename: None,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scan.dcm")
        .to_string()
}

fn log_scan_info(info: &ScanInfo) {
    log::info!(
        "Scan {}: {} ({}, {:.1} MB) - {}",
        info.id,
        info.name,
        info.extension(),
        info.size_mb(),
        info.status.label()
    );
    if let Some(text) = &info.result_text {
        log::info!("Result: {text}");
    }
    match info.result_rows() {
        Ok(rows) => {
            for (key, value) in rows {
                log::info!("  {key}: {value}");
            }
        }
        Err(e) => log::warn!("Ignoring result table: {e}"),
    }
}

fn export_mask_file(coordinator: &FetchCoordinator, info: &ScanInfo, path: &Path) -> Result<()> {
    let Some(mask) = info.mask_filename() else {
        log::warn!("Scan {} has no mask to export", info.id);
        return Ok(());
    };
    let bytes = coordinator
        .transport()
        .fetch_mask(mask)
        .with_context(|| format!("failed to download mask {mask}"))?;
    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Mask saved: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
