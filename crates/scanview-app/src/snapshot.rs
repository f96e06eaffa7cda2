use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::RgbaImage;

use crate::dicom::DecodedFrame;

/// `scan-<id>-slice-<n>.png`, with `n` counted from 1.
pub fn snapshot_name(scan_id: u64, index: usize) -> String {
    format!("scan-{scan_id}-slice-{:03}.png", index + 1)
}

pub fn snapshot_path(dir: &Path, scan_id: u64, index: usize) -> PathBuf {
    dir.join(snapshot_name(scan_id, index))
}

/// Write the displayed frame at native resolution.
pub fn save_png(frame: &DecodedFrame, path: &Path) -> Result<()> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
        .with_context(|| format!("frame buffer does not fit {}x{}", frame.width, frame.height))?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Snapshot saved: {} ({}x{})", path.display(), frame.width, frame.height);
    Ok(())
}
