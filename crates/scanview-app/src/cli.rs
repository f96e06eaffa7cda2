use std::path::PathBuf;

use clap::{ArgGroup, Parser};

/// Where the scan to view comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanSource {
    #[default]
    None,
    Remote(u64),
    Upload(PathBuf),
    Local(PathBuf),
}

#[derive(Parser, Debug, Clone, PartialEq, Eq, Default)]
#[command(name = "scanview", about = "Multi-frame DICOM slice viewer", version)]
#[command(group(ArgGroup::new("source").args(["scan", "upload", "open"])))]
pub struct LaunchArgs {
    /// Scan id to download from the server
    #[arg(long, value_name = "ID")]
    pub scan: Option<u64>,

    /// Upload a local file to the server, then view it
    #[arg(long, value_name = "PATH")]
    pub upload: Option<PathBuf>,

    /// View a local file without touching the server
    #[arg(long, value_name = "PATH")]
    pub open: Option<PathBuf>,

    /// Scan store base URL, overrides the settings file
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Bearer token; saved for later runs
    #[arg(long)]
    pub token: Option<String>,

    /// Playback tick interval in milliseconds
    #[arg(long = "interval", value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Save the scan's segmentation mask here before viewing
    #[arg(long, value_name = "PATH", requires = "scan")]
    pub export_mask: Option<PathBuf>,

    /// Render without a window and write the displayed slice as PNG
    #[arg(long, value_name = "OUT", requires = "source")]
    pub headless: Option<PathBuf>,

    /// Playback ticks to run before the headless snapshot
    #[arg(long, default_value_t = 0)]
    pub ticks: u32,
}

impl LaunchArgs {
    pub fn source(&self) -> ScanSource {
        if let Some(id) = self.scan {
            ScanSource::Remote(id)
        } else if let Some(path) = &self.upload {
            ScanSource::Upload(path.clone())
        } else if let Some(path) = &self.open {
            ScanSource::Local(path.clone())
        } else {
            ScanSource::None
        }
    }
}
