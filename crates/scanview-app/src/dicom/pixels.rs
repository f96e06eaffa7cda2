use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::blob::{BlobId, BlobRegistry};
use super::parser::{self, tags, ByteOrder, DataSet, PixelData};
use super::types::{DecodedFrame, FrameId};
use crate::error::FrameLoadError;

const JPEG_SYNTAXES: &[&str] = &[parser::JPEG_BASELINE, "1.2.840.10008.1.2.4.51"];

/// Resolves frame ids to display-ready pixels. Called from stack-load workers.
pub trait FrameResolver: Send + Sync {
    fn resolve(&self, id: &FrameId) -> Result<DecodedFrame, FrameLoadError>;

    /// Forget per-blob state for blobs that were released.
    fn prune(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Photometric {
    Monochrome1,
    Monochrome2,
    Rgb,
}

/// Image module attributes needed to cut and convert one frame.
#[derive(Debug, Clone)]
struct ImageGeometry {
    rows: u32,
    cols: u32,
    samples: u32,
    bits_allocated: u32,
    signed: bool,
    planar: bool,
    photometric: Photometric,
    byte_order: ByteOrder,
    window: Option<(f64, f64)>,
    slope: f64,
    intercept: f64,
    transfer_syntax: String,
    frames: u32,
    pixels: PixelData,
}

impl ImageGeometry {
    fn from_dataset(ds: &DataSet<'_>) -> Result<Self, FrameLoadError> {
        let rows = ds.uint16(tags::ROWS).ok_or_else(|| missing("Rows"))?;
        let cols = ds.uint16(tags::COLUMNS).ok_or_else(|| missing("Columns"))?;
        let bits_allocated = ds.uint16(tags::BITS_ALLOCATED).ok_or_else(|| missing("Bits Allocated"))?;
        let pixels = ds.pixel_data().cloned().ok_or_else(|| missing("Pixel Data"))?;

        let photometric = match ds
            .string(tags::PHOTOMETRIC_INTERPRETATION)
            .as_deref()
            .unwrap_or("MONOCHROME2")
        {
            "MONOCHROME1" => Photometric::Monochrome1,
            "MONOCHROME2" => Photometric::Monochrome2,
            "RGB" => Photometric::Rgb,
            // Compressed colour frames come out of the codec as RGB regardless.
            _ if matches!(pixels, PixelData::Encapsulated { .. }) => Photometric::Rgb,
            other => {
                return Err(FrameLoadError::Unsupported(format!(
                    "photometric interpretation {other}"
                )));
            }
        };

        let window = match (
            ds.float_string(tags::WINDOW_CENTER),
            ds.float_string(tags::WINDOW_WIDTH),
        ) {
            (Some(center), Some(width)) if width > 1.0 => Some((center, width)),
            _ => None,
        };

        Ok(Self {
            rows: u32::from(rows),
            cols: u32::from(cols),
            samples: u32::from(ds.uint16(tags::SAMPLES_PER_PIXEL).unwrap_or(1)),
            bits_allocated: u32::from(bits_allocated),
            signed: ds.uint16(tags::PIXEL_REPRESENTATION) == Some(1),
            planar: ds.uint16(tags::PLANAR_CONFIGURATION) == Some(1),
            photometric,
            byte_order: ds.byte_order,
            window,
            slope: ds.float_string(tags::RESCALE_SLOPE).unwrap_or(1.0),
            intercept: ds.float_string(tags::RESCALE_INTERCEPT).unwrap_or(0.0),
            transfer_syntax: ds.transfer_syntax.clone(),
            frames: ds
                .int_string(tags::NUMBER_OF_FRAMES)
                .filter(|&n| n >= 1)
                .map_or(1, |n| n.min(i64::from(u32::MAX)) as u32),
            pixels,
        })
    }

    /// `None` when the header's dimensions overflow.
    fn frame_len(&self) -> Option<usize> {
        (self.rows as usize)
            .checked_mul(self.cols as usize)?
            .checked_mul(self.samples as usize)?
            .checked_mul(self.bits_allocated as usize / 8)
    }
}

fn missing(name: &str) -> FrameLoadError {
    FrameLoadError::Malformed(format!("missing {name}"))
}

/// DICOM-backed resolver. Caches parsed geometry per blob so qualified ids
/// into the same container do not re-parse it.
pub struct DicomFrameResolver {
    blobs: BlobRegistry,
    geometry: Mutex<HashMap<BlobId, Arc<ImageGeometry>>>,
}

impl DicomFrameResolver {
    pub fn new(blobs: BlobRegistry) -> Self {
        Self {
            blobs,
            geometry: Mutex::new(HashMap::new()),
        }
    }

    fn geometry_for(&self, blob: BlobId, bytes: &[u8]) -> Result<Arc<ImageGeometry>, FrameLoadError> {
        if let Some(found) = self.lock_cache().get(&blob) {
            return Ok(Arc::clone(found));
        }
        let ds = parser::parse(bytes).map_err(|e| FrameLoadError::Malformed(e.to_string()))?;
        let geometry = Arc::new(ImageGeometry::from_dataset(&ds)?);
        self.lock_cache().insert(blob, Arc::clone(&geometry));
        Ok(geometry)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<BlobId, Arc<ImageGeometry>>> {
        self.geometry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl FrameResolver for DicomFrameResolver {
    fn resolve(&self, id: &FrameId) -> Result<DecodedFrame, FrameLoadError> {
        let container = self
            .blobs
            .resolve(id.blob)
            .ok_or(FrameLoadError::Revoked(id.blob.0))?;
        let geometry = self.geometry_for(id.blob, container.bytes())?;

        let frame = id.frame.unwrap_or(0);
        if frame >= geometry.frames {
            return Err(FrameLoadError::FrameOutOfRange {
                frame,
                available: geometry.frames,
            });
        }

        match &geometry.pixels {
            PixelData::Native { offset, length } => {
                let frame_len = geometry.frame_len().unwrap_or(usize::MAX);
                let span = (frame as usize)
                    .checked_mul(frame_len)
                    .and_then(|skip| offset.checked_add(skip))
                    .and_then(|start| Some((start, start.checked_add(frame_len)?)));
                let limit = offset.saturating_add(*length).min(container.len());
                match span {
                    Some((start, end)) if frame_len > 0 && end <= limit => {
                        native_to_rgba(&geometry, &container.bytes()[start..end])
                    }
                    _ => Err(FrameLoadError::Truncated {
                        offset: span.map_or(*offset, |(start, _)| start),
                        needed: frame_len,
                        len: container.len(),
                    }),
                }
            }
            PixelData::Encapsulated { fragments } => {
                if !JPEG_SYNTAXES.contains(&geometry.transfer_syntax.as_str()) {
                    return Err(FrameLoadError::Unsupported(format!(
                        "transfer syntax {}",
                        geometry.transfer_syntax
                    )));
                }
                let bytes = container.bytes();
                let encoded: Vec<u8> = if fragments.len() == geometry.frames as usize {
                    let (start, len) = fragments[frame as usize];
                    bytes[start..start + len].to_vec()
                } else if geometry.frames == 1 {
                    fragments
                        .iter()
                        .flat_map(|&(start, len)| bytes[start..start + len].iter().copied())
                        .collect()
                } else {
                    return Err(FrameLoadError::Unsupported(format!(
                        "{} fragments for {} frames",
                        fragments.len(),
                        geometry.frames
                    )));
                };
                decode_jpeg(&encoded)
            }
        }
    }

    fn prune(&self) {
        let blobs = &self.blobs;
        self.lock_cache().retain(|id, _| blobs.resolve(*id).is_some());
    }
}

fn decode_jpeg(encoded: &[u8]) -> Result<DecodedFrame, FrameLoadError> {
    let img = image::load_from_memory_with_format(encoded, image::ImageFormat::Jpeg)
        .map_err(|e| FrameLoadError::Codec(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(DecodedFrame {
        data: rgba.into_raw(),
        width,
        height,
    })
}

fn native_to_rgba(g: &ImageGeometry, raw: &[u8]) -> Result<DecodedFrame, FrameLoadError> {
    let pixel_count = g.rows as usize * g.cols as usize;
    let mut rgba = vec![255u8; pixel_count * 4];

    match (g.photometric, g.bits_allocated, g.samples) {
        (Photometric::Rgb, 8, 3) => {
            for i in 0..pixel_count {
                let (r, gr, b) = if g.planar {
                    (raw[i], raw[pixel_count + i], raw[2 * pixel_count + i])
                } else {
                    (raw[i * 3], raw[i * 3 + 1], raw[i * 3 + 2])
                };
                rgba[i * 4] = r;
                rgba[i * 4 + 1] = gr;
                rgba[i * 4 + 2] = b;
            }
        }
        (Photometric::Monochrome1 | Photometric::Monochrome2, 8 | 16, 1) => {
            let values: Vec<f64> = (0..pixel_count)
                .map(|i| read_sample(g, raw, i) * g.slope + g.intercept)
                .collect();
            let map = voi_mapper(g.window, &values);
            for (i, &v) in values.iter().enumerate() {
                let mut y = map(v);
                if g.photometric == Photometric::Monochrome1 {
                    y = 1.0 - y;
                }
                let gray = (y * 255.0).round() as u8;
                rgba[i * 4] = gray;
                rgba[i * 4 + 1] = gray;
                rgba[i * 4 + 2] = gray;
            }
        }
        (p, bits, samples) => {
            return Err(FrameLoadError::Unsupported(format!(
                "{p:?} with {bits} bits allocated and {samples} samples per pixel"
            )));
        }
    }

    Ok(DecodedFrame {
        data: rgba,
        width: g.cols,
        height: g.rows,
    })
}

fn read_sample(g: &ImageGeometry, raw: &[u8], i: usize) -> f64 {
    if g.bits_allocated == 8 {
        return if g.signed {
            f64::from(raw[i] as i8)
        } else {
            f64::from(raw[i])
        };
    }
    let pair = [raw[i * 2], raw[i * 2 + 1]];
    let unsigned = match g.byte_order {
        ByteOrder::Little => u16::from_le_bytes(pair),
        ByteOrder::Big => u16::from_be_bytes(pair),
    };
    if g.signed {
        f64::from(unsigned as i16)
    } else {
        f64::from(unsigned)
    }
}

/// Linear VOI window, or min/max stretch when the file declares none.
fn voi_mapper(window: Option<(f64, f64)>, values: &[f64]) -> Box<dyn Fn(f64) -> f64> {
    if let Some((center, width)) = window {
        return Box::new(move |x| (((x - (center - 0.5)) / (width - 1.0)) + 0.5).clamp(0.0, 1.0));
    }
    let (min, max) = values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if max > min {
        let range = max - min;
        Box::new(move |x| ((x - min) / range).clamp(0.0, 1.0))
    } else {
        Box::new(|_| 0.0)
    }
}
