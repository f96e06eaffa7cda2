//! Minimal DICOM Part 10 reader.
//!
//! Reads the file meta group, picks the dataset encoding from the transfer
//! syntax, and indexes top-level elements by tag. Sequences are skipped rather
//! than decoded; the viewer only needs image module attributes and the pixel
//! data location.

use std::collections::HashMap;

use thiserror::Error;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_NESTING: usize = 64;

pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
pub const DEFLATED_EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1.99";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u16, pub u16);

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

pub mod tags {
    use super::Tag;

    pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
    pub const SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
    pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
    pub const PLANAR_CONFIGURATION: Tag = Tag(0x0028, 0x0006);
    pub const NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
    pub const ROWS: Tag = Tag(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
    pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
    pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
    pub const WINDOW_CENTER: Tag = Tag(0x0028, 0x1050);
    pub const WINDOW_WIDTH: Tag = Tag(0x0028, 0x1051);
    pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
    pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);
    pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
    pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("DICM prefix not found at offset 128")]
    MissingPrefix,
    #[error("unexpected end of data at offset {0}")]
    UnexpectedEof(usize),
    #[error("element {tag} at offset {offset} overruns the buffer")]
    Overrun { tag: Tag, offset: usize },
    #[error("unexpected tag {tag} at offset {offset} inside a sequence")]
    UnexpectedTag { tag: Tag, offset: usize },
    #[error("sequences nested deeper than 64 levels")]
    TooDeep,
    #[error("unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Location of an element value within the source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone)]
pub enum PixelData {
    /// Uncompressed frames laid out back to back.
    Native { offset: usize, length: usize },
    /// Encapsulated fragments, basic offset table excluded. `(offset, length)` pairs.
    Encapsulated { fragments: Vec<(usize, usize)> },
}

/// Indexed top-level dataset borrowing the container bytes.
pub struct DataSet<'a> {
    bytes: &'a [u8],
    pub transfer_syntax: String,
    pub byte_order: ByteOrder,
    elements: HashMap<Tag, Element>,
    pixel_data: Option<PixelData>,
}

impl<'a> DataSet<'a> {
    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn raw(&self, tag: Tag) -> Option<&'a [u8]> {
        let el = self.elements.get(&tag)?;
        self.bytes.get(el.offset..el.offset + el.length)
    }

    /// Text value with DICOM padding (trailing NUL/space, leading space) removed.
    pub fn string(&self, tag: Tag) -> Option<String> {
        let raw = self.raw(tag)?;
        let text = String::from_utf8_lossy(raw);
        let trimmed = text.trim_end_matches(['\0', ' ']).trim_start();
        Some(trimmed.to_string())
    }

    /// First value of a multi-valued text element.
    fn first_value(&self, tag: Tag) -> Option<String> {
        let s = self.string(tag)?;
        let first = s.split('\\').next().unwrap_or("").trim();
        if first.is_empty() {
            None
        } else {
            Some(first.to_string())
        }
    }

    /// First value of an IS (integer string) element.
    pub fn int_string(&self, tag: Tag) -> Option<i64> {
        self.first_value(tag)?.parse().ok()
    }

    /// First value of a DS (decimal string) element.
    pub fn float_string(&self, tag: Tag) -> Option<f64> {
        self.first_value(tag)?.parse().ok()
    }

    pub fn uint16(&self, tag: Tag) -> Option<u16> {
        let raw = self.raw(tag)?;
        let bytes: [u8; 2] = raw.get(..2)?.try_into().ok()?;
        Some(match self.byte_order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn pixel_data(&self) -> Option<&PixelData> {
        self.pixel_data.as_ref()
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    tag: Tag,
    length: u32,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    order: ByteOrder,
    explicit: bool,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(ParseError::UnexpectedEof(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let b: [u8; 2] = self.take(2)?.try_into().map_err(|_| ParseError::UnexpectedEof(self.pos))?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        })
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        let b: [u8; 4] = self.take(4)?.try_into().map_err(|_| ParseError::UnexpectedEof(self.pos))?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(b),
            ByteOrder::Big => u32::from_be_bytes(b),
        })
    }

    fn peek_group(&self) -> Option<u16> {
        let b = self.bytes.get(self.pos..self.pos + 2)?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes([b[0], b[1]]),
            ByteOrder::Big => u16::from_be_bytes([b[0], b[1]]),
        })
    }

    fn header(&mut self) -> Result<Header, ParseError> {
        let tag = Tag(self.u16()?, self.u16()?);
        // Item and delimiter tags never carry a VR.
        if tag.0 == 0xFFFE || !self.explicit {
            return Ok(Header { tag, length: self.u32()? });
        }
        let vr = self.take(2)?;
        let length = if has_long_length(vr) {
            self.take(2)?;
            self.u32()?
        } else {
            u32::from(self.u16()?)
        };
        Ok(Header { tag, length })
    }

    fn skip(&mut self, tag: Tag, length: u32) -> Result<usize, ParseError> {
        let offset = self.pos;
        let len = length as usize;
        if len > self.remaining() {
            return Err(ParseError::Overrun { tag, offset });
        }
        self.pos += len;
        Ok(offset)
    }

    fn skip_sequence(&mut self, depth: usize) -> Result<(), ParseError> {
        if depth > MAX_NESTING {
            return Err(ParseError::TooDeep);
        }
        loop {
            let offset = self.pos;
            let h = self.header()?;
            match h.tag {
                tags::SEQUENCE_DELIMITATION => return Ok(()),
                tags::ITEM if h.length == UNDEFINED_LENGTH => self.skip_item(depth + 1)?,
                tags::ITEM => {
                    self.skip(h.tag, h.length)?;
                }
                tag => return Err(ParseError::UnexpectedTag { tag, offset }),
            }
        }
    }

    fn skip_item(&mut self, depth: usize) -> Result<(), ParseError> {
        if depth > MAX_NESTING {
            return Err(ParseError::TooDeep);
        }
        loop {
            let h = self.header()?;
            if h.tag == tags::ITEM_DELIMITATION {
                return Ok(());
            }
            if h.length == UNDEFINED_LENGTH {
                self.skip_sequence(depth + 1)?;
            } else {
                self.skip(h.tag, h.length)?;
            }
        }
    }

    fn fragments(&mut self) -> Result<Vec<(usize, usize)>, ParseError> {
        let mut items = Vec::new();
        loop {
            let offset = self.pos;
            let h = self.header()?;
            match h.tag {
                tags::SEQUENCE_DELIMITATION => break,
                tags::ITEM => {
                    let start = self.skip(h.tag, h.length)?;
                    items.push((start, h.length as usize));
                }
                tag => return Err(ParseError::UnexpectedTag { tag, offset }),
            }
        }
        // First item is the basic offset table.
        if !items.is_empty() {
            items.remove(0);
        }
        Ok(items)
    }
}

fn has_long_length(vr: &[u8]) -> bool {
    matches!(
        vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OV" | b"OW" | b"SQ" | b"SV" | b"UC" | b"UN" | b"UR"
            | b"UT" | b"UV"
    )
}

/// Parse a Part 10 file. Fails on a missing `DICM` magic, a truncated element
/// or an encoding this reader does not handle.
pub fn parse(bytes: &[u8]) -> Result<DataSet<'_>, ParseError> {
    if bytes.len() < PREAMBLE_LEN + MAGIC.len() || &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] != MAGIC {
        return Err(ParseError::MissingPrefix);
    }

    let mut elements = HashMap::new();
    let mut meta = Reader {
        bytes,
        pos: PREAMBLE_LEN + MAGIC.len(),
        order: ByteOrder::Little,
        explicit: true,
    };
    while meta.peek_group() == Some(0x0002) {
        let h = meta.header()?;
        let offset = meta.skip(h.tag, h.length)?;
        elements.insert(h.tag, Element { offset, length: h.length as usize });
    }

    let transfer_syntax = elements
        .get(&tags::TRANSFER_SYNTAX_UID)
        .and_then(|el| bytes.get(el.offset..el.offset + el.length))
        .map(|raw| String::from_utf8_lossy(raw).trim_end_matches(['\0', ' ']).to_string())
        .unwrap_or_else(|| EXPLICIT_VR_LE.to_string());

    let (order, explicit) = match transfer_syntax.as_str() {
        IMPLICIT_VR_LE => (ByteOrder::Little, false),
        EXPLICIT_VR_BE => (ByteOrder::Big, true),
        DEFLATED_EXPLICIT_VR_LE => {
            return Err(ParseError::UnsupportedTransferSyntax(transfer_syntax));
        }
        _ => (ByteOrder::Little, true),
    };

    let mut reader = Reader {
        bytes,
        pos: meta.pos,
        order,
        explicit,
    };
    let mut pixel_data = None;

    while reader.remaining() > 0 {
        let h = reader.header()?;
        if h.tag == tags::PIXEL_DATA {
            if h.length == UNDEFINED_LENGTH {
                let start = reader.pos;
                let fragments = reader.fragments()?;
                elements.insert(h.tag, Element { offset: start, length: reader.pos - start });
                pixel_data = Some(PixelData::Encapsulated { fragments });
            } else {
                let offset = reader.skip(h.tag, h.length)?;
                let length = h.length as usize;
                elements.insert(h.tag, Element { offset, length });
                pixel_data = Some(PixelData::Native { offset, length });
            }
            continue;
        }
        if h.length == UNDEFINED_LENGTH {
            reader.skip_sequence(0)?;
            continue;
        }
        let offset = reader.skip(h.tag, h.length)?;
        elements.insert(h.tag, Element { offset, length: h.length as usize });
    }

    Ok(DataSet {
        bytes,
        transfer_syntax,
        byte_order: order,
        elements,
        pixel_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::test_support::DicomBuilder;

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(parse(&[]).err(), Some(ParseError::MissingPrefix));
        assert_eq!(parse(&[0u8; 200]).err(), Some(ParseError::MissingPrefix));
    }

    #[test]
    fn reads_number_of_frames_explicit_le() {
        let bytes = DicomBuilder::explicit_le().grayscale8(2, 2, 3).build();
        let ds = parse(&bytes).unwrap();
        assert_eq!(ds.transfer_syntax, EXPLICIT_VR_LE);
        assert_eq!(ds.int_string(tags::NUMBER_OF_FRAMES), Some(3));
        assert_eq!(ds.uint16(tags::ROWS), Some(2));
        assert_eq!(ds.uint16(tags::COLUMNS), Some(2));
        match ds.pixel_data() {
            Some(PixelData::Native { length, .. }) => assert_eq!(*length, 12),
            other => panic!("unexpected pixel data {other:?}"),
        }
    }

    #[test]
    fn reads_implicit_le() {
        let bytes = DicomBuilder::implicit_le().grayscale8(1, 4, 5).build();
        let ds = parse(&bytes).unwrap();
        assert_eq!(ds.byte_order, ByteOrder::Little);
        assert_eq!(ds.int_string(tags::NUMBER_OF_FRAMES), Some(5));
        assert_eq!(ds.uint16(tags::COLUMNS), Some(4));
    }

    #[test]
    fn reads_explicit_be() {
        let bytes = DicomBuilder::explicit_be().grayscale8(3, 1, 2).build();
        let ds = parse(&bytes).unwrap();
        assert_eq!(ds.byte_order, ByteOrder::Big);
        assert_eq!(ds.uint16(tags::ROWS), Some(3));
        assert_eq!(ds.int_string(tags::NUMBER_OF_FRAMES), Some(2));
    }

    #[test]
    fn skips_undefined_length_sequences() {
        let bytes = DicomBuilder::explicit_le()
            .undefined_sequence(Tag(0x0008, 0x1140))
            .grayscale8(2, 2, 4)
            .build();
        let ds = parse(&bytes).unwrap();
        assert!(!ds.contains(Tag(0x0008, 0x1140)));
        assert_eq!(ds.int_string(tags::NUMBER_OF_FRAMES), Some(4));
    }

    #[test]
    fn records_encapsulated_fragments() {
        let bytes = DicomBuilder::explicit_le()
            .transfer_syntax(JPEG_BASELINE)
            .encapsulated(vec![vec![1, 2], vec![3, 4, 5, 6]])
            .build();
        let ds = parse(&bytes).unwrap();
        match ds.pixel_data() {
            Some(PixelData::Encapsulated { fragments }) => {
                assert_eq!(fragments.len(), 2);
                assert_eq!(fragments[0].1, 2);
                assert_eq!(fragments[1].1, 4);
            }
            other => panic!("unexpected pixel data {other:?}"),
        }
    }

    #[test]
    fn truncated_element_is_an_error() {
        let mut bytes = DicomBuilder::explicit_le().grayscale8(4, 4, 2).build();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(parse(&bytes), Err(ParseError::Overrun { .. })));
    }

    #[test]
    fn deflated_syntax_is_unsupported() {
        let bytes = DicomBuilder::explicit_le()
            .transfer_syntax(DEFLATED_EXPLICIT_VR_LE)
            .build();
        assert!(matches!(
            parse(&bytes),
            Err(ParseError::UnsupportedTransferSyntax(_))
        ));
    }

    #[test]
    fn multi_valued_strings_use_first_value() {
        let bytes = DicomBuilder::explicit_le()
            .string(tags::WINDOW_CENTER, *b"DS", "40\\400")
            .build();
        let ds = parse(&bytes).unwrap();
        assert_eq!(ds.float_string(tags::WINDOW_CENTER), Some(40.0));
    }
}
