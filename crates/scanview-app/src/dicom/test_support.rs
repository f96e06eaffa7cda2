//! In-memory DICOM fixtures for unit tests.

use super::parser::{tags, ByteOrder, Tag, EXPLICIT_VR_BE, EXPLICIT_VR_LE, IMPLICIT_VR_LE};

pub struct DicomBuilder {
    order: ByteOrder,
    explicit: bool,
    transfer_syntax: String,
    elements: Vec<(Tag, Vec<u8>)>,
}

impl DicomBuilder {
    fn with(order: ByteOrder, explicit: bool, uid: &str) -> Self {
        Self {
            order,
            explicit,
            transfer_syntax: uid.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn explicit_le() -> Self {
        Self::with(ByteOrder::Little, true, EXPLICIT_VR_LE)
    }

    pub fn implicit_le() -> Self {
        Self::with(ByteOrder::Little, false, IMPLICIT_VR_LE)
    }

    pub fn explicit_be() -> Self {
        Self::with(ByteOrder::Big, true, EXPLICIT_VR_BE)
    }

    /// Override the advertised syntax without changing how elements are encoded.
    pub fn transfer_syntax(mut self, uid: &str) -> Self {
        self.transfer_syntax = uid.to_string();
        self
    }

    fn u16_bytes(&self, v: u16) -> [u8; 2] {
        match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn u32_bytes(&self, v: u32) -> [u8; 4] {
        match self.order {
            ByteOrder::Little => v.to_le_bytes(),
            ByteOrder::Big => v.to_be_bytes(),
        }
    }

    fn encode(&self, tag: Tag, vr: [u8; 2], value: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(value.len() + 12);
        out.extend_from_slice(&self.u16_bytes(tag.0));
        out.extend_from_slice(&self.u16_bytes(tag.1));
        if self.explicit {
            out.extend_from_slice(&vr);
            if matches!(&vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&self.u32_bytes(value.len() as u32));
            } else {
                out.extend_from_slice(&self.u16_bytes(value.len() as u16));
            }
        } else {
            out.extend_from_slice(&self.u32_bytes(value.len() as u32));
        }
        out.extend_from_slice(value);
        out
    }

    fn item_header(&self, tag: Tag, length: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.u16_bytes(tag.0));
        out.extend_from_slice(&self.u16_bytes(tag.1));
        out.extend_from_slice(&self.u32_bytes(length));
        out
    }

    fn push(mut self, tag: Tag, encoded: Vec<u8>) -> Self {
        self.elements.retain(|(t, _)| *t != tag);
        self.elements.push((tag, encoded));
        self
    }

    pub fn remove(mut self, tag: Tag) -> Self {
        self.elements.retain(|(t, _)| *t != tag);
        self
    }

    pub fn us(self, tag: Tag, v: u16) -> Self {
        let value = self.u16_bytes(v);
        let encoded = self.encode(tag, *b"US", &value);
        self.push(tag, encoded)
    }

    pub fn string(self, tag: Tag, vr: [u8; 2], s: &str) -> Self {
        let mut value = s.as_bytes().to_vec();
        if value.len() % 2 == 1 {
            value.push(if &vr == b"UI" { 0 } else { b' ' });
        }
        let encoded = self.encode(tag, vr, &value);
        self.push(tag, encoded)
    }

    pub fn pixels(self, vr: [u8; 2], data: &[u8]) -> Self {
        let mut value = data.to_vec();
        if value.len() % 2 == 1 {
            value.push(0);
        }
        let encoded = self.encode(tags::PIXEL_DATA, vr, &value);
        self.push(tags::PIXEL_DATA, encoded)
    }

    fn image_module(self, rows: u16, cols: u16, bits: u16, photometric: &str) -> Self {
        self.us(tags::SAMPLES_PER_PIXEL, 1)
            .string(tags::PHOTOMETRIC_INTERPRETATION, *b"CS", photometric)
            .us(tags::ROWS, rows)
            .us(tags::COLUMNS, cols)
            .us(tags::BITS_ALLOCATED, bits)
            .us(tags::PIXEL_REPRESENTATION, 0)
    }

    /// 8-bit MONOCHROME2 image whose frame `k` is filled with `k * 10`.
    pub fn grayscale8(self, rows: u16, cols: u16, frames: u32) -> Self {
        let frame_len = rows as usize * cols as usize;
        let mut data = Vec::with_capacity(frame_len * frames as usize);
        for k in 0..frames {
            data.extend(std::iter::repeat_n((k * 10) as u8, frame_len));
        }
        self.image_module(rows, cols, 8, "MONOCHROME2")
            .string(tags::NUMBER_OF_FRAMES, *b"IS", &frames.to_string())
            .pixels(*b"OB", &data)
    }

    /// Single-frame 16-bit image with explicit sample values, row-major.
    pub fn grayscale16(self, rows: u16, cols: u16, values: &[u16]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 2);
        for &v in values {
            data.extend_from_slice(&self.u16_bytes(v));
        }
        self.image_module(rows, cols, 16, "MONOCHROME2")
            .string(tags::NUMBER_OF_FRAMES, *b"IS", "1")
            .pixels(*b"OW", &data)
    }

    /// Undefined-length sequence holding one undefined-length item.
    pub fn undefined_sequence(self, tag: Tag) -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(&self.u16_bytes(tag.0));
        out.extend_from_slice(&self.u16_bytes(tag.1));
        if self.explicit {
            out.extend_from_slice(b"SQ");
            out.extend_from_slice(&[0, 0]);
        }
        out.extend_from_slice(&self.u32_bytes(u32::MAX));
        out.extend(self.item_header(tags::ITEM, u32::MAX));
        out.extend(self.encode(Tag(0x0008, 0x1150), *b"UI", b"1.2.3\0"));
        out.extend(self.item_header(tags::ITEM_DELIMITATION, 0));
        out.extend(self.item_header(tags::SEQUENCE_DELIMITATION, 0));
        self.push(tag, out)
    }

    /// Encapsulated pixel data: empty offset table, then one item per fragment.
    pub fn encapsulated(self, fragments: Vec<Vec<u8>>) -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(&self.u16_bytes(tags::PIXEL_DATA.0));
        out.extend_from_slice(&self.u16_bytes(tags::PIXEL_DATA.1));
        if self.explicit {
            out.extend_from_slice(b"OB");
            out.extend_from_slice(&[0, 0]);
        }
        out.extend_from_slice(&self.u32_bytes(u32::MAX));
        out.extend(self.item_header(tags::ITEM, 0));
        for mut fragment in fragments {
            if fragment.len() % 2 == 1 {
                fragment.push(0);
            }
            out.extend(self.item_header(tags::ITEM, fragment.len() as u32));
            out.extend(fragment);
        }
        out.extend(self.item_header(tags::SEQUENCE_DELIMITATION, 0));
        self.push(tags::PIXEL_DATA, out)
    }

    pub fn build(mut self) -> Vec<u8> {
        let mut out = vec![0u8; 128];
        out.extend_from_slice(b"DICM");

        // File meta group is always explicit VR little endian.
        let mut uid = self.transfer_syntax.as_bytes().to_vec();
        if uid.len() % 2 == 1 {
            uid.push(0);
        }
        out.extend_from_slice(&0x0002u16.to_le_bytes());
        out.extend_from_slice(&0x0010u16.to_le_bytes());
        out.extend_from_slice(b"UI");
        out.extend_from_slice(&(uid.len() as u16).to_le_bytes());
        out.extend_from_slice(&uid);

        self.elements.sort_by_key(|(tag, _)| *tag);
        for (_, encoded) in self.elements {
            out.extend(encoded);
        }
        out
    }
}
