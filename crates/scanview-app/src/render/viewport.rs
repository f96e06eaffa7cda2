use crate::dicom::DecodedFrame;

/// The on-screen region a viewport draws into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceElement {
    pub name: String,
    pub width: u32,
    pub height: u32,
}

impl SurfaceElement {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
            height: height.max(1),
        }
    }
}

/// Names one viewport inside one engine. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewportHandle {
    id: String,
}

impl ViewportHandle {
    pub(super) fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

pub(super) struct Viewport {
    pub element: SurfaceElement,
    pub frames: Vec<DecodedFrame>,
    pub index: usize,
    pub loading: bool,
}

impl Viewport {
    pub fn new(element: SurfaceElement) -> Self {
        Self {
            element,
            frames: Vec::new(),
            index: 0,
            loading: false,
        }
    }

    pub fn current_frame(&self) -> Option<&DecodedFrame> {
        self.frames.get(self.index)
    }
}
