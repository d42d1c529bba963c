//! Vision-side data types consumed by the control context (C7 input).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: u32,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }
}

/// Only `image_width`/`image_height`/`frame_id` are consumed by the core;
/// `pixels` is carried as an opaque buffer purely so the type is
/// representable without an image-decoding dependency.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub image_width: u32,
    pub image_height: u32,
    pub frame_id: u64,
    pub timestamp: std::time::SystemTime,
    pub pixels: Vec<u8>,
}
