use serde::{Deserialize, Serialize};

/// 每像素字节数（BGR24）
pub const BYTES_PER_PIXEL: usize = 3;

/// 原始视频帧（BGR24 紧密排列）
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence_number: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence_number: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            sequence_number,
        }
    }

    /// 给定分辨率下一帧的字节数
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() == Self::byte_len(self.width, self.height)
    }
}

/// 归一化边界框（中心点 + 宽高，取值 [0, 1]）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center: unit(x_center),
            y_center: unit(y_center),
            width: unit(width),
            height: unit(height),
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x_center, self.y_center, self.width, self.height]
    }

    /// 换算为像素坐标 (left, top, right, bottom)
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> (i32, i32, i32, i32) {
        let w = frame_width as f32;
        let h = frame_height as f32;
        let left = ((self.x_center - self.width / 2.0) * w) as i32;
        let top = ((self.y_center - self.height / 2.0) * h) as i32;
        let right = left + (self.width * w) as i32;
        let bottom = top + (self.height * h) as i32;
        (left, top, right, bottom)
    }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence: unit(confidence),
            bbox,
        }
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
