//! Core types shared across the acquisition and recording pipeline.

use serde::{Deserialize, Serialize};

/// Codec macroblock alignment; ROI dimensions are floored to multiples of this.
pub const MACROBLOCK: u32 = 16;

/// A frame as delivered by the frame source, before ROI cropping.
///
/// `complete` is false when the sensor reported a broken transfer; the
/// acquisition loop substitutes a zero-filled buffer in that case so frame
/// count and timing continuity are preserved.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// 8-bit grayscale pixels, row-major, `width * height` bytes.
    pub data: Vec<u8>,
    /// Sensor-clock capture time in microseconds.
    pub timestamp_us: u64,
    pub complete: bool,
}

/// A frame sample handed from the acquisition thread to the active writer.
///
/// Immutable once enqueued; consumed and freed by the writer task.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sensor-clock capture time in microseconds, monotonically increasing.
    pub timestamp_us: u64,
    /// True when this sample was reconstructed from an incomplete capture.
    pub reconstructed: bool,
}

/// Display rotation applied to the preview the operator draws on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    None,
    /// 90 degrees counter-clockwise.
    Ccw90,
    Half,
    /// 90 degrees clockwise (270 counter-clockwise).
    Cw90,
}

impl Rotation {
    /// Parse from the degree values the operator-facing layer uses.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Ccw90),
            180 => Some(Rotation::Half),
            270 => Some(Rotation::Cw90),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Ccw90 => 90,
            Rotation::Half => 180,
            Rotation::Cw90 => 270,
        }
    }

    /// Whether this rotation swaps the width and height axes.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Ccw90 | Rotation::Cw90)
    }
}

/// A rectangle in the coordinate space of the rotated display frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DisplayRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from two drag corners in any order.
    pub fn from_corners(a: (u32, u32), b: (u32, u32)) -> Self {
        let x = a.0.min(b.0);
        let y = a.1.min(b.1);
        Self {
            x,
            y,
            width: a.0.max(b.0) - x,
            height: a.1.max(b.1) - y,
        }
    }
}

/// Region of interest in raw sensor coordinates.
///
/// Invariants: `x + width <= sensor width`, `y + height <= sensor height`,
/// width and height are multiples of [`MACROBLOCK`]. A zero-area ROI is
/// representable but rejected at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Video codec selection; determines the container extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    /// Uncompressed grayscale in a YUV4MPEG2 stream.
    Raw,
    /// H.264 in MP4 (requires the `recording` feature at runtime).
    H264,
}

impl Codec {
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Raw => "y4m",
            Codec::H264 => "mp4",
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Raw
    }
}

/// How trial start/stop is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingMode {
    /// Operator toggles recording directly.
    Continuous,
    /// Rising/falling edges on the trigger line start/stop trials.
    Trigger,
}

impl Default for RecordingMode {
    fn default() -> Self {
        RecordingMode::Continuous
    }
}
