//! Encoder configuration types.

use serde::{Deserialize, Serialize};

use crate::types::Codec;

/// Parameters an encoder is opened with. Frozen at prewarming time; a writer
/// never changes dimensions after its encoder is open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: Codec,
    /// Frame width in pixels. Grayscale input, one byte per pixel.
    pub width: u32,
    pub height: u32,
    /// Frames per second written into the container timing metadata.
    pub fps: f64,
}

impl EncoderConfig {
    pub fn new(codec: Codec, width: u32, height: u32, fps: f64) -> Self {
        Self {
            codec,
            width,
            height,
            fps,
        }
    }

    /// Expected byte length of one input frame.
    pub fn frame_len(&self) -> usize {
        (self.width * self.height) as usize
    }
}

/// Summary of one finished trial, returned by the controller's stop path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialStats {
    pub trial_index: u64,
    /// Frames consumed from the queue and handed to the encoder.
    pub frames_written: u64,
    pub video_path: String,
    pub sync_entries: usize,
    pub frame_entries: usize,
}
