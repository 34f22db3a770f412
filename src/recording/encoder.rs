//! Encoder backend seam and the built-in implementations.
//!
//! A writer task talks to its encoder only through [`VideoEncoder`]; the
//! backend that opens encoders is chosen once per session. [`Y4mBackend`]
//! writes uncompressed YUV4MPEG2 and is always available; [`H264Backend`]
//! (feature `recording`) encodes H.264 with openh264 and muxes to MP4 with
//! muxide.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::errors::TrialCamError;
use crate::types::Codec;

use super::config::EncoderConfig;

/// One open encoder bound to one output file.
pub trait VideoEncoder: Send {
    /// Encode and write one 8-bit grayscale frame.
    fn write(&mut self, gray: &[u8]) -> Result<(), TrialCamError>;

    fn frames_written(&self) -> u64;

    /// Finalize the container. The file is not valid until this succeeds.
    fn finish(self: Box<Self>) -> Result<(), TrialCamError>;
}

/// Opens encoders. Shared across writer tasks; open happens on the writer
/// thread so a slow codec setup never stalls the producer.
pub trait EncoderBackend: Send + Sync {
    fn open(
        &self,
        path: &Path,
        config: &EncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, TrialCamError>;
}

fn validate_frame_len(config: &EncoderConfig, gray: &[u8]) -> Result<(), TrialCamError> {
    if gray.len() != config.frame_len() {
        return Err(TrialCamError::EncodingError(format!(
            "invalid frame size: expected {} bytes for {}x{}, got {}",
            config.frame_len(),
            config.width,
            config.height,
            gray.len()
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// YUV4MPEG2 (raw)
// ─────────────────────────────────────────────────────────────────────────────

/// Backend for [`Codec::Raw`]: grayscale frames as a YUV4MPEG2 stream with a
/// flat chroma plane. No external codec involved.
#[derive(Debug, Default)]
pub struct Y4mBackend;

impl EncoderBackend for Y4mBackend {
    fn open(
        &self,
        path: &Path,
        config: &EncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, TrialCamError> {
        if config.codec != Codec::Raw {
            return Err(TrialCamError::EncodingError(format!(
                "Y4M backend cannot encode {:?}",
                config.codec
            )));
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(TrialCamError::EncodingError(format!(
                "4:2:0 output requires even dimensions, got {}x{}",
                config.width, config.height
            )));
        }

        let file = File::create(path)
            .map_err(|e| TrialCamError::IoError(format!("failed to create output file: {}", e)))?;
        let mut writer = BufWriter::new(file);

        let (num, den) = fps_rational(config.fps);
        writeln!(
            writer,
            "YUV4MPEG2 W{} H{} F{}:{} Ip A1:1 C420jpeg",
            config.width, config.height, num, den
        )
        .map_err(|e| TrialCamError::IoError(e.to_string()))?;

        Ok(Box::new(Y4mEncoder {
            writer,
            config: *config,
            frame_count: 0,
        }))
    }
}

struct Y4mEncoder {
    writer: BufWriter<File>,
    config: EncoderConfig,
    frame_count: u64,
}

impl VideoEncoder for Y4mEncoder {
    fn write(&mut self, gray: &[u8]) -> Result<(), TrialCamError> {
        validate_frame_len(&self.config, gray)?;

        self.writer
            .write_all(b"FRAME\n")
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;
        self.writer
            .write_all(gray)
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;
        // Flat chroma: U and V planes pinned to 128.
        let chroma = vec![0x80u8; gray.len() / 4];
        self.writer
            .write_all(&chroma)
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;
        self.writer
            .write_all(&chroma)
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;

        self.frame_count += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    fn finish(mut self: Box<Self>) -> Result<(), TrialCamError> {
        self.writer
            .flush()
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;
        Ok(())
    }
}

/// Express an fps value as a reduced rational for the Y4M header.
fn fps_rational(fps: f64) -> (u64, u64) {
    let num = (fps * 1000.0).round() as u64;
    let den = 1000u64;
    let g = gcd(num.max(1), den);
    (num / g, den / g)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

// ─────────────────────────────────────────────────────────────────────────────
// H.264 / MP4 (feature `recording`)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(feature = "recording")]
pub use h264::H264Backend;

#[cfg(feature = "recording")]
mod h264 {
    use super::*;

    use muxide::api::{Metadata, Muxer, MuxerBuilder, VideoCodec};
    use openh264::encoder::{Encoder, FrameType};
    use openh264::formats::YUVBuffer;

    /// Backend for [`Codec::H264`]: openh264 encoding muxed into MP4.
    #[derive(Debug, Default)]
    pub struct H264Backend;

    impl EncoderBackend for H264Backend {
        fn open(
            &self,
            path: &Path,
            config: &EncoderConfig,
        ) -> Result<Box<dyn VideoEncoder>, TrialCamError> {
            if config.codec != Codec::H264 {
                return Err(TrialCamError::EncodingError(format!(
                    "H264 backend cannot encode {:?}",
                    config.codec
                )));
            }
            if config.width % 2 != 0 || config.height % 2 != 0 {
                return Err(TrialCamError::EncodingError(format!(
                    "H.264 4:2:0 requires even dimensions, got {}x{}",
                    config.width, config.height
                )));
            }

            let file = File::create(path).map_err(|e| {
                TrialCamError::IoError(format!("failed to create output file: {}", e))
            })?;
            let writer = BufWriter::new(file);

            let encoder = Encoder::new()
                .map_err(|e| TrialCamError::EncodingError(format!("failed to create encoder: {}", e)))?;

            let muxer = MuxerBuilder::new(writer)
                .video(VideoCodec::H264, config.width, config.height, config.fps)
                .with_fast_start(true)
                .with_metadata(Metadata::new().with_current_time())
                .build()
                .map_err(|e| TrialCamError::MuxingError(format!("failed to create muxer: {}", e)))?;

            Ok(Box::new(H264Encoder {
                encoder,
                muxer,
                config: *config,
                frame_count: 0,
            }))
        }
    }

    struct H264Encoder {
        encoder: Encoder,
        muxer: Muxer<BufWriter<File>>,
        config: EncoderConfig,
        frame_count: u64,
    }

    impl VideoEncoder for H264Encoder {
        fn write(&mut self, gray: &[u8]) -> Result<(), TrialCamError> {
            validate_frame_len(&self.config, gray)?;

            let yuv = gray_to_yuv420(gray);
            let buffer = YUVBuffer::from_vec(
                yuv,
                self.config.width as usize,
                self.config.height as usize,
            );

            let bitstream = self
                .encoder
                .encode(&buffer)
                .map_err(|e| TrialCamError::EncodingError(format!("encoding failed: {}", e)))?;

            let is_keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
            let data = bitstream.to_vec();

            // The encoder may emit nothing for a frame; the sample still counts
            // as consumed so the timestamp logs stay aligned.
            if !data.is_empty() {
                let pts = self.frame_count as f64 / self.config.fps;
                self.muxer
                    .write_video(pts, &data, is_keyframe)
                    .map_err(|e| TrialCamError::MuxingError(format!("failed to write frame: {}", e)))?;
            } else {
                log::debug!("encoder produced no bitstream for frame {}", self.frame_count);
            }

            self.frame_count += 1;
            Ok(())
        }

        fn frames_written(&self) -> u64 {
            self.frame_count
        }

        fn finish(self: Box<Self>) -> Result<(), TrialCamError> {
            let stats = self
                .muxer
                .finish_with_stats()
                .map_err(|e| TrialCamError::MuxingError(format!("failed to finalize: {}", e)))?;
            log::debug!(
                "finalized mp4: {} frames, {} bytes",
                stats.video_frames,
                stats.bytes_written
            );
            Ok(())
        }
    }

    /// Expand a grayscale plane into YUV420: luma passthrough, flat chroma.
    fn gray_to_yuv420(gray: &[u8]) -> Vec<u8> {
        let y_size = gray.len();
        let uv_size = y_size / 4;
        let mut yuv = Vec::with_capacity(y_size + uv_size * 2);
        yuv.extend_from_slice(gray);
        yuv.resize(y_size + uv_size * 2, 0x80);
        yuv
    }
}

/// Dispatches to the built-in backend for each codec, so one session can
/// switch codecs between trials.
///
/// H.264 requires the `recording` feature; selecting it without the feature is
/// a recoverable error surfaced at prewarming time (the writer goes straight
/// to `Closed` and the next prepare trigger retries).
#[derive(Debug, Default)]
pub struct DefaultBackend;

impl EncoderBackend for DefaultBackend {
    fn open(
        &self,
        path: &Path,
        config: &EncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, TrialCamError> {
        match config.codec {
            Codec::Raw => Y4mBackend.open(path, config),
            #[cfg(feature = "recording")]
            Codec::H264 => H264Backend.open(path, config),
            #[cfg(not(feature = "recording"))]
            Codec::H264 => Err(TrialCamError::EncodingError(
                "H.264 support requires the `recording` feature".to_string(),
            )),
        }
    }
}
