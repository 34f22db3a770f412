//! Synthetic frames, scripted trigger lines and an in-memory encoder.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::TrialCamError;
use crate::recording::{EncoderBackend, EncoderConfig, VideoEncoder};
use crate::source::{FrameSource, SensorSettings};
use crate::types::RawFrame;

/// Generate a deterministic grayscale gradient that changes every frame, so
/// consecutive frames are distinguishable in assertions.
pub fn gradient_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let base = (frame_number % 256) as u8;
    let mut data = vec![0u8; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            data[(y * width + x) as usize] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    data
}

/// Scripted levels for one digital line; the last entry repeats once the
/// script is exhausted.
#[derive(Debug, Clone)]
pub struct LineScript {
    pub line: u8,
    pub levels: Vec<bool>,
}

impl LineScript {
    pub fn constant(line: u8, level: bool) -> Self {
        Self {
            line,
            levels: vec![level],
        }
    }

    fn level_at(&self, cycle: usize) -> bool {
        match self.levels.get(cycle) {
            Some(&l) => l,
            None => *self.levels.last().unwrap_or(&false),
        }
    }
}

/// A frame source producing gradient frames at a fixed cadence, with scripted
/// digital line levels and optional incomplete-capture injection.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    /// Microseconds of sensor time between frames.
    frame_interval_us: u64,
    /// Real time to sleep per frame; zero runs flat out.
    frame_delay: Duration,
    lines: Vec<LineScript>,
    /// Frame numbers reported as incomplete captures.
    incomplete_frames: Vec<u64>,
    started: bool,
    frame_number: u64,
    next_timestamp_us: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval_us: 33_333,
            frame_delay: Duration::ZERO,
            lines: Vec::new(),
            incomplete_frames: Vec::new(),
            started: false,
            frame_number: 0,
            next_timestamp_us: 1_000_000,
        }
    }

    pub fn with_line_script(mut self, script: LineScript) -> Self {
        self.lines.push(script);
        self
    }

    pub fn with_incomplete_frames(mut self, frames: Vec<u64>) -> Self {
        self.incomplete_frames = frames;
        self
    }

    pub fn with_frame_interval_us(mut self, interval: u64) -> Self {
        self.frame_interval_us = interval;
        self
    }

    /// Pace frame delivery in real time; useful when a test needs the writer
    /// to interleave with the producer.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_number
    }
}

impl FrameSource for SyntheticSource {
    fn begin(&mut self, settings: &SensorSettings) -> Result<(), TrialCamError> {
        log::debug!(
            "synthetic source: begin at {} fps, exposure {} us",
            settings.fps,
            settings.effective_exposure_us()
        );
        self.started = true;
        Ok(())
    }

    fn end(&mut self) -> Result<(), TrialCamError> {
        self.started = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawFrame, TrialCamError> {
        if !self.started {
            return Err(TrialCamError::SourceError(
                "source not started".to_string(),
            ));
        }
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }

        let complete = !self.incomplete_frames.contains(&self.frame_number);
        let data = if complete {
            gradient_frame(self.frame_number, self.width, self.height)
        } else {
            // The acquisition loop replaces incomplete captures anyway; hand
            // it garbage to make sure the substitute is what gets recorded.
            vec![0xFFu8; (self.width * self.height) as usize]
        };

        let frame = RawFrame {
            data,
            timestamp_us: self.next_timestamp_us,
            complete,
        };
        self.frame_number += 1;
        self.next_timestamp_us += self.frame_interval_us;
        Ok(frame)
    }

    fn line_status(&mut self, line: u8) -> Result<bool, TrialCamError> {
        // Line levels are indexed by the frame most recently delivered, so a
        // script lines up one level per acquisition cycle.
        let cycle = self.frame_number.saturating_sub(1) as usize;
        Ok(self
            .lines
            .iter()
            .find(|s| s.line == line)
            .map(|s| s.level_at(cycle))
            .unwrap_or(false))
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[derive(Default)]
struct FileRecord {
    frames: Vec<Vec<u8>>,
    finished: bool,
}

#[derive(Default)]
struct WritingGauge {
    /// Files that have received at least one frame and are not yet finished.
    writing: Vec<String>,
    max_concurrent: usize,
}

/// Encoder backend that captures written frames in memory, keyed by the
/// output file name.
pub struct MemoryBackend {
    fail_open: bool,
    files: Arc<Mutex<HashMap<String, FileRecord>>>,
    gauge: Arc<Mutex<WritingGauge>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            fail_open: false,
            files: Arc::new(Mutex::new(HashMap::new())),
            gauge: Arc::new(Mutex::new(WritingGauge::default())),
        }
    }

    /// A backend whose `open` always fails, for prewarm-failure paths.
    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn frames_for(&self, file_name: &str) -> Vec<Vec<u8>> {
        self.files
            .lock()
            .expect("lock poisoned")
            .get(file_name)
            .map(|r| r.frames.clone())
            .unwrap_or_default()
    }

    pub fn is_finished(&self, file_name: &str) -> bool {
        self.files
            .lock()
            .expect("lock poisoned")
            .get(file_name)
            .map(|r| r.finished)
            .unwrap_or(false)
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Highest number of encoders that were mid-write (first frame written,
    /// not yet finished) at the same time. Anything above 1 means two writers
    /// were active at once.
    pub fn max_concurrent_writers(&self) -> usize {
        self.gauge.lock().expect("lock poisoned").max_concurrent
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderBackend for MemoryBackend {
    fn open(
        &self,
        path: &Path,
        config: &EncoderConfig,
    ) -> Result<Box<dyn VideoEncoder>, TrialCamError> {
        if self.fail_open {
            return Err(TrialCamError::EncodingError(
                "synthetic open failure".to_string(),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.files
            .lock()
            .expect("lock poisoned")
            .insert(name.clone(), FileRecord::default());
        Ok(Box::new(MemoryEncoder {
            name,
            expected_len: config.frame_len(),
            files: self.files.clone(),
            gauge: self.gauge.clone(),
            frames_written: 0,
        }))
    }
}

struct MemoryEncoder {
    name: String,
    expected_len: usize,
    files: Arc<Mutex<HashMap<String, FileRecord>>>,
    gauge: Arc<Mutex<WritingGauge>>,
    frames_written: u64,
}

impl VideoEncoder for MemoryEncoder {
    fn write(&mut self, gray: &[u8]) -> Result<(), TrialCamError> {
        if gray.len() != self.expected_len {
            return Err(TrialCamError::EncodingError(format!(
                "invalid frame size: expected {} bytes, got {}",
                self.expected_len,
                gray.len()
            )));
        }
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(record) = files.get_mut(&self.name) {
            record.frames.push(gray.to_vec());
        }
        drop(files);

        if self.frames_written == 0 {
            let mut gauge = self.gauge.lock().expect("lock poisoned");
            gauge.writing.push(self.name.clone());
            gauge.max_concurrent = gauge.max_concurrent.max(gauge.writing.len());
        }
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish(self: Box<Self>) -> Result<(), TrialCamError> {
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(record) = files.get_mut(&self.name) {
            record.finished = true;
        }
        drop(files);
        let mut gauge = self.gauge.lock().expect("lock poisoned");
        gauge.writing.retain(|n| n != &self.name);
        Ok(())
    }
}
