//! Per-trial timestamp bookkeeping.
//!
//! A trial accumulates two ordered logs while it is active: one entry per
//! frame sample (seconds of hardware time relative to the trial's first
//! frame) and one entry per sync-line rising edge (seconds of wall-clock time
//! since the trial started). Both are flushed to single-column CSV files when
//! the trial closes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};

use crate::errors::TrialCamError;

pub const CSV_HEADER: &str = "timestamp_seconds";

#[derive(Debug)]
pub struct TrialSession {
    trial_index: u64,
    started_at: DateTime<Local>,
    start_instant: Instant,
    /// Hardware timestamp of the trial's first frame; defines the time origin.
    first_frame_us: Option<u64>,
    sync_log: Vec<f64>,
    frame_log: Vec<f64>,
}

impl TrialSession {
    pub fn new(trial_index: u64) -> Self {
        Self {
            trial_index,
            started_at: Local::now(),
            start_instant: Instant::now(),
            first_frame_us: None,
            sync_log: Vec::new(),
            frame_log: Vec::new(),
        }
    }

    pub fn trial_index(&self) -> u64 {
        self.trial_index
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Record one frame delivered to the queue. The first call pins the
    /// trial's hardware time origin, so the first entry is always 0.0.
    pub fn log_frame(&mut self, hardware_timestamp_us: u64) {
        let origin = *self.first_frame_us.get_or_insert(hardware_timestamp_us);
        let seconds = hardware_timestamp_us.saturating_sub(origin) as f64 / 1e6;
        self.frame_log.push(seconds);
    }

    /// Record one rising edge on the sync line, stamped with wall-clock time
    /// elapsed since the trial started.
    pub fn log_sync_edge(&mut self) {
        self.sync_log.push(self.start_instant.elapsed().as_secs_f64());
    }

    pub fn frame_count(&self) -> usize {
        self.frame_log.len()
    }

    pub fn sync_count(&self) -> usize {
        self.sync_log.len()
    }

    /// Persist both logs next to the trial's video file, sharing its stem:
    /// `{stem}_sync_ttl.csv` and `{stem}_frame_timestamps.csv`.
    ///
    /// Returns the two paths written.
    pub fn persist_alongside(&self, video_path: &Path) -> Result<(PathBuf, PathBuf), TrialCamError> {
        let stem = video_path.with_extension("");
        let stem = stem.to_string_lossy();

        let sync_path = PathBuf::from(format!("{stem}_sync_ttl.csv"));
        let frames_path = PathBuf::from(format!("{stem}_frame_timestamps.csv"));

        write_column(&sync_path, &self.sync_log)?;
        write_column(&frames_path, &self.frame_log)?;

        log::info!(
            "trial {}: saved {} sync edges and {} frame timestamps",
            self.trial_index,
            self.sync_log.len(),
            self.frame_log.len()
        );
        Ok((sync_path, frames_path))
    }
}

fn write_column(path: &Path, values: &[f64]) -> Result<(), TrialCamError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| TrialCamError::IoError(format!("failed to create {}: {e}", path.display())))?;
    writer
        .write_record([CSV_HEADER])
        .map_err(|e| TrialCamError::IoError(e.to_string()))?;
    for value in values {
        writer
            .write_record([value.to_string()])
            .map_err(|e| TrialCamError::IoError(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| TrialCamError::IoError(e.to_string()))?;
    Ok(())
}
