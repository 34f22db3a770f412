//! Acquisition session: the single owner of the sensor, the frame queue and
//! the writer controller.
//!
//! One acquisition thread produces frames; writer tasks consume them. All
//! shared mutable state lives in this session object and is passed by
//! reference to both sides; there are no ambient globals. Operator-facing
//! events (ROI commit/reset, mode, codec, recording toggle) mutate a small
//! control block the loop snapshots once per cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::TrialCamConfig;
use crate::errors::SessionError;
use crate::queue::FrameQueue;
use crate::recording::{EncoderBackend, TrialStats, WriterController};
use crate::rotation::{crop_gray, map_to_raw};
use crate::source::{FrameSource, SensorSettings};
use crate::trigger::{Edge, EdgeDetector};
use crate::types::{Codec, DisplayRect, FrameSample, RawFrame, RecordingMode, Roi, Rotation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Started,
    Stopped,
    Closed,
}

/// Operator-controlled state, snapshotted by the loop once per cycle.
struct Controls {
    mode: RecordingMode,
    codec: Codec,
    recording_enabled: bool,
    roi: Option<Roi>,
    /// Set by any event that invalidates the prewarmed writer.
    reprepare: bool,
}

struct Inner {
    state: Mutex<SessionState>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    controls: Mutex<Controls>,
    queue: Arc<FrameQueue>,
    backend: Arc<dyn EncoderBackend>,
    config: TrialCamConfig,
    output_dir: std::path::PathBuf,
    raw_width: u32,
    raw_height: u32,
    stop_flag: AtomicBool,
    acquire_thread: Mutex<Option<JoinHandle<()>>>,
    trial_index: Arc<AtomicU64>,
    recording_active: AtomicBool,
    frames_acquired: AtomicU64,
    last_trial: Mutex<Option<TrialStats>>,
    fault: Mutex<Option<String>>,
}

pub struct AcquisitionSession {
    inner: Arc<Inner>,
}

impl AcquisitionSession {
    /// Build a session around a frame source and an encoder backend.
    ///
    /// Resolves (and creates) the output directory up front so a trigger edge
    /// never races directory creation.
    pub fn open(
        source: Box<dyn FrameSource>,
        backend: Arc<dyn EncoderBackend>,
        config: TrialCamConfig,
    ) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::backend)?;
        let output_dir = config.resolve_output_dir().map_err(SessionError::backend)?;
        let (raw_width, raw_height) = (source.width(), source.height());

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::Open),
                source: Mutex::new(Some(source)),
                controls: Mutex::new(Controls {
                    mode: config.acquisition.mode,
                    codec: config.acquisition.codec,
                    recording_enabled: false,
                    roi: None,
                    reprepare: false,
                }),
                queue: Arc::new(FrameQueue::new()),
                backend,
                config,
                output_dir,
                raw_width,
                raw_height,
                stop_flag: AtomicBool::new(false),
                acquire_thread: Mutex::new(None),
                trial_index: Arc::new(AtomicU64::new(0)),
                recording_active: AtomicBool::new(false),
                frames_acquired: AtomicU64::new(0),
                last_trial: Mutex::new(None),
                fault: Mutex::new(None),
            }),
        })
    }

    /// Start the acquisition thread.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        match *state {
            SessionState::Closed => return Err(SessionError::already_closed()),
            SessionState::Started => return Err(SessionError::already_started()),
            SessionState::Open | SessionState::Stopped => {}
        }

        self.inner.stop_flag.store(false, Ordering::Relaxed);

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("trialcam-acquire".to_string())
            .spawn(move || acquire_loop(inner))
            .map_err(|e| SessionError::invalid_argument(format!("spawn failed: {e}")))?;

        *self.inner.acquire_thread.lock().expect("lock poisoned") = Some(handle);
        *state = SessionState::Started;
        Ok(())
    }

    /// Stop acquisition cooperatively and join the thread.
    ///
    /// The loop finishes the in-flight cycle, performs a final stop of any
    /// active writer (drain-before-close) and releases the sensor; the join is
    /// bounded by `join_timeout`, after which the attempt is abandoned with a
    /// timeout error and the handle kept for a later retry.
    pub fn stop(&self, join_timeout: Duration) -> Result<(), SessionError> {
        {
            let state = self.inner.state.lock().expect("lock poisoned");
            match *state {
                SessionState::Closed => return Err(SessionError::already_closed()),
                SessionState::Stopped | SessionState::Open => {
                    return Err(SessionError::already_stopped())
                }
                SessionState::Started => {}
            }
        }

        self.inner.stop_flag.store(true, Ordering::Relaxed);

        let handle = self.inner.acquire_thread.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let start = Instant::now();
            let mut handle = Some(handle);
            loop {
                if handle.as_ref().is_some_and(|h| h.is_finished()) {
                    let _ = handle.take().expect("checked above").join();
                    break;
                }
                if start.elapsed() >= join_timeout {
                    log::error!("acquisition thread did not exit within {join_timeout:?}");
                    *self.inner.acquire_thread.lock().expect("lock poisoned") = handle.take();
                    return Err(SessionError::timeout());
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        let mut state = self.inner.state.lock().expect("lock poisoned");
        if *state != SessionState::Closed {
            *state = SessionState::Stopped;
        }
        Ok(())
    }

    /// Stop if needed, then release the sensor for good.
    pub fn close(&self, join_timeout: Duration) -> Result<(), SessionError> {
        {
            let state = *self.inner.state.lock().expect("lock poisoned");
            if state == SessionState::Closed {
                return Err(SessionError::already_closed());
            }
        }

        match self.stop(join_timeout) {
            Ok(()) | Err(SessionError { kind: crate::errors::SessionErrorKind::AlreadyStopped, .. }) => {}
            Err(e) => log::warn!("error stopping session during close: {e}"),
        }

        self.inner.queue.close();
        *self.inner.source.lock().expect("lock poisoned") = None;
        *self.inner.state.lock().expect("lock poisoned") = SessionState::Closed;
        Ok(())
    }

    /// Commit an operator-drawn rectangle as the recording ROI.
    ///
    /// `rect` is in display coordinates under the given rotation; it is mapped
    /// back to raw sensor coordinates, clamped and macroblock-aligned.
    /// Rejected while a trial is recording or when the aligned ROI collapses
    /// to zero area.
    pub fn commit_roi(&self, rect: DisplayRect, rotation_degrees: u32) -> Result<Roi, SessionError> {
        self.ensure_not_closed()?;
        if self.is_recording() {
            return Err(SessionError::recording_active("ROI commit"));
        }
        let rotation = Rotation::from_degrees(rotation_degrees).ok_or_else(|| {
            SessionError::invalid_argument(format!(
                "rotation must be one of 0/90/180/270, got {rotation_degrees}"
            ))
        })?;

        let roi = map_to_raw(rect, self.inner.raw_width, self.inner.raw_height, rotation);
        if roi.is_degenerate() {
            return Err(SessionError::invalid_argument(
                "ROI collapses below one macroblock; not committing",
            ));
        }

        let mut controls = self.inner.controls.lock().expect("lock poisoned");
        controls.roi = Some(roi);
        controls.reprepare = true;
        log::info!(
            "ROI committed: ({}, {}) {}x{}",
            roi.x,
            roi.y,
            roi.width,
            roi.height
        );
        Ok(roi)
    }

    /// Return to full-frame recording.
    pub fn reset_roi(&self) -> Result<(), SessionError> {
        self.ensure_not_closed()?;
        if self.is_recording() {
            return Err(SessionError::recording_active("ROI reset"));
        }
        let mut controls = self.inner.controls.lock().expect("lock poisoned");
        if controls.roi.take().is_some() {
            controls.reprepare = true;
            log::info!("ROI reset to full frame");
        }
        Ok(())
    }

    pub fn set_mode(&self, mode: RecordingMode) {
        self.inner.controls.lock().expect("lock poisoned").mode = mode;
    }

    /// Select the codec for future trials. An in-progress trial is never
    /// interrupted; the prewarmed writer is rebuilt instead.
    pub fn set_codec(&self, codec: Codec) {
        let mut controls = self.inner.controls.lock().expect("lock poisoned");
        if controls.codec != codec {
            log::info!("codec changed: {:?} -> {:?}", controls.codec, codec);
            controls.codec = codec;
            controls.reprepare = true;
        }
    }

    pub fn set_recording_enabled(&self, enabled: bool) {
        self.inner
            .controls
            .lock()
            .expect("lock poisoned")
            .recording_enabled = enabled;
    }

    pub fn roi(&self) -> Option<Roi> {
        self.inner.controls.lock().expect("lock poisoned").roi
    }

    /// Whether a trial is recording right now.
    pub fn is_recording(&self) -> bool {
        self.inner.recording_active.load(Ordering::Relaxed)
    }

    /// Index the next trial will record under.
    pub fn trial_index(&self) -> u64 {
        self.inner.trial_index.load(Ordering::Relaxed)
    }

    pub fn frames_acquired(&self) -> u64 {
        self.inner.frames_acquired.load(Ordering::Relaxed)
    }

    /// Stats of the most recently completed trial.
    pub fn last_trial_stats(&self) -> Option<TrialStats> {
        self.inner.last_trial.lock().expect("lock poisoned").clone()
    }

    /// Unrecoverable frame-source failure, if the loop died on one.
    pub fn fault(&self) -> Option<String> {
        self.inner.fault.lock().expect("lock poisoned").clone()
    }

    fn ensure_not_closed(&self) -> Result<(), SessionError> {
        let state = *self.inner.state.lock().expect("lock poisoned");
        if state == SessionState::Closed {
            return Err(SessionError::closed());
        }
        Ok(())
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        let state = *self.inner.state.lock().expect("lock poisoned");
        if state != SessionState::Closed {
            if let Err(e) = self.close(Duration::from_millis(500)) {
                log::warn!("error closing session in drop: {e}");
            }
        }
    }
}

fn acquire_loop(inner: Arc<Inner>) {
    let mut source = match inner.source.lock().expect("lock poisoned").take() {
        Some(source) => source,
        None => return,
    };

    let settings = SensorSettings {
        fps: inner.config.acquisition.fps,
        gain_db: inner.config.acquisition.gain_db,
        exposure_ms: inner.config.acquisition.exposure_ms,
    };
    if let Err(e) = source.begin(&settings) {
        log::error!("failed to begin acquisition: {e}");
        *inner.fault.lock().expect("lock poisoned") = Some(e.to_string());
        *inner.source.lock().expect("lock poisoned") = Some(source);
        return;
    }

    let mut controller = WriterController::new(
        inner.backend.clone(),
        inner.queue.clone(),
        inner.output_dir.clone(),
        inner.config.acquisition.fps,
        inner.trial_index.clone(),
    );

    let trigger_line = inner.config.lines.trigger_line;
    let sync_line = inner.config.lines.sync_line;
    let mut trigger = EdgeDetector::new(trigger_line);
    // Seed the sync detector with the live level so a line already high at
    // start does not log a phantom edge.
    let sync_seed = source.line_status(sync_line).unwrap_or(false);
    let mut sync = EdgeDetector::with_level(sync_line, sync_seed);

    // Acquisition start is a prepare trigger: prewarm for trial 0.
    inner.controls.lock().expect("lock poisoned").reprepare = true;

    while !inner.stop_flag.load(Ordering::Relaxed) {
        let raw = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("unrecoverable frame source failure: {e}");
                *inner.fault.lock().expect("lock poisoned") = Some(e.to_string());
                break;
            }
        };
        inner.frames_acquired.fetch_add(1, Ordering::Relaxed);

        let (raw_w, raw_h) = (source.width(), source.height());
        let raw = if raw.complete {
            raw
        } else {
            // Substitute a zero frame of the expected size; the sample is
            // flagged but counted, so timing continuity is preserved.
            log::warn!("incomplete capture at ts {} us; substituting zero frame", raw.timestamp_us);
            RawFrame {
                data: vec![0u8; (raw_w * raw_h) as usize],
                timestamp_us: raw.timestamp_us,
                complete: false,
            }
        };

        let (mode, codec, enabled, roi, reprepare) = {
            let mut controls = inner.controls.lock().expect("lock poisoned");
            let snapshot = (
                controls.mode,
                controls.codec,
                controls.recording_enabled,
                controls.roi,
                controls.reprepare,
            );
            controls.reprepare = false;
            snapshot
        };

        let reconstructed = !raw.complete;
        let (data, width, height) = match roi {
            Some(r) => (crop_gray(&raw.data, raw_w, raw_h, &r), r.width, r.height),
            None => (raw.data, raw_w, raw_h),
        };

        if reprepare {
            controller.prepare(codec, width, height);
        } else if enabled && !controller.is_recording() {
            // Covers the first enable of a session and recovery from a failed
            // prewarm, without churning a healthy prewarmed writer.
            controller.ensure_prepared(codec, width, height);
        }

        let trigger_level = source.line_status(trigger_line).unwrap_or(trigger.level());
        let trigger_edge = trigger.classify(trigger_level);
        match mode {
            RecordingMode::Trigger if enabled => match trigger_edge {
                Edge::Rising => {
                    if let Err(e) = controller.promote() {
                        log::warn!("trigger rising edge could not start a trial: {e}");
                    }
                }
                Edge::Falling => finish_trial(&inner, &mut controller),
                Edge::None => {}
            },
            RecordingMode::Continuous if enabled => {
                if !controller.is_recording() && controller.has_prewarmed() {
                    if let Err(e) = controller.promote() {
                        log::warn!("failed to start continuous trial: {e}");
                    }
                }
            }
            _ => {}
        }
        // Disabling recording ends the trial in either mode.
        if !enabled && controller.is_recording() {
            finish_trial(&inner, &mut controller);
        }
        inner
            .recording_active
            .store(controller.is_recording(), Ordering::Relaxed);

        let sync_level = source.line_status(sync_line).unwrap_or(sync.level());
        let sync_edge = sync.classify(sync_level);

        if controller.is_recording() {
            if sync_edge == Edge::Rising {
                controller.log_sync_edge();
            }
            controller.log_frame(raw.timestamp_us);
            inner.queue.push(FrameSample {
                data,
                width,
                height,
                timestamp_us: raw.timestamp_us,
                reconstructed,
            });
        }
    }

    // Final stop of any active writer before releasing the sensor.
    if controller.is_recording() {
        finish_trial(&inner, &mut controller);
    }
    controller.discard_prewarmed();
    inner.recording_active.store(false, Ordering::Relaxed);

    if let Err(e) = source.end() {
        log::warn!("sensor teardown failed: {e}");
    }
    *inner.source.lock().expect("lock poisoned") = Some(source);
}

fn finish_trial(inner: &Inner, controller: &mut WriterController) {
    if let Some(stats) = controller.stop() {
        *inner.last_trial.lock().expect("lock poisoned") = Some(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{LineScript, MemoryBackend, SyntheticSource};

    fn test_config(dir: &std::path::Path, mode: RecordingMode) -> TrialCamConfig {
        let mut config = TrialCamConfig::default();
        config.storage.output_directory = dir.to_string_lossy().into_owned();
        config.acquisition.mode = mode;
        config
    }

    fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn roi_commit_maps_and_rejects_degenerate() {
        let dir = tempfile::tempdir().unwrap();
        let source = Box::new(SyntheticSource::new(640, 480));
        let backend = Arc::new(MemoryBackend::new());
        let session =
            AcquisitionSession::open(source, backend, test_config(dir.path(), RecordingMode::Continuous))
                .unwrap();

        let roi = session
            .commit_roi(DisplayRect::new(32, 48, 64, 32), 0)
            .unwrap();
        assert_eq!((roi.width % 16, roi.height % 16), (0, 0));
        assert_eq!(session.roi(), Some(roi));

        assert!(session
            .commit_roi(DisplayRect::new(0, 0, 10, 10), 0)
            .is_err());
        session.reset_roi().unwrap();
        assert_eq!(session.roi(), None);
    }

    #[test]
    fn continuous_mode_records_one_trial() {
        let dir = tempfile::tempdir().unwrap();
        let source = Box::new(
            SyntheticSource::new(32, 32).with_frame_delay(Duration::from_millis(1)),
        );
        let backend = Arc::new(MemoryBackend::new());
        let session = AcquisitionSession::open(
            source,
            backend.clone(),
            test_config(dir.path(), RecordingMode::Continuous),
        )
        .unwrap();

        session.start().unwrap();
        session.set_recording_enabled(true);
        assert!(wait_until(Duration::from_secs(5), || session.is_recording()));

        // Let a handful of frames through, then end the trial.
        std::thread::sleep(Duration::from_millis(50));
        session.set_recording_enabled(false);
        assert!(wait_until(Duration::from_secs(5), || !session.is_recording()));

        let stats = session.last_trial_stats().expect("one trial completed");
        assert_eq!(stats.trial_index, 0);
        assert!(stats.frames_written > 0);
        // Drain-before-close: every pushed frame was written, so the
        // timestamp log and the video agree exactly.
        assert_eq!(stats.frames_written as usize, stats.frame_entries);
        assert_eq!(session.trial_index(), 1);

        session.stop(Duration::from_secs(5)).unwrap();
        session.close(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn trigger_mode_records_exact_window() {
        let dir = tempfile::tempdir().unwrap();

        // Trigger high for cycles 60..=79: one rising and one falling edge,
        // exactly 20 recorded frames.
        let mut levels = vec![false; 60];
        levels.extend(std::iter::repeat(true).take(20));
        levels.push(false);

        let source = Box::new(
            SyntheticSource::new(32, 32)
                .with_frame_delay(Duration::from_millis(1))
                .with_line_script(LineScript { line: 0, levels }),
        );
        let backend = Arc::new(MemoryBackend::new());
        let session = AcquisitionSession::open(
            source,
            backend,
            test_config(dir.path(), RecordingMode::Trigger),
        )
        .unwrap();

        session.set_recording_enabled(true);
        session.start().unwrap();

        assert!(wait_until(Duration::from_secs(10), || {
            session.last_trial_stats().is_some()
        }));
        session.stop(Duration::from_secs(5)).unwrap();

        let stats = session.last_trial_stats().unwrap();
        assert_eq!(stats.frames_written, 20);
        assert_eq!(stats.frame_entries, 20);
        assert!(session.fault().is_none());
    }

    #[test]
    fn roi_commit_rejected_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let source = Box::new(
            SyntheticSource::new(32, 32).with_frame_delay(Duration::from_millis(1)),
        );
        let backend = Arc::new(MemoryBackend::new());
        let session = AcquisitionSession::open(
            source,
            backend,
            test_config(dir.path(), RecordingMode::Continuous),
        )
        .unwrap();

        session.start().unwrap();
        session.set_recording_enabled(true);
        assert!(wait_until(Duration::from_secs(5), || session.is_recording()));

        let err = session
            .commit_roi(DisplayRect::new(0, 0, 64, 64), 0)
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::SessionErrorKind::RecordingActive);

        session.set_recording_enabled(false);
        session.stop(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn stop_performs_final_writer_stop() {
        let dir = tempfile::tempdir().unwrap();
        let source = Box::new(
            SyntheticSource::new(32, 32).with_frame_delay(Duration::from_millis(1)),
        );
        let backend = Arc::new(MemoryBackend::new());
        let session = AcquisitionSession::open(
            source,
            backend,
            test_config(dir.path(), RecordingMode::Continuous),
        )
        .unwrap();

        session.start().unwrap();
        session.set_recording_enabled(true);
        assert!(wait_until(Duration::from_secs(5), || session.is_recording()));

        // Stop acquisition with the trial still active; the loop must close
        // the writer and flush the trial on its way out.
        session.stop(Duration::from_secs(5)).unwrap();
        assert!(!session.is_recording());
        assert!(session.last_trial_stats().is_some());
    }

    #[test]
    fn start_stop_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let source = Box::new(SyntheticSource::new(16, 16));
        let backend = Arc::new(MemoryBackend::new());
        let session = AcquisitionSession::open(
            source,
            backend,
            test_config(dir.path(), RecordingMode::Continuous),
        )
        .unwrap();

        assert!(session.stop(Duration::from_secs(1)).is_err());
        session.start().unwrap();
        assert!(session.start().is_err());
        session.stop(Duration::from_secs(5)).unwrap();
        session.close(Duration::from_secs(1)).unwrap();
        assert!(session.start().is_err());
    }
}
