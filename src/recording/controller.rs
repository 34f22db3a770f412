//! Writer lifecycle orchestration.
//!
//! The controller keeps at most one prewarmed writer ready ahead of need and
//! at most one active writer consuming the queue. Promotion is instantaneous
//! because the encoder was opened at prepare time; stopping drains the queue,
//! flushes the trial's timestamp logs, bumps the trial index and immediately
//! prewarms the next writer.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;

use crate::errors::TrialCamError;
use crate::queue::FrameQueue;
use crate::timelog::TrialSession;
use crate::types::Codec;

use super::config::{EncoderConfig, TrialStats};
use super::encoder::EncoderBackend;
use super::writer::{WriterState, WriterTask};

/// How long a stop waits for drain-before-close before abandoning the writer.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

const DISCARD_TIMEOUT: Duration = Duration::from_secs(2);

pub struct WriterController {
    backend: Arc<dyn EncoderBackend>,
    queue: Arc<FrameQueue>,
    output_dir: PathBuf,
    fps: f64,
    /// Shared with the session so the index survives acquisition restarts.
    trial_index: Arc<AtomicU64>,
    next: Option<WriterTask>,
    active: Option<WriterTask>,
    trial: Option<TrialSession>,
    last_config: Option<EncoderConfig>,
}

impl WriterController {
    pub fn new(
        backend: Arc<dyn EncoderBackend>,
        queue: Arc<FrameQueue>,
        output_dir: PathBuf,
        fps: f64,
        trial_index: Arc<AtomicU64>,
    ) -> Self {
        Self {
            backend,
            queue,
            output_dir,
            fps,
            trial_index,
            next: None,
            active: None,
            trial: None,
            last_config: None,
        }
    }

    pub fn trial_index(&self) -> u64 {
        self.trial_index.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn has_prewarmed(&self) -> bool {
        self.next
            .as_ref()
            .is_some_and(|w| w.state() == WriterState::Prewarmed)
    }

    /// Prewarm a writer for the next trial at the given (frozen) geometry.
    ///
    /// Any existing unpromoted writer is discarded first, along with its empty
    /// output file. Encoder open failures surface later as a writer that went
    /// straight to `Closed`; they leave no prewarmed writer and the next
    /// prepare trigger retries.
    pub fn prepare(&mut self, codec: Codec, width: u32, height: u32) {
        if let Some(previous) = self.next.take() {
            previous.discard(DISCARD_TIMEOUT);
        }

        // While a trial is active the prewarm is for the one after it; naming
        // it by the current index would collide with the file being written.
        let trial_index = self.trial_index() + u64::from(self.active.is_some());
        let config = EncoderConfig::new(codec, width, height, self.fps);
        self.last_config = Some(config);

        let filename = format!(
            "{}_trial{}.{}",
            Local::now().format("%Y%m%d_%Hh%M"),
            trial_index,
            codec.extension()
        );
        let path = self.output_dir.join(filename);

        match WriterTask::spawn(
            self.backend.clone(),
            self.queue.clone(),
            path,
            config,
            trial_index,
        ) {
            Ok(writer) => self.next = Some(writer),
            Err(e) => log::error!("failed to spawn writer for trial {trial_index}: {e}"),
        }
    }

    /// Prepare only if no writer is currently prewarming or prewarmed.
    /// Cheap enough to call every cycle; recovers from failed prewarms.
    pub fn ensure_prepared(&mut self, codec: Codec, width: u32, height: u32) {
        let alive = self.next.as_ref().is_some_and(|w| {
            matches!(w.state(), WriterState::Prewarming | WriterState::Prewarmed)
        });
        if !alive {
            self.prepare(codec, width, height);
        }
    }

    /// Promote the prewarmed writer to `Active` and open a fresh trial.
    ///
    /// Clears the frame queue of any stale residue first. Fails without side
    /// effects when no writer is `Prewarmed` (still prewarming, failed to
    /// open, or never prepared).
    pub fn promote(&mut self) -> Result<(), TrialCamError> {
        if !self.has_prewarmed() {
            return Err(TrialCamError::WriterError(
                "no prewarmed writer available for promotion".to_string(),
            ));
        }
        if self.active.is_some() {
            return Err(TrialCamError::WriterError(
                "a trial is already active".to_string(),
            ));
        }

        let writer = self.next.take().expect("checked by has_prewarmed");
        self.queue.clear();
        writer.activate()?;

        let trial_index = writer.trial_index();
        self.trial = Some(TrialSession::new(trial_index));
        log::info!("trial {} started: {}", trial_index, writer.path().display());
        self.active = Some(writer);
        Ok(())
    }

    /// Record one frame pushed to the queue for the active trial.
    pub fn log_frame(&mut self, hardware_timestamp_us: u64) {
        if let Some(trial) = self.trial.as_mut() {
            trial.log_frame(hardware_timestamp_us);
        }
    }

    /// Record one sync-line rising edge for the active trial.
    pub fn log_sync_edge(&mut self) {
        if let Some(trial) = self.trial.as_mut() {
            trial.log_sync_edge();
        }
    }

    /// Stop the active trial: drain-before-close, flush the timestamp logs,
    /// bump the trial index, and prewarm the next writer.
    ///
    /// Returns `None` when no trial is active.
    pub fn stop(&mut self) -> Option<TrialStats> {
        let mut writer = self.active.take()?;
        writer.request_stop();
        if !writer.wait_closed(STOP_TIMEOUT) {
            log::error!(
                "writer for trial {} did not close within {:?}; abandoning",
                writer.trial_index(),
                STOP_TIMEOUT
            );
        }
        if !writer.join(Duration::from_secs(1)) {
            log::warn!("writer thread for trial {} still running", writer.trial_index());
        }

        let trial = self.trial.take();
        let (sync_entries, frame_entries) = match trial {
            Some(trial) => {
                let counts = (trial.sync_count(), trial.frame_count());
                if let Err(e) = trial.persist_alongside(writer.path()) {
                    log::error!("failed to persist trial {} logs: {e}", trial.trial_index());
                }
                counts
            }
            None => (0, 0),
        };

        let stats = TrialStats {
            trial_index: writer.trial_index(),
            frames_written: writer.frames_written(),
            video_path: writer.path().to_string_lossy().into_owned(),
            sync_entries,
            frame_entries,
        };
        log::info!(
            "trial {} stopped: {} frames written",
            stats.trial_index,
            stats.frames_written
        );

        self.trial_index.fetch_add(1, Ordering::Relaxed);

        // Prewarm for the next trial right away so the next promotion is
        // instantaneous.
        if let Some(config) = self.last_config {
            self.prepare(config.codec, config.width, config.height);
        }

        Some(stats)
    }

    /// Discard any unpromoted writer. Shutdown path.
    pub fn discard_prewarmed(&mut self) {
        if let Some(writer) = self.next.take() {
            writer.discard(DISCARD_TIMEOUT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use crate::types::FrameSample;

    fn push(queue: &FrameQueue, ts: u64) {
        queue.push(FrameSample {
            data: vec![0u8; 8],
            width: 4,
            height: 2,
            timestamp_us: ts,
            reconstructed: false,
        });
    }

    fn controller_with(
        backend: Arc<MemoryBackend>,
        dir: &std::path::Path,
    ) -> (WriterController, Arc<FrameQueue>) {
        let queue = Arc::new(FrameQueue::new());
        let controller = WriterController::new(
            backend,
            queue.clone(),
            dir.to_path_buf(),
            30.0,
            Arc::new(AtomicU64::new(0)),
        );
        (controller, queue)
    }

    fn wait_prewarmed(controller: &WriterController) {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !controller.has_prewarmed() {
            assert!(std::time::Instant::now() < deadline, "prewarm timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn full_trial_cycle_increments_index() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, queue) = controller_with(backend, dir.path());

        controller.prepare(Codec::Raw, 4, 2);
        wait_prewarmed(&controller);
        controller.promote().unwrap();
        assert!(controller.is_recording());

        for ts in 0..3 {
            controller.log_frame(ts * 1000);
            push(&queue, ts * 1000);
        }

        let stats = controller.stop().unwrap();
        assert_eq!(stats.trial_index, 0);
        assert_eq!(stats.frames_written, 3);
        assert_eq!(stats.frame_entries, 3);
        assert_eq!(controller.trial_index(), 1);
        // stop() immediately prewarms the next trial.
        wait_prewarmed(&controller);
        controller.discard_prewarmed();
    }

    #[test]
    fn promote_without_prewarmed_writer_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _queue) = controller_with(backend, dir.path());
        assert!(controller.promote().is_err());
    }

    #[test]
    fn promote_clears_stale_queue_residue() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, queue) = controller_with(backend, dir.path());

        push(&queue, 1);
        push(&queue, 2);

        controller.prepare(Codec::Raw, 4, 2);
        wait_prewarmed(&controller);
        controller.promote().unwrap();
        // Residue from before the trial must not reach the writer.
        controller.log_frame(10);
        push(&queue, 10);
        let stats = controller.stop().unwrap();
        assert_eq!(stats.frames_written, 1);
        controller.discard_prewarmed();
    }

    #[test]
    fn second_prepare_discards_first_writer() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _queue) = controller_with(backend, dir.path());

        controller.prepare(Codec::Raw, 4, 2);
        wait_prewarmed(&controller);
        let first_path = controller.next.as_ref().unwrap().path().to_path_buf();
        std::fs::write(&first_path, b"").unwrap();

        controller.prepare(Codec::Raw, 16, 16);
        wait_prewarmed(&controller);
        assert!(!first_path.exists(), "first writer's file must be removed");
        controller.discard_prewarmed();
    }

    #[test]
    fn ensure_prepared_is_idempotent_while_alive() {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().unwrap();
        let (mut controller, _queue) = controller_with(backend, dir.path());

        controller.ensure_prepared(Codec::Raw, 4, 2);
        wait_prewarmed(&controller);
        let path = controller.next.as_ref().unwrap().path().to_path_buf();
        controller.ensure_prepared(Codec::Raw, 4, 2);
        assert_eq!(controller.next.as_ref().unwrap().path(), path);
        controller.discard_prewarmed();
    }
}
