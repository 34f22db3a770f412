//! Writer task: one encoder, one output file, one thread.
//!
//! A writer is spawned in `Prewarming` and opens its encoder on its own
//! thread, so codec negotiation and file creation happen off the acquisition
//! hot path. Once `Prewarmed` it parks on its control channel until it is
//! promoted (`Active`), discarded, or the controller goes away. An active
//! writer drains the frame queue; a stop request moves it to `Stopping`, where
//! it drains every sample that was pushed before the request and only then
//! finalizes the encoder (`Closed`). Frames are never dropped on stop.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::errors::TrialCamError;
use crate::queue::FrameQueue;

use super::config::EncoderConfig;
use super::encoder::EncoderBackend;

/// Lifecycle states of a writer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Prewarming,
    Prewarmed,
    Active,
    Stopping,
    Closed,
}

enum Command {
    Activate,
    Stop,
    Discard,
}

struct Shared {
    state: Mutex<WriterState>,
    cv: Condvar,
    frames_written: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WriterState) {
        *self.state.lock().expect("lock poisoned") = state;
        self.cv.notify_all();
    }

    fn state(&self) -> WriterState {
        *self.state.lock().expect("lock poisoned")
    }

    fn wait_for(&self, target: WriterState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.state.lock().expect("lock poisoned");
        loop {
            if *g == target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .expect("lock poisoned");
            g = ng;
        }
    }
}

/// Handle to a writer task. Dropping the handle without an explicit stop or
/// discard disconnects the control channel, which the thread treats as a
/// discard.
pub struct WriterTask {
    path: PathBuf,
    config: EncoderConfig,
    trial_index: u64,
    shared: Arc<Shared>,
    tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl WriterTask {
    /// Spawn a writer in `Prewarming` for the given output file.
    pub fn spawn(
        backend: Arc<dyn EncoderBackend>,
        queue: Arc<FrameQueue>,
        path: PathBuf,
        config: EncoderConfig,
        trial_index: u64,
    ) -> Result<Self, TrialCamError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WriterState::Prewarming),
            cv: Condvar::new(),
            frames_written: AtomicU64::new(0),
        });
        let (tx, rx) = crossbeam_channel::unbounded();

        let thread = {
            let shared = shared.clone();
            let path = path.clone();
            std::thread::Builder::new()
                .name(format!("trialcam-writer-{trial_index}"))
                .spawn(move || writer_loop(shared, queue, rx, backend, path, config))
                .map_err(|e| TrialCamError::WriterError(format!("spawn failed: {e}")))?
        };

        Ok(Self {
            path,
            config,
            trial_index,
            shared,
            tx,
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn trial_index(&self) -> u64 {
        self.trial_index
    }

    pub fn state(&self) -> WriterState {
        self.shared.state()
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.frames_written.load(Ordering::Relaxed)
    }

    /// Promote a prewarmed writer to `Active`. Valid only from `Prewarmed`.
    pub fn activate(&self) -> Result<(), TrialCamError> {
        let state = self.state();
        if state != WriterState::Prewarmed {
            return Err(TrialCamError::WriterError(format!(
                "cannot activate writer in state {state:?}"
            )));
        }
        self.tx
            .send(Command::Activate)
            .map_err(|_| TrialCamError::WriterError("writer thread is gone".to_string()))
    }

    /// Request `Stopping`; the thread drains the queue before closing.
    pub fn request_stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Block until the writer reaches `Closed`, bounded by `timeout`.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.shared.wait_for(WriterState::Closed, timeout)
    }

    /// Stop an unpromoted writer and delete its empty output file.
    pub fn discard(mut self, join_timeout: Duration) {
        let _ = self.tx.send(Command::Discard);
        if !self.join(join_timeout) {
            log::warn!(
                "discarded writer for trial {} did not exit within {:?}",
                self.trial_index,
                join_timeout
            );
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!(
                "discarded prewarmed writer and removed empty file {}",
                self.path.display()
            ),
            Err(e) => log::warn!(
                "failed to remove unused output file {}: {}",
                self.path.display(),
                e
            ),
        }
    }

    /// Join the writer thread, bounded by `timeout`. Returns false if the
    /// thread is still running; the handle stays joinable for a later retry.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.thread.take() else {
            return true;
        };
        let start = Instant::now();
        let mut handle = Some(handle);
        loop {
            if handle.as_ref().is_some_and(|h| h.is_finished()) {
                let _ = handle.take().expect("checked above").join();
                return true;
            }
            if start.elapsed() >= timeout {
                self.thread = handle.take();
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}

fn writer_loop(
    shared: Arc<Shared>,
    queue: Arc<FrameQueue>,
    rx: Receiver<Command>,
    backend: Arc<dyn EncoderBackend>,
    path: PathBuf,
    config: EncoderConfig,
) {
    // Prewarming: the slow part, deliberately off the acquisition thread.
    let mut encoder = match backend.open(&path, &config) {
        Ok(enc) => {
            log::info!(
                "prewarmed writer {} ({:?}, {}x{})",
                path.display(),
                config.codec,
                config.width,
                config.height
            );
            enc
        }
        Err(e) => {
            log::error!("failed to open encoder for {}: {}", path.display(), e);
            shared.set_state(WriterState::Closed);
            return;
        }
    };
    shared.set_state(WriterState::Prewarmed);

    // Park until promoted or discarded.
    let promoted = loop {
        match rx.recv() {
            Ok(Command::Activate) => break true,
            Ok(Command::Discard) | Ok(Command::Stop) | Err(_) => break false,
        }
    };
    if !promoted {
        if let Err(e) = encoder.finish() {
            log::debug!("finalizing discarded writer {}: {}", path.display(), e);
        }
        shared.set_state(WriterState::Closed);
        return;
    }

    shared.set_state(WriterState::Active);
    log::info!("writer active: {}", path.display());

    loop {
        if let Some(sample) = queue.pop_timeout(Duration::from_millis(20)) {
            write_sample(&shared, encoder.as_mut(), &config, &sample.data);
        }
        match rx.try_recv() {
            Ok(Command::Stop) | Ok(Command::Discard) => break,
            Err(TryRecvError::Disconnected) => break,
            Ok(Command::Activate) | Err(TryRecvError::Empty) => {}
        }
    }

    // Stopping: everything pushed before the stop request must be written
    // before the encoder is finalized.
    shared.set_state(WriterState::Stopping);
    while let Some(sample) = queue.try_pop() {
        write_sample(&shared, encoder.as_mut(), &config, &sample.data);
    }

    let written = shared.frames_written.load(Ordering::Relaxed);
    match encoder.finish() {
        Ok(()) => log::info!("finished writing {} ({} frames)", path.display(), written),
        Err(e) => log::error!("failed to finalize {}: {}", path.display(), e),
    }
    shared.set_state(WriterState::Closed);
}

fn write_sample(
    shared: &Shared,
    encoder: &mut dyn super::encoder::VideoEncoder,
    config: &EncoderConfig,
    gray: &[u8],
) {
    match encoder.write(gray) {
        Ok(()) => {
            shared.frames_written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => log::error!(
            "dropping sample for {}x{} writer: {}",
            config.width,
            config.height,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use crate::types::{Codec, FrameSample};

    fn sample(ts: u64, len: usize) -> FrameSample {
        FrameSample {
            data: vec![ts as u8; len],
            width: 4,
            height: 2,
            timestamp_us: ts,
            reconstructed: false,
        }
    }

    fn config() -> EncoderConfig {
        EncoderConfig::new(Codec::Raw, 4, 2, 30.0)
    }

    #[test]
    fn prewarms_then_activates_and_drains() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(FrameQueue::new());
        let dir = tempfile::tempdir().unwrap();

        let mut writer = WriterTask::spawn(
            backend.clone(),
            queue.clone(),
            dir.path().join("t0.y4m"),
            config(),
            0,
        )
        .unwrap();

        assert!(writer.shared.wait_for(WriterState::Prewarmed, Duration::from_secs(2)));
        writer.activate().unwrap();

        for ts in 0..5 {
            queue.push(sample(ts, 8));
        }
        writer.request_stop();
        assert!(writer.wait_closed(Duration::from_secs(2)));
        assert!(writer.join(Duration::from_secs(1)));

        assert_eq!(writer.frames_written(), 5);
        assert_eq!(backend.frames_for("t0.y4m").len(), 5);
        assert!(backend.is_finished("t0.y4m"));
    }

    #[test]
    fn stop_drains_everything_pushed_before_it() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(FrameQueue::new());
        let dir = tempfile::tempdir().unwrap();

        let mut writer = WriterTask::spawn(
            backend.clone(),
            queue.clone(),
            dir.path().join("t1.y4m"),
            config(),
            1,
        )
        .unwrap();
        assert!(writer.shared.wait_for(WriterState::Prewarmed, Duration::from_secs(2)));

        // Push the whole burst before activation even begins draining, then
        // stop immediately: every sample must still be written.
        for ts in 0..100 {
            queue.push(sample(ts, 8));
        }
        writer.activate().unwrap();
        writer.request_stop();

        assert!(writer.wait_closed(Duration::from_secs(5)));
        assert!(writer.join(Duration::from_secs(1)));
        assert_eq!(writer.frames_written(), 100);
    }

    #[test]
    fn activate_from_wrong_state_fails() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(FrameQueue::new());
        let dir = tempfile::tempdir().unwrap();

        let writer = WriterTask::spawn(
            backend,
            queue,
            dir.path().join("t2.y4m"),
            config(),
            2,
        )
        .unwrap();
        assert!(writer.shared.wait_for(WriterState::Prewarmed, Duration::from_secs(2)));
        writer.activate().unwrap();
        // Second activation: the state is no longer Prewarmed.
        assert!(writer.shared.wait_for(WriterState::Active, Duration::from_secs(2)));
        assert!(writer.activate().is_err());
        writer.request_stop();
        assert!(writer.wait_closed(Duration::from_secs(2)));
    }

    #[test]
    fn discard_removes_output_file() {
        let backend = Arc::new(MemoryBackend::new());
        let queue = Arc::new(FrameQueue::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t3.y4m");
        std::fs::write(&path, b"placeholder").unwrap();

        let writer = WriterTask::spawn(backend, queue, path.clone(), config(), 3).unwrap();
        assert!(writer.shared.wait_for(WriterState::Prewarmed, Duration::from_secs(2)));
        writer.discard(Duration::from_secs(2));
        assert!(!path.exists());
    }

    #[test]
    fn failed_encoder_open_closes_without_prewarm() {
        let backend = Arc::new(MemoryBackend::failing());
        let queue = Arc::new(FrameQueue::new());
        let dir = tempfile::tempdir().unwrap();

        let writer = WriterTask::spawn(
            backend,
            queue,
            dir.path().join("t4.y4m"),
            config(),
            4,
        )
        .unwrap();
        assert!(writer.shared.wait_for(WriterState::Closed, Duration::from_secs(2)));
        assert!(writer.activate().is_err());
    }
}
