//! TrialCam: hardware-triggered trial recording for scientific camera
//! acquisition.
//!
//! This crate records selected spans of a continuous sensor stream to disk as
//! indexed "trials", correlating hardware frame timestamps and digital
//! trigger/sync line edges with the recorded frames.
//!
//! # Features
//! - Double-buffered ("prewarmed") writer lifecycle: encoder setup happens
//!   off the acquisition hot path, so a trigger edge starts a trial instantly
//! - Drain-before-close stop discipline: every queued frame is written before
//!   the container is finalized
//! - Rotation-aware ROI mapping from display coordinates back to raw sensor
//!   coordinates, macroblock-aligned
//! - Per-trial CSV logs of frame timestamps and sync-line edges
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trialcam::{AcquisitionSession, TrialCamConfig};
//! use trialcam::recording::DefaultBackend;
//! use trialcam::testing::SyntheticSource;
//!
//! let config = TrialCamConfig::default();
//! let source = Box::new(SyntheticSource::new(640, 480));
//! let session = AcquisitionSession::open(source, Arc::new(DefaultBackend), config)?;
//!
//! session.start()?;
//! session.set_recording_enabled(true);
//! // ... frames stream to disk as trial 0 ...
//! session.set_recording_enabled(false);
//! session.stop(Duration::from_secs(5))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod errors;
pub mod queue;
pub mod recording;
pub mod rotation;
pub mod session;
pub mod source;
pub mod timelog;
pub mod trigger;
pub mod types;

// Testing utilities - synthetic data for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::TrialCamConfig;
pub use errors::{SessionError, TrialCamError};
pub use session::AcquisitionSession;
pub use source::{FrameSource, SensorSettings};
pub use types::{Codec, DisplayRect, FrameSample, RawFrame, RecordingMode, Roi, Rotation};

/// Initialize logging for the acquisition pipeline.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "trialcam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_metadata() {
        assert_eq!(NAME, "trialcam");
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}
