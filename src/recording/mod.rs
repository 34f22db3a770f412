//! Recording pipeline: encoder seam, writer tasks and their controller.
//!
//! The flow is prewarm → promote → drain → stop:
//! - [`WriterController::prepare`] opens an encoder ahead of need on a
//!   dedicated writer thread;
//! - [`WriterController::promote`] swaps the prewarmed writer in as the
//!   active consumer of the frame queue, with no encoder setup on the
//!   critical path;
//! - [`WriterController::stop`] drains the queue fully, finalizes the
//!   container and flushes the trial's timestamp logs.

mod config;
mod controller;
mod encoder;
mod writer;

pub use config::{EncoderConfig, TrialStats};
pub use controller::{WriterController, STOP_TIMEOUT};
pub use encoder::{DefaultBackend, EncoderBackend, VideoEncoder, Y4mBackend};
#[cfg(feature = "recording")]
pub use encoder::H264Backend;
pub use writer::{WriterState, WriterTask};
