//! Offline test doubles.
//!
//! No sensor or codec hardware is required to exercise the pipeline: these
//! doubles stand in for the frame source and the encoder backend.

mod synthetic_data;

pub use synthetic_data::{gradient_frame, LineScript, MemoryBackend, SyntheticSource};
