//! scanvox.session_batch.v1 schema
//!
//! This module defines the input record the request layer hands to the
//! pipeline: one session window of gaze, audio, condition flags, and
//! auxiliary scores.

mod session_batch;

pub use session_batch::*;
