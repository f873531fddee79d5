//! scanvox - Multimodal engagement inference for adaptive learning sessions
//!
//! scanvox estimates a learner's engagement from two sensor streams and turns
//! the estimate into a condition-aware intervention decision through a
//! deterministic pipeline: featurization → two-branch encoding → fusion →
//! profile selection → decision.
//!
//! ## Modules
//!
//! - **Featurization**: [`features`] rasterizes scanpaths, [`normalizer`] fixes
//!   audio cepstral sequences to a standard shape, [`gaze`] segments raw
//!   tracker samples
//! - **Model**: [`model`] holds the visual/temporal encoders and the fusion
//!   head built on the [`nn`] layers
//! - **Decisions**: [`profile`] holds the condition threshold registry,
//!   [`decision`] maps scores onto verdicts
//! - **Surfaces**: [`pipeline`] orchestrates everything, [`ffi`] exposes it
//!   over a C ABI

pub mod config;
pub mod decision;
pub mod encoder;
pub mod error;
pub mod features;
pub mod gaze;
pub mod model;
pub mod nn;
pub mod normalizer;
pub mod pipeline;
pub mod profile;
pub mod schema;
pub mod training;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::EngineConfig;
pub use decision::DecisionEngine;
pub use error::EngageError;
pub use model::{EngagementModel, ModelConfig};
pub use pipeline::{analyze, decide, EngagementProcessor};
pub use profile::{Condition, DiagnosedConditions, ProfileRegistry, ThresholdProfile};

// Schema exports
pub use schema::{SessionBatch, SCHEMA_VERSION};

/// scanvox version embedded in all analysis records
pub const SCANVOX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for analysis records
pub const PRODUCER_NAME: &str = "scanvox";
