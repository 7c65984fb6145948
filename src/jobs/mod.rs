//! Quiz generation jobs: submission, status normalisation and tracking.

pub mod client;
pub mod error;
pub mod normalize;
pub mod submitter;
pub mod tracker;
pub mod types;

pub use client::{GeneratorClient, HttpGeneratorClient, StatusSource, StatusStream};
pub use error::JobError;
pub use submitter::JobSubmitter;
pub use tracker::{JobProgressTracker, MonotonicGate, ReconnectionPolicy, TrackerConfig};
pub use types::*;
