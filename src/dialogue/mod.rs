//! Staged slot-filling dialogue: flow registry, deterministic parser,
//! optional model fallback and the engine that drives sessions.

pub mod engine;
pub mod error;
pub mod fallback;
pub mod parser;
pub mod registry;
pub mod types;

pub use engine::{EngineConfig, SlotFillingEngine};
pub use error::{DialogueError, FallbackError};
pub use fallback::{ExtractionFallback, OllamaExtractionFallback};
pub use registry::{FlowDefinition, FlowRegistry};
pub use types::*;
