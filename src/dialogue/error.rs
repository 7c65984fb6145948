//! Error types for the dialogue engine and flow registry.
//!
//! Parse misses are not errors: they produce a clarification prompt.
//! These variants cover misuse of the API and broken flow definitions.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DialogueError {
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Flow already registered: {0}")]
    FlowAlreadyRegistered(String),

    #[error("Invalid flow definition: {0}")]
    InvalidFlow(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is not awaiting confirmation")]
    NotAwaitingConfirmation(String),

    #[error("Stage not found in flow: {0}")]
    StageNotFound(String),

    #[error("Required slot missing: {0}")]
    Incomplete(String),

    #[error("Invalid value for slot {slot}: {reason}")]
    InvalidSlot { slot: String, reason: String },

    #[error("Internal lock error")]
    LockPoisoned,
}

/// Failure of the model-backed extraction fallback. Always recoverable.
#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("Fallback disabled")]
    Disabled,

    #[error("Cannot reach extraction model at {0}")]
    Connection(String),

    #[error("Extraction model returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Extraction timed out")]
    Timeout,

    #[error("Unusable extraction response: {0}")]
    Unparseable(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}
