//! Job submission and tracking errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Connection refused, reset or timed out.
    #[error("Cannot reach generator: {0}")]
    Transport(String),

    /// Generator-side failure (5xx).
    #[error("Generator returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Generator refused the request (4xx). Not retried.
    #[error("Generator rejected the job (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Submission failed twice with a transport-level error.
    #[error("Job submission failed after retry: {0}")]
    TransientSubmission(String),

    #[error("Progress stream error: {0}")]
    Stream(String),

    #[error("Cannot decode generator payload: {0}")]
    Decode(String),

    #[error("Job not found: {0}")]
    NotFound(String),
}

impl JobError {
    /// Errors worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Upstream { .. })
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            Self::Transport(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(JobError::Transport("refused".into()).is_retryable());
        assert!(JobError::Upstream { status: 503, body: String::new() }.is_retryable());
        assert!(!JobError::Rejected { status: 422, body: String::new() }.is_retryable());
        assert!(!JobError::Decode("bad".into()).is_retryable());
    }
}
