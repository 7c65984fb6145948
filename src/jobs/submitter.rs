//! Job Submitter: hands a finalized quiz config to the generator.
//!
//! A transport-level failure is retried once after a short delay. A second
//! failure becomes `JobError::TransientSubmission`. Rejections (4xx) are
//! returned as-is. The caller's FlowCompleted is never consumed, so a failed
//! submission can simply be resubmitted.

use std::sync::Arc;
use std::time::Duration;

use super::client::GeneratorClient;
use super::error::JobError;
use crate::quiz::FinalizedQuizConfig;

pub struct JobSubmitter {
    client: Arc<dyn GeneratorClient>,
    retry_delay: Duration,
}

impl JobSubmitter {
    pub fn new(client: Arc<dyn GeneratorClient>, retry_delay: Duration) -> Self {
        Self {
            client,
            retry_delay,
        }
    }

    pub async fn submit(&self, config: &FinalizedQuizConfig) -> Result<String, JobError> {
        let first = match self.client.submit(config).await {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, session_id = %config.source_session_id, "Job submitted");
                return Ok(job_id);
            }
            Err(e) if e.is_retryable() => e,
            Err(e) => {
                tracing::warn!(session_id = %config.source_session_id, error = %e, "Job submission rejected");
                return Err(e);
            }
        };

        tracing::warn!(
            session_id = %config.source_session_id,
            error = %first,
            retry_in_ms = self.retry_delay.as_millis() as u64,
            "Job submission failed, retrying once"
        );
        tokio::time::sleep(self.retry_delay).await;

        match self.client.submit(config).await {
            Ok(job_id) => {
                tracing::info!(job_id = %job_id, "Job submitted on retry");
                Ok(job_id)
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(session_id = %config.source_session_id, error = %e, "Job submission failed twice");
                Err(JobError::TransientSubmission(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
