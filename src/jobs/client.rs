//! Generator boundary: job submission and status sources.
//!
//! `HttpGeneratorClient` speaks to the generator service:
//! - `POST {base}/jobs` → `{"jobId": "..."}`
//! - `GET  {base}/jobs/{id}` → status payload (polling)
//! - `GET  {base}/jobs/{id}/session` → `{"sessionId": "..."}` or 404
//! - `ws://{base}/jobs/{id}/events` → status frames (push)

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use super::error::JobError;
use super::normalize::parse_frame;
use super::types::RawStatusEvent;
use crate::quiz::FinalizedQuizConfig;

pub type StatusStream = BoxStream<'static, Result<RawStatusEvent, JobError>>;

/// Accepts finalized quiz configurations and returns a job id.
#[async_trait]
pub trait GeneratorClient: Send + Sync {
    async fn submit(&self, config: &FinalizedQuizConfig) -> Result<String, JobError>;
}

/// Where job status comes from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Open a push stream of status events for one job.
    async fn open_stream(&self, job_id: &str) -> Result<StatusStream, JobError>;

    /// Fetch the current status once.
    async fn poll(&self, job_id: &str) -> Result<RawStatusEvent, JobError>;

    /// Resolve the quiz session created for a completed job, if any yet.
    async fn lookup_session(&self, job_id: &str) -> Result<Option<String>, JobError>;
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(alias = "job_id", alias = "id")]
    #[serde(rename = "jobId")]
    job_id: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    #[serde(rename = "sessionId", alias = "session_id")]
    session_id: Option<String>,
}

pub struct HttpGeneratorClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGeneratorClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, JobError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| JobError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// WebSocket URL of a job's event stream.
    pub fn events_url(&self, job_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/jobs/{job_id}/events")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, JobError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(JobError::Upstream {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(JobError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl GeneratorClient for HttpGeneratorClient {
    async fn submit(&self, config: &FinalizedQuizConfig) -> Result<String, JobError> {
        let url = format!("{}/jobs", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(config)
            .send()
            .await
            .map_err(JobError::from_reqwest)?;
        let response = Self::check(response).await?;
        let parsed: SubmitResponse = response.json().await.map_err(|e| JobError::Decode(e.to_string()))?;
        Ok(parsed.job_id)
    }
}

#[async_trait]
impl StatusSource for HttpGeneratorClient {
    async fn open_stream(&self, job_id: &str) -> Result<StatusStream, JobError> {
        let url = self.events_url(job_id);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| JobError::Stream(e.to_string()))?;
        tracing::debug!(job_id, url = %url, "Progress stream connected");

        let events = socket.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(parse_frame(&text)),
                Ok(Message::Binary(bytes)) => Some(
                    std::str::from_utf8(&bytes)
                        .map_err(|e| JobError::Decode(e.to_string()))
                        .and_then(parse_frame),
                ),
                Ok(Message::Close(_)) => Some(Err(JobError::Stream("closed by generator".into()))),
                Ok(_) => None,
                Err(e) => Some(Err(JobError::Stream(e.to_string()))),
            }
        });
        Ok(events.boxed())
    }

    async fn poll(&self, job_id: &str) -> Result<RawStatusEvent, JobError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self.http.get(&url).send().await.map_err(JobError::from_reqwest)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JobError::NotFound(job_id.to_string()));
        }
        let response = Self::check(response).await?;
        let payload: serde_json::Value =
            response.json().await.map_err(|e| JobError::Decode(e.to_string()))?;
        Ok(RawStatusEvent::flat(payload))
    }

    async fn lookup_session(&self, job_id: &str) -> Result<Option<String>, JobError> {
        let url = format!("{}/jobs/{}/session", self.base_url, job_id);
        let response = self.http.get(&url).send().await.map_err(JobError::from_reqwest)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        let parsed: SessionResponse =
            response.json().await.map_err(|e| JobError::Decode(e.to_string()))?;
        Ok(parsed.session_id.filter(|s| !s.is_empty()))
    }
}
