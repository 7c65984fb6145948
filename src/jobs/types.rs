//! Job lifecycle types.
//!
//! `JobState` is totally ordered by rank: Queued < Running < {Completed, Failed}.
//! The tracker never lets a job's state move to a lower rank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse an upstream state name, including the aliases generators use.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" | "waiting" | "accepted" => Some(Self::Queued),
            "running" | "started" | "processing" | "in_progress" | "progress" => {
                Some(Self::Running)
            }
            "completed" | "complete" | "done" | "succeeded" | "success" | "finished" => {
                Some(Self::Completed)
            }
            "failed" | "failure" | "error" | "errored" | "cancelled" | "canceled" => {
                Some(Self::Failed)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical status of one job, whatever shape the generator sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub progress_percent: Option<u8>,
    pub stage_label: Option<String>,
    pub result_session_id: Option<String>,
    pub result_quiz_id: Option<String>,
    pub error_detail: Option<String>,
}

impl JobStatus {
    pub fn new(job_id: impl Into<String>, state: JobState) -> Self {
        Self {
            job_id: job_id.into(),
            state,
            progress_percent: None,
            stage_label: None,
            result_session_id: None,
            result_quiz_id: None,
            error_detail: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(job_id, JobState::Failed)
        }
    }
}

/// How the tracker is currently receiving updates for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingChannel {
    Stream,
    Polling,
    Finished,
}

/// Tracker-owned record of a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    #[serde(flatten)]
    pub status: JobStatus,
    pub channel: TrackingChannel,
    pub stalled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: &str) -> Self {
        let now = Utc::now();
        Self {
            status: JobStatus::new(job_id, JobState::Queued),
            channel: TrackingChannel::Stream,
            stalled: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Version 1 progress payload as the generator documents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPayload {
    pub v: u32,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpstreamPayload {
    pub fn new(job_id: &str) -> Self {
        Self {
            v: 1,
            job_id: job_id.to_string(),
            quiz_id: None,
            progress: None,
            stage: None,
            session_id: None,
            error: None,
        }
    }
}

/// Stream frame: `{"event": "running", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame<T> {
    pub event: String,
    pub data: T,
}

/// An upstream message before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatusEvent {
    /// Event name from the frame envelope, if any.
    pub event: Option<String>,
    pub payload: serde_json::Value,
}

impl RawStatusEvent {
    pub fn named(event: &str, payload: serde_json::Value) -> Self {
        Self {
            event: Some(event.to_string()),
            payload,
        }
    }

    pub fn flat(payload: serde_json::Value) -> Self {
        Self {
            event: None,
            payload,
        }
    }
}

/// What the tracker publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    Status(JobStatus),
    /// No new status while Running for longer than the staleness threshold.
    Stalled { job_id: String, silent_for_secs: u64 },
}
