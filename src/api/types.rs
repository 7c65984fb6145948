//! Shared types for the HTTP API layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core_state::CoreState;
use crate::dialogue::{ConfirmAction, FlowCompleted, Prompt, StartContext};
use crate::notify::{NotificationRecord, NotificationUpdate};
use crate::quiz::{Distribution, FinalizedQuizConfig};

// ═══════════════════════════════════════════════════════════
// API context
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

// ═══════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════

/// `POST /api/flows/:flow_id/sessions`
pub type StartSessionRequest = StartContext;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub action: ConfirmAction,
}

/// `POST /api/quiz/preview`. Type and difficulty names use the same
/// vocabulary as the slot values (`mcq`, `true_false`, `mixed`, ...).
#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub count: u32,
    pub types: Vec<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
}

// ═══════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowList {
    pub flows: Vec<String>,
}

/// Outcome of `POST /api/sessions/:id/confirm`.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmResponse {
    /// Quiz setup confirmed and submitted.
    Launched {
        #[serde(rename = "jobId")]
        job_id: String,
        config: FinalizedQuizConfig,
    },
    /// A flow without a job behind it finished.
    Completed {
        #[serde(rename = "flowId")]
        flow_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Editing {
        stage: String,
        prompts: Vec<Prompt>,
    },
    /// The dialogue is done but the generator could not take the job. The
    /// event is returned so the client can resubmit via `POST /api/quiz/launch`.
    SubmissionFailed {
        event: FlowCompleted,
        #[serde(rename = "notificationKey")]
        notification_key: String,
        message: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub distribution: Distribution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub notifications: Vec<NotificationRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissResponse {
    pub updates: Vec<NotificationUpdate>,
}
