//! Notification records and the messages that drive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{JobState, JobStatus};

/// Key prefix for notifications about a submission that never got a job id.
pub const SUBMISSION_KEY_PREFIX: &str = "submit:";

pub fn submission_key(session_id: &str) -> String {
    format!("{SUBMISSION_KEY_PREFIX}{session_id}")
}

/// Where the success notification takes the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationAction {
    NavigateToQuiz {
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
        #[serde(rename = "quizId")]
        quiz_id: Option<String>,
    },
}

/// What the notification element currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationView {
    Progress {
        percent: Option<u8>,
        stage: Option<String>,
        /// Taking longer than usual.
        stalled: bool,
    },
    Success {
        action: NotificationAction,
    },
    Error {
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Job id, or `submit:{sessionId}` for submission failures.
    pub key: String,
    pub state: JobState,
    pub title: String,
    pub view: NotificationView,
    pub dismissed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the record reached Completed or Failed; drives auto-dismiss.
    pub terminal_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Everything that may change a notification. Fed to
/// `NotificationCoordinator::apply`, the only mutation path.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationInput {
    Status(JobStatus),
    Stalled { job_id: String },
    SubmissionFailed { session_id: String, detail: String },
    Dismiss { key: String },
    Expire { now: DateTime<Utc> },
}

/// Pushed to UIs after each change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationUpdate {
    Upsert { notification: NotificationRecord },
    Removed { key: String },
}

impl NotificationUpdate {
    pub fn key(&self) -> &str {
        match self {
            Self::Upsert { notification } => &notification.key,
            Self::Removed { key } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_keys_are_prefixed() {
        assert_eq!(submission_key("s-1"), "submit:s-1");
    }

    #[test]
    fn success_view_wire_shape() {
        let view = NotificationView::Success {
            action: NotificationAction::NavigateToQuiz {
                session_id: Some("s-1".into()),
                quiz_id: None,
            },
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["kind"], "success");
        assert_eq!(json["action"]["type"], "navigate_to_quiz");
        assert_eq!(json["action"]["sessionId"], "s-1");
    }

    #[test]
    fn removed_update_wire_shape() {
        let json = serde_json::to_value(NotificationUpdate::Removed { key: "j1".into() }).unwrap();
        assert_eq!(json["type"], "removed");
        assert_eq!(json["key"], "j1");
    }
}
