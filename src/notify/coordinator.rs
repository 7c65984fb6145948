//! Notification Coordinator: one live notification per job.
//!
//! All mutation goes through `apply`. Records are keyed by job id, so
//! repeated Queued/Running statuses update one element in place.
//! Terminal records expire `ttl` after they became terminal unless the
//! user dismisses them first; removed keys are retired so late replays of
//! the same job cannot resurrect them.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;

use super::types::{
    submission_key, NotificationAction, NotificationInput, NotificationRecord, NotificationUpdate,
    NotificationView,
};
use crate::jobs::{JobState, JobStatus};

const UPDATE_CAPACITY: usize = 256;

/// How long a retired key keeps ignoring replays.
const RETIRED_RETENTION_MINUTES: i64 = 60;

#[derive(Default)]
struct Board {
    records: HashMap<String, NotificationRecord>,
    retired: HashMap<String, DateTime<Utc>>,
}

pub struct NotificationCoordinator {
    board: Mutex<Board>,
    ttl: Duration,
    updates: broadcast::Sender<NotificationUpdate>,
}

impl NotificationCoordinator {
    pub fn new(ttl: std::time::Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            board: Mutex::new(Board::default()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(8)),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationUpdate> {
        self.updates.subscribe()
    }

    /// Apply one input. Returns the updates it produced (already published).
    pub fn apply(&self, input: NotificationInput) -> Vec<NotificationUpdate> {
        let Ok(mut board) = self.board.lock() else {
            tracing::error!("Notification board lock poisoned");
            return Vec::new();
        };
        let now = Utc::now();

        let updates = match input {
            NotificationInput::Status(status) => board.on_status(status, now),
            NotificationInput::Stalled { job_id } => board.on_stalled(&job_id, now),
            NotificationInput::SubmissionFailed { session_id, detail } => {
                board.on_submission_failed(&session_id, detail, now)
            }
            NotificationInput::Dismiss { key } => board.on_dismiss(&key, now),
            NotificationInput::Expire { now } => board.on_expire(now, self.ttl),
        };
        drop(board);

        for update in &updates {
            tracing::debug!(key = update.key(), "Notification update");
            let _ = self.updates.send(update.clone());
        }
        updates
    }

    /// Notifications the user should currently see, oldest first.
    pub fn visible(&self) -> Vec<NotificationRecord> {
        let Ok(board) = self.board.lock() else {
            return Vec::new();
        };
        let mut records: Vec<NotificationRecord> = board
            .records
            .values()
            .filter(|r| !r.dismissed)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        records
    }

    pub fn get(&self, key: &str) -> Option<NotificationRecord> {
        self.board.lock().ok()?.records.get(key).cloned()
    }
}

impl Board {
    fn on_status(&mut self, status: JobStatus, now: DateTime<Utc>) -> Vec<NotificationUpdate> {
        let key = status.job_id.clone();
        if self.retired.contains_key(&key) {
            return Vec::new();
        }

        let (title, view) = present(&status);
        match self.records.get_mut(&key) {
            Some(record) => {
                if record.is_terminal() || status.state.rank() < record.state.rank() {
                    return Vec::new();
                }
                if record.state == status.state && record.view == view {
                    return Vec::new();
                }
                record.state = status.state;
                record.title = title;
                record.view = view;
                record.updated_at = now;
                if status.state.is_terminal() {
                    record.terminal_at = Some(now);
                    // A hidden in-progress element reappears with the outcome.
                    record.dismissed = false;
                }
                if record.dismissed {
                    return Vec::new();
                }
                vec![NotificationUpdate::Upsert {
                    notification: record.clone(),
                }]
            }
            None => {
                let record = NotificationRecord {
                    key: key.clone(),
                    state: status.state,
                    title,
                    view,
                    dismissed: false,
                    created_at: now,
                    updated_at: now,
                    terminal_at: status.state.is_terminal().then_some(now),
                };
                self.records.insert(key, record.clone());
                vec![NotificationUpdate::Upsert {
                    notification: record,
                }]
            }
        }
    }

    fn on_stalled(&mut self, job_id: &str, now: DateTime<Utc>) -> Vec<NotificationUpdate> {
        let Some(record) = self.records.get_mut(job_id) else {
            return Vec::new();
        };
        if record.state != JobState::Running {
            return Vec::new();
        }
        let NotificationView::Progress { stalled, .. } = &mut record.view else {
            return Vec::new();
        };
        if *stalled {
            return Vec::new();
        }
        *stalled = true;
        record.updated_at = now;
        if record.dismissed {
            return Vec::new();
        }
        vec![NotificationUpdate::Upsert {
            notification: record.clone(),
        }]
    }

    fn on_submission_failed(
        &mut self,
        session_id: &str,
        detail: String,
        now: DateTime<Utc>,
    ) -> Vec<NotificationUpdate> {
        let key = submission_key(session_id);
        self.retired.remove(&key);
        let created_at = self.records.get(&key).map_or(now, |r| r.created_at);
        let record = NotificationRecord {
            key: key.clone(),
            state: JobState::Failed,
            title: "Could not start quiz generation".into(),
            view: NotificationView::Error { detail },
            dismissed: false,
            created_at,
            updated_at: now,
            terminal_at: Some(now),
        };
        self.records.insert(key, record.clone());
        vec![NotificationUpdate::Upsert {
            notification: record,
        }]
    }

    fn on_dismiss(&mut self, key: &str, now: DateTime<Utc>) -> Vec<NotificationUpdate> {
        let Some(record) = self.records.get_mut(key) else {
            return Vec::new();
        };
        if record.is_terminal() {
            self.records.remove(key);
            self.retired.insert(key.to_string(), now);
            return vec![NotificationUpdate::Removed { key: key.to_string() }];
        }
        if record.dismissed {
            return Vec::new();
        }
        // In-progress: hide, keep tracking.
        record.dismissed = true;
        record.updated_at = now;
        vec![NotificationUpdate::Removed { key: key.to_string() }]
    }

    fn on_expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> Vec<NotificationUpdate> {
        let expired: Vec<String> = self
            .records
            .values()
            .filter(|r| r.terminal_at.is_some_and(|t| t + ttl <= now))
            .map(|r| r.key.clone())
            .collect();

        let retention = Duration::minutes(RETIRED_RETENTION_MINUTES);
        self.retired.retain(|_, at| *at + retention > now);

        expired
            .into_iter()
            .map(|key| {
                self.records.remove(&key);
                self.retired.insert(key.clone(), now);
                tracing::debug!(key = %key, "Notification expired");
                NotificationUpdate::Removed { key }
            })
            .collect()
    }
}

/// Title and view for a job status.
fn present(status: &JobStatus) -> (String, NotificationView) {
    match status.state {
        JobState::Queued => (
            "Quiz queued".into(),
            NotificationView::Progress {
                percent: status.progress_percent,
                stage: status.stage_label.clone(),
                stalled: false,
            },
        ),
        JobState::Running => (
            "Generating quiz".into(),
            NotificationView::Progress {
                percent: status.progress_percent,
                stage: status.stage_label.clone(),
                stalled: false,
            },
        ),
        JobState::Completed => (
            "Quiz ready".into(),
            NotificationView::Success {
                action: NotificationAction::NavigateToQuiz {
                    session_id: status.result_session_id.clone(),
                    quiz_id: status.result_quiz_id.clone(),
                },
            },
        ),
        JobState::Failed => (
            "Quiz generation failed".into(),
            NotificationView::Error {
                detail: status
                    .error_detail
                    .clone()
                    .unwrap_or_else(|| "Unknown error".into()),
            },
        ),
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
