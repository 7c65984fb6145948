//! Quiz launcher: turns a completed `quiz_setup` flow into a tracked job.
//!
//! FlowCompleted → QuizParameters → Distribution → FinalizedQuizConfig
//! → JobSubmitter → JobProgressTracker.
//!
//! A submission failure becomes a dismissible notification keyed
//! `submit:{sessionId}`. The FlowCompleted is borrowed, never consumed, so
//! the caller can resubmit it.

use std::sync::Arc;

use thiserror::Error;

use crate::dialogue::error::DialogueError;
use crate::dialogue::registry::QUIZ_SETUP;
use crate::dialogue::types::FlowCompleted;
use crate::jobs::{JobError, JobProgressTracker, JobSubmitter};
use crate::notify::{submission_key, NotificationCoordinator, NotificationInput};
use crate::quiz::{distribute, DistributionError, FinalizedQuizConfig, QuizParameters, TypeSpec};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LaunchError {
    #[error("Flow {0} does not launch a quiz job")]
    UnsupportedFlow(String),

    #[error(transparent)]
    Parameters(#[from] DialogueError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Submission(#[from] JobError),
}

/// Result of a successful launch.
#[derive(Debug, Clone)]
pub struct Launched {
    pub job_id: String,
    pub config: FinalizedQuizConfig,
}

/// Build the generator request for a completed quiz setup. The slots are
/// checked again because a resubmitted event comes from the client.
pub fn finalize(event: &FlowCompleted, max_questions: u32) -> Result<FinalizedQuizConfig, LaunchError> {
    if event.flow_id != QUIZ_SETUP {
        return Err(LaunchError::UnsupportedFlow(event.flow_id.clone()));
    }
    let params = QuizParameters::from_slots(&event.slots, max_questions)?;
    let dist = distribute(params.count, &params.types, &params.difficulty.levels())?;

    let types = dist
        .per_type
        .iter()
        .map(|t| TypeSpec {
            question_type: t.question_type,
            count: t.count,
            answer_format: t.question_type.answer_format(),
        })
        .collect();

    Ok(FinalizedQuizConfig {
        user_id: event.context.user_id.clone(),
        subject_id: event.context.subject_id.clone(),
        doc_ids: event.context.doc_ids.clone(),
        total: dist.total,
        difficulty: params.difficulty,
        types,
        per_type: dist.per_type,
        per_difficulty: dist.per_difficulty,
        source_session_id: event.session_id.clone(),
    })
}

pub struct QuizLauncher {
    submitter: Arc<JobSubmitter>,
    tracker: JobProgressTracker,
    notifications: Arc<NotificationCoordinator>,
    max_questions: u32,
}

impl QuizLauncher {
    pub fn new(
        submitter: Arc<JobSubmitter>,
        tracker: JobProgressTracker,
        notifications: Arc<NotificationCoordinator>,
        max_questions: u32,
    ) -> Self {
        Self {
            submitter,
            tracker,
            notifications,
            max_questions,
        }
    }

    pub async fn launch(&self, event: &FlowCompleted) -> Result<Launched, LaunchError> {
        let config = finalize(event, self.max_questions)?;

        match self.submitter.submit(&config).await {
            Ok(job_id) => {
                // Clear a failure notice left by an earlier attempt.
                self.notifications.apply(NotificationInput::Dismiss {
                    key: submission_key(&event.session_id),
                });
                self.tracker.track(&job_id);
                Ok(Launched { job_id, config })
            }
            Err(e) => {
                self.notifications.apply(NotificationInput::SubmissionFailed {
                    session_id: event.session_id.clone(),
                    detail: e.to_string(),
                });
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::stream;
    use futures_util::StreamExt;

    use super::*;
    use crate::dialogue::registry::slots;
    use crate::dialogue::types::{BoundedInt, SlotMap, SlotValue, StartContext};
    use crate::jobs::{GeneratorClient, RawStatusEvent, StatusSource, StatusStream, TrackerConfig};
    use crate::quiz::{AnswerFormat, Difficulty, DifficultyLevel, QuestionType};

    fn event(flow_id: &str) -> FlowCompleted {
        let mut slots_map = SlotMap::new();
        slots_map.insert(
            slots::TYPES.into(),
            SlotValue::TextSet(vec!["mcq".into(), "true_false".into()]),
        );
        slots_map.insert(slots::DIFFICULTY.into(), SlotValue::Text("mixed".into()));
        slots_map.insert(
            slots::COUNT.into(),
            SlotValue::Integer(BoundedInt { value: 15, min: 1, max: 50 }),
        );
        FlowCompleted {
            session_id: "s-1".into(),
            flow_id: flow_id.into(),
            context: StartContext {
                user_id: "u1".into(),
                subject_id: Some("bio".into()),
                doc_ids: vec!["d1".into(), "d2".into()],
            },
            slots: slots_map,
            completed_at: Utc::now(),
        }
    }

    struct Client {
        results: Mutex<VecDeque<Result<String, JobError>>>,
    }

    #[async_trait]
    impl GeneratorClient for Client {
        async fn submit(&self, _c: &FinalizedQuizConfig) -> Result<String, JobError> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(JobError::Transport("down".into())))
        }
    }

    /// Stream that never says anything.
    struct Silent;

    #[async_trait]
    impl StatusSource for Silent {
        async fn open_stream(&self, _job_id: &str) -> Result<StatusStream, JobError> {
            Ok(stream::pending().boxed())
        }
        async fn poll(&self, _job_id: &str) -> Result<RawStatusEvent, JobError> {
            Err(JobError::Transport("unused".into()))
        }
        async fn lookup_session(&self, _job_id: &str) -> Result<Option<String>, JobError> {
            Ok(None)
        }
    }

    fn launcher(results: Vec<Result<String, JobError>>) -> (QuizLauncher, JobProgressTracker, Arc<NotificationCoordinator>) {
        let client = Arc::new(Client {
            results: Mutex::new(results.into()),
        });
        let submitter = Arc::new(JobSubmitter::new(client, Duration::from_millis(1)));
        let tracker = JobProgressTracker::new(
            Arc::new(Silent),
            TrackerConfig::from(&crate::config::QuizflowConfig::default()),
        );
        let notifications = Arc::new(NotificationCoordinator::new(Duration::from_secs(8)));
        (
            QuizLauncher::new(submitter, tracker.clone(), notifications.clone(), 50),
            tracker,
            notifications,
        )
    }

    #[test]
    fn finalize_builds_full_config() {
        let config = finalize(&event(QUIZ_SETUP), 50).unwrap();
        assert_eq!(config.total, 15);
        assert_eq!(config.difficulty, Difficulty::Mixed);
        assert_eq!(config.doc_ids, vec!["d1", "d2"]);
        assert_eq!(config.source_session_id, "s-1");

        let sum: u32 = config.per_type.iter().map(|t| t.count).sum();
        assert_eq!(sum, 15);
        let sum: u32 = config.per_difficulty.iter().map(|d| d.count).sum();
        assert_eq!(sum, 15);
        assert_eq!(config.per_difficulty[0].level, DifficultyLevel::Medium);

        assert_eq!(config.types.len(), 2);
        assert_eq!(config.types[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(config.types[1].answer_format, AnswerFormat::Boolean);
    }

    #[test]
    fn finalize_rejects_stub_flows() {
        assert_eq!(
            finalize(&event("highlights"), 50).unwrap_err(),
            LaunchError::UnsupportedFlow("highlights".into())
        );
    }

    #[test]
    fn finalize_rechecks_resubmitted_slots() {
        let mut unoffered = event(QUIZ_SETUP);
        unoffered.slots.insert(
            slots::TYPES.into(),
            SlotValue::TextSet(vec!["single_choice".into()]),
        );
        assert!(matches!(
            finalize(&unoffered, 50).unwrap_err(),
            LaunchError::Parameters(DialogueError::InvalidSlot { slot, .. }) if slot == slots::TYPES
        ));

        let mut oversized = event(QUIZ_SETUP);
        oversized.slots.insert(
            slots::COUNT.into(),
            SlotValue::Integer(BoundedInt { value: 100_000, min: 1, max: u32::MAX }),
        );
        assert!(matches!(
            finalize(&oversized, 50).unwrap_err(),
            LaunchError::Parameters(DialogueError::InvalidSlot { slot, .. }) if slot == slots::COUNT
        ));
        assert_eq!(finalize(&event(QUIZ_SETUP), 15).unwrap().total, 15);
    }

    #[tokio::test]
    async fn invalid_resubmission_is_not_sent() {
        let (launcher, tracker, notifications) = launcher(vec![Ok("job-1".into())]);
        let mut bad = event(QUIZ_SETUP);
        bad.slots.insert(
            slots::COUNT.into(),
            SlotValue::Integer(BoundedInt { value: 51, min: 1, max: 51 }),
        );
        assert!(matches!(
            launcher.launch(&bad).await.unwrap_err(),
            LaunchError::Parameters(_)
        ));
        assert!(tracker.records().is_empty());
        assert!(notifications.visible().is_empty());
    }

    #[tokio::test]
    async fn launch_submits_and_tracks() {
        let (launcher, tracker, notifications) = launcher(vec![Ok("job-1".into())]);
        let launched = launcher.launch(&event(QUIZ_SETUP)).await.unwrap();
        assert_eq!(launched.job_id, "job-1");
        assert!(tracker.record("job-1").is_some());
        assert!(notifications.visible().is_empty());
    }

    #[tokio::test]
    async fn failed_launch_notifies_and_can_resubmit() {
        let (launcher, tracker, notifications) = launcher(vec![
            Err(JobError::Transport("down".into())),
            Err(JobError::Transport("down".into())),
            Ok("job-2".into()),
        ]);
        let ev = event(QUIZ_SETUP);

        let err = launcher.launch(&ev).await.unwrap_err();
        assert!(matches!(err, LaunchError::Submission(JobError::TransientSubmission(_))));
        assert_eq!(notifications.visible()[0].key, "submit:s-1");

        let launched = launcher.launch(&ev).await.unwrap();
        assert_eq!(launched.job_id, "job-2");
        assert!(tracker.record("job-2").is_some());
        assert!(notifications.get("submit:s-1").is_none());
    }
}
