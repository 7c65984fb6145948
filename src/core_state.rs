//! Transport-agnostic application state.
//!
//! `CoreState` owns every long-lived component (dialogue engine, job
//! tracker, notification coordinator, launcher) and is shared behind an
//! `Arc` by the HTTP API, the WebSocket push channel and the background
//! tasks started by `spawn_background`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::api::ApiServer;
use crate::config::QuizflowConfig;
use crate::dialogue::{
    EngineConfig, FallbackError, FlowRegistry, OllamaExtractionFallback,
    SlotFillingEngine,
};
use crate::jobs::{
    GeneratorClient, HttpGeneratorClient, JobError, JobProgressTracker, JobSubmitter,
    StatusSource, TrackerConfig, TrackerEvent,
};
use crate::launcher::QuizLauncher;
use crate::notify::{NotificationCoordinator, NotificationInput};

/// Per-request timeout for generator HTTP calls.
const GENERATOR_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tick of the notification expiry sweeper.
const SWEEP_INTERVAL_MS: u64 = 1000;

/// Finished jobs stay queryable this long before the sweeper forgets them.
const FINISHED_JOB_RETENTION_MINUTES: i64 = 60;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub config: QuizflowConfig,
    pub engine: SlotFillingEngine,
    pub tracker: JobProgressTracker,
    pub notifications: Arc<NotificationCoordinator>,
    pub launcher: QuizLauncher,
    /// HTTP server handle once `run()` started it. Uses tokio Mutex for async.
    pub api_server: tokio::sync::Mutex<Option<ApiServer>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl CoreState {
    /// Wire the production components from configuration: the HTTP/WebSocket
    /// generator client and, when enabled, the Ollama extraction fallback.
    pub fn from_config(config: QuizflowConfig) -> Result<Self, CoreError> {
        let generator = Arc::new(HttpGeneratorClient::new(
            &config.generator_url,
            Duration::from_secs(GENERATOR_REQUEST_TIMEOUT_SECS),
        )?);

        let mut engine = SlotFillingEngine::new(
            Arc::new(FlowRegistry::with_builtin_flows()),
            EngineConfig::from(&config),
        );
        if config.fallback_enabled {
            let fallback = OllamaExtractionFallback::new(
                &config.ollama_url,
                &config.ollama_model,
                config.fallback_timeout,
            )?;
            engine = engine.with_fallback(Arc::new(fallback));
            tracing::info!(model = %config.ollama_model, "Extraction fallback enabled");
        }

        tracing::info!(generator = %config.generator_url, "Core state ready");
        Ok(Self::with_components(config, engine, generator.clone(), generator))
    }

    /// Assemble state around caller-provided components.
    pub fn with_components(
        config: QuizflowConfig,
        engine: SlotFillingEngine,
        generator: Arc<dyn GeneratorClient>,
        source: Arc<dyn StatusSource>,
    ) -> Self {
        let tracker = JobProgressTracker::new(source, TrackerConfig::from(&config));
        let notifications = Arc::new(NotificationCoordinator::new(config.notification_ttl));
        let submitter = Arc::new(JobSubmitter::new(generator, config.submit_retry_delay));
        let launcher = QuizLauncher::new(
            submitter,
            tracker.clone(),
            notifications.clone(),
            config.max_questions,
        );

        Self {
            config,
            engine,
            tracker,
            notifications,
            launcher,
            api_server: tokio::sync::Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Start the tracker → notification bridge and the expiry sweeper.
    ///
    /// Idempotent: a second call while tasks are alive does nothing.
    /// Must be called from within a tokio runtime.
    pub fn spawn_background(&self) -> Result<(), CoreError> {
        let mut tasks = self.background.lock().map_err(|_| CoreError::LockPoisoned)?;
        if tasks.iter().any(|t| !t.is_finished()) {
            return Ok(());
        }
        tasks.clear();

        tasks.push(tokio::spawn(bridge_tracker_events(
            self.tracker.events(),
            self.tracker.clone(),
            self.notifications.clone(),
        )));
        tasks.push(tokio::spawn(sweep_expired(
            self.tracker.clone(),
            self.notifications.clone(),
        )));
        tracing::info!("Background tasks started");
        Ok(())
    }

    /// Abort the background tasks.
    pub fn stop_background(&self) {
        if let Ok(mut tasks) = self.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for CoreState {
    fn drop(&mut self) {
        self.stop_background();
    }
}

// ═══════════════════════════════════════════════════════════
// Background tasks
// ═══════════════════════════════════════════════════════════

/// Forward tracker events into the coordinator. After a lag, replays the
/// latest status of every tracked job; the coordinator drops stale repeats.
async fn bridge_tracker_events(
    mut events: broadcast::Receiver<TrackerEvent>,
    tracker: JobProgressTracker,
    notifications: Arc<NotificationCoordinator>,
) {
    loop {
        match events.recv().await {
            Ok(TrackerEvent::Status(status)) => {
                notifications.apply(NotificationInput::Status(status));
            }
            Ok(TrackerEvent::Stalled { job_id, .. }) => {
                notifications.apply(NotificationInput::Stalled { job_id });
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Notification bridge lagged, resyncing");
                for record in tracker.records() {
                    notifications.apply(NotificationInput::Status(record.status));
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("Notification bridge stopped");
}

async fn sweep_expired(tracker: JobProgressTracker, notifications: Arc<NotificationCoordinator>) {
    let mut tick = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tick.tick().await;
        let now = Utc::now();
        notifications.apply(NotificationInput::Expire { now });

        let pruned =
            tracker.prune_finished(now - chrono::Duration::minutes(FINISHED_JOB_RETENTION_MINUTES));
        if pruned > 0 {
            tracing::debug!(pruned, "Forgot finished jobs");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Generator client error: {0}")]
    Generator(#[from] JobError),
    #[error("Extraction fallback error: {0}")]
    Fallback(#[from] FallbackError),
    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// Test support
// ═══════════════════════════════════════════════════════════


// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobState, JobStatus};

    #[test]
    fn from_config_builds_production_wiring() {
        let state = CoreState::from_config(QuizflowConfig::default()).unwrap();
        assert_eq!(state.config.max_questions, 50);
        assert_eq!(state.engine.active_sessions(), 0);
    }

    #[test]
    fn from_config_without_fallback() {
        let config = QuizflowConfig {
            fallback_enabled: false,
            ..QuizflowConfig::default()
        };
        assert!(CoreState::from_config(config).is_ok());
    }

    #[tokio::test]
    async fn bridge_turns_tracker_events_into_notifications() {
        let core = testing::core_with_parts(
            Arc::new(testing::CountingGenerator::ok()),
            Arc::new(testing::RunningSource),
        );
        core.spawn_background().unwrap();

        assert!(core.tracker.track("job-9"));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(record) = core.notifications.get("job-9") {
                assert_eq!(record.state, JobState::Running);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "notification never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        core.stop_background();
    }

    #[tokio::test]
    async fn spawn_background_is_idempotent() {
        let core = testing::core();
        core.spawn_background().unwrap();
        core.spawn_background().unwrap();
        assert_eq!(core.background.lock().unwrap().len(), 2);
        core.stop_background();
        assert!(core.background.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweeper_expires_terminal_notifications() {
        let mut config = testing::config();
        config.notification_ttl = Duration::from_millis(0);
        let engine = SlotFillingEngine::new(
            Arc::new(FlowRegistry::with_builtin_flows()),
            EngineConfig::from(&config),
        );
        let core = CoreState::with_components(
            config,
            engine,
            Arc::new(testing::CountingGenerator::ok()),
            Arc::new(testing::QuietSource),
        );
        core.notifications
            .apply(NotificationInput::Status(JobStatus::failed("job-1", "boom")));
        assert_eq!(core.notifications.visible().len(), 1);

        core.spawn_background().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(core.notifications.visible().is_empty());
        core.stop_background();
    }
}
