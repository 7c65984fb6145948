//! Job Progress Tracker: one background task per job, independent of any UI.
//!
//! Each tracked job runs the same sequence:
//! 1. open the push stream; on disconnect reconnect with backoff + jitter
//! 2. after `max_retries` failed (re)connects, poll every `poll_interval`
//! 3. after `max_poll_failures` consecutive poll errors, synthesise Failed
//!
//! Every status passes through the job's `MonotonicGate` before it is
//! recorded or published, so subscribers never see a state regress and
//! never see a terminal state twice. A Completed status without a session
//! id triggers exactly one `lookup_session` call before it is published.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::client::{StatusSource, StatusStream};
use super::normalize::normalize;
use super::types::{JobRecord, JobState, JobStatus, TrackerEvent, TrackingChannel};
use crate::config::QuizflowConfig;

/// Synthesised error detail when the generator stops answering polls.
pub const LOST_CONTACT: &str = "lost contact with generator";

const EVENT_CAPACITY: usize = 256;

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

/// Backoff between stream reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectionPolicy {
    /// Initial delay before first reconnection attempt (ms).
    pub initial_delay_ms: u32,
    /// Maximum delay cap (ms).
    pub max_delay_ms: u32,
    /// Reconnection attempts before degrading to polling.
    pub max_retries: u32,
    /// Maximum random jitter added to each delay (ms).
    pub jitter_ms: u32,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 3,
            jitter_ms: 500,
        }
    }
}

impl ReconnectionPolicy {
    /// Delay before reconnection attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = u64::from(self.initial_delay_ms)
            .saturating_mul(1u64 << attempt.min(16))
            .min(u64::from(self.max_delay_ms));
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=u64::from(self.jitter_ms))
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub reconnect: ReconnectionPolicy,
    pub poll_interval: Duration,
    pub stale_after: Duration,
    pub max_poll_failures: u32,
}

impl From<&QuizflowConfig> for TrackerConfig {
    fn from(config: &QuizflowConfig) -> Self {
        Self {
            reconnect: ReconnectionPolicy {
                max_retries: config.max_stream_retries,
                ..ReconnectionPolicy::default()
            },
            poll_interval: config.poll_interval,
            stale_after: config.stale_after,
            max_poll_failures: config.max_poll_failures,
        }
    }
}

// ═══════════════════════════════════════════
// Monotonic gate
// ═══════════════════════════════════════════

/// Per-job filter that enforces monotonic, idempotent delivery.
#[derive(Debug, Clone, Default)]
pub struct MonotonicGate {
    last: Option<JobStatus>,
}

impl MonotonicGate {
    /// Returns the status to publish, or `None` when it must be dropped.
    ///
    /// Dropped: anything after a terminal state, any lower-ranked state, and
    /// repeats that change nothing. Within one state, progress never goes
    /// backwards and a missing stage label keeps the previous one.
    pub fn admit(&mut self, mut incoming: JobStatus) -> Option<JobStatus> {
        if let Some(last) = &self.last {
            if last.state.is_terminal() || incoming.state.rank() < last.state.rank() {
                return None;
            }
            if incoming.state == last.state {
                incoming.progress_percent = match (incoming.progress_percent, last.progress_percent) {
                    (Some(new), Some(old)) => Some(new.max(old)),
                    (new, old) => new.or(old),
                };
                if incoming.stage_label.is_none() {
                    incoming.stage_label = last.stage_label.clone();
                }
                if &incoming == last {
                    return None;
                }
            }
        }
        self.last = Some(incoming.clone());
        Some(incoming)
    }

    pub fn is_terminal(&self) -> bool {
        self.last.as_ref().is_some_and(|s| s.state.is_terminal())
    }

    /// Replace the admitted status after enrichment (session lookup).
    fn settle(&mut self, status: JobStatus) {
        self.last = Some(status);
    }
}

// ═══════════════════════════════════════════
// Tracker
// ═══════════════════════════════════════════

struct JobEntry {
    record: JobRecord,
    gate: MonotonicGate,
}

struct TrackerInner {
    source: Arc<dyn StatusSource>,
    config: TrackerConfig,
    jobs: RwLock<HashMap<String, JobEntry>>,
    events: broadcast::Sender<TrackerEvent>,
}

/// Silence bookkeeping for stall detection.
struct Liveness {
    last_change: Instant,
    stalled: bool,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_change: Instant::now(),
            stalled: false,
        }
    }

    /// Restart the silence clock.
    fn rearm(&mut self) {
        self.last_change = Instant::now();
    }
}

enum Applied {
    Dropped,
    Delivered,
    Terminal,
}

#[derive(Clone)]
pub struct JobProgressTracker {
    inner: Arc<TrackerInner>,
}

impl JobProgressTracker {
    pub fn new(source: Arc<dyn StatusSource>, config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(TrackerInner {
                source,
                config,
                jobs: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Start tracking `job_id` if it is not tracked yet. Returns false when
    /// a task already exists.
    pub fn track(&self, job_id: &str) -> bool {
        {
            let Ok(mut jobs) = self.inner.jobs.write() else {
                tracing::error!(job_id, "Tracker lock poisoned");
                return false;
            };
            if jobs.contains_key(job_id) {
                return false;
            }
            jobs.insert(
                job_id.to_string(),
                JobEntry {
                    record: JobRecord::new(job_id),
                    gate: MonotonicGate::default(),
                },
            );
        }

        tracing::info!(job_id, "Tracking job");
        let inner = self.inner.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move { inner.run(job_id).await });
        true
    }

    /// Stream of statuses for one job, ending after its terminal status.
    ///
    /// A late subscriber first receives the latest known status.
    pub fn subscribe(&self, job_id: &str) -> BoxStream<'static, JobStatus> {
        let rx = self.inner.events.subscribe();
        self.track(job_id);

        let current = self.status(job_id).filter(|s| self.has_observed(&s.job_id));
        let mut gate = MonotonicGate::default();
        if let Some(status) = &current {
            gate.admit(status.clone());
        }
        let head = stream::iter(current);

        // Events buffered in `rx` may predate the head; the local gate drops them.
        let tail = stream::unfold((rx, job_id.to_string(), gate), |(mut rx, job_id, mut gate)| async move {
            if gate.is_terminal() {
                return None;
            }
            loop {
                match rx.recv().await {
                    Ok(TrackerEvent::Status(status)) if status.job_id == job_id => {
                        if let Some(status) = gate.admit(status) {
                            return Some((status, (rx, job_id, gate)));
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(job_id = %job_id, skipped = n, "Subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        head.chain(tail).boxed()
    }

    /// Every status and stall signal, for all jobs.
    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    pub fn record(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.inner.jobs.read().ok()?;
        jobs.get(job_id).map(|e| e.record.clone())
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.record(job_id).map(|r| r.status)
    }

    pub fn records(&self) -> Vec<JobRecord> {
        let Ok(jobs) = self.inner.jobs.read() else {
            return Vec::new();
        };
        let mut records: Vec<JobRecord> = jobs.values().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Drop terminal records last updated before `cutoff`.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let Ok(mut jobs) = self.inner.jobs.write() else {
            return 0;
        };
        let before = jobs.len();
        jobs.retain(|_, e| !(e.gate.is_terminal() && e.record.updated_at < cutoff));
        before - jobs.len()
    }

    /// True once the gate has admitted at least one upstream status.
    fn has_observed(&self, job_id: &str) -> bool {
        self.inner
            .jobs
            .read()
            .ok()
            .and_then(|jobs| jobs.get(job_id).map(|e| e.gate.last.is_some()))
            .unwrap_or(false)
    }
}

impl TrackerInner {
    async fn run(&self, job_id: String) {
        let mut liveness = Liveness::new();
        let policy = self.config.reconnect;
        let mut failures = 0u32;

        loop {
            match self.source.open_stream(&job_id).await {
                Ok(stream) => {
                    tracing::debug!(job_id = %job_id, "Progress stream open");
                    let (terminal, delivered) = self.consume(&job_id, stream, &mut liveness).await;
                    if terminal {
                        self.finish(&job_id);
                        return;
                    }
                    if delivered {
                        failures = 0;
                    }
                    tracing::warn!(job_id = %job_id, "Progress stream dropped");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Progress stream unavailable");
                }
            }

            if failures >= policy.max_retries {
                break;
            }
            let delay = policy.delay(failures);
            failures += 1;
            tracing::debug!(job_id = %job_id, attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;
        }

        tracing::info!(job_id = %job_id, "Degrading to polling");
        self.set_channel(&job_id, TrackingChannel::Polling);
        self.poll_until_terminal(&job_id, &mut liveness).await;
        self.finish(&job_id);
    }

    /// Read the stream until it ends. Returns (terminal reached, any status delivered).
    async fn consume(
        &self,
        job_id: &str,
        mut stream: StatusStream,
        liveness: &mut Liveness,
    ) -> (bool, bool) {
        let mut delivered = false;
        loop {
            let wait = if liveness.stalled {
                self.config.stale_after
            } else {
                self.config
                    .stale_after
                    .saturating_sub(liveness.last_change.elapsed())
                    .max(Duration::from_millis(1))
            };

            match tokio::time::timeout(wait, stream.next()).await {
                Ok(Some(Ok(raw))) => match normalize(job_id, &raw) {
                    Ok(status) => match self.apply(job_id, status, liveness).await {
                        Applied::Terminal => return (true, true),
                        Applied::Delivered => delivered = true,
                        // A repeated frame still proves the generator is alive
                        Applied::Dropped if !liveness.stalled => liveness.rearm(),
                        Applied::Dropped => {}
                    },
                    Err(e) => tracing::warn!(job_id, error = %e, "Ignoring undecodable status"),
                },
                Ok(Some(Err(e))) => {
                    tracing::warn!(job_id, error = %e, "Progress stream error");
                    return (false, delivered);
                }
                Ok(None) => return (false, delivered),
                Err(_) => self.check_stall(job_id, liveness),
            }
        }
    }

    async fn poll_until_terminal(&self, job_id: &str, liveness: &mut Liveness) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            ticker.tick().await;
            match self.source.poll(job_id).await {
                Ok(raw) => {
                    failures = 0;
                    match normalize(job_id, &raw) {
                        Ok(status) => match self.apply(job_id, status, liveness).await {
                            Applied::Terminal => return,
                            Applied::Delivered => {}
                            Applied::Dropped => self.check_stall(job_id, liveness),
                        },
                        Err(e) => tracing::warn!(job_id, error = %e, "Ignoring undecodable poll result"),
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(job_id, error = %e, failures, "Status poll failed");
                    if failures >= self.config.max_poll_failures {
                        tracing::error!(job_id, "Giving up on job after repeated poll failures");
                        let failed = JobStatus::failed(job_id, LOST_CONTACT);
                        if let Applied::Terminal = self.apply(job_id, failed, liveness).await {
                            return;
                        }
                    }
                    self.check_stall(job_id, liveness);
                }
            }
            if self.is_terminal(job_id) {
                return;
            }
        }
    }

    /// Gate, enrich, record and publish one status.
    async fn apply(&self, job_id: &str, status: JobStatus, liveness: &mut Liveness) -> Applied {
        let admitted = {
            let Ok(mut jobs) = self.jobs.write() else {
                return Applied::Dropped;
            };
            let Some(entry) = jobs.get_mut(job_id) else {
                return Applied::Dropped;
            };
            entry.gate.admit(status)
        };
        let Some(mut status) = admitted else {
            tracing::debug!(job_id, "Status dropped by monotonic gate");
            return Applied::Dropped;
        };

        if status.state == JobState::Completed && status.result_session_id.is_none() {
            match self.source.lookup_session(job_id).await {
                Ok(Some(session_id)) => status.result_session_id = Some(session_id),
                Ok(None) => tracing::warn!(job_id, "Completed job has no quiz session yet"),
                Err(e) => tracing::warn!(job_id, error = %e, "Session lookup failed"),
            }
        }

        {
            let Ok(mut jobs) = self.jobs.write() else {
                return Applied::Dropped;
            };
            if let Some(entry) = jobs.get_mut(job_id) {
                entry.gate.settle(status.clone());
                entry.record.status = status.clone();
                entry.record.stalled = false;
                entry.record.updated_at = Utc::now();
            }
        }

        liveness.rearm();
        liveness.stalled = false;
        tracing::info!(
            job_id,
            state = %status.state,
            progress = ?status.progress_percent,
            "Job status"
        );

        let terminal = status.state.is_terminal();
        let _ = self.events.send(TrackerEvent::Status(status));
        if terminal {
            Applied::Terminal
        } else {
            Applied::Delivered
        }
    }

    /// Emit Stalled once per silent period while Running.
    fn check_stall(&self, job_id: &str, liveness: &mut Liveness) {
        let silent_for = liveness.last_change.elapsed();
        if liveness.stalled || silent_for < self.config.stale_after {
            return;
        }
        let running = {
            let Ok(mut jobs) = self.jobs.write() else {
                return;
            };
            match jobs.get_mut(job_id) {
                Some(entry) if entry.record.status.state == JobState::Running => {
                    entry.record.stalled = true;
                    true
                }
                _ => false,
            }
        };
        if !running {
            // Only Running jobs stall; wait another full period before rechecking
            liveness.rearm();
            return;
        }
        liveness.stalled = true;
        tracing::warn!(job_id, silent_secs = silent_for.as_secs(), "Job appears stalled");
        let _ = self.events.send(TrackerEvent::Stalled {
            job_id: job_id.to_string(),
            silent_for_secs: silent_for.as_secs(),
        });
    }

    fn is_terminal(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .ok()
            .and_then(|jobs| jobs.get(job_id).map(|e| e.gate.is_terminal()))
            .unwrap_or(true)
    }

    fn set_channel(&self, job_id: &str, channel: TrackingChannel) {
        if let Ok(mut jobs) = self.jobs.write() {
            if let Some(entry) = jobs.get_mut(job_id) {
                entry.record.channel = channel;
            }
        }
    }

    fn finish(&self, job_id: &str) {
        self.set_channel(job_id, TrackingChannel::Finished);
        tracing::debug!(job_id, "Tracking finished");
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::jobs::error::JobError;
    use crate::jobs::types::RawStatusEvent;

    type Script = Result<Vec<Result<RawStatusEvent, JobError>>, JobError>;

    /// Scripted status source. Each `open_stream` pops one script; when
    /// `hang` is set the stream stays open after its events.
    #[derive(Default)]
    struct MockSource {
        streams: Mutex<VecDeque<Script>>,
        polls: Mutex<VecDeque<Result<RawStatusEvent, JobError>>>,
        session: Option<String>,
        hang: bool,
        opens: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl MockSource {
        fn streams(scripts: Vec<Script>) -> Self {
            Self {
                streams: Mutex::new(scripts.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl StatusSource for MockSource {
        async fn open_stream(&self, _job_id: &str) -> Result<StatusStream, JobError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let script = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(JobError::Stream("unavailable".into())))?;
            let events = stream::iter(script);
            if self.hang {
                Ok(events.chain(stream::pending()).boxed())
            } else {
                Ok(events.boxed())
            }
        }

        async fn poll(&self, _job_id: &str) -> Result<RawStatusEvent, JobError> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(JobError::Transport("refused".into())))
        }

        async fn lookup_session(&self, _job_id: &str) -> Result<Option<String>, JobError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.session.clone())
        }
    }

    fn ev(event: &str, payload: serde_json::Value) -> Result<RawStatusEvent, JobError> {
        Ok(RawStatusEvent::named(event, payload))
    }

    fn fast_config() -> TrackerConfig {
        TrackerConfig {
            reconnect: ReconnectionPolicy {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                max_retries: 2,
                jitter_ms: 0,
            },
            poll_interval: Duration::from_millis(5),
            stale_after: Duration::from_secs(30),
            max_poll_failures: 3,
        }
    }

    async fn collect(tracker: &JobProgressTracker, job_id: &str) -> Vec<JobStatus> {
        tokio::time::timeout(Duration::from_secs(5), tracker.subscribe(job_id).collect::<Vec<_>>())
            .await
            .expect("subscription did not finish")
    }

    fn states(statuses: &[JobStatus]) -> Vec<JobState> {
        statuses.iter().map(|s| s.state).collect()
    }

    #[test]
    fn gate_drops_regressions_and_repeats() {
        let mut gate = MonotonicGate::default();
        let running = |p: u8| JobStatus {
            progress_percent: Some(p),
            ..JobStatus::new("j", JobState::Running)
        };

        assert!(gate.admit(JobStatus::new("j", JobState::Queued)).is_some());
        assert!(gate.admit(JobStatus::new("j", JobState::Queued)).is_none());
        assert_eq!(gate.admit(running(40)).unwrap().progress_percent, Some(40));
        // Lower progress in the same state folds into the previous value
        assert!(gate.admit(running(20)).is_none());
        assert!(gate.admit(JobStatus::new("j", JobState::Queued)).is_none());
        assert!(gate.admit(JobStatus::new("j", JobState::Completed)).is_some());
        assert!(gate.admit(JobStatus::new("j", JobState::Completed)).is_none());
        assert!(gate.admit(running(90)).is_none());
        assert!(gate.admit(JobStatus::failed("j", "late")).is_none());
        assert!(gate.is_terminal());
    }

    #[test]
    fn gate_keeps_stage_label() {
        let mut gate = MonotonicGate::default();
        let mut first = JobStatus::new("j", JobState::Running);
        first.stage_label = Some("Drafting".into());
        gate.admit(first);
        let mut next = JobStatus::new("j", JobState::Running);
        next.progress_percent = Some(10);
        assert_eq!(gate.admit(next).unwrap().stage_label.as_deref(), Some("Drafting"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectionPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            max_retries: 5,
            jitter_ms: 0,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_millis(1_000));
    }

    #[test]
    fn backoff_jitter_bounded() {
        let policy = ReconnectionPolicy::default();
        for _ in 0..20 {
            let d = policy.delay(0);
            assert!(d >= Duration::from_millis(1_000) && d <= Duration::from_millis(1_500));
        }
    }

    #[tokio::test]
    async fn stream_delivery_is_monotonic() {
        let source = Arc::new(MockSource::streams(vec![Ok(vec![
            ev("queued", json!({"v": 1, "jobId": "j1"})),
            ev("queued", json!({"v": 1, "jobId": "j1"})),
            ev("running", json!({"progress": 40})),
            ev("queued", json!({})),
            ev("running", json!({"progress": 20})),
            ev("completed", json!({"sessionId": "s-1", "quizId": "q-1"})),
            ev("running", json!({"progress": 99})),
            ev("completed", json!({"sessionId": "s-1"})),
        ])]));
        let tracker = JobProgressTracker::new(source.clone(), fast_config());

        let seen = collect(&tracker, "j1").await;
        assert_eq!(states(&seen), vec![JobState::Queued, JobState::Running, JobState::Completed]);
        assert_eq!(seen[1].progress_percent, Some(40));
        assert_eq!(seen[2].result_session_id.as_deref(), Some("s-1"));
        assert_eq!(source.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn completed_without_session_looks_up_once() {
        let source = Arc::new(MockSource {
            session: Some("s-late".into()),
            ..MockSource::streams(vec![Ok(vec![
                ev("running", json!({})),
                ev("completed", json!({"quizId": "q-9"})),
                ev("completed", json!({})),
            ])])
        });
        let tracker = JobProgressTracker::new(source.clone(), fast_config());

        let seen = collect(&tracker, "j1").await;
        let done = seen.last().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result_session_id.as_deref(), Some("s-late"));
        assert_eq!(done.result_quiz_id.as_deref(), Some("q-9"));
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconnect_does_not_redeliver() {
        let source = Arc::new(MockSource::streams(vec![
            Ok(vec![
                ev("queued", json!({})),
                ev("running", json!({"progress": 30})),
                Err(JobError::Stream("reset".into())),
            ]),
            Ok(vec![
                ev("running", json!({"progress": 30})),
                ev("running", json!({"progress": 60})),
                ev("failed", json!({"error": "model crashed"})),
            ]),
        ]));
        let tracker = JobProgressTracker::new(source.clone(), fast_config());

        let seen = collect(&tracker, "j1").await;
        let progress: Vec<Option<u8>> = seen.iter().map(|s| s.progress_percent).collect();
        assert_eq!(progress, vec![None, Some(30), Some(60), None]);
        assert_eq!(seen[3].error_detail.as_deref(), Some("model crashed"));
        assert_eq!(source.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_stream_degrades_to_polling() {
        let source = Arc::new(MockSource {
            polls: Mutex::new(
                vec![
                    Ok(RawStatusEvent::flat(json!({"state": "running", "progress": "50%"}))),
                    Ok(RawStatusEvent::flat(json!({"state": "running", "progress": "50%"}))),
                    Ok(RawStatusEvent::flat(json!({"state": "completed", "session_id": "s-2"}))),
                ]
                .into(),
            ),
            ..MockSource::default()
        });
        let tracker = JobProgressTracker::new(source.clone(), fast_config());

        let seen = collect(&tracker, "j1").await;
        assert_eq!(states(&seen), vec![JobState::Running, JobState::Completed]);
        // One initial attempt plus max_retries reconnects
        assert_eq!(source.opens.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.record("j1").unwrap().channel, TrackingChannel::Finished);
    }

    #[tokio::test]
    async fn repeated_poll_failures_synthesise_failed() {
        let source = Arc::new(MockSource::default());
        let tracker = JobProgressTracker::new(source, fast_config());

        let seen = collect(&tracker, "j1").await;
        assert_eq!(states(&seen), vec![JobState::Failed]);
        assert_eq!(seen[0].error_detail.as_deref(), Some(LOST_CONTACT));
    }

    #[tokio::test]
    async fn silent_running_job_reports_stall_once() {
        let source = Arc::new(MockSource {
            hang: true,
            ..MockSource::streams(vec![Ok(vec![ev("running", json!({"progress": 10}))])])
        });
        let config = TrackerConfig {
            stale_after: Duration::from_millis(40),
            ..fast_config()
        };
        let tracker = JobProgressTracker::new(source, config);
        let mut events = tracker.events();
        tracker.track("j1");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut stalls = 0;
        let mut statuses = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                TrackerEvent::Stalled { job_id, .. } => {
                    assert_eq!(job_id, "j1");
                    stalls += 1;
                }
                TrackerEvent::Status(_) => statuses += 1,
            }
        }
        assert_eq!(statuses, 1);
        assert_eq!(stalls, 1);
        let record = tracker.record("j1").unwrap();
        assert!(record.stalled);
        assert_eq!(record.status.state, JobState::Running);
    }

    /// Sends one frame, then stays open and counts how often it is polled.
    struct QuietSource {
        first: &'static str,
        polls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StatusSource for QuietSource {
        async fn open_stream(&self, _job_id: &str) -> Result<StatusStream, JobError> {
            let polls = self.polls.clone();
            let quiet = stream::poll_fn(move |_| {
                polls.fetch_add(1, Ordering::SeqCst);
                std::task::Poll::Pending
            });
            Ok(stream::iter(vec![ev(self.first, json!({}))]).chain(quiet).boxed())
        }

        async fn poll(&self, _job_id: &str) -> Result<RawStatusEvent, JobError> {
            Err(JobError::Transport("refused".into()))
        }

        async fn lookup_session(&self, _job_id: &str) -> Result<Option<String>, JobError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn silent_queued_job_waits_full_periods() {
        let polls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(QuietSource {
            first: "queued",
            polls: polls.clone(),
        });
        let config = TrackerConfig {
            stale_after: Duration::from_millis(100),
            ..fast_config()
        };
        let tracker = JobProgressTracker::new(source, config);
        let mut events = tracker.events();
        tracker.track("j1");

        // Past the first staleness window
        tokio::time::sleep(Duration::from_millis(150)).await;
        let before = polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        let during = polls.load(Ordering::SeqCst) - before;
        // Two polls per staleness window at most: arm, then timer fire
        assert!(during <= 12, "stream polled {during} times while idle");

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, TrackerEvent::Stalled { .. }));
        }
        let record = tracker.record("j1").unwrap();
        assert_eq!(record.status.state, JobState::Queued);
        assert!(!record.stalled);
    }

    #[tokio::test]
    async fn repeated_running_frames_keep_job_alive() {
        let heartbeats = stream::unfold((), |_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((ev("running", json!({"progress": 10})), ()))
        });
        let tracker = JobProgressTracker::new(
            Arc::new(HeartbeatSource(Mutex::new(Some(
                stream::iter(vec![ev("running", json!({"progress": 10}))])
                    .chain(heartbeats)
                    .boxed(),
            )))),
            TrackerConfig {
                stale_after: Duration::from_millis(60),
                ..fast_config()
            },
        );
        let mut events = tracker.events();
        tracker.track("j1");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut statuses = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                TrackerEvent::Status(_) => statuses += 1,
                TrackerEvent::Stalled { .. } => panic!("job with live heartbeats flagged stalled"),
            }
        }
        assert_eq!(statuses, 1);
        assert!(!tracker.record("j1").unwrap().stalled);
    }

    /// Hands out one prepared stream.
    struct HeartbeatSource(Mutex<Option<StatusStream>>);

    #[async_trait]
    impl StatusSource for HeartbeatSource {
        async fn open_stream(&self, _job_id: &str) -> Result<StatusStream, JobError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| JobError::Stream("unavailable".into()))
        }

        async fn poll(&self, _job_id: &str) -> Result<RawStatusEvent, JobError> {
            Err(JobError::Transport("refused".into()))
        }

        async fn lookup_session(&self, _job_id: &str) -> Result<Option<String>, JobError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_terminal_once() {
        let source = Arc::new(MockSource::streams(vec![Ok(vec![ev(
            "completed",
            json!({"sessionId": "s-1"}),
        )])]));
        let tracker = JobProgressTracker::new(source, fast_config());
        collect(&tracker, "j1").await;

        let again = collect(&tracker, "j1").await;
        assert_eq!(states(&again), vec![JobState::Completed]);
    }

    #[tokio::test]
    async fn track_is_idempotent() {
        let source = Arc::new(MockSource::default());
        let tracker = JobProgressTracker::new(source, fast_config());
        assert!(tracker.track("j1"));
        assert!(!tracker.track("j1"));
    }

    #[tokio::test]
    async fn prune_removes_only_finished_jobs() {
        let source = Arc::new(MockSource::streams(vec![Ok(vec![ev("failed", json!({}))])]));
        let tracker = JobProgressTracker::new(source, fast_config());
        collect(&tracker, "j1").await;
        assert_eq!(tracker.prune_finished(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(tracker.prune_finished(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(tracker.record("j1").is_none());
    }
}
