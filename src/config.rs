//! Application constants and runtime configuration.
//!
//! Every tunable is read from a `QUIZFLOW_*` environment variable and falls
//! back to a default when the variable is absent or unparseable.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Quizflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on questions per quiz when nothing else is configured.
pub const DEFAULT_MAX_QUESTIONS: u32 = 50;

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "quizflow=info,tower_http=warn"
}

/// Runtime configuration shared by every subsystem.
#[derive(Debug, Clone)]
pub struct QuizflowConfig {
    /// Largest question count a user may request.
    pub max_questions: u32,
    /// Global switch for the model-backed extraction fallback.
    pub fallback_enabled: bool,
    pub ollama_url: String,
    pub ollama_model: String,
    pub fallback_timeout: Duration,
    /// Base URL of the question generator (job executor).
    pub generator_url: String,
    /// Pause before the single transparent submission retry.
    pub submit_retry_delay: Duration,
    pub poll_interval: Duration,
    /// Silence while Running after which a stalled signal is raised.
    pub stale_after: Duration,
    pub max_stream_retries: u32,
    pub max_poll_failures: u32,
    /// Delay before a terminal notification dismisses itself.
    pub notification_ttl: Duration,
    pub bind_addr: SocketAddr,
}

impl Default for QuizflowConfig {
    fn default() -> Self {
        Self {
            max_questions: DEFAULT_MAX_QUESTIONS,
            fallback_enabled: true,
            ollama_url: "http://localhost:11434".into(),
            ollama_model: "llama3.2:3b".into(),
            fallback_timeout: Duration::from_secs(20),
            generator_url: "http://localhost:8700".into(),
            submit_retry_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(3),
            stale_after: Duration::from_secs(60),
            max_stream_retries: 3,
            max_poll_failures: 10,
            notification_ttl: Duration::from_secs(8),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }
}

impl QuizflowConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (testable without
    /// touching the process environment).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let secs = |key: &str, default: Duration| {
            parse_or(&lookup, key, default.as_secs()).map_or(default, Duration::from_secs)
        };

        let max_questions = parse_or(&lookup, "QUIZFLOW_MAX_QUESTIONS", d.max_questions)
            .filter(|max| *max >= 1)
            .unwrap_or(d.max_questions);

        Self {
            max_questions,
            fallback_enabled: parse_or(&lookup, "QUIZFLOW_FALLBACK_ENABLED", d.fallback_enabled)
                .unwrap_or(d.fallback_enabled),
            ollama_url: lookup("QUIZFLOW_OLLAMA_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.ollama_url),
            ollama_model: lookup("QUIZFLOW_OLLAMA_MODEL").unwrap_or(d.ollama_model),
            fallback_timeout: secs("QUIZFLOW_FALLBACK_TIMEOUT_SECS", d.fallback_timeout),
            generator_url: lookup("QUIZFLOW_GENERATOR_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.generator_url),
            submit_retry_delay: parse_or(
                &lookup,
                "QUIZFLOW_SUBMIT_RETRY_DELAY_MS",
                d.submit_retry_delay.as_millis() as u64,
            )
            .map_or(d.submit_retry_delay, Duration::from_millis),
            poll_interval: secs("QUIZFLOW_POLL_INTERVAL_SECS", d.poll_interval),
            stale_after: secs("QUIZFLOW_STALE_AFTER_SECS", d.stale_after),
            max_stream_retries: parse_or(&lookup, "QUIZFLOW_MAX_STREAM_RETRIES", d.max_stream_retries)
                .unwrap_or(d.max_stream_retries),
            max_poll_failures: parse_or(&lookup, "QUIZFLOW_MAX_POLL_FAILURES", d.max_poll_failures)
                .unwrap_or(d.max_poll_failures),
            notification_ttl: secs("QUIZFLOW_NOTIFICATION_TTL_SECS", d.notification_ttl),
            bind_addr: parse_or(&lookup, "QUIZFLOW_BIND_ADDR", d.bind_addr).unwrap_or(d.bind_addr),
        }
    }
}

/// Parse `key` if present. A present-but-invalid value logs a warning and
/// yields `Some(default)`; an absent key yields `None`.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            Some(default)
        }
    }
}
