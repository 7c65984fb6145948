//! Upstream payload normalisation.
//!
//! A payload tagged `"v": 1` is first decoded as the documented
//! `UpstreamPayload`. Other generators disagree on field names and value
//! types, so anything that does not decode is read from loose JSON. Both
//! paths fold into one `JobStatus`:
//! - state: frame `event`, else payload `state` / `status` / `event`
//! - progress: number, numeric string or `"40%"`, clamped to 0..=100
//! - stage: `stage` / `stageLabel` / `stage_label`
//! - session: `sessionId` / `session_id` / `result.sessionId` / `result.session_id`
//! - quiz: `quizId` / `quiz_id` / `result.quizId` / `result.quiz_id`
//! - error: string, or object with `message` / `detail`

use serde_json::Value;

use super::error::JobError;
use super::types::{JobState, JobStatus, RawStatusEvent, UpstreamPayload};

const DEFAULT_FAILURE: &str = "Quiz generation failed";

/// Parse one stream text frame. Enveloped frames carry `event` + `data`;
/// anything else is taken as a flat payload.
pub fn parse_frame(text: &str) -> Result<RawStatusEvent, JobError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| JobError::Decode(e.to_string()))?;
    let Value::Object(map) = &value else {
        return Err(JobError::Decode("frame is not a JSON object".into()));
    };

    match (map.get("event").and_then(Value::as_str), map.get("data")) {
        (Some(event), Some(data)) if data.is_object() => {
            Ok(RawStatusEvent::named(event, data.clone()))
        }
        _ => Ok(RawStatusEvent::flat(value)),
    }
}

/// Fold a raw event into a canonical status for `job_id`.
pub fn normalize(job_id: &str, raw: &RawStatusEvent) -> Result<JobStatus, JobError> {
    let payload = &raw.payload;
    if !payload.is_object() {
        return Err(JobError::Decode("payload is not a JSON object".into()));
    }

    if let Some(other) = first_str(payload, &["jobId", "job_id"]) {
        if other != job_id {
            return Err(JobError::Decode(format!(
                "payload for job {other} on stream for {job_id}"
            )));
        }
    }

    let state_name = raw
        .event
        .as_deref()
        .or_else(|| first_str(payload, &["state", "status", "event"]))
        .ok_or_else(|| JobError::Decode("no state in payload".into()))?;
    let state = JobState::parse(state_name)
        .ok_or_else(|| JobError::Decode(format!("unknown state {state_name}")))?;

    let mut status = match typed_payload(payload) {
        Some(typed) => from_typed(job_id, state, typed),
        None => from_loose(job_id, state, payload),
    };

    match state {
        JobState::Completed => {
            status.progress_percent = Some(100);
            status.error_detail = None;
        }
        JobState::Failed if status.error_detail.is_none() => {
            status.error_detail = Some(DEFAULT_FAILURE.to_string());
        }
        _ => {}
    }
    Ok(status)
}

fn typed_payload(payload: &Value) -> Option<UpstreamPayload> {
    if payload.get("v").and_then(Value::as_u64) != Some(1) {
        return None;
    }
    serde_json::from_value(payload.clone()).ok()
}

fn from_typed(job_id: &str, state: JobState, payload: UpstreamPayload) -> JobStatus {
    let mut status = JobStatus::new(job_id, state);
    status.progress_percent = payload.progress.and_then(clamp_percent);
    status.stage_label = payload.stage.and_then(non_blank);
    status.result_session_id = payload.session_id.and_then(non_blank);
    status.result_quiz_id = payload.quiz_id.and_then(non_blank);
    status.error_detail = payload.error.and_then(non_blank);
    status
}

fn from_loose(job_id: &str, state: JobState, payload: &Value) -> JobStatus {
    let result = payload.get("result");
    let nested = |keys: &[&str]| result.and_then(|r| first_str(r, keys)).map(str::to_string);

    let mut status = JobStatus::new(job_id, state);
    status.progress_percent = payload.get("progress").and_then(progress_percent);
    status.stage_label = first_str(payload, &["stage", "stageLabel", "stage_label"])
        .map(str::to_string);
    status.result_session_id = first_str(payload, &["sessionId", "session_id"])
        .map(str::to_string)
        .or_else(|| nested(&["sessionId", "session_id"]));
    status.result_quiz_id = first_str(payload, &["quizId", "quiz_id"])
        .map(str::to_string)
        .or_else(|| nested(&["quizId", "quiz_id"]));
    status.error_detail = payload.get("error").and_then(error_detail);
    status
}

fn non_blank(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn progress_percent(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    clamp_percent(raw)
}

fn clamp_percent(raw: f64) -> Option<u8> {
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(0.0, 100.0) as u8)
}

fn error_detail(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim(),
        Value::Object(_) => first_str(value, &["message", "detail", "error"])?,
        _ => return None,
    };
    (!text.is_empty()).then(|| text.to_string())
}
