//! Model-backed extraction fallback.
//!
//! Consulted only after the deterministic parser misses, and only when both
//! the flow and the configuration allow it. The model is asked to rewrite
//! the user's text as canonical values; its answer is fed back through the
//! deterministic parser and validator, so a model can never set a value the
//! stage would not accept from the user directly.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::FallbackError;
use super::parser::{resolve_limit, ParseContext};
use super::registry::{ParseRule, StageDescriptor, Validator};

/// Answer the model gives when nothing in the text fits.
const NO_VALUE: &str = "NONE";

const SYSTEM_PROMPT: &str = "You extract one form field from a short chat message. \
Reply with the extracted value only, no explanation. \
If the message does not contain a usable value, reply NONE.";

/// What the fallback is asked to do for one stage.
#[derive(Debug, Clone)]
pub struct FallbackRequest<'a> {
    pub flow_id: &'a str,
    pub stage: &'a StageDescriptor,
    pub text: &'a str,
    pub instruction: String,
}

impl<'a> FallbackRequest<'a> {
    pub fn new(
        flow_id: &'a str,
        stage: &'a StageDescriptor,
        text: &'a str,
        ctx: &ParseContext,
    ) -> Self {
        Self {
            flow_id,
            stage,
            text,
            instruction: instruction_for(stage, ctx),
        }
    }
}

/// Turns free text into canonical text the deterministic parser accepts.
#[async_trait]
pub trait ExtractionFallback: Send + Sync {
    async fn extract(&self, request: &FallbackRequest<'_>) -> Result<String, FallbackError>;
}

/// Describe the expected answer for a stage in plain words.
pub fn instruction_for(stage: &StageDescriptor, ctx: &ParseContext) -> String {
    match &stage.rule {
        ParseRule::Choices {
            options, multiple, ..
        } => {
            let values: Vec<&str> = options.iter().map(|o| o.value.as_str()).collect();
            if *multiple {
                format!(
                    "Field \"{}\": list every matching value from [{}], comma separated.",
                    stage.slot,
                    values.join(", ")
                )
            } else {
                format!(
                    "Field \"{}\": pick exactly one value from [{}].",
                    stage.slot,
                    values.join(", ")
                )
            }
        }
        ParseRule::Count { .. } => {
            let (min, max) = match stage.validator {
                Validator::Range { min, max } => (min, resolve_limit(max, ctx)),
                _ => (1, ctx.max_questions),
            };
            format!(
                "Field \"{}\": the number requested, written as digits between {min} and {max}.",
                stage.slot
            )
        }
        ParseRule::FreeText => format!(
            "Field \"{}\": the user's request restated in a short phrase.",
            stage.slot
        ),
    }
}

/// Strip quoting and reject the explicit no-value answer.
pub fn clean_answer(raw: &str) -> Result<String, FallbackError> {
    let cleaned = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case(NO_VALUE) {
        return Err(FallbackError::Unparseable(raw.trim().to_string()));
    }
    Ok(cleaned.to_string())
}

// ═══════════════════════════════════════════
// Ollama
// ═══════════════════════════════════════════

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Fallback backed by a local Ollama `/api/generate` endpoint.
pub struct OllamaExtractionFallback {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OllamaExtractionFallback {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, FallbackError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FallbackError::HttpClient(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout,
        })
    }
}

#[async_trait]
impl ExtractionFallback for OllamaExtractionFallback {
    async fn extract(&self, request: &FallbackRequest<'_>) -> Result<String, FallbackError> {
        let url = format!("{}/api/generate", self.base_url);
        let prompt = format!("{}\nMessage: {}", request.instruction, request.text);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            system: SYSTEM_PROMPT,
            stream: false,
        };

        let send = self.client.post(&url).json(&body).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| FallbackError::Timeout)?
            .map_err(|e| {
                if e.is_connect() {
                    FallbackError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    FallbackError::Timeout
                } else {
                    FallbackError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FallbackError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| FallbackError::Unparseable(e.to_string()))?;

        tracing::debug!(
            flow_id = request.flow_id,
            stage = %request.stage.id,
            "Extraction fallback answered"
        );
        clean_answer(&parsed.response)
    }
}

/// Fallback returning a fixed answer, for tests and offline runs.
pub struct StaticFallback {
    answer: Result<String, String>,
}

impl StaticFallback {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Ok(answer.to_string()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            answer: Err(reason.to_string()),
        }
    }
}

#[async_trait]
impl ExtractionFallback for StaticFallback {
    async fn extract(&self, _request: &FallbackRequest<'_>) -> Result<String, FallbackError> {
        match &self.answer {
            Ok(answer) => clean_answer(answer),
            Err(reason) => Err(FallbackError::Connection(reason.clone())),
        }
    }
}
