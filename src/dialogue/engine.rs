//! Slot-Filling Engine: drives sessions through their flow's stages.
//!
//! Sessions live in an arena keyed by id. Each session sits behind its own
//! `tokio::sync::Mutex`, so a second `ingest` for the same session waits for
//! the first to finish (FIFO) instead of interleaving. Slot mutation happens
//! only while that lock is held.
//!
//! Lifecycle:
//! `start` → `ingest`* → AwaitingConfirmation → `confirm(Start)` → Completed
//!                                            ↘ `confirm(Edit)` → first stage

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::error::DialogueError;
use super::fallback::{ExtractionFallback, FallbackRequest};
use super::parser::{self, ParseContext};
use super::registry::{
    FlowDefinition, FlowRegistry, ParseRule, StageDescriptor, COMPLETED_STAGE,
    CONFIRMATION_STAGE, QUIZ_SETUP,
};
use super::types::{
    ConfirmAction, ConfirmOutcome, FlowCompleted, IngestReply, Prompt, PromptKind, Session,
    SessionId, SessionSnapshot, SessionStatus, Slot, SlotMap, SlotValue, StartContext,
    StartReply,
};
use crate::config::QuizflowConfig;
use crate::quiz::{distribute, QuizParameters};

/// Engine knobs taken from `QuizflowConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub max_questions: u32,
    pub fallback_enabled: bool,
    pub fallback_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&QuizflowConfig::default())
    }
}

impl From<&QuizflowConfig> for EngineConfig {
    fn from(config: &QuizflowConfig) -> Self {
        Self {
            max_questions: config.max_questions,
            fallback_enabled: config.fallback_enabled,
            fallback_timeout: config.fallback_timeout,
        }
    }
}

type SessionHandle = Arc<tokio::sync::Mutex<Session>>;

#[derive(Default)]
struct Arena {
    sessions: HashMap<SessionId, SessionHandle>,
    /// One active session per user.
    active_by_user: HashMap<String, SessionId>,
}

pub struct SlotFillingEngine {
    registry: Arc<FlowRegistry>,
    fallback: Option<Arc<dyn ExtractionFallback>>,
    config: EngineConfig,
    arena: Mutex<Arena>,
}

impl SlotFillingEngine {
    pub fn new(registry: Arc<FlowRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            fallback: None,
            config,
            arena: Mutex::new(Arena::default()),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ExtractionFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn parse_context(&self) -> ParseContext {
        ParseContext {
            max_questions: self.config.max_questions,
        }
    }

    // ───────────────────────────────────────
    // Operations
    // ───────────────────────────────────────

    /// Create a session at the flow's first stage. Any unfinished session of
    /// the same user is discarded.
    pub fn start(&self, flow_id: &str, context: StartContext) -> Result<StartReply, DialogueError> {
        let flow = self.registry.lookup(flow_id)?;
        let first = flow
            .first_stage()
            .ok_or_else(|| DialogueError::InvalidFlow(flow_id.to_string()))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            flow_id: flow.id.clone(),
            context,
            current_stage: first.id.clone(),
            slots: SlotMap::new(),
            status: SessionStatus::InProgress,
            pending_summary: None,
            created_at: now,
            updated_at: now,
        };

        let prompts = vec![
            Prompt::new(PromptKind::Greeting, flow.greeting.clone()),
            self.stage_prompt(first, &session.slots, PromptKind::Question),
        ];
        let reply = StartReply {
            session_id: session.id.clone(),
            stage: first.id.clone(),
            prompts,
        };

        let mut arena = self.arena.lock().map_err(|_| DialogueError::LockPoisoned)?;
        let user_id = session.context.user_id.clone();
        if let Some(previous) = arena.active_by_user.insert(user_id, session.id.clone()) {
            if arena.sessions.remove(&previous).is_some() {
                tracing::info!(session_id = %previous, "Discarded unfinished session");
            }
        }
        tracing::info!(session_id = %session.id, flow_id = %flow.id, "Session started");
        arena
            .sessions
            .insert(session.id.clone(), Arc::new(tokio::sync::Mutex::new(session)));

        Ok(reply)
    }

    /// Feed one user message into the session's current stage.
    pub async fn ingest(&self, session_id: &str, text: &str) -> Result<IngestReply, DialogueError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock().await;
        // Replaced or completed while this call waited for the lock.
        self.ensure_live(session_id)?;

        tracing::debug!(session_id, text = %truncate(text, 80), "Ingest");

        if session.status == SessionStatus::AwaitingConfirmation {
            let prompts = session.pending_summary.clone().into_iter().collect();
            return Ok(IngestReply {
                prompts,
                stage: CONFIRMATION_STAGE.to_string(),
                status: session.status,
                done: true,
            });
        }

        let flow = self.registry.lookup(&session.flow_id)?;
        let stage = flow
            .stage(&session.current_stage)
            .ok_or_else(|| DialogueError::StageNotFound(session.current_stage.clone()))?;

        let ctx = self.parse_context();
        let value = match parser::extract(stage, text, &ctx) {
            Some(value) => Some(value),
            None => self.try_fallback(&flow, stage, text).await,
        };

        let Some(value) = value else {
            tracing::debug!(session_id, stage = %stage.id, "No value extracted, re-prompting");
            return Ok(IngestReply {
                prompts: vec![self.clarification(stage, &session.slots)],
                stage: stage.id.clone(),
                status: session.status,
                done: false,
            });
        };

        session.slots.insert(stage.slot.clone(), value);
        session.updated_at = Utc::now();

        match parser::resolve_next(&stage.next, &session.slots) {
            Some(next_id) => {
                let next = flow
                    .stage(next_id)
                    .ok_or_else(|| DialogueError::StageNotFound(next_id.to_string()))?;
                session.current_stage = next.id.clone();
                tracing::debug!(session_id, stage = %next.id, "Advanced");
                Ok(IngestReply {
                    prompts: vec![self.stage_prompt(next, &session.slots, PromptKind::Question)],
                    stage: next.id.clone(),
                    status: session.status,
                    done: false,
                })
            }
            None => {
                let summary = self.summary(&flow, &session.slots);
                session.current_stage = CONFIRMATION_STAGE.to_string();
                session.status = SessionStatus::AwaitingConfirmation;
                session.pending_summary = Some(summary.clone());
                tracing::info!(session_id, "Awaiting confirmation");
                Ok(IngestReply {
                    prompts: vec![summary],
                    stage: CONFIRMATION_STAGE.to_string(),
                    status: session.status,
                    done: true,
                })
            }
        }
    }

    /// Resolve the confirmation step.
    pub async fn confirm(
        &self,
        session_id: &str,
        action: ConfirmAction,
    ) -> Result<ConfirmOutcome, DialogueError> {
        let handle = self.handle(session_id)?;
        let mut session = handle.lock().await;
        self.ensure_live(session_id)?;

        if session.status != SessionStatus::AwaitingConfirmation {
            return Err(DialogueError::NotAwaitingConfirmation(session_id.to_string()));
        }
        let flow = self.registry.lookup(&session.flow_id)?;

        match action {
            ConfirmAction::Start => {
                check_complete(&flow, &session.slots)?;
                let now = Utc::now();
                session.status = SessionStatus::Completed;
                session.current_stage = COMPLETED_STAGE.to_string();
                session.pending_summary = None;
                session.updated_at = now;

                let event = FlowCompleted {
                    session_id: session.id.clone(),
                    flow_id: session.flow_id.clone(),
                    context: session.context.clone(),
                    slots: session.slots.clone(),
                    completed_at: now,
                };
                self.remove(&session.id, &session.context.user_id)?;
                tracing::info!(session_id, flow_id = %flow.id, "Flow completed");
                Ok(ConfirmOutcome::Completed { event })
            }
            ConfirmAction::Edit => {
                let first = flow
                    .first_stage()
                    .ok_or_else(|| DialogueError::InvalidFlow(flow.id.clone()))?;
                session.status = SessionStatus::InProgress;
                session.current_stage = first.id.clone();
                session.pending_summary = None;
                session.updated_at = Utc::now();
                tracing::info!(session_id, "Editing from first stage");
                Ok(ConfirmOutcome::Editing {
                    stage: first.id.clone(),
                    prompts: vec![self.stage_prompt(first, &session.slots, PromptKind::Question)],
                })
            }
        }
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, DialogueError> {
        let handle = self.handle(session_id)?;
        let session = handle.lock().await;
        let flow = self.registry.lookup(&session.flow_id)?;

        let mut slots: Vec<Slot> = Vec::new();
        for name in flow.slot_names() {
            if slots.iter().any(|s| s.name == name) {
                continue;
            }
            slots.push(Slot {
                name: name.to_string(),
                value: session.slots.get(name).cloned(),
            });
        }

        Ok(SessionSnapshot {
            session_id: session.id.clone(),
            flow_id: session.flow_id.clone(),
            stage: session.current_stage.clone(),
            status: session.status,
            slots,
            pending_summary: session.pending_summary.clone(),
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.arena.lock().map(|a| a.sessions.len()).unwrap_or(0)
    }

    // ───────────────────────────────────────
    // Internals
    // ───────────────────────────────────────

    fn handle(&self, session_id: &str) -> Result<SessionHandle, DialogueError> {
        let arena = self.arena.lock().map_err(|_| DialogueError::LockPoisoned)?;
        arena
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| DialogueError::SessionNotFound(session_id.to_string()))
    }

    fn ensure_live(&self, session_id: &str) -> Result<(), DialogueError> {
        let arena = self.arena.lock().map_err(|_| DialogueError::LockPoisoned)?;
        if arena.sessions.contains_key(session_id) {
            Ok(())
        } else {
            Err(DialogueError::SessionNotFound(session_id.to_string()))
        }
    }

    fn remove(&self, session_id: &str, user_id: &str) -> Result<(), DialogueError> {
        let mut arena = self.arena.lock().map_err(|_| DialogueError::LockPoisoned)?;
        arena.sessions.remove(session_id);
        if arena.active_by_user.get(user_id).is_some_and(|id| id == session_id) {
            arena.active_by_user.remove(user_id);
        }
        Ok(())
    }

    async fn try_fallback(
        &self,
        flow: &FlowDefinition,
        stage: &StageDescriptor,
        text: &str,
    ) -> Option<SlotValue> {
        if !(self.config.fallback_enabled && flow.fallback_enabled) {
            return None;
        }
        let fallback = self.fallback.as_ref()?;
        let ctx = self.parse_context();
        let request = FallbackRequest::new(&flow.id, stage, text, &ctx);

        match tokio::time::timeout(self.config.fallback_timeout, fallback.extract(&request)).await {
            Ok(Ok(canonical)) => {
                let value = parser::extract(stage, &canonical, &ctx);
                if value.is_none() {
                    tracing::debug!(stage = %stage.id, answer = %truncate(&canonical, 80), "Fallback answer rejected");
                }
                value
            }
            Ok(Err(e)) => {
                tracing::warn!(stage = %stage.id, error = %e, "Extraction fallback failed");
                None
            }
            Err(_) => {
                tracing::warn!(stage = %stage.id, "Extraction fallback timed out");
                None
            }
        }
    }

    /// Stage question, with the retained value appended after an Edit.
    fn stage_prompt(&self, stage: &StageDescriptor, slots: &SlotMap, kind: PromptKind) -> Prompt {
        let ctx = self.parse_context();
        let template = match kind {
            PromptKind::Clarification => &stage.clarification,
            _ => &stage.prompt,
        };
        let mut text = parser::render(template, stage, &ctx);
        if let Some(current) = slots.get(&stage.slot) {
            text.push_str(&format!(" Currently: {}.", display_value(stage, current)));
        }
        Prompt::new(kind, text).with_quick_replies(stage.quick_replies.clone())
    }

    fn clarification(&self, stage: &StageDescriptor, slots: &SlotMap) -> Prompt {
        self.stage_prompt(stage, slots, PromptKind::Clarification)
    }

    fn summary(&self, flow: &FlowDefinition, slots: &SlotMap) -> Prompt {
        let mut lines = vec![format!("{}:", flow.summary_title)];
        for stage in &flow.stages {
            if let Some(value) = slots.get(&stage.slot) {
                lines.push(format!("• {}: {}", title_case(&stage.slot), display_value(stage, value)));
            }
        }
        if flow.id == QUIZ_SETUP {
            if let Some(preview) = quiz_preview(slots, self.config.max_questions) {
                lines.push(preview);
            }
        }
        Prompt::new(PromptKind::Summary, lines.join("\n"))
            .with_actions(vec![ConfirmAction::Start, ConfirmAction::Edit])
    }
}

/// Every slot on the path the flow would take must be filled.
fn check_complete(flow: &FlowDefinition, slots: &SlotMap) -> Result<(), DialogueError> {
    let mut current = flow.first_stage();
    let mut steps = 0;
    while let Some(stage) = current {
        if !slots.contains_key(&stage.slot) {
            return Err(DialogueError::Incomplete(stage.slot.clone()));
        }
        steps += 1;
        if steps > flow.stages.len() {
            return Err(DialogueError::InvalidFlow(format!("{} loops", flow.id)));
        }
        current = parser::resolve_next(&stage.next, slots).and_then(|id| flow.stage(id));
    }
    Ok(())
}

/// Per-type and per-difficulty breakdown line for the quiz summary.
fn quiz_preview(slots: &SlotMap, max_questions: u32) -> Option<String> {
    let params = QuizParameters::from_slots(slots, max_questions).ok()?;
    let dist = distribute(params.count, &params.types, &params.difficulty.levels()).ok()?;
    let types: Vec<String> = dist
        .per_type
        .iter()
        .map(|t| format!("{} {}", t.question_type.label(), t.count))
        .collect();
    let levels: Vec<String> = dist
        .per_difficulty
        .iter()
        .map(|d| format!("{} {}", title_case(d.level.as_str()), d.count))
        .collect();
    Some(format!("Breakdown: {}; {}", types.join(", "), levels.join(", ")))
}

fn display_value(stage: &StageDescriptor, value: &SlotValue) -> String {
    let label = |v: &str| -> String {
        match &stage.rule {
            ParseRule::Choices { options, .. } => options
                .iter()
                .find(|o| o.value == v)
                .map(|o| o.label.clone())
                .unwrap_or_else(|| v.to_string()),
            _ => v.to_string(),
        }
    };
    match value {
        SlotValue::Text(text) => label(text),
        SlotValue::TextSet(items) => items.iter().map(|i| label(i)).collect::<Vec<_>>().join(", "),
        SlotValue::Integer(bounded) => bounded.value.to_string(),
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
