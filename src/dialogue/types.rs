//! Core types for the slot-filling dialogue.
//!
//! These types model one dialogue lifecycle:
//! start → ingest (per stage) → awaiting confirmation → Start | Edit.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = String;

// ═══════════════════════════════════════════
// Slots
// ═══════════════════════════════════════════

/// Integer slot value together with the bounds it was validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedInt {
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

/// Typed value held by a filled slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Text(String),
    TextSet(Vec<String>),
    Integer(BoundedInt),
}

impl SlotValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[String]> {
        match self {
            Self::TextSet(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<u32> {
        match self {
            Self::Integer(b) => Some(b.value),
            _ => None,
        }
    }
}

/// Filled slots keyed by slot name. Ordered so summaries are stable.
pub type SlotMap = BTreeMap<String, SlotValue>;

/// One declared slot of a flow, filled or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub name: String,
    pub value: Option<SlotValue>,
}

impl Slot {
    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

// ═══════════════════════════════════════════
// Session
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    AwaitingConfirmation,
    Completed,
}

/// Who started a flow and what material it runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartContext {
    pub user_id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub doc_ids: Vec<String>,
}

/// One live dialogue. Owned by the engine's session arena.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub flow_id: String,
    pub context: StartContext,
    pub current_stage: String,
    pub slots: SlotMap,
    pub status: SessionStatus,
    /// Summary computed when the final stage resolved; cleared on Edit.
    pub pending_summary: Option<Prompt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only view of a session for reconnecting clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub flow_id: String,
    pub stage: String,
    pub status: SessionStatus,
    pub slots: Vec<Slot>,
    pub pending_summary: Option<Prompt>,
}

// ═══════════════════════════════════════════
// Prompts and replies
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Greeting,
    Question,
    Clarification,
    Summary,
}

/// Explicit action offered on the confirmation summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmAction {
    Start,
    Edit,
}

/// A message the dialogue shows to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ConfirmAction>,
}

impl Prompt {
    pub fn new(kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            quick_replies: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_quick_replies(mut self, replies: Vec<String>) -> Self {
        self.quick_replies = replies;
        self
    }

    pub fn with_actions(mut self, actions: Vec<ConfirmAction>) -> Self {
        self.actions = actions;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReply {
    pub session_id: SessionId,
    pub stage: String,
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReply {
    pub prompts: Vec<Prompt>,
    pub stage: String,
    pub status: SessionStatus,
    /// True once every stage is resolved and the session awaits confirmation.
    pub done: bool,
}

/// Emitted when a user presses Start on the confirmation summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCompleted {
    pub session_id: SessionId,
    pub flow_id: String,
    pub context: StartContext,
    pub slots: SlotMap,
    pub completed_at: DateTime<Utc>,
}

/// Result of `confirm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Completed { event: FlowCompleted },
    Editing { stage: String, prompts: Vec<Prompt> },
}
