//! Flow Registry: declarative, immutable flow definitions.
//!
//! A flow is pure data: ordered stages, each naming the slot it fills, the
//! prompt template, quick replies, a parse rule, a validator and a
//! next-stage selector. The engine interprets these; nothing here runs.
//!
//! Prompt templates may use `{max}` (configured question maximum) and
//! `{options}` (labels of the stage's choices).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::error::DialogueError;
use crate::quiz::{Difficulty, QuestionType};

pub const QUIZ_SETUP: &str = "quiz_setup";
pub const DOCUMENT_SUMMARY: &str = "document_summary";
pub const HIGHLIGHTS: &str = "highlights";
pub const CONCLUSION: &str = "conclusion";

/// Pseudo-stage reported while a session awaits Start/Edit.
pub const CONFIRMATION_STAGE: &str = "awaiting_confirmation";
/// Pseudo-stage reported once a session has completed.
pub const COMPLETED_STAGE: &str = "completed";

/// Slot names used by `quiz_setup`.
pub mod slots {
    pub const TYPES: &str = "types";
    pub const DIFFICULTY: &str = "difficulty";
    pub const COUNT: &str = "count";
}

/// Stage ids used by `quiz_setup`.
pub mod stages {
    pub const COLLECTING_TYPES: &str = "collecting_types";
    pub const COLLECTING_DIFFICULTY: &str = "collecting_difficulty";
    pub const COLLECTING_COUNT: &str = "collecting_count";
}

// ═══════════════════════════════════════════
// Definition types
// ═══════════════════════════════════════════

/// One selectable value and the phrases that select it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Canonical value stored in the slot.
    pub value: String,
    /// Display label.
    pub label: String,
    /// Normalised phrases (lowercase, words separated by single spaces).
    pub synonyms: Vec<String>,
}

impl ChoiceOption {
    pub fn new(value: &str, label: &str, synonyms: &[&str]) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// How raw text is turned into a candidate value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseRule {
    /// Match options by synonym. `multiple` collects every match in text
    /// order; otherwise the earliest match wins. `all_keywords` select every
    /// option at once (multiple only).
    Choices {
        options: Vec<ChoiceOption>,
        multiple: bool,
        all_keywords: Vec<String>,
    },
    /// First integer literal in the text, or a keyword meaning the maximum.
    Count { max_keywords: Vec<String> },
    /// The trimmed text itself.
    FreeText,
}

/// Upper bound of a range validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Fixed(u32),
    /// The configured maximum number of questions.
    MaxQuestions,
}

/// Acceptance check applied after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validator {
    Accept,
    NonEmpty { max_chars: usize },
    Range { min: u32, max: Limit },
}

/// Which stage follows once this one resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStage {
    Stage(String),
    /// All stages done: compute the summary and await Start/Edit.
    Confirmation,
    /// Branch on a slot's text value.
    WhenSlotEquals {
        slot: String,
        value: String,
        then: Box<NextStage>,
        otherwise: Box<NextStage>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub id: String,
    /// Slot this stage fills.
    pub slot: String,
    pub prompt: String,
    pub clarification: String,
    pub quick_replies: Vec<String>,
    pub rule: ParseRule,
    pub validator: Validator,
    pub next: NextStage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    pub id: String,
    pub greeting: String,
    /// Heading of the confirmation summary.
    pub summary_title: String,
    pub stages: Vec<StageDescriptor>,
    /// Whether the model-backed extraction fallback may run for this flow.
    pub fallback_enabled: bool,
}

impl FlowDefinition {
    pub fn first_stage(&self) -> Option<&StageDescriptor> {
        self.stages.first()
    }

    pub fn stage(&self, id: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn slot_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.slot.as_str()).collect()
    }

    /// Structural checks run once at registration.
    fn check(&self) -> Result<(), DialogueError> {
        if self.stages.is_empty() {
            return Err(DialogueError::InvalidFlow(format!("{} has no stages", self.id)));
        }
        let mut ids = HashSet::new();
        for stage in &self.stages {
            if !ids.insert(stage.id.as_str()) {
                return Err(DialogueError::InvalidFlow(format!(
                    "{} repeats stage {}",
                    self.id, stage.id
                )));
            }
            if stage.id == CONFIRMATION_STAGE || stage.id == COMPLETED_STAGE {
                return Err(DialogueError::InvalidFlow(format!(
                    "{} uses reserved stage id {}",
                    self.id, stage.id
                )));
            }
        }
        for stage in &self.stages {
            for target in targets(&stage.next) {
                if !ids.contains(target) {
                    return Err(DialogueError::InvalidFlow(format!(
                        "{} stage {} points at unknown stage {}",
                        self.id, stage.id, target
                    )));
                }
            }
        }
        Ok(())
    }
}

fn targets(next: &NextStage) -> Vec<&str> {
    match next {
        NextStage::Stage(id) => vec![id.as_str()],
        NextStage::Confirmation => vec![],
        NextStage::WhenSlotEquals { then, otherwise, .. } => {
            let mut out = targets(then);
            out.extend(targets(otherwise));
            out
        }
    }
}

// ═══════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════

/// Holds every registered flow. Definitions never change once stored.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: RwLock<HashMap<String, Arc<FlowDefinition>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `quiz_setup` and the stub flows.
    pub fn with_builtin_flows() -> Self {
        let registry = Self::new();
        for flow in builtin_flows() {
            let id = flow.id.clone();
            if let Err(e) = registry.register(&id, flow) {
                tracing::error!(flow_id = %id, error = %e, "Built-in flow rejected");
            }
        }
        registry
    }

    pub fn register(&self, flow_id: &str, definition: FlowDefinition) -> Result<(), DialogueError> {
        if definition.id != flow_id {
            return Err(DialogueError::InvalidFlow(format!(
                "definition id {} does not match {}",
                definition.id, flow_id
            )));
        }
        definition.check()?;

        let mut flows = self.flows.write().map_err(|_| DialogueError::LockPoisoned)?;
        if flows.contains_key(flow_id) {
            return Err(DialogueError::FlowAlreadyRegistered(flow_id.to_string()));
        }
        flows.insert(flow_id.to_string(), Arc::new(definition));
        tracing::debug!(flow_id, "Flow registered");
        Ok(())
    }

    pub fn lookup(&self, flow_id: &str) -> Result<Arc<FlowDefinition>, DialogueError> {
        let flows = self.flows.read().map_err(|_| DialogueError::LockPoisoned)?;
        flows
            .get(flow_id)
            .cloned()
            .ok_or_else(|| DialogueError::FlowNotFound(flow_id.to_string()))
    }

    pub fn flow_ids(&self) -> Vec<String> {
        let Ok(flows) = self.flows.read() else {
            return Vec::new();
        };
        let mut ids: Vec<String> = flows.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ═══════════════════════════════════════════
// Built-in flows
// ═══════════════════════════════════════════

pub fn builtin_flows() -> Vec<FlowDefinition> {
    vec![
        quiz_setup_flow(),
        document_summary_flow(),
        highlights_flow(),
        conclusion_flow(),
    ]
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn question_type_option(qt: QuestionType) -> ChoiceOption {
    let synonyms: &[&str] = match qt {
        QuestionType::MultipleChoice => &[
            "mcq", "mcqs", "multiple choice", "multiple choices", "multi choice", "multichoice",
        ],
        QuestionType::TrueFalse => &[
            "true false", "true or false", "true and false", "truefalse", "t f", "tf", "boolean",
        ],
        QuestionType::FillBlank => &[
            "fill in the blank", "fill in the blanks", "fill in blank", "fill in blanks",
            "fill the blank", "fill blank", "fill blanks", "fillintheblank", "cloze", "blanks",
        ],
        QuestionType::ShortAnswer => &[
            "short answer", "short answers", "shortanswer", "open ended", "written answer",
        ],
        QuestionType::SingleChoice => &["single choice", "single answer", "one correct"],
    };
    ChoiceOption::new(qt.as_str(), qt.label(), synonyms)
}

fn difficulty_option(d: Difficulty) -> ChoiceOption {
    let (label, synonyms): (&str, &[&str]) = match d {
        Difficulty::Easy => ("Easy", &["easy", "easier", "simple", "basic", "beginner"]),
        Difficulty::Medium => (
            "Medium",
            &["medium", "moderate", "intermediate", "normal", "average"],
        ),
        Difficulty::Hard => (
            "Hard",
            &["hard", "harder", "difficult", "challenging", "advanced", "tough", "expert"],
        ),
        Difficulty::Mixed => (
            "Mixed",
            &[
                "mixed", "mix", "mixture", "varied", "variety", "random", "skip", "any",
                "no preference", "don t care", "dont care", "whatever", "doesn t matter",
            ],
        ),
    };
    ChoiceOption::new(d.as_str(), label, synonyms)
}

/// The fully specified quiz setup dialogue:
/// types → difficulty → count → confirmation.
pub fn quiz_setup_flow() -> FlowDefinition {
    let type_options: Vec<ChoiceOption> = QuestionType::offered()
        .iter()
        .map(|qt| question_type_option(*qt))
        .collect();
    let type_replies: Vec<String> = QuestionType::offered()
        .iter()
        .map(|qt| qt.label().to_string())
        .collect();
    let difficulty_options: Vec<ChoiceOption> = [
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Mixed,
    ]
    .into_iter()
    .map(difficulty_option)
    .collect();

    FlowDefinition {
        id: QUIZ_SETUP.into(),
        greeting: "Let's set up your quiz. I'll ask three quick questions.".into(),
        summary_title: "Here is your quiz".into(),
        fallback_enabled: true,
        stages: vec![
            StageDescriptor {
                id: stages::COLLECTING_TYPES.into(),
                slot: slots::TYPES.into(),
                prompt: "Which question types would you like? You can pick several: {options}.".into(),
                clarification: "I didn't catch a question type. Please choose one or more of: {options}.".into(),
                quick_replies: type_replies,
                rule: ParseRule::Choices {
                    options: type_options,
                    multiple: true,
                    all_keywords: strings(&["all", "all types", "every type", "everything"]),
                },
                validator: Validator::Accept,
                next: NextStage::Stage(stages::COLLECTING_DIFFICULTY.into()),
            },
            StageDescriptor {
                id: stages::COLLECTING_DIFFICULTY.into(),
                slot: slots::DIFFICULTY.into(),
                prompt: "How difficult should the questions be? {options}. Say skip for a mix.".into(),
                clarification: "Please pick one difficulty: {options}. Say skip if you have no preference.".into(),
                quick_replies: strings(&["Easy", "Medium", "Hard", "Mixed", "Skip"]),
                rule: ParseRule::Choices {
                    options: difficulty_options,
                    multiple: false,
                    all_keywords: Vec::new(),
                },
                validator: Validator::Accept,
                next: NextStage::Stage(stages::COLLECTING_COUNT.into()),
            },
            StageDescriptor {
                id: stages::COLLECTING_COUNT.into(),
                slot: slots::COUNT.into(),
                prompt: "How many questions? Any number from 1 to {max}.".into(),
                clarification: "Please enter a number between 1 and {max}, or say max.".into(),
                quick_replies: strings(&["5", "10", "20", "Max"]),
                rule: ParseRule::Count {
                    max_keywords: strings(&["max", "maximum", "as many as possible", "all of them"]),
                },
                validator: Validator::Range {
                    min: 1,
                    max: Limit::MaxQuestions,
                },
                next: NextStage::Confirmation,
            },
        ],
    }
}

fn document_summary_flow() -> FlowDefinition {
    FlowDefinition {
        id: DOCUMENT_SUMMARY.into(),
        greeting: "Let's summarise your documents.".into(),
        summary_title: "Summary request".into(),
        fallback_enabled: false,
        stages: vec![StageDescriptor {
            id: "collecting_length".into(),
            slot: "length".into(),
            prompt: "How long should the summary be? {options}.".into(),
            clarification: "Please choose a length: {options}.".into(),
            quick_replies: strings(&["Brief", "Standard", "Detailed"]),
            rule: ParseRule::Choices {
                options: vec![
                    ChoiceOption::new("brief", "Brief", &["brief", "short", "quick", "tldr"]),
                    ChoiceOption::new("standard", "Standard", &["standard", "normal", "medium"]),
                    ChoiceOption::new("detailed", "Detailed", &["detailed", "long", "thorough", "full"]),
                ],
                multiple: false,
                all_keywords: Vec::new(),
            },
            validator: Validator::Accept,
            next: NextStage::Confirmation,
        }],
    }
}

fn highlights_flow() -> FlowDefinition {
    FlowDefinition {
        id: HIGHLIGHTS.into(),
        greeting: "Let's pull the key highlights from your documents.".into(),
        summary_title: "Highlights request".into(),
        fallback_enabled: false,
        stages: vec![StageDescriptor {
            id: "collecting_highlight_count".into(),
            slot: "count".into(),
            prompt: "How many highlights? Between 1 and 20.".into(),
            clarification: "Please enter a number between 1 and 20.".into(),
            quick_replies: strings(&["5", "10"]),
            rule: ParseRule::Count {
                max_keywords: strings(&["max", "maximum"]),
            },
            validator: Validator::Range {
                min: 1,
                max: Limit::Fixed(20),
            },
            next: NextStage::Confirmation,
        }],
    }
}

fn conclusion_flow() -> FlowDefinition {
    FlowDefinition {
        id: CONCLUSION.into(),
        greeting: "Let's draft a conclusion for your study material.".into(),
        summary_title: "Conclusion request".into(),
        fallback_enabled: false,
        stages: vec![
            StageDescriptor {
                id: "collecting_tone".into(),
                slot: "tone".into(),
                prompt: "What tone should it take? {options}.".into(),
                clarification: "Please choose a tone: {options}.".into(),
                quick_replies: strings(&["Academic", "Casual"]),
                rule: ParseRule::Choices {
                    options: vec![
                        ChoiceOption::new("academic", "Academic", &["academic", "formal"]),
                        ChoiceOption::new("casual", "Casual", &["casual", "informal", "friendly"]),
                    ],
                    multiple: false,
                    all_keywords: Vec::new(),
                },
                validator: Validator::Accept,
                next: NextStage::Stage("collecting_focus".into()),
            },
            StageDescriptor {
                id: "collecting_focus".into(),
                slot: "focus".into(),
                prompt: "Anything the conclusion should focus on?".into(),
                clarification: "Please describe the focus in a few words.".into(),
                quick_replies: Vec::new(),
                rule: ParseRule::FreeText,
                validator: Validator::NonEmpty { max_chars: 300 },
                next: NextStage::Confirmation,
            },
        ],
    }
}
