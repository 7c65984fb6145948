//! Quiz domain types shared by the dialogue, the distribution calculator and
//! the job submitter.

use serde::{Deserialize, Serialize};

use super::distribution::{DifficultyCount, TypeCount};
use crate::dialogue::error::DialogueError;
use crate::dialogue::registry::slots;
use crate::dialogue::types::SlotMap;

// ═══════════════════════════════════════════
// Question types
// ═══════════════════════════════════════════

/// Every question shape the generator can produce.
///
/// Rendering and validation dispatch on this enum exhaustively; adding a
/// variant forces every `match` below to be revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    /// "MCQ" in the setup dialogue.
    #[serde(rename = "mcq")]
    MultipleChoice,
    TrueFalse,
    FillBlank,
    ShortAnswer,
}

/// How an answer to a question is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerFormat {
    Options { min_options: u8, max_correct: u8 },
    Boolean,
    Blank,
    FreeText { max_chars: u16 },
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleChoice => "single_choice",
            Self::MultipleChoice => "mcq",
            Self::TrueFalse => "true_false",
            Self::FillBlank => "fill_blank",
            Self::ShortAnswer => "short_answer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "single_choice" => Some(Self::SingleChoice),
            "mcq" | "multiple_choice" => Some(Self::MultipleChoice),
            "true_false" => Some(Self::TrueFalse),
            "fill_blank" => Some(Self::FillBlank),
            "short_answer" => Some(Self::ShortAnswer),
            _ => None,
        }
    }

    /// Human-facing label used in prompts and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleChoice => "Single choice",
            Self::MultipleChoice => "MCQ",
            Self::TrueFalse => "True/False",
            Self::FillBlank => "Fill-in-blank",
            Self::ShortAnswer => "Short answer",
        }
    }

    pub fn answer_format(&self) -> AnswerFormat {
        match self {
            Self::SingleChoice => AnswerFormat::Options {
                min_options: 3,
                max_correct: 1,
            },
            Self::MultipleChoice => AnswerFormat::Options {
                min_options: 4,
                max_correct: 4,
            },
            Self::TrueFalse => AnswerFormat::Boolean,
            Self::FillBlank => AnswerFormat::Blank,
            Self::ShortAnswer => AnswerFormat::FreeText { max_chars: 500 },
        }
    }

    /// Types offered by the quiz setup dialogue, in presentation order.
    pub fn offered() -> &'static [QuestionType] {
        &[
            Self::MultipleChoice,
            Self::TrueFalse,
            Self::FillBlank,
            Self::ShortAnswer,
        ]
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ═══════════════════════════════════════════
// Difficulty
// ═══════════════════════════════════════════

/// Difficulty as chosen in the dialogue. `Mixed` expands to every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Mixed,
}

/// A concrete difficulty level a question is generated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Mixed => "mixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Self::Easy),
            "medium" => Some(Self::Medium),
            "hard" => Some(Self::Hard),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Levels this choice spans.
    pub fn levels(&self) -> Vec<DifficultyLevel> {
        match self {
            Self::Easy => vec![DifficultyLevel::Easy],
            Self::Medium => vec![DifficultyLevel::Medium],
            Self::Hard => vec![DifficultyLevel::Hard],
            Self::Mixed => vec![
                DifficultyLevel::Easy,
                DifficultyLevel::Medium,
                DifficultyLevel::Hard,
            ],
        }
    }
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// Base share in percent before renormalisation.
    pub fn base_share(&self) -> u64 {
        match self {
            Self::Medium => 60,
            Self::Easy => 30,
            Self::Hard => 10,
        }
    }

    /// Order in which rounding remainders are absorbed.
    pub fn priority() -> &'static [DifficultyLevel] {
        &[Self::Medium, Self::Easy, Self::Hard]
    }
}

// ═══════════════════════════════════════════
// Parameters and finalized config
// ═══════════════════════════════════════════

/// Validated quiz parameters produced by a completed setup dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizParameters {
    pub types: Vec<QuestionType>,
    pub difficulty: Difficulty,
    pub count: u32,
}

impl QuizParameters {
    /// Read `quiz_setup` slots. A missing difficulty means mixed.
    ///
    /// Slots may come back from a client on resubmission, so types are held
    /// to the offered set and the count to `1..=max_questions`.
    pub fn from_slots(slots: &SlotMap, max_questions: u32) -> Result<Self, DialogueError> {
        let names = slots
            .get(slots::TYPES)
            .and_then(|v| v.as_set())
            .unwrap_or_default();
        let mut types = Vec::with_capacity(names.len());
        for name in names {
            match QuestionType::from_str(name) {
                Some(qt) if QuestionType::offered().contains(&qt) => types.push(qt),
                _ => return Err(invalid(slots::TYPES, format!("{name} is not offered"))),
            }
        }
        if types.is_empty() {
            return Err(DialogueError::Incomplete(slots::TYPES.into()));
        }

        let difficulty = slots
            .get(slots::DIFFICULTY)
            .and_then(|v| v.as_text())
            .and_then(Difficulty::from_str)
            .unwrap_or(Difficulty::Mixed);

        let count = slots
            .get(slots::COUNT)
            .and_then(|v| v.as_integer())
            .filter(|c| *c > 0)
            .ok_or_else(|| DialogueError::Incomplete(slots::COUNT.into()))?;
        if count > max_questions {
            return Err(invalid(slots::COUNT, format!("{count} exceeds {max_questions}")));
        }

        Ok(Self {
            types,
            difficulty,
            count,
        })
    }
}

fn invalid(slot: &str, reason: String) -> DialogueError {
    DialogueError::InvalidSlot {
        slot: slot.to_string(),
        reason,
    }
}

/// One requested question type with its answer format, as sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSpec {
    pub question_type: QuestionType,
    pub count: u32,
    pub answer_format: AnswerFormat,
}

/// Everything the generator needs to run one quiz job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedQuizConfig {
    pub user_id: String,
    pub subject_id: Option<String>,
    pub doc_ids: Vec<String>,
    pub total: u32,
    pub difficulty: Difficulty,
    pub types: Vec<TypeSpec>,
    pub per_type: Vec<TypeCount>,
    pub per_difficulty: Vec<DifficultyCount>,
    /// Dialogue session that produced this config (for resubmission and logs).
    pub source_session_id: String,
}
