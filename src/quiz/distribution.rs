//! Distribution Calculator: turns a question total plus the selected types
//! and difficulty levels into exact per-type and per-difficulty counts.
//!
//! Pure and deterministic: the confirmation summary and the live preview
//! endpoint recompute it on every change, so identical inputs must always
//! produce identical outputs. Integer arithmetic only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{DifficultyLevel, QuestionType};

/// Share of the total reserved for MCQ when it is selected alongside others.
const MCQ_SHARE_PERCENT: u64 = 70;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("Question total must be at least 1")]
    ZeroTotal,
    #[error("At least one question type must be selected")]
    NoTypesSelected,
    #[error("At least one difficulty level must be selected")]
    NoDifficultiesSelected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    pub question_type: QuestionType,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyCount {
    pub level: DifficultyLevel,
    pub count: u32,
}

/// Output of the calculator. `per_type` follows selection order,
/// `per_difficulty` follows priority order (medium, easy, hard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distribution {
    pub total: u32,
    pub per_type: Vec<TypeCount>,
    pub per_difficulty: Vec<DifficultyCount>,
}

impl Distribution {
    pub fn count_for_type(&self, question_type: QuestionType) -> u32 {
        self.per_type
            .iter()
            .find(|t| t.question_type == question_type)
            .map_or(0, |t| t.count)
    }

    pub fn count_for_level(&self, level: DifficultyLevel) -> u32 {
        self.per_difficulty
            .iter()
            .find(|d| d.level == level)
            .map_or(0, |d| d.count)
    }
}

/// Compute the full distribution.
///
/// Duplicate entries in either selection are ignored after their first
/// occurrence.
pub fn distribute(
    total: u32,
    types: &[QuestionType],
    difficulties: &[DifficultyLevel],
) -> Result<Distribution, DistributionError> {
    if total == 0 {
        return Err(DistributionError::ZeroTotal);
    }
    let types = dedup_in_order(types);
    if types.is_empty() {
        return Err(DistributionError::NoTypesSelected);
    }
    let levels = dedup_in_order(difficulties);
    if levels.is_empty() {
        return Err(DistributionError::NoDifficultiesSelected);
    }

    Ok(Distribution {
        total,
        per_type: split_types(total, &types),
        per_difficulty: split_difficulties(total, &levels),
    })
}

fn dedup_in_order<T: Copy + PartialEq>(items: &[T]) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(*item);
        }
    }
    out
}

/// MCQ takes `round(total * 0.70)` when other types share the quiz, or the
/// whole total when alone. Everything else is split evenly with the
/// leftover units going to the earliest selected types.
fn split_types(total: u32, types: &[QuestionType]) -> Vec<TypeCount> {
    let has_mcq = types.contains(&QuestionType::MultipleChoice);
    let others: Vec<QuestionType> = types
        .iter()
        .copied()
        .filter(|t| *t != QuestionType::MultipleChoice)
        .collect();

    let mcq_count = match (has_mcq, others.is_empty()) {
        (false, _) => 0,
        (true, true) => total,
        (true, false) => round_div(u64::from(total) * MCQ_SHARE_PERCENT, 100),
    };

    let remaining = total - mcq_count;
    let shares = largest_remainder_even(remaining, others.len());
    let mut other_counts = others.iter().zip(shares);

    types
        .iter()
        .map(|t| {
            let count = if *t == QuestionType::MultipleChoice {
                mcq_count
            } else {
                other_counts.next().map_or(0, |(_, c)| c)
            };
            TypeCount {
                question_type: *t,
                count,
            }
        })
        .collect()
}

/// Even split of `amount` into `parts`; equal fractional remainders mean
/// the tie is broken by position.
fn largest_remainder_even(amount: u32, parts: usize) -> Vec<u32> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_u32 = parts as u32;
    let base = amount / parts_u32;
    let extra = (amount % parts_u32) as usize;
    (0..parts)
        .map(|i| if i < extra { base + 1 } else { base })
        .collect()
}

/// Renormalise the base shares over the selected levels, round each, then
/// hand any rounding difference to the first selected level in priority
/// order.
fn split_difficulties(total: u32, selected: &[DifficultyLevel]) -> Vec<DifficultyCount> {
    let ordered: Vec<DifficultyLevel> = DifficultyLevel::priority()
        .iter()
        .copied()
        .filter(|l| selected.contains(l))
        .collect();
    let share_sum: u64 = ordered.iter().map(|l| l.base_share()).sum();

    let mut counts: Vec<DifficultyCount> = ordered
        .iter()
        .map(|level| DifficultyCount {
            level: *level,
            count: round_div(u64::from(total) * level.base_share(), share_sum),
        })
        .collect();

    let assigned: i64 = counts.iter().map(|c| i64::from(c.count)).sum();
    let diff = i64::from(total) - assigned;
    if diff != 0 {
        if let Some(first) = counts.first_mut() {
            first.count = (i64::from(first.count) + diff).max(0) as u32;
        }
    }
    counts
}

/// Round-half-up integer division.
fn round_div(numerator: u64, denominator: u64) -> u32 {
    ((2 * numerator + denominator) / (2 * denominator)) as u32
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
