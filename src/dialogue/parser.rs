//! Deterministic Parser: rule-based text → value extraction per stage.
//!
//! Input is normalised first (lowercase, every non-alphanumeric character
//! becomes a space, whitespace collapsed) so "True/False", "true-false" and
//! "TRUE FALSE" all read as `true false`. Phrases match on word boundaries.
//!
//! Parsing never mutates anything; the engine records a value only after
//! both `parse` and `validate` succeed.

use std::sync::LazyLock;

use regex::Regex;

use super::registry::{ChoiceOption, Limit, NextStage, ParseRule, StageDescriptor, Validator};
use super::types::{BoundedInt, SlotMap, SlotValue};

/// Number literal, including sign and decimal part so "-3" and "2.5" can be
/// recognised and rejected rather than read as "3" or "2".
static NUMBER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").unwrap());

/// Values the parser and validator need from outside the flow definition.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub max_questions: u32,
}

/// Candidate value produced by a parse rule, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Choice(String),
    Choices(Vec<String>),
    Integer(i64),
    Text(String),
}

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte position of `phrase` in `padded` (already `" {text} "`), matching
/// whole words only.
fn find_phrase(padded: &str, phrase: &str) -> Option<usize> {
    let phrase = normalize(phrase);
    if phrase.is_empty() {
        return None;
    }
    padded.find(&format!(" {phrase} "))
}

/// Earliest position at which any phrase selecting `option` occurs.
fn option_position(padded: &str, option: &ChoiceOption) -> Option<usize> {
    option
        .synonyms
        .iter()
        .map(String::as_str)
        .chain([option.value.as_str(), option.label.as_str()])
        .filter_map(|phrase| find_phrase(padded, phrase))
        .min()
}

/// Run `rule` against `text`. `None` is a parse miss.
pub fn parse(rule: &ParseRule, text: &str, ctx: &ParseContext) -> Option<Extraction> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    let padded = format!(" {normalized} ");

    match rule {
        ParseRule::Choices {
            options,
            multiple,
            all_keywords,
        } => {
            let mut matched: Vec<(usize, &ChoiceOption)> = options
                .iter()
                .filter_map(|opt| option_position(&padded, opt).map(|pos| (pos, opt)))
                .collect();
            matched.sort_by_key(|(pos, _)| *pos);

            if *multiple {
                if matched.is_empty()
                    && all_keywords.iter().any(|k| find_phrase(&padded, k).is_some())
                {
                    return Some(Extraction::Choices(
                        options.iter().map(|o| o.value.clone()).collect(),
                    ));
                }
                if matched.is_empty() {
                    return None;
                }
                Some(Extraction::Choices(
                    matched.into_iter().map(|(_, o)| o.value.clone()).collect(),
                ))
            } else {
                matched
                    .first()
                    .map(|(_, o)| Extraction::Choice(o.value.clone()))
            }
        }
        ParseRule::Count { max_keywords } => {
            // An explicit number beats a max keyword ("max 10" means 10).
            if let Some(literal) = NUMBER_LITERAL.find(text) {
                return parse_integer_literal(literal.as_str()).map(Extraction::Integer);
            }
            max_keywords
                .iter()
                .any(|k| find_phrase(&padded, k).is_some())
                .then(|| Extraction::Integer(i64::from(ctx.max_questions)))
        }
        ParseRule::FreeText => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| Extraction::Text(trimmed.to_string()))
        }
    }
}

/// Integers only; decimals are a miss. Oversized literals saturate so they
/// fail range validation instead of parsing.
fn parse_integer_literal(literal: &str) -> Option<i64> {
    if literal.contains(['.', ',']) {
        return None;
    }
    match literal.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) if literal.starts_with('-') => Some(i64::MIN),
        Err(_) => Some(i64::MAX),
    }
}

/// Resolve a validator's upper bound.
pub fn resolve_limit(limit: Limit, ctx: &ParseContext) -> u32 {
    match limit {
        Limit::Fixed(max) => max,
        Limit::MaxQuestions => ctx.max_questions,
    }
}

/// Apply `validator` to an extraction, producing the slot value to record.
pub fn validate(
    validator: &Validator,
    extraction: Extraction,
    ctx: &ParseContext,
) -> Option<SlotValue> {
    match (validator, extraction) {
        (Validator::Range { min, max }, Extraction::Integer(value)) => {
            let max = resolve_limit(*max, ctx);
            let value = u32::try_from(value).ok()?;
            (value >= *min && value <= max).then_some(SlotValue::Integer(BoundedInt {
                value,
                min: *min,
                max,
            }))
        }
        (Validator::Range { .. }, _) => None,
        (Validator::NonEmpty { max_chars }, Extraction::Text(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty() && trimmed.chars().count() <= *max_chars)
                .then(|| SlotValue::Text(trimmed.to_string()))
        }
        (Validator::NonEmpty { .. }, _) => None,
        (Validator::Accept, Extraction::Choice(value)) => Some(SlotValue::Text(value)),
        (Validator::Accept, Extraction::Choices(values)) => {
            (!values.is_empty()).then_some(SlotValue::TextSet(values))
        }
        (Validator::Accept, Extraction::Text(text)) => Some(SlotValue::Text(text)),
        (Validator::Accept, Extraction::Integer(value)) => {
            let value = u32::try_from(value).ok()?;
            Some(SlotValue::Integer(BoundedInt {
                value,
                min: 0,
                max: u32::MAX,
            }))
        }
    }
}

/// Parse and validate in one step.
pub fn extract(stage: &StageDescriptor, text: &str, ctx: &ParseContext) -> Option<SlotValue> {
    let extraction = parse(&stage.rule, text, ctx)?;
    validate(&stage.validator, extraction, ctx)
}

/// Follow a next-stage selector. `None` means the flow goes to confirmation.
pub fn resolve_next<'a>(next: &'a NextStage, slots: &SlotMap) -> Option<&'a str> {
    match next {
        NextStage::Stage(id) => Some(id.as_str()),
        NextStage::Confirmation => None,
        NextStage::WhenSlotEquals {
            slot,
            value,
            then,
            otherwise,
        } => {
            let matches = slots
                .get(slot)
                .and_then(SlotValue::as_text)
                .is_some_and(|v| v == value);
            resolve_next(if matches { then } else { otherwise }, slots)
        }
    }
}

/// Fill `{max}` and `{options}` placeholders of a stage template.
pub fn render(template: &str, stage: &StageDescriptor, ctx: &ParseContext) -> String {
    let mut out = template.replace("{max}", &ctx.max_questions.to_string());
    if out.contains("{options}") {
        out = out.replace("{options}", &option_labels(&stage.rule).join(", "));
    }
    out
}

pub fn option_labels(rule: &ParseRule) -> Vec<String> {
    match rule {
        ParseRule::Choices { options, .. } => options.iter().map(|o| o.label.clone()).collect(),
        _ => Vec::new(),
    }
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::registry::{quiz_setup_flow, stages};

    const CTX: ParseContext = ParseContext { max_questions: 50 };

    fn stage(id: &str) -> StageDescriptor {
        quiz_setup_flow().stage(id).cloned().unwrap()
    }

    fn types_of(text: &str) -> Option<Vec<String>> {
        match extract(&stage(stages::COLLECTING_TYPES), text, &CTX)? {
            SlotValue::TextSet(items) => Some(items),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn difficulty_of(text: &str) -> Option<String> {
        extract(&stage(stages::COLLECTING_DIFFICULTY), text, &CTX)
            .and_then(|v| v.as_text().map(str::to_string))
    }

    fn count_of(text: &str) -> Option<u32> {
        extract(&stage(stages::COLLECTING_COUNT), text, &CTX).and_then(|v| v.as_integer())
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("  True/False,  MCQ!! "), "true false mcq");
        assert_eq!(normalize("Fill-in-the-blank"), "fill in the blank");
        assert_eq!(normalize("???"), "");
    }

    #[test]
    fn types_multiple_in_text_order() {
        assert_eq!(
            types_of("MCQ and True/False"),
            Some(vec!["mcq".to_string(), "true_false".to_string()])
        );
        assert_eq!(
            types_of("true-false plus some multiple choice"),
            Some(vec!["true_false".to_string(), "mcq".to_string()])
        );
    }

    #[test]
    fn types_case_and_variant_insensitive() {
        assert_eq!(types_of("FILL IN THE BLANKS"), Some(vec!["fill_blank".to_string()]));
        assert_eq!(types_of("t/f"), Some(vec!["true_false".to_string()]));
        assert_eq!(types_of("Short-Answer please"), Some(vec!["short_answer".to_string()]));
    }

    #[test]
    fn types_duplicates_collapse() {
        assert_eq!(types_of("mcq, MCQ and multiple choice"), Some(vec!["mcq".to_string()]));
    }

    #[test]
    fn types_all_keyword_selects_everything() {
        assert_eq!(types_of("all").map(|t| t.len()), Some(4));
    }

    #[test]
    fn types_zero_matches_is_miss() {
        assert_eq!(types_of("essays please"), None);
        assert_eq!(types_of(""), None);
    }

    #[test]
    fn types_respect_word_boundaries() {
        // "tf" inside another word must not match
        assert_eq!(types_of("stuff"), None);
    }

    #[test]
    fn difficulty_first_match_wins() {
        assert_eq!(difficulty_of("Mixed"), Some("mixed".into()));
        assert_eq!(difficulty_of("hard, or maybe easy"), Some("hard".into()));
        assert_eq!(difficulty_of("easy... no, hard"), Some("easy".into()));
    }

    #[test]
    fn difficulty_skip_means_mixed() {
        assert_eq!(difficulty_of("skip"), Some("mixed".into()));
        assert_eq!(difficulty_of("I don't care"), Some("mixed".into()));
    }

    #[test]
    fn difficulty_miss() {
        assert_eq!(difficulty_of("purple"), None);
    }

    #[test]
    fn count_first_integer() {
        assert_eq!(count_of("15"), Some(15));
        assert_eq!(count_of("give me 12 questions, not 30"), Some(12));
    }

    #[test]
    fn count_max_keyword() {
        assert_eq!(count_of("max"), Some(50));
        assert_eq!(count_of("Maximum please"), Some(50));
    }

    #[test]
    fn count_out_of_range_rejected() {
        assert_eq!(count_of("0"), None);
        assert_eq!(count_of("1000"), None);
        assert_eq!(count_of("51"), None);
        assert_eq!(count_of("-5"), None);
        assert_eq!(count_of("99999999999999999999999"), None);
    }

    #[test]
    fn count_bounds_inclusive() {
        assert_eq!(count_of("1"), Some(1));
        assert_eq!(count_of("50"), Some(50));
    }

    #[test]
    fn count_non_numeric_or_decimal_rejected() {
        assert_eq!(count_of("a few"), None);
        assert_eq!(count_of("2.5"), None);
    }

    #[test]
    fn count_value_records_bounds() {
        let value = extract(&stage(stages::COLLECTING_COUNT), "20", &CTX).unwrap();
        assert_eq!(
            value,
            SlotValue::Integer(BoundedInt { value: 20, min: 1, max: 50 })
        );
    }

    #[test]
    fn free_text_validation() {
        let v = Validator::NonEmpty { max_chars: 5 };
        assert_eq!(
            validate(&v, Extraction::Text(" abc ".into()), &CTX),
            Some(SlotValue::Text("abc".into()))
        );
        assert_eq!(validate(&v, Extraction::Text("abcdefg".into()), &CTX), None);
        assert_eq!(parse(&ParseRule::FreeText, "   ", &CTX), None);
    }

    #[test]
    fn resolve_next_follows_branches() {
        let next = NextStage::WhenSlotEquals {
            slot: "tone".into(),
            value: "casual".into(),
            then: Box::new(NextStage::Confirmation),
            otherwise: Box::new(NextStage::Stage("focus".into())),
        };
        let mut slots = SlotMap::new();
        assert_eq!(resolve_next(&next, &slots), Some("focus"));
        slots.insert("tone".into(), SlotValue::Text("casual".into()));
        assert_eq!(resolve_next(&next, &slots), None);
    }

    #[test]
    fn render_fills_placeholders() {
        let count = stage(stages::COLLECTING_COUNT);
        assert_eq!(
            render(&count.prompt, &count, &CTX),
            "How many questions? Any number from 1 to 50."
        );
        let types = stage(stages::COLLECTING_TYPES);
        let text = render(&types.clarification, &types, &CTX);
        assert!(text.contains("MCQ, True/False, Fill-in-blank, Short answer"));
    }
}
