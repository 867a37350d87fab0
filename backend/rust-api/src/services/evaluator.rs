use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::models::question::{Question, QuestionType};

/// Canonical form of a client answer payload. Clients have shipped answers
/// as bare numbers, bare strings, arrays of option ids and wrapper objects;
/// everything funnels into one of these two shapes before grading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedAnswer {
    Single(String),
    Multiple(Vec<String>),
    Unanswered,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub is_correct: bool,
    pub marks_awarded: f64,
}

const WRAPPER_KEYS: [&str; 3] = ["answer", "selected", "value"];

/// Canonicalize a raw answer payload. Unrecognized shapes map to
/// `Unanswered` (graded incorrect) with a warning rather than an error, so
/// a malformed answer never rejects the rest of the submission.
pub fn normalize_user_answer(raw: &Value) -> NormalizedAnswer {
    match raw {
        Value::Number(n) => NormalizedAnswer::Single(n.to_string()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                NormalizedAnswer::Unanswered
            } else {
                NormalizedAnswer::Single(trimmed.to_string())
            }
        }
        Value::Array(items) => {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Number(n) => ids.push(n.to_string()),
                    Value::String(s) => ids.push(s.trim().to_string()),
                    other => {
                        tracing::warn!("Unrecognized answer array element: {}", other);
                        return NormalizedAnswer::Unanswered;
                    }
                }
            }
            NormalizedAnswer::Multiple(ids)
        }
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                if let Some(inner) = map.get(key) {
                    return normalize_user_answer(inner);
                }
            }
            tracing::warn!("Unrecognized answer object shape; treating as unanswered");
            NormalizedAnswer::Unanswered
        }
        _ => {
            tracing::warn!("Unrecognized answer payload: {}", raw);
            NormalizedAnswer::Unanswered
        }
    }
}

/// Grade one answer. Evaluation failures (malformed question definitions
/// and the like) are converted to "incorrect" here: grading must never
/// abort a submission.
pub fn evaluate(question: &Question, raw_answer: &Value) -> Evaluation {
    match try_evaluate(question, raw_answer) {
        Ok(is_correct) => Evaluation {
            is_correct,
            marks_awarded: if is_correct { question.marks } else { 0.0 },
        },
        Err(e) => {
            tracing::warn!(
                "Evaluation failed for question {}, grading incorrect: {:#}",
                question.id,
                e
            );
            Evaluation {
                is_correct: false,
                marks_awarded: 0.0,
            }
        }
    }
}

fn try_evaluate(question: &Question, raw_answer: &Value) -> Result<bool> {
    let normalized = normalize_user_answer(raw_answer);

    match question.question_type {
        QuestionType::MultipleChoice
        | QuestionType::TrueFalse
        | QuestionType::DiagramBased
        | QuestionType::AssertionReason => {
            let NormalizedAnswer::Single(selected) = normalized else {
                return Ok(false);
            };

            let correct: Vec<&str> = question
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.option_id.as_str())
                .collect();
            if correct.len() != 1 {
                bail!(
                    "question {} has {} options flagged correct, expected exactly 1",
                    question.id,
                    correct.len()
                );
            }

            Ok(selected == correct[0])
        }
        QuestionType::MultipleCorrectStatements => {
            let NormalizedAnswer::Multiple(selected) = normalized else {
                return Ok(false);
            };

            let correct: BTreeSet<&str> = question
                .options
                .iter()
                .filter(|o| o.is_correct)
                .map(|o| o.option_id.as_str())
                .collect();
            if correct.is_empty() {
                bail!("question {} has no options flagged correct", question.id);
            }

            // Exact set equality: a subset or superset of the correct
            // statements earns nothing.
            let selected: BTreeSet<&str> = selected.iter().map(String::as_str).collect();
            Ok(selected == correct)
        }
        QuestionType::Matching | QuestionType::SequenceOrdering | QuestionType::FillInTheBlanks => {
            tracing::debug!(
                "Grading not implemented for {:?} (question {}); marking incorrect",
                question.question_type,
                question.id
            );
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::QuestionOption;
    use serde_json::json;

    fn option(id: &str, is_correct: bool) -> QuestionOption {
        QuestionOption {
            option_id: id.to_string(),
            text: format!("option {}", id),
            is_correct,
        }
    }

    fn mcq(options: Vec<QuestionOption>) -> Question {
        Question {
            id: 1,
            topic_id: 10,
            question_type: QuestionType::MultipleChoice,
            marks: 4.0,
            options,
        }
    }

    fn multi(options: Vec<QuestionOption>) -> Question {
        Question {
            question_type: QuestionType::MultipleCorrectStatements,
            ..mcq(options)
        }
    }

    #[test]
    fn normalize_handles_number_string_and_array() {
        assert_eq!(
            normalize_user_answer(&json!(2)),
            NormalizedAnswer::Single("2".to_string())
        );
        assert_eq!(
            normalize_user_answer(&json!("b ")),
            NormalizedAnswer::Single("b".to_string())
        );
        assert_eq!(
            normalize_user_answer(&json!([1, "3"])),
            NormalizedAnswer::Multiple(vec!["1".to_string(), "3".to_string()])
        );
    }

    #[test]
    fn normalize_unwraps_known_object_keys() {
        assert_eq!(
            normalize_user_answer(&json!({"answer": "a"})),
            NormalizedAnswer::Single("a".to_string())
        );
        assert_eq!(
            normalize_user_answer(&json!({"selected": [1, 2]})),
            NormalizedAnswer::Multiple(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(
            normalize_user_answer(&json!({"value": 7})),
            NormalizedAnswer::Single("7".to_string())
        );
    }

    #[test]
    fn normalize_maps_unknown_shapes_to_unanswered() {
        assert_eq!(normalize_user_answer(&json!(null)), NormalizedAnswer::Unanswered);
        assert_eq!(normalize_user_answer(&json!(true)), NormalizedAnswer::Unanswered);
        assert_eq!(
            normalize_user_answer(&json!({"unexpected": 1})),
            NormalizedAnswer::Unanswered
        );
        assert_eq!(normalize_user_answer(&json!("  ")), NormalizedAnswer::Unanswered);
        assert_eq!(
            normalize_user_answer(&json!([{"nested": 1}])),
            NormalizedAnswer::Unanswered
        );
    }

    #[test]
    fn single_answer_types_match_the_flagged_option() {
        let q = mcq(vec![option("1", false), option("2", true), option("3", false)]);
        assert!(evaluate(&q, &json!("2")).is_correct);
        assert!(evaluate(&q, &json!(2)).is_correct);
        assert!(!evaluate(&q, &json!("1")).is_correct);
        assert_eq!(evaluate(&q, &json!("2")).marks_awarded, 4.0);
        assert_eq!(evaluate(&q, &json!("1")).marks_awarded, 0.0);
    }

    #[test]
    fn true_false_grades_like_two_option_mcq() {
        let mut q = mcq(vec![option("true", true), option("false", false)]);
        q.question_type = QuestionType::TrueFalse;
        assert!(evaluate(&q, &json!("true")).is_correct);
        assert!(!evaluate(&q, &json!("false")).is_correct);
    }

    #[test]
    fn multiple_correct_requires_exact_set_equality() {
        let q = multi(vec![
            option("1", true),
            option("2", false),
            option("3", true),
        ]);
        assert!(evaluate(&q, &json!([1, 3])).is_correct);
        assert!(evaluate(&q, &json!([3, 1])).is_correct);
        // Subset: no partial credit.
        assert!(!evaluate(&q, &json!([1])).is_correct);
        // Superset: also nothing.
        assert!(!evaluate(&q, &json!([1, 2, 3])).is_correct);
        assert!(!evaluate(&q, &json!([])).is_correct);
    }

    #[test]
    fn multiple_correct_rejects_single_shaped_answer() {
        let q = multi(vec![option("1", true), option("2", true)]);
        assert!(!evaluate(&q, &json!(1)).is_correct);
    }

    #[test]
    fn reserved_types_fail_closed() {
        for question_type in [
            QuestionType::Matching,
            QuestionType::SequenceOrdering,
            QuestionType::FillInTheBlanks,
        ] {
            let mut q = mcq(vec![option("1", true)]);
            q.question_type = question_type;
            let eval = evaluate(&q, &json!("1"));
            assert!(!eval.is_correct);
            assert_eq!(eval.marks_awarded, 0.0);
        }
    }

    #[test]
    fn malformed_definition_grades_incorrect_instead_of_erroring() {
        // Zero flagged options.
        let q = mcq(vec![option("1", false), option("2", false)]);
        assert!(!evaluate(&q, &json!("1")).is_correct);
        // Two flagged options on a single-answer type.
        let q = mcq(vec![option("1", true), option("2", true)]);
        assert!(!evaluate(&q, &json!("1")).is_correct);
    }
}
