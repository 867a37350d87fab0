use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: i64,
    pub topic_id: i64,
    pub question_type: QuestionType,
    pub marks: f64,
    pub options: Vec<QuestionOption>,
}

/// TrueFalse is graded as a two-option MultipleChoice; AssertionReason
/// combinations are modelled as regular options. Matching, SequenceOrdering
/// and FillInTheBlanks are defined but not graded yet: they always evaluate
/// to incorrect instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    DiagramBased,
    AssertionReason,
    MultipleCorrectStatements,
    Matching,
    SequenceOrdering,
    FillInTheBlanks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub option_id: String,
    pub text: String,
    pub is_correct: bool,
}
