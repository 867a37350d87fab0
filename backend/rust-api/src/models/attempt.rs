use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

/// One immutable ledger record per (user, question, session, attempt).
/// Multiple attempts may exist for the same question in the same session;
/// aggregation always keys on the latest attempt per question by
/// `attempt_timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAttempt {
    pub id: String,
    pub user_id: i64,
    pub question_id: i64,
    pub session_id: i64,
    pub session_question_id: i64,
    pub attempt_number: u32,
    pub user_answer: serde_json::Value,
    pub is_correct: bool,
    pub marks_awarded: f64,
    pub time_taken_seconds: Option<f64>,
    pub attempt_timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitSessionRequest {
    #[validate(length(min = 1, message = "answers must not be empty"))]
    pub answers: HashMap<i64, serde_json::Value>,
    pub timing_data: Option<TimingData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingData {
    pub total_seconds: f64,
    #[serde(default)]
    pub per_question_seconds: HashMap<i64, f64>,
    pub average_per_question: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitSessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub score: f64,
    pub max_score: f64,
}
