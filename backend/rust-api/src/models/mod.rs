use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A practice session record. The stats fields are derived from the attempt
/// ledger and rewritten wholesale on every recomputation; they are never
/// authoritative on their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PracticeSession {
    #[serde(rename = "_id")]
    pub id: i64,
    pub user_id: i64,
    pub total_questions: u32,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub score: f64,
    pub max_score: f64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Expired,
    Abandoned,
}

/// Binds one question to one session. `marks` is snapshotted onto the link
/// when the session is assembled, so max_score stays stable even if the
/// question bank is edited later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionQuestion {
    #[serde(rename = "_id")]
    pub id: i64,
    pub session_id: i64,
    pub question_id: i64,
    pub marks: f64,
    pub position: u32,
}

pub mod attempt;
pub mod mastery;
pub mod question;
