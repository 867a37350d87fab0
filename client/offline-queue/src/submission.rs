use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One queued batch of answers for a practice session, as persisted by the
/// durable store. At most one exists per session: re-enqueueing a session
/// overwrites the prior entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub session_id: i64,
    pub answers: HashMap<i64, serde_json::Value>,
    pub timing_data: Option<TimingData>,
    /// Creation time; drain order is ascending by this field.
    pub timestamp: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub retry_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedSubmission {
    pub fn new(
        session_id: i64,
        answers: HashMap<i64, serde_json::Value>,
        timing_data: Option<TimingData>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            answers,
            timing_data,
            timestamp: now,
            status: SubmissionStatus::Pending,
            retry_count: 0,
            last_attempt_at: None,
        }
    }
}

/// `Failed` covers both the retryable and the terminal case; a failed entry
/// at the retry cap is terminal and stays on disk for manual inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Submitting,
    Failed,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingData {
    pub total_seconds: f64,
    #[serde(default)]
    pub per_question_seconds: HashMap<i64, f64>,
    pub average_per_question: Option<f64>,
}
