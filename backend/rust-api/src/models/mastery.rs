use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rolling per-(user, topic) competency state. Created on the first attempt
/// for the pair, updated on every attempt after that, never deleted.
/// Counters are lifetime totals, not per-session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMastery {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: i64,
    pub topic_id: i64,
    pub mastery_level: MasteryLevel,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub accuracy_percentage: u32,
    pub last_practiced_at: DateTime<Utc>,
}

impl TopicMastery {
    pub fn record_id(user_id: i64, topic_id: i64) -> String {
        format!("{}:{}", user_id, topic_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryLevel {
    Beginner,
    Intermediate,
    Advanced,
    Mastered,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryLevel::Beginner => "beginner",
            MasteryLevel::Intermediate => "intermediate",
            MasteryLevel::Advanced => "advanced",
            MasteryLevel::Mastered => "mastered",
        }
    }
}
