use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::{ClientSession, Database};
use redis::aio::ConnectionManager;

use crate::metrics::{track_cache_operation, MASTERY_UPDATES_TOTAL};
use crate::models::mastery::{MasteryLevel, TopicMastery};

/// Band thresholds by lifetime attempt count. Bands are non-overlapping and
/// checked highest-first; the counters must already include the attempt
/// being applied.
pub fn classify_level(questions_attempted: u32, accuracy_percentage: u32) -> MasteryLevel {
    if questions_attempted >= 20 {
        if accuracy_percentage >= 90 {
            MasteryLevel::Mastered
        } else if accuracy_percentage >= 75 {
            MasteryLevel::Advanced
        } else if accuracy_percentage >= 60 {
            MasteryLevel::Intermediate
        } else {
            MasteryLevel::Beginner
        }
    } else if questions_attempted >= 10 {
        if accuracy_percentage >= 80 {
            MasteryLevel::Advanced
        } else if accuracy_percentage >= 60 {
            MasteryLevel::Intermediate
        } else {
            MasteryLevel::Beginner
        }
    } else if questions_attempted >= 5 {
        if accuracy_percentage >= 70 {
            MasteryLevel::Intermediate
        } else {
            MasteryLevel::Beginner
        }
    } else {
        MasteryLevel::Beginner
    }
}

pub fn accuracy_percentage(questions_correct: u32, questions_attempted: u32) -> u32 {
    if questions_attempted == 0 {
        return 0;
    }
    ((questions_correct as f64 / questions_attempted as f64) * 100.0).round() as u32
}

pub struct MasteryService {
    mongo: Database,
    redis: ConnectionManager,
}

impl MasteryService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    /// Apply one attempt's correctness to the (user, topic) rolling state
    /// inside the caller's transaction. The record is created on the first
    /// attempt for the pair and updated in place afterwards.
    pub async fn apply_attempt(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        topic_id: i64,
        is_correct: bool,
        practiced_at: DateTime<Utc>,
    ) -> Result<MasteryLevel> {
        let collection = self.mongo.collection::<TopicMastery>("topic_mastery");
        let record_id = TopicMastery::record_id(user_id, topic_id);

        let existing = collection
            .find_one(doc! { "_id": &record_id })
            .session(&mut *tx)
            .await
            .context("Failed to load topic mastery record")?;

        let mut mastery = existing.unwrap_or(TopicMastery {
            id: record_id.clone(),
            user_id,
            topic_id,
            mastery_level: MasteryLevel::Beginner,
            questions_attempted: 0,
            questions_correct: 0,
            accuracy_percentage: 0,
            last_practiced_at: practiced_at,
        });

        mastery.questions_attempted += 1;
        if is_correct {
            mastery.questions_correct += 1;
        }
        mastery.accuracy_percentage =
            accuracy_percentage(mastery.questions_correct, mastery.questions_attempted);
        mastery.mastery_level =
            classify_level(mastery.questions_attempted, mastery.accuracy_percentage);
        mastery.last_practiced_at = practiced_at;

        collection
            .replace_one(doc! { "_id": &record_id }, &mastery)
            .upsert(true)
            .session(&mut *tx)
            .await
            .context("Failed to persist topic mastery record")?;

        MASTERY_UPDATES_TOTAL
            .with_label_values(&[mastery.mastery_level.as_str()])
            .inc();

        tracing::info!(
            "Mastery updated: user={}, topic={}, attempted={}, accuracy={}%, level={:?}",
            user_id,
            topic_id,
            mastery.questions_attempted,
            mastery.accuracy_percentage,
            mastery.mastery_level
        );

        Ok(mastery.mastery_level)
    }

    /// Drop every cached mastery view for the user. The cache itself lives
    /// outside this subsystem; this is the pattern-delete contract it
    /// exposes. Called once per successful submission, after commit.
    pub async fn invalidate_user_cache(&self, user_id: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        let pattern = format!("user:{}:topic-mastery:*", user_id);

        let mut cursor: u64 = 0;
        let mut deleted = 0usize;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .context("Failed to scan mastery cache keys")?;

            if !keys.is_empty() {
                deleted += keys.len();
                track_cache_operation("del", async {
                    redis::cmd("DEL")
                        .arg(&keys)
                        .query_async::<()>(&mut conn)
                        .await
                        .context("Failed to delete mastery cache keys")
                })
                .await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        tracing::debug!(
            "Invalidated {} cached mastery views for user {}",
            deleted,
            user_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_five_attempts_is_always_beginner() {
        assert_eq!(classify_level(0, 0), MasteryLevel::Beginner);
        assert_eq!(classify_level(4, 100), MasteryLevel::Beginner);
    }

    #[test]
    fn five_to_nine_band_caps_at_intermediate() {
        assert_eq!(classify_level(5, 70), MasteryLevel::Intermediate);
        assert_eq!(classify_level(9, 100), MasteryLevel::Intermediate);
        assert_eq!(classify_level(9, 69), MasteryLevel::Beginner);
    }

    #[test]
    fn ten_to_nineteen_band() {
        assert_eq!(classify_level(10, 80), MasteryLevel::Advanced);
        assert_eq!(classify_level(19, 79), MasteryLevel::Intermediate);
        assert_eq!(classify_level(15, 60), MasteryLevel::Intermediate);
        assert_eq!(classify_level(15, 59), MasteryLevel::Beginner);
    }

    #[test]
    fn twenty_plus_band() {
        assert_eq!(classify_level(20, 90), MasteryLevel::Mastered);
        assert_eq!(classify_level(40, 89), MasteryLevel::Advanced);
        assert_eq!(classify_level(20, 75), MasteryLevel::Advanced);
        assert_eq!(classify_level(20, 74), MasteryLevel::Intermediate);
        assert_eq!(classify_level(20, 59), MasteryLevel::Beginner);
    }

    #[test]
    fn nine_of_seven_correct_is_intermediate_then_advanced_at_ten() {
        // 7 of 9 correct is ~78%: inside the 5-9 band that earns
        // intermediate (the band never grants advanced).
        let accuracy = accuracy_percentage(7, 9);
        assert_eq!(accuracy, 78);
        assert_eq!(classify_level(9, accuracy), MasteryLevel::Intermediate);

        // A correct 10th attempt lifts accuracy to 80% and crosses into
        // the 10-19 band, which grants advanced at >= 80.
        let accuracy = accuracy_percentage(8, 10);
        assert_eq!(accuracy, 80);
        assert_eq!(classify_level(10, accuracy), MasteryLevel::Advanced);
    }

    #[test]
    fn accuracy_rounds_to_nearest_integer() {
        assert_eq!(accuracy_percentage(1, 3), 33);
        assert_eq!(accuracy_percentage(2, 3), 67);
        assert_eq!(accuracy_percentage(0, 0), 0);
    }
}
