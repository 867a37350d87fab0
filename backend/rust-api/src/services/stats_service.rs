use anyhow::{Context, Result};
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::{ClientSession, Database};
use std::collections::BTreeMap;

use crate::metrics::SESSION_RECOMPUTE_DURATION_SECONDS;
use crate::models::attempt::QuestionAttempt;
use crate::models::{PracticeSession, SessionQuestion};
use crate::services::SubmitError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStatsSnapshot {
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub score: f64,
    pub max_score: f64,
}

/// Fold the full attempt history into the latest attempt per question.
///
/// Attempts are ordered by timestamp (attempt number breaks ties) and each
/// entry overwrites the previous one for its question, so the last write
/// per key is the most recent attempt. Resubmitting identical answers
/// appends identical attempts whose latest-per-question values are
/// unchanged, which is what makes recomputation idempotent.
pub fn fold_latest_attempts(mut attempts: Vec<QuestionAttempt>) -> BTreeMap<i64, QuestionAttempt> {
    attempts.sort_by(|a, b| {
        a.attempt_timestamp
            .cmp(&b.attempt_timestamp)
            .then(a.attempt_number.cmp(&b.attempt_number))
    });

    let mut latest = BTreeMap::new();
    for attempt in attempts {
        latest.insert(attempt.question_id, attempt);
    }
    latest
}

/// Derive the session aggregates from the folded ledger.
/// `questions_attempted` is clamped to the session's question count so a
/// ledger with stray attempts can never report more than the session holds.
pub fn derive_stats(
    latest: &BTreeMap<i64, QuestionAttempt>,
    total_questions: u32,
    max_score: f64,
) -> SessionStatsSnapshot {
    let questions_attempted = (latest.len() as u32).min(total_questions);
    let questions_correct = latest.values().filter(|a| a.is_correct).count() as u32;
    let score = latest.values().map(|a| a.marks_awarded).sum();

    SessionStatsSnapshot {
        questions_attempted,
        questions_correct,
        score,
        max_score,
    }
}

pub struct StatsService {
    mongo: Database,
}

impl StatsService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Recompute the derived stats for one session from its attempt ledger
    /// and write them back onto the session record. Runs entirely inside
    /// the caller's transaction; a missing or foreign session aborts with
    /// not-found before anything is written.
    pub async fn recompute_session_stats(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        session_id: i64,
    ) -> Result<SessionStatsSnapshot> {
        let started = std::time::Instant::now();

        let sessions = self.mongo.collection::<PracticeSession>("practice_sessions");
        let session = sessions
            .find_one(doc! { "_id": session_id })
            .session(&mut *tx)
            .await
            .context("Failed to load session for recomputation")?
            .ok_or(SubmitError::SessionNotFound(session_id))?;
        if session.user_id != user_id {
            // Ownership failures are reported as not-found; the caller
            // learns nothing about other users' sessions.
            return Err(SubmitError::SessionNotFound(session_id).into());
        }

        let attempts = self.fetch_session_attempts(tx, user_id, session_id).await?;
        let latest = fold_latest_attempts(attempts);

        let max_score = self.fetch_max_score(tx, session_id).await?;
        let stats = derive_stats(&latest, session.total_questions, max_score);

        let now = mongodb::bson::to_bson(&Utc::now()).context("Failed to encode timestamp")?;
        sessions
            .update_one(
                doc! { "_id": session_id },
                doc! { "$set": {
                    "questions_attempted": stats.questions_attempted as i64,
                    "questions_correct": stats.questions_correct as i64,
                    "score": stats.score,
                    "max_score": stats.max_score,
                    "updated_at": now,
                }},
            )
            .session(&mut *tx)
            .await
            .context("Failed to persist recomputed session stats")?;

        SESSION_RECOMPUTE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        tracing::info!(
            "Recomputed stats for session {}: attempted={}, correct={}, score={}/{}",
            session_id,
            stats.questions_attempted,
            stats.questions_correct,
            stats.score,
            stats.max_score
        );

        Ok(stats)
    }

    /// All attempts for the session, sorted by timestamp ascending at the
    /// database. The fold re-sorts anyway: ordering must never depend on
    /// incidental result-set order.
    async fn fetch_session_attempts(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        session_id: i64,
    ) -> Result<Vec<QuestionAttempt>> {
        let collection = self.mongo.collection::<QuestionAttempt>("question_attempts");
        let mut cursor = collection
            .find(doc! { "user_id": user_id, "session_id": session_id })
            .sort(doc! { "attempt_timestamp": 1 })
            .session(&mut *tx)
            .await
            .context("Failed to query attempt ledger")?;

        let mut attempts = Vec::new();
        while let Some(attempt) = cursor.next(tx).await {
            attempts.push(attempt.context("Failed to decode attempt record")?);
        }
        Ok(attempts)
    }

    /// Sum of marks over every question bound to the session, independent
    /// of what was attempted.
    async fn fetch_max_score(&self, tx: &mut ClientSession, session_id: i64) -> Result<f64> {
        let collection = self.mongo.collection::<SessionQuestion>("session_questions");
        let mut cursor = collection
            .find(doc! { "session_id": session_id })
            .session(&mut *tx)
            .await
            .context("Failed to query session question links")?;

        let mut max_score = 0.0;
        while let Some(link) = cursor.next(tx).await {
            max_score += link.context("Failed to decode session question link")?.marks;
        }
        Ok(max_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn attempt(
        question_id: i64,
        attempt_number: u32,
        is_correct: bool,
        marks_awarded: f64,
        offset_secs: i64,
    ) -> QuestionAttempt {
        QuestionAttempt {
            id: format!("attempt-{}-{}", question_id, attempt_number),
            user_id: 7,
            question_id,
            session_id: 1,
            session_question_id: question_id * 100,
            attempt_number,
            user_answer: serde_json::json!("a"),
            is_correct,
            marks_awarded,
            time_taken_seconds: None,
            attempt_timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn fold_keeps_latest_attempt_per_question() {
        let latest = fold_latest_attempts(vec![
            attempt(1, 1, true, 4.0, 0),
            attempt(1, 2, false, 0.0, 10),
            attempt(2, 1, false, 0.0, 5),
        ]);

        assert_eq!(latest.len(), 2);
        assert!(!latest[&1].is_correct);
        assert_eq!(latest[&1].attempt_number, 2);
        assert!(!latest[&2].is_correct);
    }

    #[test]
    fn fold_breaks_timestamp_ties_by_attempt_number() {
        let base = Utc::now();
        let mut first = attempt(1, 1, false, 0.0, 0);
        let mut second = attempt(1, 2, true, 4.0, 0);
        first.attempt_timestamp = base;
        second.attempt_timestamp = base;

        // Deliver out of order; the fold must not depend on input order.
        let latest = fold_latest_attempts(vec![second, first]);
        assert!(latest[&1].is_correct);
    }

    #[test]
    fn derive_clamps_attempted_to_total_questions() {
        let latest = fold_latest_attempts(vec![
            attempt(1, 1, true, 4.0, 0),
            attempt(2, 1, true, 4.0, 1),
            attempt(3, 1, true, 4.0, 2),
        ]);
        let stats = derive_stats(&latest, 2, 8.0);
        assert_eq!(stats.questions_attempted, 2);
        assert_eq!(stats.questions_correct, 3);
    }

    #[test]
    fn resubmission_of_identical_answers_is_idempotent() {
        let first_pass = vec![
            attempt(1, 1, true, 4.0, 0),
            attempt(2, 1, false, 0.0, 1),
        ];
        // The retry appends the same answers as fresh attempts, later in
        // time, with identical grading.
        let mut both_passes = first_pass.clone();
        both_passes.push(attempt(1, 2, true, 4.0, 60));
        both_passes.push(attempt(2, 2, false, 0.0, 61));

        let once = derive_stats(&fold_latest_attempts(first_pass), 2, 8.0);
        let twice = derive_stats(&fold_latest_attempts(both_passes), 2, 8.0);

        assert_eq!(once.score, twice.score);
        assert_eq!(once.questions_correct, twice.questions_correct);
        assert_eq!(once.max_score, twice.max_score);
        assert_eq!(once.questions_attempted, twice.questions_attempted);
    }

    #[test]
    fn max_score_is_independent_of_attempts() {
        let stats = derive_stats(&BTreeMap::new(), 5, 20.0);
        assert_eq!(stats.max_score, 20.0);
        assert_eq!(stats.questions_attempted, 0);
        assert_eq!(stats.score, 0.0);
    }
}
