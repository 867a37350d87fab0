use anyhow::{Context, Result};
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::{Client as MongoClient, ClientSession, Database};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use uuid::Uuid;

use crate::metrics::{ANSWERS_EVALUATED_TOTAL, SUBMISSIONS_TOTAL};
use crate::models::attempt::{QuestionAttempt, SubmitSessionRequest, SubmitSessionResponse};
use crate::models::question::Question;
use crate::models::{PracticeSession, SessionQuestion};
use crate::services::evaluator;
use crate::services::mastery_service::MasteryService;
use crate::services::stats_service::StatsService;
use crate::services::SubmitError;

pub struct SubmissionService {
    mongo: Database,
    mongo_client: MongoClient,
    redis: ConnectionManager,
}

struct AppendedAttempt {
    topic_id: i64,
    is_correct: bool,
}

impl SubmissionService {
    pub fn new(mongo: Database, mongo_client: MongoClient, redis: ConnectionManager) -> Self {
        Self {
            mongo,
            mongo_client,
            redis,
        }
    }

    /// Process one batch of answers for a session: grade each answer,
    /// append the attempts to the ledger, recompute the session stats and
    /// roll the topic mastery state forward, all inside one transaction.
    ///
    /// Safe to call more than once with an identical body: the ledger grows
    /// but the latest-attempt-per-question aggregates are unchanged.
    pub async fn submit_session(
        &self,
        user_id: i64,
        session_id: i64,
        req: &SubmitSessionRequest,
    ) -> Result<SubmitSessionResponse> {
        tracing::info!(
            "Processing submission: session={}, user={}, answers={}",
            session_id,
            user_id,
            req.answers.len()
        );

        let mut tx = self
            .mongo_client
            .start_session()
            .await
            .context("Failed to start database session")?;
        tx.start_transaction()
            .await
            .context("Failed to start transaction")?;

        let result = self.run_pipeline(&mut tx, user_id, session_id, req).await;

        let response = match result {
            Ok(response) => {
                tx.commit_transaction()
                    .await
                    .context("Failed to commit submission transaction")?;
                response
            }
            Err(e) => {
                // No partial effect: a failure anywhere in the pipeline
                // rolls back the ledger writes as well.
                if let Err(abort_err) = tx.abort_transaction().await {
                    tracing::warn!("Failed to abort submission transaction: {:#?}", abort_err);
                }
                SUBMISSIONS_TOTAL.with_label_values(&["failed"]).inc();
                return Err(e);
            }
        };

        SUBMISSIONS_TOTAL.with_label_values(&["completed"]).inc();

        // Cache invalidation happens after commit, best-effort: a stale
        // cached view is preferable to failing a committed submission.
        let mastery = MasteryService::new(self.mongo.clone(), self.redis.clone());
        if let Err(e) = mastery.invalidate_user_cache(user_id).await {
            tracing::warn!(
                "Mastery cache invalidation failed for user {}: {:#}",
                user_id,
                e
            );
        }

        Ok(response)
    }

    async fn run_pipeline(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        session_id: i64,
        req: &SubmitSessionRequest,
    ) -> Result<SubmitSessionResponse> {
        let session = self.load_owned_session(tx, user_id, session_id).await?;

        let links = self.fetch_session_questions(tx, session_id).await?;
        let questions = self
            .fetch_questions(tx, links.values().map(|l| l.question_id).collect())
            .await?;
        let mut attempt_counts = self.count_prior_attempts(tx, user_id, session_id).await?;

        let now = Utc::now();
        let attempts_collection = self.mongo.collection::<QuestionAttempt>("question_attempts");
        let mut appended = Vec::new();

        // Deterministic ledger order regardless of map iteration order.
        let mut question_ids: Vec<i64> = req.answers.keys().copied().collect();
        question_ids.sort_unstable();

        for question_id in question_ids {
            let raw_answer = &req.answers[&question_id];

            let Some(link) = links.get(&question_id) else {
                tracing::warn!(
                    "Answer for question {} not bound to session {}; skipping",
                    question_id,
                    session_id
                );
                continue;
            };
            let Some(question) = questions.get(&question_id) else {
                tracing::warn!(
                    "Question {} missing from question bank; skipping",
                    question_id
                );
                continue;
            };

            let evaluation = evaluator::evaluate(question, raw_answer);
            ANSWERS_EVALUATED_TOTAL
                .with_label_values(&[if evaluation.is_correct { "true" } else { "false" }])
                .inc();

            let attempt_number = attempt_counts
                .entry(question_id)
                .and_modify(|n| *n += 1)
                .or_insert(1);

            let attempt = QuestionAttempt {
                id: Uuid::new_v4().to_string(),
                user_id,
                question_id,
                session_id,
                session_question_id: link.id,
                attempt_number: *attempt_number,
                user_answer: raw_answer.clone(),
                is_correct: evaluation.is_correct,
                marks_awarded: evaluation.marks_awarded,
                time_taken_seconds: req
                    .timing_data
                    .as_ref()
                    .and_then(|t| t.per_question_seconds.get(&question_id).copied()),
                attempt_timestamp: now,
            };

            attempts_collection
                .insert_one(&attempt)
                .session(&mut *tx)
                .await
                .context("Failed to append attempt to ledger")?;

            appended.push(AppendedAttempt {
                topic_id: question.topic_id,
                is_correct: evaluation.is_correct,
            });
        }

        let stats = StatsService::new(self.mongo.clone())
            .recompute_session_stats(tx, user_id, session_id)
            .await?;

        let mastery = MasteryService::new(self.mongo.clone(), self.redis.clone());
        for attempt in &appended {
            mastery
                .apply_attempt(tx, user_id, attempt.topic_id, attempt.is_correct, now)
                .await?;
        }

        tracing::info!(
            "Submission processed: session={}, appended={}, score={}/{}",
            session.id,
            appended.len(),
            stats.score,
            stats.max_score
        );

        Ok(SubmitSessionResponse {
            success: true,
            error: None,
            questions_attempted: stats.questions_attempted,
            questions_correct: stats.questions_correct,
            score: stats.score,
            max_score: stats.max_score,
        })
    }

    /// Ownership gate: runs before any ledger write, so a rejected
    /// submission has no partial effect. Foreign sessions surface as
    /// not-found.
    async fn load_owned_session(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        session_id: i64,
    ) -> Result<PracticeSession> {
        let sessions = self.mongo.collection::<PracticeSession>("practice_sessions");
        let session = sessions
            .find_one(doc! { "_id": session_id })
            .session(&mut *tx)
            .await
            .context("Failed to load session")?
            .ok_or(SubmitError::SessionNotFound(session_id))?;

        if session.user_id != user_id {
            tracing::warn!(
                "User {} attempted to submit to session {} owned by user {}",
                user_id,
                session_id,
                session.user_id
            );
            return Err(SubmitError::SessionNotFound(session_id).into());
        }

        Ok(session)
    }

    async fn fetch_session_questions(
        &self,
        tx: &mut ClientSession,
        session_id: i64,
    ) -> Result<HashMap<i64, SessionQuestion>> {
        let collection = self.mongo.collection::<SessionQuestion>("session_questions");
        let mut cursor = collection
            .find(doc! { "session_id": session_id })
            .session(&mut *tx)
            .await
            .context("Failed to query session question links")?;

        let mut links = HashMap::new();
        while let Some(link) = cursor.next(tx).await {
            let link = link.context("Failed to decode session question link")?;
            links.insert(link.question_id, link);
        }
        Ok(links)
    }

    async fn fetch_questions(
        &self,
        tx: &mut ClientSession,
        question_ids: Vec<i64>,
    ) -> Result<HashMap<i64, Question>> {
        let collection = self.mongo.collection::<Question>("questions");
        let mut cursor = collection
            .find(doc! { "_id": { "$in": question_ids } })
            .session(&mut *tx)
            .await
            .context("Failed to query questions")?;

        let mut questions = HashMap::new();
        while let Some(question) = cursor.next(tx).await {
            let question = question.context("Failed to decode question")?;
            questions.insert(question.id, question);
        }
        Ok(questions)
    }

    /// Existing attempt count per question, used to number new attempts.
    async fn count_prior_attempts(
        &self,
        tx: &mut ClientSession,
        user_id: i64,
        session_id: i64,
    ) -> Result<HashMap<i64, u32>> {
        let collection = self.mongo.collection::<QuestionAttempt>("question_attempts");
        let mut cursor = collection
            .find(doc! { "user_id": user_id, "session_id": session_id })
            .session(&mut *tx)
            .await
            .context("Failed to query prior attempts")?;

        let mut counts: HashMap<i64, u32> = HashMap::new();
        while let Some(attempt) = cursor.next(tx).await {
            let attempt = attempt.context("Failed to decode attempt record")?;
            *counts.entry(attempt.question_id).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
