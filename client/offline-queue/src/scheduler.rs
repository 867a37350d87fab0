use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::network::NetworkMonitor;
use crate::store::{StoreError, SubmissionStore};
use crate::submission::{QueuedSubmission, SubmissionStatus, TimingData};
use crate::transport::SubmissionTransport;

/// A submission that has failed this many times is terminal: it stays on
/// disk for manual inspection but is never retried again.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(2000);
/// Wait for a freshly restored connection to settle before draining.
pub const RECONNECT_STABILIZATION: Duration = Duration::from_millis(1500);
/// Pacing between entries within one drain: after a reconnect many
/// sessions may have queued submissions, and flushing them back-to-back
/// would hammer a server that is already absorbing everyone's backlog.
pub const INTER_SUBMISSION_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone)]
pub enum QueueEvent {
    Delivered {
        session_id: i64,
    },
    /// Retries are exhausted; the UI should warn the user their results
    /// could not be saved.
    PermanentlyFailed {
        session_id: i64,
        retry_count: u32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("session id must be positive")]
    InvalidSessionId,
    #[error("submission must contain at least one answer")]
    EmptyAnswers,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Drives queued submissions to the server: sequential, backoff-governed,
/// at-least-once. Dependencies (store, transport, clock, connectivity) are
/// injected, so delivery failures, time and network flaps are all
/// simulatable in tests.
pub struct SubmissionQueue {
    store: SubmissionStore,
    transport: Arc<dyn SubmissionTransport>,
    clock: Arc<dyn Clock>,
    network: NetworkMonitor,
    draining: AtomicBool,
    events: broadcast::Sender<QueueEvent>,
}

impl SubmissionQueue {
    pub fn new(
        store: SubmissionStore,
        transport: Arc<dyn SubmissionTransport>,
        clock: Arc<dyn Clock>,
        network: NetworkMonitor,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(32);
        Arc::new(Self {
            store,
            transport,
            clock,
            network,
            draining: AtomicBool::new(false),
            events,
        })
    }

    /// Listener hook for delivery outcomes. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Persist a submission for the session, replacing any prior entry
    /// (last write wins at the client). If the process is online, a drain
    /// is triggered fire-and-forget.
    pub async fn enqueue(
        self: &Arc<Self>,
        session_id: i64,
        answers: HashMap<i64, serde_json::Value>,
        timing_data: Option<TimingData>,
    ) -> Result<(), QueueError> {
        if session_id <= 0 {
            return Err(QueueError::InvalidSessionId);
        }
        if answers.is_empty() {
            return Err(QueueError::EmptyAnswers);
        }

        let submission =
            QueuedSubmission::new(session_id, answers, timing_data, self.clock.now());
        self.store.save(&submission).await?;

        tracing::info!("Queued submission for session {}", session_id);

        if self.network.is_online() {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.process_queue().await;
            });
        }

        Ok(())
    }

    /// Drain the queue once. No-op while another drain is running or while
    /// offline. Entries are processed strictly sequentially, oldest first,
    /// with a fixed delay between them.
    pub async fn process_queue(self: &Arc<Self>) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Queue drain already in progress; skipping");
            return;
        }

        self.drain().await;
        self.draining.store(false, Ordering::SeqCst);
    }

    async fn drain(&self) {
        if !self.network.is_online() {
            tracing::debug!("Offline; not draining queue");
            return;
        }

        let entries = match self.store.list_pending().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to list queued submissions: {}", e);
                return;
            }
        };

        let now = self.clock.now();
        let mut first = true;
        for entry in entries {
            let due = match entry.status {
                SubmissionStatus::Pending => true,
                SubmissionStatus::Failed => should_retry_at(&entry, now),
                // In-flight or already delivered entries are never picked
                // up by a drain.
                SubmissionStatus::Submitting | SubmissionStatus::Completed => false,
            };
            if !due {
                continue;
            }

            // Connectivity dropped mid-drain: stop starting new attempts;
            // the rest of the queue waits for the next online transition.
            if !self.network.is_online() {
                tracing::info!("Went offline mid-drain; deferring remaining submissions");
                break;
            }

            if !first {
                tokio::time::sleep(INTER_SUBMISSION_DELAY).await;
            }
            first = false;

            self.process_submission(entry).await;
        }
    }

    /// One delivery attempt: pending/failed -> submitting -> completed or
    /// failed. Every transition is persisted before the next step.
    async fn process_submission(&self, mut submission: QueuedSubmission) {
        let session_id = submission.session_id;

        submission.status = SubmissionStatus::Submitting;
        submission.last_attempt_at = Some(self.clock.now());
        if let Err(e) = self.store.save(&submission).await {
            tracing::error!(
                "Failed to persist submitting state for session {}: {}",
                session_id,
                e
            );
            return;
        }

        match self.transport.deliver(&submission).await {
            Ok(_) => {
                submission.status = SubmissionStatus::Completed;
                if let Err(e) = self.store.remove(session_id).await {
                    tracing::warn!(
                        "Delivered session {} but failed to remove queue entry: {}",
                        session_id,
                        e
                    );
                }
                tracing::info!(
                    "Submission for session {} delivered (attempt {})",
                    session_id,
                    submission.retry_count + 1
                );
                let _ = self.events.send(QueueEvent::Delivered { session_id });
            }
            Err(e) => {
                submission.retry_count += 1;
                submission.status = SubmissionStatus::Failed;

                if submission.retry_count >= MAX_RETRY_ATTEMPTS {
                    tracing::error!(
                        "Submission for session {} permanently failed after {} attempts: {}",
                        session_id,
                        submission.retry_count,
                        e
                    );
                    if let Err(save_err) = self.store.save(&submission).await {
                        tracing::error!(
                            "Failed to persist terminal state for session {}: {}",
                            session_id,
                            save_err
                        );
                    }
                    let _ = self.events.send(QueueEvent::PermanentlyFailed {
                        session_id,
                        retry_count: submission.retry_count,
                    });
                } else {
                    tracing::warn!(
                        "Delivery failed for session {} (attempt {} of {}): {}",
                        session_id,
                        submission.retry_count,
                        MAX_RETRY_ATTEMPTS,
                        e
                    );
                    if let Err(save_err) = self.store.save(&submission).await {
                        tracing::error!(
                            "Failed to persist retry state for session {}: {}",
                            session_id,
                            save_err
                        );
                    }
                }
            }
        }
    }

    /// Wire connectivity transitions to drains: when the connection comes
    /// back, wait for it to stabilize, then flush. Going offline triggers
    /// nothing; an in-flight attempt fails on its own and is retried.
    pub fn spawn_network_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut rx = self.network.subscribe();

        tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    tracing::info!("Connectivity restored; draining after stabilization delay");
                    tokio::time::sleep(RECONNECT_STABILIZATION).await;
                    queue.process_queue().await;
                }
                was_online = online;
            }
        })
    }
}

/// Backoff window before retry number `retry_count + 1`: doubles with every
/// failure, so the wait before retry k+1 is always strictly longer than the
/// wait before retry k.
pub fn retry_delay(retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(16);
    BASE_RETRY_DELAY * 2u32.saturating_pow(exponent)
}

/// Whether a failed submission is due for another attempt at `now`. False
/// forever once the retry cap is reached.
pub fn should_retry_at(submission: &QueuedSubmission, now: DateTime<Utc>) -> bool {
    if submission.retry_count >= MAX_RETRY_ATTEMPTS {
        return false;
    }
    let Some(last_attempt) = submission.last_attempt_at else {
        return true;
    };

    let elapsed_ms = now.signed_duration_since(last_attempt).num_milliseconds();
    elapsed_ms >= retry_delay(submission.retry_count).as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn failed_submission(retry_count: u32, last_attempt_at: Option<DateTime<Utc>>) -> QueuedSubmission {
        QueuedSubmission {
            session_id: 1,
            answers: HashMap::from([(1, serde_json::json!("a"))]),
            timing_data: None,
            timestamp: Utc::now(),
            status: SubmissionStatus::Failed,
            retry_count,
            last_attempt_at,
        }
    }

    #[test]
    fn retry_delay_is_strictly_increasing() {
        for k in 1..MAX_RETRY_ATTEMPTS {
            assert!(retry_delay(k + 1) > retry_delay(k));
        }
        assert_eq!(retry_delay(1), BASE_RETRY_DELAY);
        assert_eq!(retry_delay(2), BASE_RETRY_DELAY * 2);
        assert_eq!(retry_delay(3), BASE_RETRY_DELAY * 4);
    }

    #[test]
    fn should_retry_respects_the_cap() {
        let now = Utc::now();
        let old = now - ChronoDuration::hours(1);
        assert!(!should_retry_at(&failed_submission(MAX_RETRY_ATTEMPTS, Some(old)), now));
        assert!(!should_retry_at(
            &failed_submission(MAX_RETRY_ATTEMPTS + 3, Some(old)),
            now
        ));
    }

    #[test]
    fn should_retry_without_prior_attempt() {
        let now = Utc::now();
        assert!(should_retry_at(&failed_submission(1, None), now));
    }

    #[test]
    fn should_retry_waits_out_the_backoff_window() {
        let now = Utc::now();
        let just_failed = failed_submission(1, Some(now - ChronoDuration::milliseconds(500)));
        assert!(!should_retry_at(&just_failed, now));

        let waited = failed_submission(1, Some(now - ChronoDuration::milliseconds(2000)));
        assert!(should_retry_at(&waited, now));

        // Second retry needs twice the wait.
        let second = failed_submission(2, Some(now - ChronoDuration::milliseconds(2000)));
        assert!(!should_retry_at(&second, now));
        let second_waited = failed_submission(2, Some(now - ChronoDuration::milliseconds(4000)));
        assert!(should_retry_at(&second_waited, now));
    }
}
