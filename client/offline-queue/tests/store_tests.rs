use chrono::{Duration, Utc};
use practicedeck_offline_queue::{QueuedSubmission, SubmissionStatus, SubmissionStore};
use std::collections::HashMap;

fn submission(session_id: i64, answer: &str) -> QueuedSubmission {
    QueuedSubmission::new(
        session_id,
        HashMap::from([(1, serde_json::json!(answer))]),
        None,
        Utc::now(),
    )
}

#[tokio::test]
async fn save_overwrites_prior_entry_for_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubmissionStore::open(dir.path()).await.unwrap();

    store.save(&submission(7, "first")).await.unwrap();
    store.save(&submission(7, "second")).await.unwrap();

    let entries = store.list_pending().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].answers[&1], serde_json::json!("second"));
}

#[tokio::test]
async fn list_pending_orders_by_creation_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubmissionStore::open(dir.path()).await.unwrap();

    let base = Utc::now();
    for (session_id, offset) in [(3, 20), (1, 0), (2, 10)] {
        let mut entry = submission(session_id, "x");
        entry.timestamp = base + Duration::seconds(offset);
        store.save(&entry).await.unwrap();
    }

    let entries = store.list_pending().await.unwrap();
    let order: Vec<i64> = entries.iter().map(|e| e.session_id).collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[tokio::test]
async fn corrupt_entry_is_dropped_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubmissionStore::open(dir.path()).await.unwrap();

    store.save(&submission(1, "good")).await.unwrap();
    let corrupt_path = dir.path().join("submission-2.json");
    tokio::fs::write(&corrupt_path, b"{ not json").await.unwrap();

    let entries = store.list_pending().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].session_id, 1);

    // The corrupt file can never be recovered; it is gone, not retried.
    assert!(!corrupt_path.exists());
}

#[tokio::test]
async fn state_transitions_rewrite_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubmissionStore::open(dir.path()).await.unwrap();

    let mut entry = submission(5, "x");
    store.save(&entry).await.unwrap();

    entry.status = SubmissionStatus::Failed;
    entry.retry_count = 2;
    store.save(&entry).await.unwrap();

    let loaded = store.load(5).await.unwrap().unwrap();
    assert_eq!(loaded.status, SubmissionStatus::Failed);
    assert_eq!(loaded.retry_count, 2);
    assert_eq!(store.list_pending().await.unwrap().len(), 1);
}

#[tokio::test]
async fn remove_deletes_entry_and_tolerates_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = SubmissionStore::open(dir.path()).await.unwrap();

    store.save(&submission(9, "x")).await.unwrap();
    store.remove(9).await.unwrap();
    assert!(store.load(9).await.unwrap().is_none());

    // Removing again is not an error.
    store.remove(9).await.unwrap();
}
