use std::path::{Path, PathBuf};
use tokio::fs;

use crate::submission::QueuedSubmission;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode submission: {0}")]
    Encode(#[from] serde_json::Error),
}

/// File-backed durable store: one JSON file per session in a dedicated
/// directory. Entries survive process restarts; writing an existing
/// session's key overwrites it, so the store holds at most one entry per
/// session at any time.
pub struct SubmissionStore {
    dir: PathBuf,
}

const ENTRY_PREFIX: &str = "submission-";
const ENTRY_SUFFIX: &str = ".json";

impl SubmissionStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn entry_path(&self, session_id: i64) -> PathBuf {
        self.dir
            .join(format!("{}{}{}", ENTRY_PREFIX, session_id, ENTRY_SUFFIX))
    }

    /// Persist a submission under its session key, replacing any prior
    /// entry. Used both for enqueueing and for every state transition.
    /// Writes go through a temp file + rename so a crash mid-write cannot
    /// leave a half-written entry behind.
    pub async fn save(&self, submission: &QueuedSubmission) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(submission)?;
        let path = self.entry_path(submission.session_id);
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, &payload).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn load(&self, session_id: i64) -> Result<Option<QueuedSubmission>, StoreError> {
        let path = self.entry_path(session_id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored submissions, ordered by ascending creation timestamp.
    ///
    /// An entry that no longer deserializes is corrupt and can never be
    /// recovered; it is logged, deleted and excluded from the result
    /// rather than surfaced as an error.
    pub async fn list_pending(&self) -> Result<Vec<QueuedSubmission>, StoreError> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(ENTRY_PREFIX) || !name.ends_with(ENTRY_SUFFIX) {
                continue;
            }

            let path = entry.path();
            let bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to read queue entry {:?}: {}", path, e);
                    continue;
                }
            };

            match serde_json::from_slice::<QueuedSubmission>(&bytes) {
                Ok(submission) => entries.push(submission),
                Err(e) => {
                    tracing::warn!("Dropping corrupt queue entry {:?}: {}", path, e);
                    if let Err(remove_err) = fs::remove_file(&path).await {
                        tracing::warn!(
                            "Failed to remove corrupt queue entry {:?}: {}",
                            path,
                            remove_err
                        );
                    }
                }
            }
        }

        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.session_id.cmp(&b.session_id))
        });
        Ok(entries)
    }

    /// Delete the stored entry. Called after a confirmed delivery.
    pub async fn remove(&self, session_id: i64) -> Result<(), StoreError> {
        match fs::remove_file(self.entry_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
