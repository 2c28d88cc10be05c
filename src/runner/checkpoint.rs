//! Resume checkpoints for long video jobs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Result;

/// On-disk progress record, one per task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub task_id: String,
    /// Hex SHA-1 of the task configuration; a mismatch invalidates the
    /// checkpoint.
    pub config_hash: String,
    pub last_completed_frame: i64,
    pub total_frames: i64,
    pub output_path: String,
}

/// Loads and persists checkpoint files under a fixed directory
/// (`./checkpoints/<task_id>.ckpt` by default).
#[derive(Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.ckpt"))
    }

    /// Loads the checkpoint for `task_id` if it exists and its fingerprint
    /// matches. A mismatching record is discarded so processing restarts
    /// from the first frame.
    #[must_use]
    pub fn load(&self, task_id: &str, config_hash: &str) -> Option<CheckpointRecord> {
        let path = self.record_path(task_id);
        let text = fs::read_to_string(&path).ok()?;
        let record: CheckpointRecord = match serde_json::from_str(&text) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Discarding unreadable checkpoint {}: {err}", path.display());
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if record.config_hash != config_hash {
            log::info!(
                "Checkpoint for task {task_id} was written by a different configuration; restarting from frame 0"
            );
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(record)
    }

    /// Persists `record` atomically (write-temp-then-rename). Checkpoints
    /// only ever advance: a record older than the stored one is skipped.
    pub fn save(&self, record: &CheckpointRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.record_path(&record.task_id);

        if let Some(existing) = self.load(&record.task_id, &record.config_hash) {
            if existing.last_completed_frame >= record.last_completed_frame {
                return Ok(());
            }
        }

        let temp = self
            .dir
            .join(format!("{}.{}.tmp", record.task_id, Uuid::new_v4()));
        fs::write(&temp, serde_json::to_string_pretty(record)?)?;
        fs::rename(&temp, &path)?;
        Ok(())
    }

    /// Removes the checkpoint after a successful run.
    pub fn cleanup(&self, task_id: &str) {
        let path = self.record_path(task_id);
        if path.exists() {
            let _ = fs::remove_file(path);
        }
    }

    /// Directory checkpoints are stored under.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
