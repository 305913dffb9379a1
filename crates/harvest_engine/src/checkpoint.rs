use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use harvest_log::{harvest_debug, harvest_info, harvest_warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::persist::{ensure_output_dir, ArtifactStore, PersistError};

/// Directory under the data directory holding one record file per key.
pub const CHECKPOINT_DIR: &str = "checkpoints";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("failed to encode completion record: {0}")]
    Encode(String),
    #[error("checkpoint index poisoned")]
    Poisoned,
    #[error("checkpoint write interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionOutcome {
    Success,
    PermanentError { reason: String },
}

/// Durable proof that a unit reached a terminal outcome. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub key: String,
    pub outcome: CompletionOutcome,
    pub completed_utc: DateTime<Utc>,
}

impl CompletionRecord {
    pub fn success(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: CompletionOutcome::Success,
            completed_utc: Utc::now(),
        }
    }

    pub fn permanent_error(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: CompletionOutcome::PermanentError {
                reason: reason.into(),
            },
            completed_utc: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == CompletionOutcome::Success
    }
}

/// Filesystem-backed set of completed idempotency keys.
///
/// Records are loaded once at open and kept in an in-memory index; writes go
/// through the index lock so concurrent workers never interleave on disk.
#[derive(Debug)]
pub struct CheckpointStore {
    files: ArtifactStore,
    index: Mutex<HashMap<String, CompletionRecord>>,
}

impl CheckpointStore {
    pub fn open(data_dir: &Path) -> Result<Self, CheckpointError> {
        let dir = data_dir.join(CHECKPOINT_DIR);
        ensure_output_dir(&dir)?;

        let mut index = HashMap::new();
        for entry in fs::read_dir(&dir).map_err(PersistError::Io)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    harvest_warn!("Skipping unreadable checkpoint entry in {:?}: {}", dir, err);
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("ron") {
                continue;
            }
            match read_record(&path) {
                Some(record) => {
                    index.insert(record.key.clone(), record);
                }
                None => harvest_warn!("Ignoring unreadable completion record {:?}", path),
            }
        }
        harvest_info!("Loaded {} completion records from {:?}", index.len(), dir);

        Ok(Self {
            files: ArtifactStore::new(dir),
            index: Mutex::new(index),
        })
    }

    /// Like [`CheckpointStore::open`] but creates nothing: `None` when no run
    /// has written records under `data_dir` yet.
    pub fn open_existing(data_dir: &Path) -> Result<Option<Self>, CheckpointError> {
        if !data_dir.join(CHECKPOINT_DIR).is_dir() {
            return Ok(None);
        }
        Self::open(data_dir).map(Some)
    }

    pub fn get(&self, key: &str) -> Option<CompletionRecord> {
        self.index.lock().ok()?.get(key).cloned()
    }

    pub fn is_done(&self, key: &str) -> bool {
        self.index
            .lock()
            .map(|index| index.contains_key(key))
            .unwrap_or(false)
    }

    /// Persist `record` unless one already exists for its key; returns the
    /// record that is on disk afterwards.
    pub fn mark(&self, record: CompletionRecord) -> Result<CompletionRecord, CheckpointError> {
        let mut index = self.index.lock().map_err(|_| CheckpointError::Poisoned)?;
        if let Some(existing) = index.get(&record.key) {
            return Ok(existing.clone());
        }

        let relative = record_filename(&record.key);
        let content = ron::ser::to_string_pretty(&record, ron::ser::PrettyConfig::new())
            .map_err(|err| CheckpointError::Encode(err.to_string()))?;
        let stored = if self.files.write_new(&relative, content.as_bytes())? {
            record
        } else {
            // Another process got there first; its record wins.
            read_record(&self.files.path_of(&relative)).unwrap_or(record)
        };
        harvest_debug!("Marked {} as {:?}", stored.key, stored.outcome);
        index.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    /// Number of (successful, permanently failed) records.
    pub fn counts(&self) -> (usize, usize) {
        let Ok(index) = self.index.lock() else {
            return (0, 0);
        };
        let successes = index.values().filter(|record| record.is_success()).count();
        (successes, index.len() - successes)
    }
}

fn record_filename(key: &str) -> PathBuf {
    let digest = Sha256::digest(key.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    PathBuf::from(format!("{hex}.ron"))
}

fn read_record(path: &Path) -> Option<CompletionRecord> {
    let content = fs::read_to_string(path).ok()?;
    ron::from_str(&content).ok()
}
