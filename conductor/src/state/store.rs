//! File-backed job state store.
//!
//! Layout per job under the store root:
//!
//! ```text
//! <root>/<job_id>/state.json        pretty-printed state document
//! <root>/<job_id>/manifest.json     resume manifest
//! <root>/<job_id>/checkpoints.jsonl append-only checkpoint log
//! ```
//!
//! Checkpoints are appended in strict chronological order and never
//! rewritten; resume reads them only for audit, the state document is the
//! snapshot that gets rehydrated.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use super::types::{Checkpoint, CheckpointEnvelope, JobManifest, JobState, SCHEMA_VERSION};

/// Error type for state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported state schema version {found} (expected {expected})")]
    UnsupportedSchema { found: u32, expected: u32 },

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("resume rejected: job was started by command '{expected}', not '{actual}'")]
    CommandMismatch { expected: String, actual: String },

    #[error("sequence lock poisoned")]
    LockPoisoned,
}

/// Result type for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// JSON-file state store, one directory per job.
pub struct FileStateStore {
    root: PathBuf,
    /// Next checkpoint sequence per job, initialized lazily from the log.
    next_seq: Mutex<HashMap<String, u64>>,
}

impl FileStateStore {
    /// Open or create a store rooted at the given directory.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            next_seq: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    fn state_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("state.json")
    }

    fn manifest_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("manifest.json")
    }

    fn checkpoint_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("checkpoints.jsonl")
    }

    // =========================================================================
    // State document
    // =========================================================================

    /// Persist the state document for a job.
    pub fn save_state(&self, state: &JobState) -> StoreResult<()> {
        fs::create_dir_all(self.job_dir(&state.job_id))?;
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.state_path(&state.job_id), json)?;
        Ok(())
    }

    /// Load the state document for a job, rejecting unknown schema versions.
    pub fn load_state(&self, job_id: &str) -> StoreResult<Option<JobState>> {
        let path = self.state_path(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        let state: JobState = serde_json::from_str(&json)?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: state.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(Some(state))
    }

    // =========================================================================
    // Manifest
    // =========================================================================

    pub fn save_manifest(&self, manifest: &JobManifest) -> StoreResult<()> {
        fs::create_dir_all(self.job_dir(&manifest.job_id))?;
        let json = serde_json::to_string_pretty(manifest)?;
        fs::write(self.manifest_path(&manifest.job_id), json)?;
        Ok(())
    }

    pub fn load_manifest(&self, job_id: &str) -> StoreResult<Option<JobManifest>> {
        let path = self.manifest_path(job_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Load a job for resume, validating the manifest against the resuming
    /// command's name.
    pub fn load_for_resume(&self, job_id: &str, command_name: &str) -> StoreResult<JobState> {
        let manifest = self
            .load_manifest(job_id)?
            .ok_or_else(|| StoreError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if manifest.command_name != command_name {
            return Err(StoreError::CommandMismatch {
                expected: manifest.command_name,
                actual: command_name.to_string(),
            });
        }
        self.load_state(job_id)?.ok_or_else(|| StoreError::JobNotFound {
            job_id: job_id.to_string(),
        })
    }

    // =========================================================================
    // Checkpoint log
    // =========================================================================

    /// Append one checkpoint; returns its sequence number.
    pub fn append_checkpoint(&self, job_id: &str, checkpoint: Checkpoint) -> StoreResult<u64> {
        fs::create_dir_all(self.job_dir(job_id))?;

        let seq = {
            let mut seqs = self.next_seq.lock().map_err(|_| StoreError::LockPoisoned)?;
            let next = match seqs.get(job_id) {
                Some(next) => *next,
                None => self.count_checkpoints(job_id)? + 1,
            };
            seqs.insert(job_id.to_string(), next + 1);
            next
        };

        let envelope = CheckpointEnvelope {
            schema_version: SCHEMA_VERSION,
            seq,
            timestamp: Utc::now(),
            checkpoint,
        };
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.checkpoint_path(job_id))?;
        file.write_all(line.as_bytes())?;

        debug!(job = %job_id, seq, kind = envelope.checkpoint.kind(), "checkpoint appended");
        Ok(seq)
    }

    fn count_checkpoints(&self, job_id: &str) -> StoreResult<u64> {
        let path = self.checkpoint_path(job_id);
        if !path.exists() {
            return Ok(0);
        }
        let reader = BufReader::new(fs::File::open(path)?);
        Ok(reader.lines().count() as u64)
    }

    /// Read the full checkpoint log in append order.
    pub fn read_checkpoints(&self, job_id: &str) -> StoreResult<Vec<CheckpointEnvelope>> {
        let path = self.checkpoint_path(job_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut envelopes = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope: CheckpointEnvelope = serde_json::from_str(&line)?;
            if envelope.schema_version != SCHEMA_VERSION {
                return Err(StoreError::UnsupportedSchema {
                    found: envelope.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// List job ids present in the store.
    pub fn list_jobs(&self) -> StoreResult<Vec<String>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    jobs.push(name);
                }
            }
        }
        jobs.sort();
        Ok(jobs)
    }
}
