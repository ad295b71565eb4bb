//! Durable job state: versioned state document, append-only checkpoint log,
//! and resume manifest.

mod store;
mod types;

pub use store::{FileStateStore, StoreError, StoreResult};
pub use types::{
    Checkpoint, CheckpointEnvelope, JobManifest, JobState, JobStatus, SCHEMA_VERSION,
};
