//! Persisted job-state types.
//!
//! The state document is a derived cache of the authoritative backlog and
//! must defer to it on any conflict. Checkpoints are an append-only audit
//! stream: resume replays them to reconstruct state, never to re-execute
//! side effects.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::progress::TaskProgress;

/// Version of the persisted state and checkpoint schema. Unknown versions
/// are rejected on load rather than coerced.
pub const SCHEMA_VERSION: u32 = 1;

/// Lifecycle state of an orchestration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One orchestration run over a set of backlog tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub schema_version: u32,
    pub job_id: String,
    /// Identifier of the command run that started this job.
    pub command_run_id: String,
    /// Last cycle the scheduler entered (0 before the first cycle).
    pub cycle: u32,
    pub status: JobStatus,
    pub total_items: u32,
    pub processed_items: u32,
    /// Task key → progress record; entries are created lazily and never
    /// deleted, only moved to a terminal status.
    pub tasks: BTreeMap<String, TaskProgress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(command_run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            job_id: uuid::Uuid::new_v4().to_string(),
            command_run_id: command_run_id.into(),
            cycle: 0,
            status: JobStatus::Running,
            total_items: 0,
            processed_items: 0,
            tasks: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fetch or lazily create the progress record for a task.
    pub fn task_mut(&mut self, task_key: &str) -> &mut TaskProgress {
        self.updated_at = Utc::now();
        self.tasks
            .entry(task_key.to_string())
            .or_insert_with(|| TaskProgress::new(task_key))
    }

    /// Count of tasks in a terminal status.
    pub fn terminal_count(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count() as u32
    }

    /// Refresh the item counters from the task map.
    pub fn refresh_counts(&mut self) {
        self.total_items = self.tasks.len() as u32;
        self.processed_items = self.terminal_count();
        self.touch();
    }
}

/// Resume manifest; validates that a resume request matches the command
/// that originally started the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: String,
    pub command_name: String,
    /// Last-known request payload (filters, limits) for operator reference.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JobManifest {
    pub fn new(
        job_id: impl Into<String>,
        command_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            command_name: command_name.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// One durable audit record, appended after each meaningful transition and
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    JobStarted {
        command_run_id: String,
    },
    CycleStarted {
        cycle: u32,
        eligible: usize,
        locks_released: usize,
    },
    PhaseCompleted {
        task_key: String,
        phase: Phase,
        outcome: String,
        agent: Option<String>,
        attempt: u32,
    },
    TaskCompleted {
        task_key: String,
        attempts: u32,
    },
    TaskFailed {
        task_key: String,
        reason: String,
        attempts: u32,
    },
    TaskSkipped {
        task_key: String,
        reason: String,
    },
    TaskReopened {
        task_key: String,
        prior_error: Option<String>,
    },
    /// Accepted-plan artifact recorded on a fully successful pass, kept for
    /// future prompting reuse.
    GoldenExample {
        task_key: String,
        summary: String,
    },
    /// Durable note written when a task that previously regressed to an
    /// earlier phase finally completes.
    LessonLearned {
        task_key: String,
        regression_reason: String,
        note: String,
    },
    JobFinished {
        status: JobStatus,
        processed: u32,
        warnings: usize,
    },
}

impl Checkpoint {
    /// Short label for logs and the inspection CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::CycleStarted { .. } => "cycle_started",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskSkipped { .. } => "task_skipped",
            Self::TaskReopened { .. } => "task_reopened",
            Self::GoldenExample { .. } => "golden_example",
            Self::LessonLearned { .. } => "lesson_learned",
            Self::JobFinished { .. } => "job_finished",
        }
    }
}

/// Versioned wrapper around a checkpoint, with a per-job monotonic sequence
/// number so replay order is explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub schema_version: u32,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_lazy_tasks() {
        let mut job = JobState::new("backlog-run-1");
        assert_eq!(job.status, JobStatus::Running);

        job.task_mut("PROJ-1").attempts = 2;
        job.task_mut("PROJ-1").mark_completed();
        job.task_mut("PROJ-2");
        job.refresh_counts();

        assert_eq!(job.total_items, 2);
        assert_eq!(job.processed_items, 1);
    }

    #[test]
    fn test_checkpoint_tagging() {
        let envelope = CheckpointEnvelope {
            schema_version: SCHEMA_VERSION,
            seq: 7,
            timestamp: Utc::now(),
            checkpoint: Checkpoint::PhaseCompleted {
                task_key: "PROJ-1".to_string(),
                phase: Phase::Review,
                outcome: "approve".to_string(),
                agent: Some("agent-r".to_string()),
                attempt: 1,
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"kind\":\"phase_completed\""), "JSON: {json}");
        assert!(json.contains("\"seq\":7"), "JSON: {json}");

        let restored: CheckpointEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.checkpoint.kind(), "phase_completed");
    }

    #[test]
    fn test_job_status_terminality() {
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
