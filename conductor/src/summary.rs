//! Final job report types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::progress::TaskRunStatus;
use crate::state::{JobState, JobStatus};

/// Terminal summary line for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_key: String,
    pub status: TaskRunStatus,
    pub attempts: u32,
    /// Human-readable reason, present for every non-completed task.
    pub reason: Option<String>,
    /// Per-phase quality ratings, when rating collection was requested.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ratings: BTreeMap<Phase, u8>,
}

/// The final job summary returned when the scheduler loop ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub cycles_run: u32,
    /// Unique work items dispatched across all cycles.
    pub dispatched: usize,
    /// Expired task locks released during crash-recovery sweeps.
    pub locks_released: usize,
    pub tasks: Vec<TaskReport>,
    /// Everything that went sideways but did not abort the job.
    pub warnings: Vec<String>,
}

impl JobReport {
    /// Build the report from the final job state.
    pub fn from_state(
        job: &JobState,
        locks_released: usize,
        dispatched: usize,
        warnings: Vec<String>,
        include_ratings: bool,
    ) -> Self {
        let tasks = job
            .tasks
            .values()
            .map(|progress| TaskReport {
                task_key: progress.task_key.clone(),
                status: progress.status,
                attempts: progress.attempts,
                reason: match progress.status {
                    TaskRunStatus::Completed => None,
                    _ => progress
                        .last_error
                        .clone()
                        .or_else(|| progress.last_escalation_reason.clone())
                        .or(Some("not dispatched".to_string())),
                },
                ratings: if include_ratings {
                    progress.phase_ratings.clone()
                } else {
                    BTreeMap::new()
                },
            })
            .collect();

        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            cycles_run: job.cycle,
            dispatched,
            locks_released,
            tasks,
            warnings,
        }
    }
}

impl std::fmt::Display for JobReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Job {} ({}) after {} cycle(s): {} task(s), {} dispatched",
            self.job_id,
            self.status,
            self.cycles_run,
            self.tasks.len(),
            self.dispatched
        )?;
        if self.locks_released > 0 {
            writeln!(f, "Released {} expired lock(s)", self.locks_released)?;
        }
        for task in &self.tasks {
            match &task.reason {
                Some(reason) => writeln!(
                    f,
                    "  {} {} ({} attempt(s)): {}",
                    task.task_key, task.status, task.attempts, reason
                )?,
                None => writeln!(
                    f,
                    "  {} {} ({} attempt(s))",
                    task.task_key, task.status, task.attempts
                )?,
            }
            for (phase, rating) in &task.ratings {
                writeln!(f, "    {phase} rating: {rating}/10")?;
            }
        }
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}
