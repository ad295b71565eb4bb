//! Cycle scheduler: the outer orchestration loop.
//!
//! Each cycle sweeps expired task locks, queries the backlog for eligible
//! work, prioritizes tasks carrying unresolved feedback, and runs the
//! pipeline for each selected task. Tasks are processed strictly one at a
//! time; cancellation is polled cooperatively at cycle and task boundaries.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::ReopenVerdict;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::guardrail::reasons;
use crate::pipeline::PipelineRunner;
use crate::selector::AgentSelector;
use crate::state::{
    Checkpoint, FileStateStore, JobManifest, JobState, JobStatus, StoreError,
};
use crate::summary::JobReport;
use crate::workers::{BacklogPatch, BacklogStatus, Collaborators, TaskFilters};

/// Per-run options supplied by the driving command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Name of the command starting (or resuming) the job. Resume rejects a
    /// mismatched name.
    pub command_name: String,
    pub filters: TaskFilters,
    /// Cumulative work-item limit; overrides the configured one when set.
    pub limit: Option<usize>,
    /// Resume an interrupted job instead of starting a new one.
    pub resume_job_id: Option<String>,
}

/// The outer scheduling loop for one job.
pub struct CycleScheduler {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    store: Arc<FileStateStore>,
    pipeline: PipelineRunner,
}

impl CycleScheduler {
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
        store: Arc<FileStateStore>,
        selector: AgentSelector,
    ) -> Self {
        let pipeline = PipelineRunner::new(config.clone(), selector, store.clone());
        Self {
            config,
            collaborators,
            store,
            pipeline,
        }
    }

    /// Run the job to its end and return the final summary. Collaborators
    /// are torn down on every exit path.
    pub async fn run(&mut self, options: RunOptions) -> OrchestratorResult<JobReport> {
        let mut warnings = Vec::new();
        let result = self.run_inner(&options, &mut warnings).await;
        warnings.extend(self.collaborators.close_all().await);

        let (job, locks_released) = result?;
        let dispatched = job
            .tasks
            .values()
            .filter(|p| p.attempts > 0 || p.status.is_terminal())
            .count();
        Ok(JobReport::from_state(
            &job,
            locks_released,
            dispatched,
            warnings,
            self.config.collect_ratings,
        ))
    }

    async fn run_inner(
        &mut self,
        options: &RunOptions,
        warnings: &mut Vec<String>,
    ) -> OrchestratorResult<(JobState, usize)> {
        let mut job = match &options.resume_job_id {
            Some(job_id) => {
                let mut job = self
                    .store
                    .load_for_resume(job_id, &options.command_name)?;
                info!(job = %job.job_id, cycle = job.cycle, "resuming job");
                job.status = JobStatus::Running;
                self.reopen_failed_tasks(&mut job, warnings).await?;
                self.store.save_state(&job)?;
                job
            }
            None => {
                let command_run_id =
                    format!("{}-{}", options.command_name, uuid::Uuid::new_v4());
                let job = JobState::new(command_run_id);
                let payload =
                    serde_json::to_value(&options.filters).map_err(StoreError::Json)?;
                self.store.save_manifest(&JobManifest::new(
                    job.job_id.clone(),
                    options.command_name.clone(),
                    payload,
                ))?;
                self.store.append_checkpoint(
                    &job.job_id,
                    Checkpoint::JobStarted {
                        command_run_id: job.command_run_id.clone(),
                    },
                )?;
                self.store.save_state(&job)?;
                info!(job = %job.job_id, "job started");
                job
            }
        };

        let limit = options.limit.or(self.config.limit);
        let mut locks_released = 0usize;

        'cycles: while job.cycle < self.config.max_cycles {
            if self.collaborators.control.is_cancelled(&job.job_id).await? {
                warnings.push("job cancelled externally; stopping dispatch".to_string());
                job.status = JobStatus::Cancelled;
                break;
            }

            let cycle = job.cycle + 1;
            job.cycle = cycle;

            // Crash-recovery hygiene before selecting work.
            let released = self.collaborators.backlog.cleanup_expired_locks().await?;
            if !released.is_empty() {
                info!(cycle, count = released.len(), "released expired task locks");
            }
            locks_released += released.len();

            let batch = self
                .collaborators
                .source
                .select_eligible(&options.filters)
                .await?;
            warnings.extend(batch.warnings);

            let queue = self.build_queue(&job, batch.ordered, cycle, limit);
            self.store.append_checkpoint(
                &job.job_id,
                Checkpoint::CycleStarted {
                    cycle,
                    eligible: queue.len(),
                    locks_released: released.len(),
                },
            )?;

            if queue.is_empty() {
                // A task cooling down still has unresolved feedback; the job
                // is not done, this cycle just has nothing to dispatch.
                let cooling = job
                    .tasks
                    .values()
                    .any(|p| p.has_pending_feedback() && p.in_cooldown(cycle));
                if cooling {
                    info!(cycle, "all pending tasks cooling down; advancing cycle");
                    continue;
                }
                warn!(cycle, "nothing eligible to dispatch; stopping early");
                warnings.push(format!(
                    "cycle {cycle}: nothing eligible to dispatch; stopping early"
                ));
                break;
            }

            info!(cycle, count = queue.len(), "dispatching tasks");

            for task_key in queue {
                if self.collaborators.control.is_cancelled(&job.job_id).await? {
                    warnings.push("job cancelled externally; stopping dispatch".to_string());
                    job.status = JobStatus::Cancelled;
                    break 'cycles;
                }

                match self
                    .pipeline
                    .run_task(&self.collaborators, &mut job, &task_key, cycle, warnings)
                    .await
                {
                    Ok(result) => debug!(task = %task_key, ?result, "task pass finished"),
                    Err(OrchestratorError::NoEligibleAgents { detail }) => {
                        // No workers at all: configuration error, abort the job.
                        warnings.push(format!("job aborted: {detail}"));
                        job.status = JobStatus::Failed;
                        break 'cycles;
                    }
                    Err(err) => return Err(err),
                }

                // Checkpoint the state document after every task.
                job.refresh_counts();
                self.store.save_state(&job)?;
            }
        }

        if job.status == JobStatus::Running {
            job.status = JobStatus::Completed;
        }
        job.refresh_counts();
        self.store.append_checkpoint(
            &job.job_id,
            Checkpoint::JobFinished {
                status: job.status,
                processed: job.processed_items,
                warnings: warnings.len(),
            },
        )?;
        self.store.save_state(&job)?;
        info!(job = %job.job_id, status = %job.status, "job finished");

        Ok((job, locks_released))
    }

    /// Order this cycle's work: tasks with unresolved feedback first, then
    /// newly discovered tasks subject to the cumulative work-item limit.
    fn build_queue(
        &self,
        job: &JobState,
        eligible: Vec<String>,
        cycle: u32,
        limit: Option<usize>,
    ) -> Vec<String> {
        let mut queue: Vec<String> = job
            .tasks
            .values()
            .filter(|p| p.has_pending_feedback() && !p.in_cooldown(cycle))
            .map(|p| p.task_key.clone())
            .collect();

        // The limit counts unique work items across the whole job, not per
        // cycle; re-dispatching a feedback task consumes nothing.
        let already_dispatched: BTreeSet<&String> = job
            .tasks
            .iter()
            .filter(|(_, p)| p.attempts > 0 || p.status.is_terminal())
            .map(|(key, _)| key)
            .collect();
        let mut new_budget = limit.map(|l| l.saturating_sub(already_dispatched.len()));

        for key in eligible {
            if queue.contains(&key) {
                continue;
            }
            if let Some(progress) = job.tasks.get(&key) {
                if progress.status.is_terminal() || progress.in_cooldown(cycle) {
                    continue;
                }
            }
            if !already_dispatched.contains(&key) {
                match &mut new_budget {
                    Some(0) => {
                        debug!(task = %key, "work-item limit reached; deferring");
                        continue;
                    }
                    Some(remaining) => *remaining -= 1,
                    None => {}
                }
            }
            queue.push(key);
        }

        queue
    }

    /// Resume-time reopening: every failed task is re-evaluated against the
    /// current attempt budget, deferring to the backlog on divergence.
    async fn reopen_failed_tasks(
        &mut self,
        job: &mut JobState,
        warnings: &mut Vec<String>,
    ) -> OrchestratorResult<()> {
        let failed_keys: Vec<String> = job
            .tasks
            .values()
            .filter(|p| p.status == crate::progress::TaskRunStatus::Failed)
            .map(|p| p.task_key.clone())
            .collect();

        for key in failed_keys {
            let backlog_completed = match self.collaborators.backlog.get_task(&key).await? {
                Some(record) => record.status == BacklogStatus::Done,
                None => false,
            };

            let Some(progress) = job.tasks.get(&key) else {
                continue;
            };
            let verdict = self
                .pipeline
                .classifier()
                .reopen_verdict(progress, backlog_completed);
            let prior_error = progress.last_error.clone();

            match verdict {
                ReopenVerdict::AlreadyCompleted => {
                    warn!(task = %key, "backlog shows completion; local failure discarded");
                    warnings.push(format!(
                        "task {key}: backlog already shows completion; marked completed"
                    ));
                    let progress = job.task_mut(&key);
                    progress.last_escalation_reason =
                        Some(reasons::COMPLETED_IN_DB.to_string());
                    progress.mark_completed();
                }
                ReopenVerdict::Reopen => {
                    info!(task = %key, "reopening failed task under the current budget");
                    job.task_mut(&key).reopen();
                    self.collaborators
                        .backlog
                        .update_task(&key, BacklogPatch::status(BacklogStatus::InProgress))
                        .await?;
                    self.store.append_checkpoint(
                        &job.job_id,
                        Checkpoint::TaskReopened {
                            task_key: key.clone(),
                            prior_error,
                        },
                    )?;
                }
                ReopenVerdict::ConfirmFailed => {
                    job.task_mut(&key)
                        .mark_failed(reasons::MAX_ITERATIONS_REACHED);
                }
            }
        }

        Ok(())
    }
}
