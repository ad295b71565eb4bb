//! Pipeline runner: drives one task through produce → review → qa.
//!
//! The runner consults the authoritative backlog record before dispatching
//! anything (phases already satisfied are skipped, terminal records never
//! enter a phase), picks a worker per attempt via the candidate selector,
//! and applies escalation directives from the classifier. Every phase
//! attempt updates the task's progress record and appends a checkpoint.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::EscalationClassifier;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::guardrail::{is_placeholder_key, reasons, FailureReason};
use crate::machine::{PhaseMachine, TaskPhaseState};
use crate::phase::{Phase, PhaseOutcome, ReviewDecision, VerifyVerdict};
use crate::progress::TaskRunStatus;
use crate::selector::{AgentSelector, SelectionRequest};
use crate::state::{Checkpoint, FileStateStore, JobState};
use crate::workers::{BacklogPatch, BacklogStatus, BacklogTask, Collaborators, PhaseRequest};

/// Where a task ended up after one scheduler visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPassResult {
    Completed,
    Failed,
    Skipped,
    /// Retry deferred to a later cycle.
    Cooldown,
}

/// Result of a single phase attempt.
enum StepResult {
    Advance,
    Failed {
        failure: FailureReason,
        agent: Option<String>,
        detail: Option<String>,
    },
}

/// Drives a single task to completion, terminal failure, or a per-cycle
/// stopping point.
pub struct PipelineRunner {
    config: OrchestratorConfig,
    classifier: EscalationClassifier,
    selector: AgentSelector,
    store: Arc<FileStateStore>,
}

impl PipelineRunner {
    pub fn new(
        config: OrchestratorConfig,
        selector: AgentSelector,
        store: Arc<FileStateStore>,
    ) -> Self {
        let classifier = EscalationClassifier::new(config.classifier());
        Self {
            config,
            classifier,
            selector,
            store,
        }
    }

    pub fn classifier(&self) -> &EscalationClassifier {
        &self.classifier
    }

    /// Run one task. `cycle` is the scheduler cycle dispatching it.
    pub async fn run_task(
        &mut self,
        collab: &Collaborators,
        job: &mut JobState,
        task_key: &str,
        cycle: u32,
        warnings: &mut Vec<String>,
    ) -> OrchestratorResult<TaskPassResult> {
        let job_id = job.job_id.clone();

        if is_placeholder_key(task_key) {
            warn!(task = %task_key, "synthetic run marker; not a work item");
            warnings.push(format!(
                "task {task_key} is a synthetic run marker; skipped"
            ));
            job.task_mut(task_key).mark_skipped(reasons::PLACEHOLDER_KEY);
            self.store.append_checkpoint(
                &job_id,
                Checkpoint::TaskSkipped {
                    task_key: task_key.to_string(),
                    reason: reasons::PLACEHOLDER_KEY.to_string(),
                },
            )?;
            return Ok(TaskPassResult::Skipped);
        }

        let Some(record) = collab.backlog.get_task(task_key).await? else {
            warnings.push(format!("task {task_key} has no backlog record; skipped"));
            job.task_mut(task_key).mark_skipped(reasons::MISSING_IN_DB);
            self.store.append_checkpoint(
                &job_id,
                Checkpoint::TaskSkipped {
                    task_key: task_key.to_string(),
                    reason: reasons::MISSING_IN_DB.to_string(),
                },
            )?;
            return Ok(TaskPassResult::Skipped);
        };

        match record.status {
            BacklogStatus::Cancelled => {
                info!(task = %task_key, "cancelled in backlog; skipping");
                job.task_mut(task_key).mark_skipped(reasons::CANCELLED_IN_DB);
                self.store.append_checkpoint(
                    &job_id,
                    Checkpoint::TaskSkipped {
                        task_key: task_key.to_string(),
                        reason: reasons::CANCELLED_IN_DB.to_string(),
                    },
                )?;
                return Ok(TaskPassResult::Skipped);
            }
            BacklogStatus::Done => {
                // The backlog is authoritative; never downgrade a completed task.
                let progress = job.task_mut(task_key);
                if progress.status != TaskRunStatus::Completed {
                    warnings.push(format!(
                        "task {task_key}: backlog already shows completion; local state deferred"
                    ));
                }
                progress.last_escalation_reason = Some(reasons::COMPLETED_IN_DB.to_string());
                progress.mark_completed();
                let attempts = progress.attempts;
                self.store.append_checkpoint(
                    &job_id,
                    Checkpoint::TaskCompleted {
                        task_key: task_key.to_string(),
                        attempts,
                    },
                )?;
                return Ok(TaskPassResult::Completed);
            }
            _ => {}
        }

        if job.task_mut(task_key).in_cooldown(cycle) {
            debug!(task = %task_key, cycle, "still cooling down");
            return Ok(TaskPassResult::Cooldown);
        }

        let entry_phase = record.status.entry_phase();
        let mut machine = PhaseMachine::new();
        let mut force_stronger = false;
        let mut avoid: BTreeSet<String> = BTreeSet::new();
        let mut handoff: Option<String> = None;

        job.task_mut(task_key).status = TaskRunStatus::InProgress;
        job.task_mut(task_key).cooldown_until_cycle = None;

        // Outer loop: one iteration per pipeline pass (attempt).
        loop {
            {
                let progress = job.task_mut(task_key);
                progress.attempts += 1;
                machine.set_attempt(progress.attempts);
            }

            let mut current = entry_phase;
            // Inner loop: phases within the pass, plus in-place phase retries.
            loop {
                machine.advance(TaskPhaseState::for_phase(current), None)?;

                let step = self
                    .run_phase(
                        collab,
                        job,
                        &job_id,
                        &record,
                        current,
                        &avoid,
                        force_stronger,
                        handoff.take(),
                        warnings,
                    )
                    .await?;

                match step {
                    StepResult::Advance => match current.next() {
                        Some(next) => current = next,
                        None => {
                            machine.advance(TaskPhaseState::Completed, Some("qa passed"))?;
                            return self.finish_success(collab, job, &job_id, task_key, &record).await;
                        }
                    },
                    StepResult::Failed {
                        failure,
                        agent,
                        detail,
                    } => {
                        let (attempts, directive) = {
                            let progress = job.task_mut(task_key);
                            progress.record_failure(current, agent.clone(), &failure.reason);
                            progress.last_escalation_reason = Some(failure.reason.clone());
                            let attempts = progress.attempts;
                            let directive =
                                self.classifier.classify(progress, current, &failure, attempts);
                            (attempts, directive)
                        };
                        debug!(
                            task = %task_key,
                            phase = %current,
                            reason = %failure.reason,
                            rationale = %directive.rationale,
                            "failure classified"
                        );

                        if directive.terminal {
                            let reason = directive
                                .terminal_reason
                                .unwrap_or_else(|| failure.reason.clone());
                            machine.fail(&reason)?;
                            job.task_mut(task_key).mark_failed(&reason);
                            warn!(task = %task_key, reason = %reason, attempts, "task failed");
                            self.store.append_checkpoint(
                                &job_id,
                                Checkpoint::TaskFailed {
                                    task_key: task_key.to_string(),
                                    reason,
                                    attempts,
                                },
                            )?;
                            return Ok(TaskPassResult::Failed);
                        }

                        if directive.cooldown {
                            let until = cycle + 1;
                            job.task_mut(task_key).cooldown_until_cycle = Some(until);
                            warnings.push(format!(
                                "task {task_key}: {} repeated; retry deferred until cycle {until}",
                                failure.reason
                            ));
                            return Ok(TaskPassResult::Cooldown);
                        }

                        force_stronger = directive.force_stronger;
                        avoid = directive.avoid_agents;

                        // Transient qa failure: re-run qa in place, without
                        // consuming a pass.
                        if current == Phase::Qa && failure.reason == reasons::INFRA_ISSUE {
                            continue;
                        }

                        // Structural review failure: re-run review with a
                        // stronger worker, without consuming a pass.
                        if current == Phase::Review
                            && failure.reason == reasons::MALFORMED_REVIEW_OUTPUT
                        {
                            continue;
                        }

                        // A later phase sending the task back is a regression;
                        // remember it for the lesson-learned note on success.
                        if current != entry_phase {
                            job.task_mut(task_key).pending_regression =
                                Some(failure.reason.clone());
                        }

                        // Carry the qa failure summary into the next produce
                        // handoff.
                        if failure.reason == reasons::FIX_REQUIRED {
                            handoff = Some(format!(
                                "previous qa attempt failed: {}",
                                detail.unwrap_or_else(|| reasons::FIX_REQUIRED.to_string())
                            ));
                        }

                        // Re-entering produce invalidates the backlog's
                        // phase-complete status.
                        if entry_phase == Phase::Produce && current != Phase::Produce {
                            collab
                                .backlog
                                .update_task(
                                    task_key,
                                    BacklogPatch::status(BacklogStatus::InProgress),
                                )
                                .await?;
                        }

                        break; // next pass
                    }
                }
            }
        }
    }

    /// Dispatch one phase attempt: pick a worker, call it, record the
    /// outcome, and translate the response into a step result.
    #[allow(clippy::too_many_arguments)]
    async fn run_phase(
        &mut self,
        collab: &Collaborators,
        job: &mut JobState,
        job_id: &str,
        record: &BacklogTask,
        phase: Phase,
        avoid: &BTreeSet<String>,
        force_stronger: bool,
        handoff: Option<String>,
        warnings: &mut Vec<String>,
    ) -> OrchestratorResult<StepResult> {
        let task_key = &record.key;

        // Candidates are fetched fresh on every selection call.
        let candidates = collab.registry.list_candidates().await?;
        if candidates.is_empty() {
            // No workers at all is a job-level configuration error.
            return Err(OrchestratorError::NoEligibleAgents {
                detail: "worker registry returned no candidates".to_string(),
            });
        }
        let health = collab.registry.health().await?;

        let request = SelectionRequest {
            required_capabilities: [phase.to_string()].into_iter().collect(),
            discipline: record.discipline.clone(),
            complexity: record.complexity,
            avoid_agents: avoid.clone(),
            force_stronger,
        };
        let selected = match self.selector.select(&candidates, &health, &request) {
            Ok(selected) => selected,
            Err(OrchestratorError::NoEligibleAgents { detail }) => {
                // Workers exist but none can run this phase: terminal for the
                // task, the job moves on.
                warnings.push(format!("task {task_key} {phase}: {detail}"));
                return Ok(StepResult::Failed {
                    failure: FailureReason::non_retryable(reasons::NO_ELIGIBLE_AGENTS),
                    agent: None,
                    detail: Some(detail),
                });
            }
            Err(err) => return Err(err),
        };

        info!(
            task = %task_key,
            phase = %phase,
            agent = %selected.agent_id,
            rationale = %selected.rationale,
            "agent selected"
        );
        if let Some(note) = &selected.gating_note {
            warnings.push(format!("task {task_key} {phase}: {note}"));
            if let Some(sink) = &collab.notes {
                if let Err(err) = sink.record_note(task_key, note).await {
                    warn!(task = %task_key, error = %err, "note sink failed");
                }
            }
        }
        job.task_mut(task_key).record_agent(phase, selected.agent_id.as_str());
        let attempt = job.task_mut(task_key).attempts;

        let response = match collab
            .worker_for(phase)
            .execute(PhaseRequest {
                task_key: task_key.clone(),
                phase,
                agent_id: selected.agent_id.clone(),
                avoid_agents: avoid.clone(),
                force_stronger,
                force_tier: force_stronger.then(|| "stronger".to_string()),
                handoff,
                dry_run: self.config.dry_run,
            })
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(task = %task_key, phase = %phase, error = %err, "worker call failed");
                self.record_step(job, job_id, task_key, phase, reasons::WORKER_ERROR, Some(selected.agent_id.as_str()), attempt)?;
                return Ok(StepResult::Failed {
                    failure: FailureReason::new(reasons::WORKER_ERROR),
                    agent: Some(selected.agent_id),
                    detail: Some(err.to_string()),
                });
            }
        };

        if self.config.collect_ratings {
            if let Some(rating) = response.rating {
                job.task_mut(task_key).record_rating(phase, rating);
            }
        }

        // Hard structural failure is handled distinctly from a semantic
        // rejection: it escalates the worker tier instead of looping back.
        if let Some(worker_error) = &response.error {
            let reason = if phase == Phase::Review {
                reasons::MALFORMED_REVIEW_OUTPUT
            } else {
                reasons::WORKER_ERROR
            };
            self.record_step(job, job_id, task_key, phase, reason, Some(selected.agent_id.as_str()), attempt)?;
            return Ok(StepResult::Failed {
                failure: FailureReason::new(reason),
                agent: Some(selected.agent_id),
                detail: Some(worker_error.clone()),
            });
        }

        if response.outcome.phase() != phase {
            let reason = if phase == Phase::Review {
                reasons::MALFORMED_REVIEW_OUTPUT
            } else {
                reasons::WORKER_ERROR
            };
            self.record_step(job, job_id, task_key, phase, reason, Some(selected.agent_id.as_str()), attempt)?;
            return Ok(StepResult::Failed {
                failure: FailureReason::new(reason),
                agent: Some(selected.agent_id),
                detail: Some(format!(
                    "worker answered for {} instead of {phase}",
                    response.outcome.phase()
                )),
            });
        }

        match response.outcome.clone() {
            PhaseOutcome::Produce { succeeded: true, .. } if response.tokens_used == 0 => {
                // A "successful" produce that spent no tokens is a silent
                // no-op worker.
                self.record_step(job, job_id, task_key, phase, reasons::ZERO_TOKENS, Some(selected.agent_id.as_str()), attempt)?;
                Ok(StepResult::Failed {
                    failure: FailureReason::new(reasons::ZERO_TOKENS),
                    agent: Some(selected.agent_id),
                    detail: None,
                })
            }
            PhaseOutcome::Produce { succeeded: true, .. } => {
                self.record_step(job, job_id, task_key, phase, "succeeded", Some(selected.agent_id.as_str()), attempt)?;
                collab
                    .backlog
                    .update_task(task_key, BacklogPatch::status(BacklogStatus::ReadyForReview))
                    .await?;
                Ok(StepResult::Advance)
            }
            PhaseOutcome::Produce {
                succeeded: false,
                note,
            } => {
                let failure =
                    FailureReason::parse(note.as_deref().unwrap_or(reasons::PRODUCE_FAILED));
                self.record_step(job, job_id, task_key, phase, &failure.reason, Some(selected.agent_id.as_str()), attempt)?;
                Ok(StepResult::Failed {
                    failure,
                    agent: Some(selected.agent_id),
                    detail: response.notes,
                })
            }
            PhaseOutcome::Review { decision } => {
                self.record_step(job, job_id, task_key, phase, &decision.to_string(), Some(selected.agent_id.as_str()), attempt)?;
                match decision {
                    ReviewDecision::Approve | ReviewDecision::InfoOnly => {
                        collab
                            .backlog
                            .update_task(task_key, BacklogPatch::status(BacklogStatus::ReadyForQa))
                            .await?;
                        Ok(StepResult::Advance)
                    }
                    ReviewDecision::ChangesRequested => Ok(StepResult::Failed {
                        failure: FailureReason::new(reasons::CHANGES_REQUESTED),
                        agent: Some(selected.agent_id),
                        detail: response.notes,
                    }),
                    ReviewDecision::Block => Ok(StepResult::Failed {
                        failure: FailureReason::non_retryable(reasons::REVIEW_BLOCKED),
                        agent: Some(selected.agent_id),
                        detail: response.notes,
                    }),
                }
            }
            PhaseOutcome::Qa { verdict } => {
                self.record_step(job, job_id, task_key, phase, &verdict.to_string(), Some(selected.agent_id.as_str()), attempt)?;
                match verdict {
                    VerifyVerdict::Pass => Ok(StepResult::Advance),
                    VerifyVerdict::FixRequired => Ok(StepResult::Failed {
                        failure: FailureReason::new(reasons::FIX_REQUIRED),
                        agent: Some(selected.agent_id),
                        detail: response.notes,
                    }),
                    VerifyVerdict::InfraIssue => Ok(StepResult::Failed {
                        failure: FailureReason::new(reasons::INFRA_ISSUE),
                        agent: Some(selected.agent_id),
                        detail: response.notes,
                    }),
                }
            }
        }
    }

    /// Record a phase decision in the progress record and checkpoint log.
    fn record_step(
        &self,
        job: &mut JobState,
        job_id: &str,
        task_key: &str,
        phase: Phase,
        outcome: &str,
        agent: Option<&str>,
        attempt: u32,
    ) -> OrchestratorResult<()> {
        job.task_mut(task_key).record_decision(phase, outcome);
        self.store.append_checkpoint(
            job_id,
            Checkpoint::PhaseCompleted {
                task_key: task_key.to_string(),
                phase,
                outcome: outcome.to_string(),
                agent: agent.map(String::from),
                attempt,
            },
        )?;
        Ok(())
    }

    /// Success side-effects after a fully green pass.
    async fn finish_success(
        &self,
        collab: &Collaborators,
        job: &mut JobState,
        job_id: &str,
        task_key: &str,
        record: &BacklogTask,
    ) -> OrchestratorResult<TaskPassResult> {
        collab
            .backlog
            .update_task(task_key, BacklogPatch::status(BacklogStatus::Done))
            .await?;

        let (attempts, regression) = {
            let progress = job.task_mut(task_key);
            progress.mark_completed();
            (progress.attempts, progress.pending_regression.take())
        };

        // Golden example: keep the accepted plan for future prompting reuse.
        self.store.append_checkpoint(
            job_id,
            Checkpoint::GoldenExample {
                task_key: task_key.to_string(),
                summary: format!("accepted after {attempts} attempt(s): {}", record.summary),
            },
        )?;

        // A task that regressed to an earlier phase and still completed
        // leaves a durable lesson keyed by the regression reason.
        if let Some(regression_reason) = regression {
            let note = format!("task recovered after regressing on {regression_reason}");
            if let Some(sink) = &collab.notes {
                if let Err(err) = sink.record_note(task_key, &note).await {
                    warn!(task = %task_key, error = %err, "note sink failed");
                }
            }
            self.store.append_checkpoint(
                job_id,
                Checkpoint::LessonLearned {
                    task_key: task_key.to_string(),
                    regression_reason,
                    note,
                },
            )?;
        }

        self.store.append_checkpoint(
            job_id,
            Checkpoint::TaskCompleted {
                task_key: task_key.to_string(),
                attempts,
            },
        )?;

        info!(task = %task_key, attempts, "task completed");
        Ok(TaskPassResult::Completed)
    }
}
