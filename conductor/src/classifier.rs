//! Escalation classifier: deterministic retry/cooldown/escalate decisions.
//!
//! Pure decision logic: no worker calls, no persistence. The pipeline feeds
//! it the task's progress record (with the current failure already appended
//! to the history) and applies the resulting directive.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::guardrail::{reasons, FailureReason};
use crate::phase::Phase;
use crate::progress::TaskProgress;

/// Limits consulted by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Maximum full pipeline passes per task.
    pub max_attempts: u32,
    /// In-place retries allowed for transient qa failures.
    pub max_transient_retries: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_transient_retries: 3,
        }
    }
}

/// Decision produced for a single phase failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationDirective {
    /// Dispatch another attempt this cycle.
    pub retry: bool,
    /// Suppress retry until a later cycle.
    pub cooldown: bool,
    /// The next attempt should outrank the failing worker with a stronger one.
    pub force_stronger: bool,
    /// Workers the next attempt should avoid.
    pub avoid_agents: BTreeSet<String>,
    /// The task is done retrying.
    pub terminal: bool,
    pub terminal_reason: Option<String>,
    /// Which rule fired and why.
    pub rationale: String,
}

impl EscalationDirective {
    fn terminal(reason: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            retry: false,
            cooldown: false,
            force_stronger: false,
            avoid_agents: BTreeSet::new(),
            terminal: true,
            terminal_reason: Some(reason.into()),
            rationale: rationale.into(),
        }
    }

    fn cooldown(rationale: impl Into<String>) -> Self {
        Self {
            retry: false,
            cooldown: true,
            force_stronger: false,
            avoid_agents: BTreeSet::new(),
            terminal: false,
            terminal_reason: None,
            rationale: rationale.into(),
        }
    }

    fn retry(
        force_stronger: bool,
        avoid_agents: BTreeSet<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            retry: true,
            cooldown: false,
            force_stronger,
            avoid_agents,
            terminal: false,
            terminal_reason: None,
            rationale: rationale.into(),
        }
    }
}

/// Verdict for a previously failed task at resume time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenVerdict {
    /// Budget allows another attempt and the failure was retryable.
    Reopen,
    /// The authoritative backlog already shows the task completed.
    AlreadyCompleted,
    /// Confirmed failed under the current budget.
    ConfirmFailed,
}

/// Deterministic failure classifier.
#[derive(Debug, Clone, Default)]
pub struct EscalationClassifier {
    config: ClassifierConfig,
}

impl EscalationClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a phase failure. `progress.failure_history` must already
    /// contain the failure being classified; `attempts` is the number of
    /// pipeline passes started so far.
    pub fn classify(
        &self,
        progress: &TaskProgress,
        phase: Phase,
        failure: &FailureReason,
        attempts: u32,
    ) -> EscalationDirective {
        // Rule 1: explicit non-retryable tag or statically non-retryable reason.
        if !failure.is_retryable() {
            return EscalationDirective::terminal(
                failure.reason.clone(),
                format!("{} is not retryable", failure.reason),
            );
        }

        // Transient infrastructure failures get in-place retries that do not
        // consume the attempt budget, up to their own cap.
        if failure.reason == reasons::INFRA_ISSUE {
            let seen = progress.reason_count(reasons::INFRA_ISSUE);
            if seen <= self.config.max_transient_retries {
                return EscalationDirective::retry(
                    false,
                    BTreeSet::new(),
                    format!(
                        "transient infrastructure issue ({}/{} retries)",
                        seen, self.config.max_transient_retries
                    ),
                );
            }
        }

        // Rule 2: attempt budget exhausted.
        if attempts >= self.config.max_attempts {
            return EscalationDirective::terminal(
                reasons::MAX_ITERATIONS_REACHED,
                format!(
                    "attempt budget exhausted ({}/{})",
                    attempts, self.config.max_attempts
                ),
            );
        }

        // Rule 3: same reason on the immediately preceding attempt → cooldown.
        if let (Some(current), Some(previous)) =
            (progress.last_failure(), progress.previous_failure())
        {
            if current.reason == previous.reason {
                warn!(
                    task = %progress.task_key,
                    reason = %failure.reason,
                    "repeated failure; cooling down for one cycle"
                );
                return EscalationDirective::cooldown(format!(
                    "{} repeated on consecutive attempts; retry deferred one cycle",
                    failure.reason
                ));
            }
        }

        // Rule 4: first tests_failed escalates worker tier; the failing
        // worker is outranked, not excluded.
        if failure.reason == reasons::TESTS_FAILED
            && progress.reason_count(reasons::TESTS_FAILED) == 1
        {
            return EscalationDirective::retry(
                true,
                BTreeSet::new(),
                "tests failed once; retrying with a stronger worker",
            );
        }

        // Rule 6: malformed review output escalates the review worker.
        if phase == Phase::Review && failure.reason == reasons::MALFORMED_REVIEW_OUTPUT {
            return EscalationDirective::retry(
                true,
                BTreeSet::new(),
                "structural review failure; escalating review worker tier",
            );
        }

        // Rule 5: plain retry; steer the next attempt away from the worker
        // that just failed.
        let mut avoid = BTreeSet::new();
        if let Some(agent) = progress.last_failure().and_then(|f| f.agent.clone()) {
            avoid.insert(agent);
        }
        EscalationDirective::retry(
            false,
            avoid,
            format!("{} is retryable; dispatching another attempt", failure.reason),
        )
    }

    /// Re-evaluate a failed task at resume time against the current budget.
    /// `backlog_completed` reflects the authoritative backlog record; a task
    /// the backlog shows terminal-complete is never downgraded.
    pub fn reopen_verdict(
        &self,
        progress: &TaskProgress,
        backlog_completed: bool,
    ) -> ReopenVerdict {
        if backlog_completed {
            return ReopenVerdict::AlreadyCompleted;
        }

        let last_retryable = progress
            .last_failure()
            .map(|event| FailureReason::new(event.reason.clone()).is_retryable())
            .unwrap_or(false);

        if progress.attempts < self.config.max_attempts && last_retryable {
            ReopenVerdict::Reopen
        } else {
            ReopenVerdict::ConfirmFailed
        }
    }
}
