//! Durable per-task progress record.
//!
//! One record exists for every backlog task this job has touched. The record
//! is mutated exclusively by the pipeline and persisted as part of the job
//! state document; it is never deleted, only moved to a terminal status.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Lifecycle status of a task within one orchestration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    /// Known but not yet dispatched (or reopened on resume).
    Pending,
    /// At least one phase attempt has been made this job.
    InProgress,
    /// All three phases succeeded in one pass.
    Completed,
    /// Non-retryable classification or exhausted attempt budget.
    Failed,
    /// Not a real work item, or already terminal in the backlog.
    Skipped,
}

impl TaskRunStatus {
    /// Whether no further work will be dispatched for this task.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One recorded phase failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub phase: Phase,
    /// Worker that produced the failure, when one was dispatched.
    pub agent: Option<String>,
    pub reason: String,
    /// Attempt counter at the time of the failure (1-indexed).
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}

/// One recorded phase decision (success or failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub step: Phase,
    pub decision: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-task durable state, lazily created the first time a task enters the
/// scheduling loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_key: String,
    /// Count of full pipeline passes started for this task.
    pub attempts: u32,
    pub status: TaskRunStatus,
    /// Outcome of the most recent review/qa step.
    pub last_decision: Option<String>,
    /// Most recent machine-readable failure reason.
    pub last_error: Option<String>,
    pub last_escalation_reason: Option<String>,
    /// Failure reason → how many times it has driven a retry decision.
    pub escalation_attempts: BTreeMap<String, u32>,
    /// Phase → worker id used on the most recent attempt of that phase.
    pub chosen_agents: BTreeMap<Phase, String>,
    pub failure_history: Vec<FailureEvent>,
    pub decision_history: Vec<DecisionEvent>,
    /// Phase → latest outcome label.
    pub step_outcomes: BTreeMap<Phase, String>,
    /// Phase → quality rating reported by the worker, when collected.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub phase_ratings: BTreeMap<Phase, u8>,
    /// Set when a later phase sent the task back to an earlier one; cleared
    /// (and turned into a lesson-learned note) on eventual success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_regression: Option<String>,
    /// Retry is suppressed until the scheduler reaches this cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_cycle: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    pub fn new(task_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_key: task_key.into(),
            attempts: 0,
            status: TaskRunStatus::Pending,
            last_decision: None,
            last_error: None,
            last_escalation_reason: None,
            escalation_attempts: BTreeMap::new(),
            chosen_agents: BTreeMap::new(),
            failure_history: Vec::new(),
            decision_history: Vec::new(),
            step_outcomes: BTreeMap::new(),
            phase_ratings: BTreeMap::new(),
            pending_regression: None,
            cooldown_until_cycle: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record a phase decision and its step outcome. Review and qa decisions
    /// also become `last_decision`.
    pub fn record_decision(&mut self, step: Phase, decision: impl Into<String>) {
        let decision = decision.into();
        if step != Phase::Produce {
            self.last_decision = Some(decision.clone());
        }
        self.step_outcomes.insert(step, decision.clone());
        self.decision_history.push(DecisionEvent {
            step,
            decision,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Record a phase failure with its classification reason.
    pub fn record_failure(&mut self, phase: Phase, agent: Option<String>, reason: &str) {
        self.last_error = Some(reason.to_string());
        *self
            .escalation_attempts
            .entry(reason.to_string())
            .or_insert(0) += 1;
        self.failure_history.push(FailureEvent {
            phase,
            agent,
            reason: reason.to_string(),
            attempt: self.attempts,
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Record which worker handled a phase attempt.
    pub fn record_agent(&mut self, phase: Phase, agent_id: impl Into<String>) {
        self.chosen_agents.insert(phase, agent_id.into());
        self.touch();
    }

    /// Record a worker-reported quality rating for a phase.
    pub fn record_rating(&mut self, phase: Phase, rating: u8) {
        self.phase_ratings.insert(phase, rating);
        self.touch();
    }

    /// The most recent failure, if any.
    pub fn last_failure(&self) -> Option<&FailureEvent> {
        self.failure_history.last()
    }

    /// The failure immediately preceding the most recent one.
    pub fn previous_failure(&self) -> Option<&FailureEvent> {
        let len = self.failure_history.len();
        if len < 2 {
            return None;
        }
        self.failure_history.get(len - 2)
    }

    /// How many times a reason appears in the failure history.
    pub fn reason_count(&self, reason: &str) -> u32 {
        self.failure_history
            .iter()
            .filter(|event| event.reason == reason)
            .count() as u32
    }

    /// Workers that have failed this task, oldest first.
    pub fn failed_agents(&self) -> BTreeSet<String> {
        self.failure_history
            .iter()
            .filter_map(|event| event.agent.clone())
            .collect()
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskRunStatus::Completed;
        self.cooldown_until_cycle = None;
        self.touch();
    }

    pub fn mark_failed(&mut self, reason: &str) {
        self.status = TaskRunStatus::Failed;
        self.last_error = Some(reason.to_string());
        self.touch();
    }

    pub fn mark_skipped(&mut self, reason: &str) {
        self.status = TaskRunStatus::Skipped;
        self.last_error = Some(reason.to_string());
        self.touch();
    }

    /// Reopen a previously failed task (resume with a larger budget).
    pub fn reopen(&mut self) {
        self.status = TaskRunStatus::Pending;
        self.cooldown_until_cycle = None;
        self.touch();
    }

    /// Whether retry is suppressed at the given cycle.
    pub fn in_cooldown(&self, cycle: u32) -> bool {
        self.cooldown_until_cycle
            .map(|until| cycle < until)
            .unwrap_or(false)
    }

    /// A non-terminal task that has already been worked carries unresolved
    /// feedback and is processed before newly discovered tasks.
    pub fn has_pending_feedback(&self) -> bool {
        !self.status.is_terminal() && self.attempts > 0
    }
}
