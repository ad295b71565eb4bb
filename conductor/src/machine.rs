//! Typed per-task phase states with legal transition guards.
//!
//! The pipeline calls `advance()` to move a task between phase states. Each
//! call validates the edge against the transition table and records it, so a
//! task's exact path through the pipeline is auditable after the fact.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// The set of per-task pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhaseState {
    /// No phase has been dispatched yet.
    NotYetWorked,
    InProduce,
    InReview,
    InQa,
    /// All phases succeeded in one pass. Terminal.
    Completed,
    /// Non-retryable failure or exhausted budget. Terminal.
    Failed,
    /// Never entered a phase (placeholder or backlog-terminal). Terminal.
    Skipped,
}

impl TaskPhaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// The working state for a pipeline phase.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Produce => Self::InProduce,
            Phase::Review => Self::InReview,
            Phase::Qa => Self::InQa,
        }
    }
}

impl fmt::Display for TaskPhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotYetWorked => write!(f, "not_yet_worked"),
            Self::InProduce => write!(f, "in_produce"),
            Self::InReview => write!(f, "in_review"),
            Self::InQa => write!(f, "in_qa"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Legal edges in the per-task state graph.
///
/// ```text
/// NotYetWorked → InProduce | InReview | InQa | Completed | Skipped
/// InProduce    → InReview | InProduce
/// InReview     → InQa | InProduce | InReview
/// InQa         → Completed | InProduce | InReview | InQa
/// ```
/// Entry may start at review or qa when the backlog already shows earlier
/// phases satisfied; retry loops re-enter an earlier (or the same) phase.
/// Any non-terminal state may transition to `Failed`.
fn is_legal_transition(from: TaskPhaseState, to: TaskPhaseState) -> bool {
    use TaskPhaseState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (NotYetWorked, InProduce)
            | (NotYetWorked, InReview)
            | (NotYetWorked, InQa)
            | (NotYetWorked, Completed)
            | (NotYetWorked, Skipped)
            | (InProduce, InReview)
            | (InProduce, InProduce)
            | (InReview, InQa)
            | (InReview, InProduce)
            | (InReview, InReview)
            | (InQa, Completed)
            | (InQa, InProduce)
            | (InQa, InReview)
            | (InQa, InQa)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskPhaseState,
    pub to: TaskPhaseState,
    /// Pipeline pass counter at the time of the transition.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TaskPhaseState,
    pub to: TaskPhaseState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal task transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-task state machine with a complete transition log.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: TaskPhaseState,
    attempt: u32,
    transitions: Vec<TransitionRecord>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: TaskPhaseState::NotYetWorked,
            attempt: 0,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TaskPhaseState {
        self.current
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Attempt to advance; illegal edges are rejected.
    pub fn advance(
        &mut self,
        to: TaskPhaseState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, attempt = self.attempt, "task transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            timestamp: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Move to `Failed`; legal from every non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskPhaseState::Failed, Some(reason))
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
