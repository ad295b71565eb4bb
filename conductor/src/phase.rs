//! Pipeline phases and the outcome payloads workers report for each one.

use serde::{Deserialize, Serialize};

/// One of the three pipeline phases a task moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Produce a candidate change for the task.
    Produce,
    /// Evaluate the produced change.
    Review,
    /// Verify the accepted change end to end.
    Qa,
}

impl Phase {
    /// All phases in pipeline order.
    pub fn all() -> &'static [Phase] {
        &[Self::Produce, Self::Review, Self::Qa]
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Self::Produce => Some(Self::Review),
            Self::Review => Some(Self::Qa),
            Self::Qa => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Produce => write!(f, "produce"),
            Self::Review => write!(f, "review"),
            Self::Qa => write!(f, "qa"),
        }
    }
}

/// Semantic verdict from the review phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Change accepted; advance to qa.
    Approve,
    /// Change rejected; loop back for another produce pass.
    ChangesRequested,
    /// Change rejected permanently: terminal failure.
    Block,
    /// Commentary only; advances like an approval.
    InfoOnly,
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::Block => write!(f, "block"),
            Self::InfoOnly => write!(f, "info_only"),
        }
    }
}

/// Verdict from the qa phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyVerdict {
    /// Verification passed; the task is done.
    Pass,
    /// A fix is required; loop back with a failure summary.
    FixRequired,
    /// Transient environment problem, not a semantic failure.
    InfraIssue,
}

impl std::fmt::Display for VerifyVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::FixRequired => write!(f, "fix_required"),
            Self::InfraIssue => write!(f, "infra_issue"),
        }
    }
}

/// Phase-specific outcome reported by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseOutcome {
    /// Produce result with an optional machine-readable note
    /// (e.g. `tests_failed`, `no_changes`, or a guardrail-tagged reason).
    Produce {
        succeeded: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    Review { decision: ReviewDecision },
    Qa { verdict: VerifyVerdict },
}

impl PhaseOutcome {
    /// Which phase this outcome belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Produce { .. } => Phase::Produce,
            Self::Review { .. } => Phase::Review,
            Self::Qa { .. } => Phase::Qa,
        }
    }

    /// Short label used in decision history and checkpoints.
    pub fn label(&self) -> String {
        match self {
            Self::Produce { succeeded: true, .. } => "succeeded".to_string(),
            Self::Produce {
                succeeded: false,
                note,
            } => note.clone().unwrap_or_else(|| "failed".to_string()),
            Self::Review { decision } => decision.to_string(),
            Self::Qa { verdict } => verdict.to_string(),
        }
    }
}
