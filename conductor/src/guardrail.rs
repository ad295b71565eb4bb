//! Failure reasons and their retryability.
//!
//! Workers historically smuggled retryability inside the reason string as
//! `guardrail:retryable:<reason>` / `guardrail:non_retryable:<reason>`.
//! Here retryability is a first-class field on [`FailureReason`]; the legacy
//! prefix form is accepted only at the parsing boundary. Reasons without an
//! explicit tag fall back to a static default table.

use serde::{Deserialize, Serialize};

/// Well-known machine-readable failure reasons.
pub mod reasons {
    pub const TESTS_FAILED: &str = "tests_failed";
    pub const MISSING_PATCH: &str = "missing_patch";
    pub const PRODUCE_FAILED: &str = "produce_failed";
    pub const NO_CHANGES: &str = "no_changes";
    pub const ZERO_TOKENS: &str = "zero_tokens";
    pub const SCOPE_VIOLATION: &str = "scope_violation";
    pub const CHANGES_REQUESTED: &str = "changes_requested";
    pub const REVIEW_BLOCKED: &str = "review_blocked";
    pub const FIX_REQUIRED: &str = "fix_required";
    pub const INFRA_ISSUE: &str = "infra_issue";
    pub const MALFORMED_REVIEW_OUTPUT: &str = "malformed_review_output";
    pub const WORKER_ERROR: &str = "worker_error";
    pub const NO_ELIGIBLE_AGENTS: &str = "no_eligible_agents";
    pub const MAX_ITERATIONS_REACHED: &str = "max_iterations_reached";
    pub const CANCELLED_IN_DB: &str = "cancelled_in_db";
    pub const COMPLETED_IN_DB: &str = "completed_in_db";
    pub const MISSING_IN_DB: &str = "missing_in_db";
    pub const PLACEHOLDER_KEY: &str = "placeholder_key";
}

const RETRYABLE_PREFIX: &str = "guardrail:retryable:";
const NON_RETRYABLE_PREFIX: &str = "guardrail:non_retryable:";

/// Explicit worker-declared retryability of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retryability {
    /// Worker explicitly tagged the failure as safe to retry.
    Retryable,
    /// Worker explicitly tagged the failure as permanent.
    NonRetryable,
    /// No tag; the static default table decides.
    Unspecified,
}

/// A classified phase failure: machine-readable reason plus retryability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub reason: String,
    pub retryability: Retryability,
}

impl FailureReason {
    /// An untagged reason; retryability comes from the default table.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryability: Retryability::Unspecified,
        }
    }

    /// A reason explicitly tagged retryable.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryability: Retryability::Retryable,
        }
    }

    /// A reason explicitly tagged non-retryable.
    pub fn non_retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryability: Retryability::NonRetryable,
        }
    }

    /// Parse a raw worker note, honoring the legacy guardrail prefix form.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(reason) = raw.strip_prefix(RETRYABLE_PREFIX) {
            return Self::retryable(reason);
        }
        if let Some(reason) = raw.strip_prefix(NON_RETRYABLE_PREFIX) {
            return Self::non_retryable(reason);
        }
        Self::new(raw)
    }

    /// Whether this failure may be retried. An explicit tag always wins;
    /// untagged reasons use [`default_retryable`].
    pub fn is_retryable(&self) -> bool {
        match self.retryability {
            Retryability::Retryable => true,
            Retryability::NonRetryable => false,
            Retryability::Unspecified => default_retryable(&self.reason),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Static default classification for untagged reasons.
///
/// The table is part of the orchestrator's contract: tests and resume
/// behavior depend on these exact defaults. Unknown reasons default to
/// retryable so the attempt budget, not the reason string, bounds them.
pub fn default_retryable(reason: &str) -> bool {
    !matches!(
        reason,
        reasons::SCOPE_VIOLATION
            | reasons::REVIEW_BLOCKED
            | reasons::NO_ELIGIBLE_AGENTS
            | reasons::CANCELLED_IN_DB
            | reasons::MISSING_IN_DB
            | reasons::PLACEHOLDER_KEY
            | reasons::MAX_ITERATIONS_REACHED
    )
}

/// Synthetic run-marker keys are never real work items.
pub fn is_placeholder_key(task_key: &str) -> bool {
    task_key.starts_with('_')
}
