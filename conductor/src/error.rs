//! Orchestrator error types.

use thiserror::Error;

use crate::machine::IllegalTransition;
use crate::state::StoreError;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors surfaced by the orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No worker can run a phase at all. Always fatal, never retried.
    #[error("no eligible agents: {detail}")]
    NoEligibleAgents { detail: String },

    /// A task attempted an edge outside the legal transition table.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),

    /// State persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An external collaborator call failed outright.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl OrchestratorError {
    /// Create a collaborator failure from any displayable error.
    pub fn collaborator(err: impl std::fmt::Display) -> Self {
        Self::Collaborator(err.to_string())
    }
}
