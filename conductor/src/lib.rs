//! Backlog pipeline orchestrator.
//!
//! Coordinates autonomous execution of backlog work items through a fixed
//! produce → review → qa pipeline, delegating each phase to pluggable
//! external workers and persisting enough state to resume an interrupted
//! run exactly where it left off.
//!
//! Subsystems:
//! - [`scheduler`]: the outer cycle loop (eligibility, feedback priority,
//!   cumulative limits, cancellation, resume).
//! - [`pipeline`]: the per-task state machine driver.
//! - [`classifier`]: deterministic retry/cooldown/escalation decisions.
//! - [`selector`]: agent candidate ranking with deliberate exploration.
//! - [`state`]: versioned job-state document plus append-only checkpoints.
//!
//! Everything external (phase workers, the backlog, the worker registry) is
//! injected through the trait contracts in [`workers`]; the orchestrator
//! holds no process-wide state beyond one job's in-memory record.

#![allow(clippy::uninlined_format_args)]

pub mod classifier;
pub mod config;
pub mod error;
pub mod guardrail;
pub mod machine;
pub mod phase;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod summary;
pub mod workers;

// Re-export the types most callers need.
pub use classifier::{
    ClassifierConfig, EscalationClassifier, EscalationDirective, ReopenVerdict,
};
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, OrchestratorResult};
pub use guardrail::{default_retryable, is_placeholder_key, reasons, FailureReason, Retryability};
pub use machine::{PhaseMachine, TaskPhaseState, TransitionRecord};
pub use phase::{Phase, PhaseOutcome, ReviewDecision, VerifyVerdict};
pub use pipeline::{PipelineRunner, TaskPassResult};
pub use progress::{DecisionEvent, FailureEvent, TaskProgress, TaskRunStatus};
pub use scheduler::{CycleScheduler, RunOptions};
pub use selector::{
    AgentHealth, AgentSelector, Candidate, Dice, SeededDice, SelectedAgent, SelectionRequest,
    SelectorConfig,
};
pub use state::{
    Checkpoint, CheckpointEnvelope, FileStateStore, JobManifest, JobState, JobStatus, StoreError,
    StoreResult, SCHEMA_VERSION,
};
pub use summary::{JobReport, TaskReport};
pub use workers::{
    AgentRegistry, BacklogPatch, BacklogStatus, BacklogStore, BacklogTask, Collaborators,
    EligibleBatch, JobControl, NoteSink, PhaseRequest, PhaseResponse, PhaseWorker, TaskFilters,
    TaskSource,
};
