//! Collaborator contracts.
//!
//! The orchestrator never talks to a backlog database, a worker runtime, or
//! an annotation channel directly; every external dependency is injected as
//! one of these traits. Each collaborator has an explicit `close()` teardown
//! that the scheduler invokes on every exit path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OrchestratorResult;
use crate::phase::{Phase, PhaseOutcome};
use crate::selector::{AgentHealth, Candidate};

/// Authoritative backlog status of a task. The orchestrator's local record
/// is a derived cache that defers to this on any conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogStatus {
    Todo,
    InProgress,
    /// Produce already satisfied; the pipeline enters at review.
    ReadyForReview,
    /// Produce and review satisfied; the pipeline enters at qa.
    ReadyForQa,
    Done,
    Cancelled,
}

impl BacklogStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// First phase still unsatisfied for a task at this status.
    pub fn entry_phase(self) -> Phase {
        match self {
            Self::ReadyForReview => Phase::Review,
            Self::ReadyForQa => Phase::Qa,
            _ => Phase::Produce,
        }
    }
}

/// A backlog record as returned by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacklogTask {
    pub key: String,
    pub status: BacklogStatus,
    pub summary: String,
    /// Discipline tag used for selection fit, e.g. `backend`, `research`.
    pub discipline: Option<String>,
    /// Estimated complexity, 1–10.
    pub complexity: f32,
}

/// Partial update applied to a backlog record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacklogPatch {
    pub status: Option<BacklogStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl BacklogPatch {
    pub fn status(status: BacklogStatus) -> Self {
        Self {
            status: Some(status),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_note(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }
}

/// Filters for the backlog eligibility query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilters {
    pub project: Option<String>,
    pub epic: Option<String>,
    pub story: Option<String>,
    /// Explicit task keys to scope to, when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_keys: Vec<String>,
    /// Status allowlist, when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statuses: Vec<BacklogStatus>,
    pub limit: Option<usize>,
}

/// Result of an eligibility query.
#[derive(Debug, Clone, Default)]
pub struct EligibleBatch {
    /// Task keys in backlog priority order.
    pub ordered: Vec<String>,
    pub warnings: Vec<String>,
}

/// One phase dispatch request handed to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRequest {
    pub task_key: String,
    pub phase: Phase,
    /// Worker chosen by the candidate selector for this attempt.
    pub agent_id: String,
    /// Workers prior escalations steered away from.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub avoid_agents: BTreeSet<String>,
    pub force_stronger: bool,
    /// Explicit tier hint accompanying `force_stronger`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_tier: Option<String>,
    /// Failure summary from an earlier qa pass, appended to the handoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<String>,
    pub dry_run: bool,
}

/// Worker response for one phase dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResponse {
    pub outcome: PhaseOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Hard structural failure (e.g. malformed structured output). Handled
    /// distinctly from a semantic rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Token usage reported for the dispatch. A "successful" produce with
    /// zero tokens is demoted to a `zero_tokens` failure.
    pub tokens_used: u64,
    /// Optional quality self-rating (1–10), collected when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
}

/// A phase worker: performs produce, review, or qa work for a task.
#[async_trait]
pub trait PhaseWorker: Send + Sync {
    async fn execute(&self, request: PhaseRequest) -> OrchestratorResult<PhaseResponse>;

    /// Release held resources. Called exactly once on every exit path.
    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Backlog eligibility query.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn select_eligible(&self, filters: &TaskFilters) -> OrchestratorResult<EligibleBatch>;

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Backlog record store.
#[async_trait]
pub trait BacklogStore: Send + Sync {
    async fn get_task(&self, key: &str) -> OrchestratorResult<Option<BacklogTask>>;

    async fn update_task(&self, key: &str, patch: BacklogPatch) -> OrchestratorResult<()>;

    /// Release task locks whose holders have expired; returns the keys freed.
    async fn cleanup_expired_locks(&self) -> OrchestratorResult<Vec<String>>;

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Worker registry: candidate profiles plus live health.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn list_candidates(&self) -> OrchestratorResult<Vec<Candidate>>;

    async fn health(&self) -> OrchestratorResult<BTreeMap<String, AgentHealth>>;

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Probe for external cancellation of the job's authoritative record.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn is_cancelled(&self, job_id: &str) -> OrchestratorResult<bool>;

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Optional sink for human-visible notes (never a gate).
#[async_trait]
pub trait NoteSink: Send + Sync {
    async fn record_note(&self, task_key: &str, note: &str) -> OrchestratorResult<()>;

    async fn close(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// The full collaborator set injected into the scheduler.
#[derive(Clone)]
pub struct Collaborators {
    pub produce: Arc<dyn PhaseWorker>,
    pub review: Arc<dyn PhaseWorker>,
    pub qa: Arc<dyn PhaseWorker>,
    pub source: Arc<dyn TaskSource>,
    pub backlog: Arc<dyn BacklogStore>,
    pub registry: Arc<dyn AgentRegistry>,
    pub control: Arc<dyn JobControl>,
    pub notes: Option<Arc<dyn NoteSink>>,
}

impl Collaborators {
    pub fn worker_for(&self, phase: Phase) -> &Arc<dyn PhaseWorker> {
        match phase {
            Phase::Produce => &self.produce,
            Phase::Review => &self.review,
            Phase::Qa => &self.qa,
        }
    }

    /// Tear down every collaborator unconditionally. Failures are collected
    /// as warnings rather than aborting the shutdown.
    pub async fn close_all(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let results = [
            ("produce worker", self.produce.close().await),
            ("review worker", self.review.close().await),
            ("qa worker", self.qa.close().await),
            ("task source", self.source.close().await),
            ("backlog store", self.backlog.close().await),
            ("agent registry", self.registry.close().await),
            ("job control", self.control.close().await),
        ];
        for (name, result) in results {
            if let Err(err) = result {
                warn!(collaborator = name, error = %err, "teardown failed");
                warnings.push(format!("{name} teardown failed: {err}"));
            }
        }
        if let Some(notes) = &self.notes {
            if let Err(err) = notes.close().await {
                warn!(collaborator = "note sink", error = %err, "teardown failed");
                warnings.push(format!("note sink teardown failed: {err}"));
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_phase_from_backlog_status() {
        assert_eq!(BacklogStatus::Todo.entry_phase(), Phase::Produce);
        assert_eq!(BacklogStatus::InProgress.entry_phase(), Phase::Produce);
        assert_eq!(BacklogStatus::ReadyForReview.entry_phase(), Phase::Review);
        assert_eq!(BacklogStatus::ReadyForQa.entry_phase(), Phase::Qa);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BacklogStatus::Done.is_terminal());
        assert!(BacklogStatus::Cancelled.is_terminal());
        assert!(!BacklogStatus::ReadyForQa.is_terminal());
    }

    #[test]
    fn test_patch_builder() {
        let patch = BacklogPatch::status(BacklogStatus::InProgress)
            .with_note("failure_summary", "qa: fix_required");
        assert_eq!(patch.status, Some(BacklogStatus::InProgress));
        assert_eq!(
            patch.metadata.get("failure_summary").and_then(|v| v.as_str()),
            Some("qa: fix_required")
        );
    }
}
