//! Shared stub collaborators for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use conductor::{
    AgentHealth, AgentRegistry, AgentSelector, BacklogPatch, BacklogStatus, BacklogStore,
    BacklogTask, Candidate, Collaborators, CycleScheduler, EligibleBatch, FileStateStore,
    JobControl, OrchestratorConfig, OrchestratorResult, Phase, PhaseOutcome, PhaseRequest,
    PhaseResponse, PhaseWorker, ReviewDecision, RunOptions, SeededDice, SelectorConfig,
    TaskFilters, TaskSource, VerifyVerdict,
};

// =============================================================================
// Phase responses
// =============================================================================

pub fn produce_ok() -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Produce {
            succeeded: true,
            note: None,
        },
        notes: None,
        error: None,
        tokens_used: 256,
        rating: None,
    }
}

pub fn produce_fail(note: &str) -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Produce {
            succeeded: false,
            note: Some(note.to_string()),
        },
        notes: None,
        error: None,
        tokens_used: 64,
        rating: None,
    }
}

pub fn produce_silent_noop() -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Produce {
            succeeded: true,
            note: None,
        },
        notes: None,
        error: None,
        tokens_used: 0,
        rating: None,
    }
}

pub fn review(decision: ReviewDecision) -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Review { decision },
        notes: None,
        error: None,
        tokens_used: 128,
        rating: None,
    }
}

pub fn review_malformed() -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Review {
            decision: ReviewDecision::Approve,
        },
        notes: None,
        error: Some("structured output did not parse".to_string()),
        tokens_used: 128,
        rating: None,
    }
}

pub fn qa(verdict: VerifyVerdict) -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Qa { verdict },
        notes: None,
        error: None,
        tokens_used: 128,
        rating: None,
    }
}

pub fn qa_fix_required(notes: &str) -> PhaseResponse {
    PhaseResponse {
        outcome: PhaseOutcome::Qa {
            verdict: VerifyVerdict::FixRequired,
        },
        notes: Some(notes.to_string()),
        error: None,
        tokens_used: 128,
        rating: None,
    }
}

// =============================================================================
// Scripted phase worker
// =============================================================================

/// Worker that pops scripted responses per task and falls back to success.
/// Every request is recorded; an optional shared log captures cross-worker
/// call ordering.
pub struct ScriptedWorker {
    phase: Phase,
    scripts: Mutex<BTreeMap<String, VecDeque<PhaseResponse>>>,
    requests: Mutex<Vec<PhaseRequest>>,
    call_log: Mutex<Option<Arc<Mutex<Vec<String>>>>>,
}

impl ScriptedWorker {
    pub fn new(phase: Phase) -> Arc<Self> {
        Arc::new(Self {
            phase,
            scripts: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(Vec::new()),
            call_log: Mutex::new(None),
        })
    }

    /// Queue responses for a task; once drained the worker answers success.
    pub fn script(&self, task_key: &str, responses: Vec<PhaseResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(task_key.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn attach_log(&self, log: Arc<Mutex<Vec<String>>>) {
        *self.call_log.lock().unwrap() = Some(log);
    }

    pub fn requests(&self) -> Vec<PhaseRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn default_response(&self) -> PhaseResponse {
        match self.phase {
            Phase::Produce => produce_ok(),
            Phase::Review => review(ReviewDecision::Approve),
            Phase::Qa => qa(VerifyVerdict::Pass),
        }
    }
}

#[async_trait]
impl PhaseWorker for ScriptedWorker {
    async fn execute(&self, request: PhaseRequest) -> OrchestratorResult<PhaseResponse> {
        if let Some(log) = self.call_log.lock().unwrap().as_ref() {
            log.lock()
                .unwrap()
                .push(format!("{}:{}", request.phase, request.task_key));
        }
        self.requests.lock().unwrap().push(request.clone());
        let response = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.task_key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default_response());
        Ok(response)
    }
}

// =============================================================================
// Backlog stubs
// =============================================================================

pub struct MemoryBacklog {
    tasks: Mutex<BTreeMap<String, BacklogTask>>,
    expired_locks: Mutex<Vec<String>>,
}

impl MemoryBacklog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(BTreeMap::new()),
            expired_locks: Mutex::new(Vec::new()),
        })
    }

    pub fn insert(&self, key: &str, status: BacklogStatus) {
        self.tasks.lock().unwrap().insert(
            key.to_string(),
            BacklogTask {
                key: key.to_string(),
                status,
                summary: format!("work on {key}"),
                discipline: Some("backend".to_string()),
                complexity: 5.0,
            },
        );
    }

    pub fn set_status(&self, key: &str, status: BacklogStatus) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(key) {
            task.status = status;
        }
    }

    pub fn status_of(&self, key: &str) -> Option<BacklogStatus> {
        self.tasks.lock().unwrap().get(key).map(|t| t.status)
    }

    pub fn stage_expired_locks(&self, keys: &[&str]) {
        self.expired_locks
            .lock()
            .unwrap()
            .extend(keys.iter().map(|k| k.to_string()));
    }
}

#[async_trait]
impl BacklogStore for MemoryBacklog {
    async fn get_task(&self, key: &str) -> OrchestratorResult<Option<BacklogTask>> {
        Ok(self.tasks.lock().unwrap().get(key).cloned())
    }

    async fn update_task(&self, key: &str, patch: BacklogPatch) -> OrchestratorResult<()> {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(key) {
            if let Some(status) = patch.status {
                task.status = status;
            }
        }
        Ok(())
    }

    async fn cleanup_expired_locks(&self) -> OrchestratorResult<Vec<String>> {
        Ok(self.expired_locks.lock().unwrap().drain(..).collect())
    }
}

/// Eligibility source: optional per-cycle scripts, then a fixed list.
pub struct StaticSource {
    per_cycle: Mutex<VecDeque<Vec<String>>>,
    fixed: Mutex<Vec<String>>,
}

impl StaticSource {
    pub fn fixed(keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            per_cycle: Mutex::new(VecDeque::new()),
            fixed: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
        })
    }

    pub fn push_cycle(&self, keys: &[&str]) {
        self.per_cycle
            .lock()
            .unwrap()
            .push_back(keys.iter().map(|k| k.to_string()).collect());
    }

    pub fn set_fixed(&self, keys: &[&str]) {
        *self.fixed.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
    }
}

#[async_trait]
impl TaskSource for StaticSource {
    async fn select_eligible(&self, _filters: &TaskFilters) -> OrchestratorResult<EligibleBatch> {
        let ordered = match self.per_cycle.lock().unwrap().pop_front() {
            Some(keys) => keys,
            None => self.fixed.lock().unwrap().clone(),
        };
        Ok(EligibleBatch {
            ordered,
            warnings: Vec::new(),
        })
    }
}

// =============================================================================
// Registry and control stubs
// =============================================================================

pub struct StaticRegistry {
    candidates: Mutex<Vec<Candidate>>,
    health: Mutex<BTreeMap<String, AgentHealth>>,
}

impl StaticRegistry {
    /// Two healthy workers covering every phase: a modest one and a strong one.
    pub fn default_pair() -> Arc<Self> {
        let all_caps = ["produce", "review", "qa"]
            .iter()
            .map(|s| s.to_string())
            .collect::<std::collections::BTreeSet<_>>();
        let backend = ["backend".to_string()]
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>();
        Arc::new(Self {
            candidates: Mutex::new(vec![
                Candidate {
                    id: "swift".to_string(),
                    capabilities: all_caps.clone(),
                    disciplines: backend.clone(),
                    rating: 5.0,
                    reasoning_rating: 4.0,
                    cost: 0.5,
                    max_complexity: 10,
                },
                Candidate {
                    id: "titan".to_string(),
                    capabilities: all_caps,
                    disciplines: backend,
                    rating: 9.5,
                    reasoning_rating: 9.5,
                    cost: 3.0,
                    max_complexity: 10,
                },
            ]),
            health: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn clear_candidates(&self) {
        self.candidates.lock().unwrap().clear();
    }
}

#[async_trait]
impl AgentRegistry for StaticRegistry {
    async fn list_candidates(&self) -> OrchestratorResult<Vec<Candidate>> {
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn health(&self) -> OrchestratorResult<BTreeMap<String, AgentHealth>> {
        Ok(self.health.lock().unwrap().clone())
    }
}

/// Cancellation probe that flips to cancelled at the Nth poll.
pub struct CancelControl {
    polls: Mutex<u32>,
    cancel_at: Option<u32>,
}

impl CancelControl {
    pub fn never() -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(0),
            cancel_at: None,
        })
    }

    pub fn at_poll(n: u32) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(0),
            cancel_at: Some(n),
        })
    }
}

#[async_trait]
impl JobControl for CancelControl {
    async fn is_cancelled(&self, _job_id: &str) -> OrchestratorResult<bool> {
        let mut polls = self.polls.lock().unwrap();
        *polls += 1;
        Ok(self.cancel_at.map(|n| *polls >= n).unwrap_or(false))
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub produce: Arc<ScriptedWorker>,
    pub review: Arc<ScriptedWorker>,
    pub qa: Arc<ScriptedWorker>,
    pub backlog: Arc<MemoryBacklog>,
    pub source: Arc<StaticSource>,
    pub registry: Arc<StaticRegistry>,
    pub control: Arc<CancelControl>,
    pub call_log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Backlog tasks default to `todo`; the source offers them every cycle.
    pub fn new(keys: &[&str]) -> Self {
        let backlog = MemoryBacklog::new();
        for key in keys {
            backlog.insert(key, BacklogStatus::Todo);
        }

        let call_log = Arc::new(Mutex::new(Vec::new()));
        let produce = ScriptedWorker::new(Phase::Produce);
        let review = ScriptedWorker::new(Phase::Review);
        let qa = ScriptedWorker::new(Phase::Qa);
        produce.attach_log(call_log.clone());
        review.attach_log(call_log.clone());
        qa.attach_log(call_log.clone());

        Self {
            produce,
            review,
            qa,
            backlog,
            source: StaticSource::fixed(keys),
            registry: StaticRegistry::default_pair(),
            control: CancelControl::never(),
            call_log,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            produce: self.produce.clone(),
            review: self.review.clone(),
            qa: self.qa.clone(),
            source: self.source.clone(),
            backlog: self.backlog.clone(),
            registry: self.registry.clone(),
            control: self.control.clone(),
            notes: None,
        }
    }

    pub fn scheduler(
        &self,
        config: OrchestratorConfig,
        store: Arc<FileStateStore>,
    ) -> CycleScheduler {
        // Exploration probability zero keeps selection deterministic.
        let selector = AgentSelector::new(
            SelectorConfig {
                explore_probability: 0.0,
                ..SelectorConfig::default()
            },
            Box::new(SeededDice::new(7)),
        );
        CycleScheduler::new(config, self.collaborators(), store, selector)
    }

    pub fn ordered_calls(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_cycles: 5,
        max_iterations: 3,
        explore_probability: 0.0,
        ..OrchestratorConfig::default()
    }
}

pub fn run_options(command_name: &str) -> RunOptions {
    RunOptions {
        command_name: command_name.to_string(),
        filters: TaskFilters::default(),
        limit: None,
        resume_job_id: None,
    }
}

pub fn test_store(dir: &tempfile::TempDir) -> Arc<FileStateStore> {
    Arc::new(FileStateStore::open(dir.path().join("state")).unwrap())
}
