//! Agent candidate selection: capability/health filtering, complexity
//! gating, deliberate exploration, and tiered quality matching.
//!
//! Candidates are fetched fresh from the worker registry on every selection
//! call; nothing here caches registry state. Randomness is isolated behind
//! the [`Dice`] trait so tests can force either exploration branch.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// A worker eligible to run pipeline phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    /// Phase/tool capabilities, e.g. `produce`, `review`, `qa`.
    pub capabilities: BTreeSet<String>,
    /// Disciplines this worker is tuned for, e.g. `backend`, `research`.
    pub disciplines: BTreeSet<String>,
    /// General quality rating (1–10 scale).
    pub rating: f32,
    /// Reasoning-specific quality rating (1–10 scale).
    pub reasoning_rating: f32,
    /// Relative cost per dispatch.
    pub cost: f32,
    /// Highest task complexity this worker safely handles (1–10).
    pub max_complexity: u8,
}

/// Live health as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Reachable,
    /// Reachable but impaired; quality is penalized.
    Degraded,
    Unreachable,
}

/// Inputs for one selection call.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub required_capabilities: BTreeSet<String>,
    pub discipline: Option<String>,
    /// Raw complexity estimate; rounded and clamped to 1–10.
    pub complexity: f32,
    pub avoid_agents: BTreeSet<String>,
    /// Raise the effective complexity target to outrank a failing worker.
    pub force_stronger: bool,
}

/// The outcome of a selection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedAgent {
    pub agent_id: String,
    /// Effective quality score used for ranking.
    pub quality: f32,
    /// Which rule fired and why.
    pub rationale: String,
    /// Set when the complexity gate had to be relaxed.
    pub gating_note: Option<String>,
    /// Whether this pick came from an exploration branch.
    pub explored: bool,
}

/// Seedable randomness seam for the exploration branches.
pub trait Dice: Send {
    /// Returns true with the given probability.
    fn chance(&mut self, probability: f64) -> bool;
    /// Uniform index in `0..len` (`len` > 0).
    fn pick(&mut self, len: usize) -> usize;
}

/// `rand`-backed dice; seed it for reproducible runs.
pub struct SeededDice {
    rng: StdRng,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Dice for SeededDice {
    fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen::<f64>() < probability
    }

    fn pick(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}

/// Tunables for the selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Probability of taking an exploration branch per selection.
    pub explore_probability: f64,
    /// Quality penalty applied to degraded workers.
    pub degraded_penalty: f32,
    /// Redemption exploration only fires at or below this complexity.
    pub redemption_max_complexity: u8,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            explore_probability: 0.08,
            degraded_penalty: 1.5,
            redemption_max_complexity: 4,
        }
    }
}

/// Disciplines where the reasoning rating outranks the general rating.
const REASONING_DISCIPLINES: &[&str] = &["architecture", "research", "planning", "debugging"];

#[derive(Debug, Clone)]
struct Scored {
    candidate: Candidate,
    quality: f32,
    usage_fit: f32,
}

/// Ranks eligible workers and picks one per phase attempt.
pub struct AgentSelector {
    config: SelectorConfig,
    dice: Box<dyn Dice>,
}

impl AgentSelector {
    pub fn new(config: SelectorConfig, dice: Box<dyn Dice>) -> Self {
        Self { config, dice }
    }

    /// Default config with a seeded random source.
    pub fn seeded(seed: u64) -> Self {
        Self::new(SelectorConfig::default(), Box::new(SeededDice::new(seed)))
    }

    /// Pick a worker for one phase attempt.
    ///
    /// An empty pool after capability/health filtering is an unrecoverable
    /// configuration error, never a silent fallback.
    pub fn select(
        &mut self,
        candidates: &[Candidate],
        health: &BTreeMap<String, AgentHealth>,
        request: &SelectionRequest,
    ) -> OrchestratorResult<SelectedAgent> {
        let mut complexity = (request.complexity.round() as i32).clamp(1, 10) as u8;
        if request.force_stronger {
            complexity = complexity.saturating_add(2).min(10);
        }

        // Step 1: capability and health filtering.
        let eligible: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| request.required_capabilities.is_subset(&c.capabilities))
            .filter(|c| {
                !matches!(
                    health.get(&c.id).copied().unwrap_or(AgentHealth::Reachable),
                    AgentHealth::Unreachable
                )
            })
            .collect();

        if eligible.is_empty() {
            return Err(OrchestratorError::NoEligibleAgents {
                detail: format!(
                    "no reachable worker offers capabilities {:?}",
                    request.required_capabilities
                ),
            });
        }

        // The avoid set is advisory: honor it unless it would empty the pool.
        let avoided: Vec<&Candidate> = eligible
            .iter()
            .copied()
            .filter(|c| !request.avoid_agents.contains(&c.id))
            .collect();
        let mut gating_note = None;
        let pool = if avoided.is_empty() {
            gating_note = Some("avoid set would empty the pool; ignoring it".to_string());
            eligible
        } else {
            avoided
        };

        // Step 2: score quality and discipline fit.
        let scored: Vec<Scored> = pool
            .into_iter()
            .map(|c| self.score(c, health, request.discipline.as_deref()))
            .collect();

        // Step 3: complexity gate with graduated fallback.
        let (gated, gate_note) = Self::apply_complexity_gate(&scored, complexity);
        if let Some(note) = gate_note {
            gating_note = Some(match gating_note {
                Some(prior) => format!("{prior}; {note}"),
                None => note,
            });
        }

        // Step 4: occasional deliberate exploration.
        if self.dice.chance(self.config.explore_probability) {
            if let Some(pick) = self.explore(&scored, &gated, complexity) {
                debug!(agent = %pick.agent_id, "exploration pick");
                return Ok(SelectedAgent {
                    gating_note,
                    ..pick
                });
            }
        }

        // Step 5: tiered selection by complexity.
        let Some(pick) = Self::tiered_pick(&gated, complexity) else {
            return Err(OrchestratorError::NoEligibleAgents {
                detail: "selection pool emptied unexpectedly".to_string(),
            });
        };
        Ok(SelectedAgent {
            agent_id: pick.candidate.id.clone(),
            quality: pick.quality,
            rationale: Self::tier_rationale(pick, complexity),
            gating_note,
            explored: false,
        })
    }

    fn score(
        &self,
        candidate: &Candidate,
        health: &BTreeMap<String, AgentHealth>,
        discipline: Option<&str>,
    ) -> Scored {
        let favors_reasoning = discipline
            .map(|d| REASONING_DISCIPLINES.contains(&d))
            .unwrap_or(false);
        let mut quality = if favors_reasoning {
            candidate.reasoning_rating
        } else {
            candidate.rating
        };
        if matches!(
            health.get(&candidate.id).copied(),
            Some(AgentHealth::Degraded)
        ) {
            quality -= self.config.degraded_penalty;
        }

        let usage_fit = match discipline {
            Some(d) => {
                let mut fit = 0.0;
                if candidate.disciplines.contains(d) {
                    fit += 2.0;
                }
                fit += candidate
                    .capabilities
                    .iter()
                    .filter(|cap| cap.contains(d))
                    .count() as f32
                    * 0.5;
                fit
            }
            None => 0.0,
        };

        Scored {
            candidate: candidate.clone(),
            quality,
            usage_fit,
        }
    }

    fn apply_complexity_gate(scored: &[Scored], complexity: u8) -> (Vec<Scored>, Option<String>) {
        let at_target: Vec<Scored> = scored
            .iter()
            .filter(|s| s.candidate.max_complexity >= complexity)
            .cloned()
            .collect();
        if !at_target.is_empty() {
            return (at_target, None);
        }

        let relaxed: Vec<Scored> = scored
            .iter()
            .filter(|s| s.candidate.max_complexity + 1 >= complexity)
            .cloned()
            .collect();
        if !relaxed.is_empty() {
            return (
                relaxed,
                Some(format!(
                    "no candidate rated for complexity {complexity}; relaxed gate to {}",
                    complexity.saturating_sub(1)
                )),
            );
        }

        (
            scored.to_vec(),
            Some(format!(
                "no candidate within one tier of complexity {complexity}; gate disabled"
            )),
        )
    }

    /// Exploration keeps quality signals fresh: either stretch a candidate
    /// one tier below the target, or redeem a bottom-quintile candidate on a
    /// cheap task.
    fn explore(
        &mut self,
        scored: &[Scored],
        gated: &[Scored],
        complexity: u8,
    ) -> Option<SelectedAgent> {
        let stretch: Vec<&Scored> = scored
            .iter()
            .filter(|s| s.candidate.max_complexity + 1 == complexity)
            .collect();
        if !stretch.is_empty() {
            let pick = stretch[self.dice.pick(stretch.len())];
            return Some(SelectedAgent {
                agent_id: pick.candidate.id.clone(),
                quality: pick.quality,
                rationale: format!(
                    "exploration: stretching {} one tier below target complexity {complexity}",
                    pick.candidate.id
                ),
                gating_note: None,
                explored: true,
            });
        }

        if complexity <= self.config.redemption_max_complexity && gated.len() > 1 {
            let mut by_quality: Vec<&Scored> = gated.iter().collect();
            by_quality.sort_by(|a, b| {
                a.quality
                    .partial_cmp(&b.quality)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let quintile = (by_quality.len() as f32 * 0.2).ceil().max(1.0) as usize;
            let pick = by_quality[self.dice.pick(quintile)];
            return Some(SelectedAgent {
                agent_id: pick.candidate.id.clone(),
                quality: pick.quality,
                rationale: format!(
                    "exploration: redeeming low-quality candidate {} on a complexity-{complexity} task",
                    pick.candidate.id
                ),
                gating_note: None,
                explored: true,
            });
        }

        None
    }

    fn tiered_pick(gated: &[Scored], complexity: u8) -> Option<&Scored> {
        let cmp_f32 = |a: f32, b: f32| a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);

        if complexity >= 9 {
            // Strictly highest quality; ties by fit, reasoning, then cost.
            return gated.iter().max_by(|a, b| {
                cmp_f32(a.quality, b.quality)
                    .then(cmp_f32(a.usage_fit, b.usage_fit))
                    .then(cmp_f32(
                        a.candidate.reasoning_rating,
                        b.candidate.reasoning_rating,
                    ))
                    .then(cmp_f32(b.candidate.cost, a.candidate.cost))
            });
        }

        if complexity == 8 {
            // Top quality band (within one point of max), best fit, cheapest.
            let max_quality = gated
                .iter()
                .map(|s| s.quality)
                .fold(f32::NEG_INFINITY, f32::max);
            return gated
                .iter()
                .filter(|s| s.quality >= max_quality - 1.0)
                .max_by(|a, b| {
                    cmp_f32(a.usage_fit, b.usage_fit)
                        .then(cmp_f32(b.candidate.cost, a.candidate.cost))
                });
        }

        // Complexity <= 7: closest quality match to the complexity value
        // itself; do not over-provision cheap tasks with the best worker.
        gated.iter().min_by(|a, b| {
            cmp_f32(
                (a.quality - complexity as f32).abs(),
                (b.quality - complexity as f32).abs(),
            )
            .then(cmp_f32(b.usage_fit, a.usage_fit))
            .then(cmp_f32(a.candidate.cost, b.candidate.cost))
            .then(cmp_f32(a.quality, b.quality))
        })
    }

    fn tier_rationale(pick: &Scored, complexity: u8) -> String {
        if complexity >= 9 {
            format!(
                "complexity {complexity}: highest quality worker {} (q={:.1}, fit={:.1})",
                pick.candidate.id, pick.quality, pick.usage_fit
            )
        } else if complexity == 8 {
            format!(
                "complexity 8: top quality band, best fit/cost {} (q={:.1}, fit={:.1}, cost={:.2})",
                pick.candidate.id, pick.quality, pick.usage_fit, pick.candidate.cost
            )
        } else {
            format!(
                "complexity {complexity}: closest quality match {} (q={:.1}, fit={:.1}, cost={:.2})",
                pick.candidate.id, pick.quality, pick.usage_fit, pick.candidate.cost
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dice with a scripted explore answer and always-first picks.
    struct FixedDice {
        explore: bool,
    }

    impl Dice for FixedDice {
        fn chance(&mut self, _probability: f64) -> bool {
            self.explore
        }

        fn pick(&mut self, _len: usize) -> usize {
            0
        }
    }

    fn candidate(id: &str, rating: f32, reasoning: f32, cost: f32, max_complexity: u8) -> Candidate {
        Candidate {
            id: id.to_string(),
            capabilities: ["produce", "review", "qa"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            disciplines: ["backend".to_string()].into_iter().collect(),
            rating,
            reasoning_rating: reasoning,
            cost,
            max_complexity,
        }
    }

    fn selector(explore: bool) -> AgentSelector {
        AgentSelector::new(SelectorConfig::default(), Box::new(FixedDice { explore }))
    }

    fn request(complexity: f32) -> SelectionRequest {
        SelectionRequest {
            required_capabilities: ["produce".to_string()].into_iter().collect(),
            discipline: Some("backend".to_string()),
            complexity,
            avoid_agents: BTreeSet::new(),
            force_stronger: false,
        }
    }

    #[test]
    fn test_empty_pool_is_configuration_error() {
        let mut selector = selector(false);
        let err = selector
            .select(&[], &BTreeMap::new(), &request(5.0))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEligibleAgents { .. }));
    }

    #[test]
    fn test_unreachable_candidates_are_dropped() {
        let mut selector = selector(false);
        let candidates = vec![candidate("a", 9.0, 9.0, 1.0, 10)];
        let health: BTreeMap<String, AgentHealth> =
            [("a".to_string(), AgentHealth::Unreachable)].into();
        let err = selector.select(&candidates, &health, &request(5.0)).unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEligibleAgents { .. }));
    }

    #[test]
    fn test_critical_complexity_picks_highest_quality() {
        let mut selector = selector(false);
        let candidates = vec![
            candidate("cheap", 5.0, 5.0, 0.2, 10),
            candidate("best", 9.5, 9.0, 3.0, 10),
        ];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(9.0))
            .unwrap();
        assert_eq!(pick.agent_id, "best");
        assert!(pick.rationale.contains("highest quality"));
    }

    #[test]
    fn test_low_complexity_avoids_over_provisioning() {
        let mut selector = selector(false);
        let candidates = vec![
            candidate("modest", 4.0, 4.0, 0.5, 8),
            candidate("best", 9.5, 9.5, 3.0, 10),
        ];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(4.0))
            .unwrap();
        assert_eq!(pick.agent_id, "modest");
    }

    #[test]
    fn test_complexity_eight_band_prefers_cheapest_fit() {
        let mut selector = selector(false);
        let candidates = vec![
            candidate("pricy", 9.2, 9.0, 4.0, 10),
            candidate("value", 8.5, 8.0, 1.0, 10),
            candidate("weak", 5.0, 5.0, 0.2, 10),
        ];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(8.0))
            .unwrap();
        // Both pricy and value are within one point of max quality; value wins on cost.
        assert_eq!(pick.agent_id, "value");
    }

    #[test]
    fn test_degraded_health_penalizes_quality() {
        let mut selector = selector(false);
        let candidates = vec![
            candidate("healthy", 8.8, 8.0, 2.0, 10),
            candidate("degraded", 9.5, 9.0, 2.0, 10),
        ];
        let health: BTreeMap<String, AgentHealth> =
            [("degraded".to_string(), AgentHealth::Degraded)].into();
        let pick = selector.select(&candidates, &health, &request(9.0)).unwrap();
        assert_eq!(pick.agent_id, "healthy");
    }

    #[test]
    fn test_complexity_gate_fallback_records_note() {
        let mut selector = selector(false);
        let candidates = vec![candidate("small", 6.0, 6.0, 1.0, 6)];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(7.0))
            .unwrap();
        assert_eq!(pick.agent_id, "small");
        assert!(pick.gating_note.unwrap().contains("relaxed gate"));
    }

    #[test]
    fn test_exploration_stretch_branch() {
        let mut selector = selector(true);
        let candidates = vec![
            candidate("target", 8.0, 8.0, 2.0, 7),
            candidate("stretch", 6.0, 6.0, 1.0, 6),
        ];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(7.0))
            .unwrap();
        assert_eq!(pick.agent_id, "stretch");
        assert!(pick.explored);
        assert!(pick.rationale.contains("stretching"));
    }

    #[test]
    fn test_exploration_redemption_only_on_cheap_tasks() {
        let mut selector = selector(true);
        // No stretch candidate at complexity-1, so redemption is the only branch.
        let candidates = vec![
            candidate("weak", 2.0, 2.0, 0.2, 10),
            candidate("mid", 4.0, 4.0, 0.5, 10),
            candidate("strong", 8.0, 8.0, 2.0, 10),
        ];
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(3.0))
            .unwrap();
        assert_eq!(pick.agent_id, "weak");
        assert!(pick.rationale.contains("redeeming"));

        // At complexity 6 redemption must not fire; tiered selection runs.
        let pick = selector
            .select(&candidates, &BTreeMap::new(), &request(6.0))
            .unwrap();
        assert!(!pick.explored);
    }

    #[test]
    fn test_force_stronger_raises_target() {
        let mut selector = selector(false);
        let candidates = vec![
            candidate("modest", 5.0, 5.0, 0.5, 10),
            candidate("best", 9.5, 9.5, 3.0, 10),
        ];
        let mut req = request(7.0);
        req.force_stronger = true;
        // Effective complexity 9 → highest-quality rule.
        let pick = selector.select(&candidates, &BTreeMap::new(), &req).unwrap();
        assert_eq!(pick.agent_id, "best");
    }

    #[test]
    fn test_avoid_set_is_advisory() {
        let mut selector = selector(false);
        let candidates = vec![candidate("only", 7.0, 7.0, 1.0, 10)];
        let mut req = request(5.0);
        req.avoid_agents.insert("only".to_string());
        let pick = selector.select(&candidates, &BTreeMap::new(), &req).unwrap();
        assert_eq!(pick.agent_id, "only");
        assert!(pick.gating_note.unwrap().contains("avoid set"));
    }

    #[test]
    fn test_seeded_dice_is_deterministic() {
        let mut a = SeededDice::new(42);
        let mut b = SeededDice::new(42);
        for _ in 0..16 {
            assert_eq!(a.chance(0.5), b.chance(0.5));
            assert_eq!(a.pick(7), b.pick(7));
        }
    }
}
