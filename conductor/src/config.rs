//! Orchestrator configuration.
//!
//! Defaults live in `Default`; a TOML file can override any subset of
//! fields. Collaborator endpoints are not configured here, they are injected
//! as trait objects.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierConfig;
use crate::selector::SelectorConfig;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum scheduler cycles per job.
    pub max_cycles: u32,
    /// Maximum full pipeline passes per task.
    pub max_iterations: u32,
    /// In-place retries allowed for transient qa failures.
    pub max_transient_retries: u32,
    /// Cumulative work-item limit across all cycles (None = unlimited).
    pub limit: Option<usize>,
    /// Probability of a deliberate exploration pick per selection.
    pub explore_probability: f64,
    /// Quality penalty applied to degraded workers.
    pub degraded_penalty: f32,
    /// Collect per-phase quality ratings into the final summary.
    pub collect_ratings: bool,
    /// Pass the dry-run flag through to phase workers.
    pub dry_run: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5,
            max_iterations: 3,
            max_transient_retries: 3,
            limit: None,
            explore_probability: 0.08,
            degraded_penalty: 1.5,
            collect_ratings: false,
            dry_run: false,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// The classifier view of this configuration.
    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            max_attempts: self.max_iterations,
            max_transient_retries: self.max_transient_retries,
        }
    }

    /// The selector view of this configuration.
    pub fn selector(&self) -> SelectorConfig {
        SelectorConfig {
            explore_probability: self.explore_probability,
            degraded_penalty: self.degraded_penalty,
            ..SelectorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_cycles, 5);
        assert_eq!(config.max_iterations, 3);
        assert!(config.limit.is_none());
        assert!(!config.dry_run);
    }

    #[test]
    fn test_partial_toml_overlay() {
        let config = OrchestratorConfig::from_toml(
            r#"
max_iterations = 7
limit = 10
collect_ratings = true
"#,
        )
        .unwrap();
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.limit, Some(10));
        assert!(config.collect_ratings);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_cycles, 5);
    }

    #[test]
    fn test_view_structs() {
        let mut config = OrchestratorConfig::default();
        config.max_iterations = 9;
        config.explore_probability = 0.2;

        assert_eq!(config.classifier().max_attempts, 9);
        assert!((config.selector().explore_probability - 0.2).abs() < f64::EPSILON);
    }
}
