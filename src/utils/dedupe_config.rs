// src/utils/dedupe_config.rs
use log::{info, warn};

use crate::blocking::BlockingConfig;
use crate::clustering::ClusterConfig;
use crate::learning::ClassifierConfig;
use crate::utils::env::env_or;

const FEATURE_CACHE_SIZE: usize = 20_000;

/// Everything a session needs to know, read from `DEDUPE_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupeConfig {
    pub blocking: BlockingConfig,
    pub classifier: ClassifierConfig,
    pub cluster: ClusterConfig,
    pub feature_cache_size: usize,
    /// Refit the sampling model after every label once both classes are present
    pub retrain_on_label: bool,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            blocking: BlockingConfig::default(),
            classifier: ClassifierConfig::default(),
            cluster: ClusterConfig::default(),
            feature_cache_size: FEATURE_CACHE_SIZE,
            retrain_on_label: true,
        }
    }
}

impl DedupeConfig {
    pub fn from_env() -> Self {
        Self {
            blocking: BlockingConfig::from_env(),
            classifier: ClassifierConfig::from_env(),
            cluster: ClusterConfig::from_env(),
            feature_cache_size: env_or("FEATURE_CACHE_SIZE", FEATURE_CACHE_SIZE),
            retrain_on_label: env_or("DEDUPE_RETRAIN_ON_LABEL", true),
        }
    }

    pub fn log_config(&self) {
        info!("⚙️  Deduplication configuration:");
        info!(
            "   Blocking: full comparison up to {} records, max block size {}, {} candidates per record",
            self.blocking.full_comparison_threshold,
            self.blocking.max_block_size,
            self.blocking.max_candidates_per_record
        );
        info!(
            "   Classifier: min {} labeled pairs ({} recommended), lr {}, {} epochs, seed {}",
            self.classifier.min_labeled_pairs,
            self.classifier.recommended_labeled_pairs,
            self.classifier.learning_rate,
            self.classifier.epochs,
            self.classifier.seed
        );
        info!(
            "   Clustering: match threshold {:.2}, cohesion threshold {:.2}, max component size {}",
            self.cluster.match_threshold,
            self.cluster.cohesion_threshold,
            self.cluster.max_component_size
        );
        info!(
            "   Feature cache: {} entries, retrain on label: {}",
            self.feature_cache_size, self.retrain_on_label
        );
        if self.classifier.min_labeled_pairs < 2 {
            warn!("   Minimum labeled pairs below 2 is raised to 2 (one of each class)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_from_env_overrides() {
        env::set_var("DEDUPE_MATCH_THRESHOLD", "0.8");
        env::set_var("DEDUPE_RETRAIN_ON_LABEL", "false");
        env::set_var("DEDUPE_MIN_LABELED_PAIRS", "not-a-number");

        let config = DedupeConfig::from_env();
        assert!((config.cluster.match_threshold - 0.8).abs() < 1e-9);
        assert!(!config.retrain_on_label);
        assert_eq!(config.classifier.min_labeled_pairs, 2);

        env::remove_var("DEDUPE_MATCH_THRESHOLD");
        env::remove_var("DEDUPE_RETRAIN_ON_LABEL");
        env::remove_var("DEDUPE_MIN_LABELED_PAIRS");
    }
}
