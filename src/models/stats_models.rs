// src/models/stats_models.rs
use serde::{Deserialize, Serialize};

/// Summary of one blocking run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockingStats {
    pub records_indexed: usize,
    pub blocks_built: usize,
    pub blocks_discarded: usize,
    /// Oversized whole-value blocks kept as bounded windows
    pub blocks_windowed: usize,
    pub candidate_pairs: usize,
    pub full_comparison_fallback: bool,
}

/// Summary of one partition run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    pub pairs_scored: usize,
    pub edges_kept: usize,
    pub initial_components: usize,
    pub components_split_for_size: usize,
    pub components_refined: usize,
    pub clusters: usize,
    pub singletons: usize,
    pub avg_coherence: f64,
}

/// Cluster cohesion measures, in [0, 1] unless noted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoherenceScore {
    /// Ratio of above-threshold edges to possible edges
    pub density: f64,
    /// Mean edge probability
    pub average_confidence: f64,
    pub confidence_variance: f64,
    pub overall_score: f64,
    pub total_edges: usize,
    pub cluster_size: usize,
}

/// Counters shown to the operator during labeling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub pairs_remaining: usize,
    pub pairs_skipped: usize,
    pub labeled_match: usize,
    pub labeled_distinct: usize,
    pub model_version: u32,
    pub state: String,
}
