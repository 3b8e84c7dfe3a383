// src/utils/logging.rs - Phase logging helpers for a labeling session
use log::{info, warn};
use std::time::Instant;

use crate::models::{BlockingStats, PartitionStats, SessionStats};

#[derive(Clone)]
pub struct SessionLogger {
    session_id: String,
    start_time: Instant,
}

impl SessionLogger {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.chars().take(8).collect(),
            start_time: Instant::now(),
        }
    }

    pub fn log_start(&self, record_count: usize, field_count: usize) {
        info!(
            "[SESSION {}] 🚀 Starting deduplication session: {} records, {} comparison fields",
            self.session_id, record_count, field_count
        );
    }

    pub fn log_phase(&self, phase: &str, details: Option<&str>) {
        let elapsed = self.start_time.elapsed();
        match details {
            Some(details) => info!(
                "[SESSION {}] 🔄 Phase: {} - {} [+{:.1}s]",
                self.session_id, phase, details, elapsed.as_secs_f32()
            ),
            None => info!(
                "[SESSION {}] 🔄 Phase: {} [+{:.1}s]",
                self.session_id, phase, elapsed.as_secs_f32()
            ),
        }
    }

    pub fn log_blocking(&self, stats: &BlockingStats) {
        if stats.full_comparison_fallback {
            info!(
                "[SESSION {}] 🧱 Blocking: {} records at or below full-comparison threshold, {} candidate pairs",
                self.session_id, stats.records_indexed, stats.candidate_pairs
            );
        } else {
            info!(
                "[SESSION {}] 🧱 Blocking: {} records → {} blocks ({} discarded as too coarse, {} windowed) → {} candidate pairs",
                self.session_id,
                stats.records_indexed,
                stats.blocks_built,
                stats.blocks_discarded,
                stats.blocks_windowed,
                stats.candidate_pairs
            );
        }
    }

    pub fn log_label_progress(&self, stats: &SessionStats) {
        info!(
            "[SESSION {}] 🏷️  Labeled: {} match, {} distinct. Pairs remaining: {} ({} skipped)",
            self.session_id,
            stats.labeled_match,
            stats.labeled_distinct,
            stats.pairs_remaining,
            stats.pairs_skipped
        );
    }

    pub fn log_training(&self, version: u32, examples: usize, recommended: usize) {
        if examples < recommended {
            warn!(
                "[SESSION {}] ⚠️  Training on only {} labeled pairs (at least {} recommended)",
                self.session_id, examples, recommended
            );
        }
        info!(
            "[SESSION {}] 🧠 Classifier v{} trained on {} labeled pairs",
            self.session_id, version, examples
        );
    }

    pub fn log_partition(&self, stats: &PartitionStats) {
        let elapsed = self.start_time.elapsed();
        info!(
            "[SESSION {}] ✅ Partition complete: {} pairs scored, {} edges kept, {} clusters ({} singletons) [+{:.1}s]",
            self.session_id,
            stats.pairs_scored,
            stats.edges_kept,
            stats.clusters,
            stats.singletons,
            elapsed.as_secs_f32()
        );
        if stats.components_split_for_size > 0 || stats.components_refined > 0 {
            info!(
                "[SESSION {}] ✂️  {} oversized components split, {} weakly-connected components refined",
                self.session_id, stats.components_split_for_size, stats.components_refined
            );
        }
        info!(
            "[SESSION {}] 📊 Average cluster coherence: {:.3}",
            self.session_id, stats.avg_coherence
        );
    }
}
