// src/blocking/index.rs
use indicatif::MultiProgress;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

use crate::blocking::predicates::{record_predicates, FULL_VALUE_TAG};
use crate::error::Result;
use crate::models::{BlockingStats, CandidatePair, FieldSet, RecordId, RecordSet};
use crate::utils::cancellation::CancellationFlag;
use crate::utils::env::env_or;
use crate::utils::progress_config::phase_bar;

const FULL_COMPARISON_THRESHOLD: usize = 100;
const MAX_BLOCK_SIZE: usize = 100;
const MAX_CANDIDATES_PER_RECORD: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct BlockingConfig {
    /// Record counts at or below this compare every pair
    pub full_comparison_threshold: usize,
    /// Blocks with more members than this are too coarse and dropped
    pub max_block_size: usize,
    pub max_candidates_per_record: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            full_comparison_threshold: FULL_COMPARISON_THRESHOLD,
            max_block_size: MAX_BLOCK_SIZE,
            max_candidates_per_record: MAX_CANDIDATES_PER_RECORD,
        }
    }
}

impl BlockingConfig {
    pub fn from_env() -> Self {
        Self {
            full_comparison_threshold: env_or(
                "DEDUPE_FULL_COMPARISON_THRESHOLD",
                FULL_COMPARISON_THRESHOLD,
            ),
            max_block_size: env_or("DEDUPE_MAX_BLOCK_SIZE", MAX_BLOCK_SIZE).max(2),
            max_candidates_per_record: env_or(
                "DEDUPE_MAX_CANDIDATES_PER_RECORD",
                MAX_CANDIDATES_PER_RECORD,
            )
            .max(1),
        }
    }
}

/// Groups records sharing predicate keys and emits the candidate pairs worth
/// comparing.
pub struct BlockingIndex {
    config: BlockingConfig,
    fields: FieldSet,
}

impl BlockingIndex {
    pub fn new(config: BlockingConfig, fields: FieldSet) -> Self {
        Self { config, fields }
    }

    pub fn config(&self) -> &BlockingConfig {
        &self.config
    }

    pub fn index(&self, records: &RecordSet) -> Result<(BTreeSet<CandidatePair>, BlockingStats)> {
        self.index_with(records, &CancellationFlag::new(), None)
    }

    pub fn index_with(
        &self,
        records: &RecordSet,
        cancel: &CancellationFlag,
        multi_progress: Option<&MultiProgress>,
    ) -> Result<(BTreeSet<CandidatePair>, BlockingStats)> {
        if records.len() <= self.config.full_comparison_threshold {
            return self.all_pairs(records, cancel);
        }

        let mut stats = BlockingStats {
            records_indexed: records.len(),
            ..Default::default()
        };

        let pb = phase_bar(multi_progress, records.len() as u64, "Building blocks...");
        let mut blocks: HashMap<String, Vec<RecordId>> = HashMap::new();
        let mut predicates_by_record: HashMap<RecordId, Vec<String>> = HashMap::new();

        for (i, record) in records.iter().enumerate() {
            cancel.check(i, "Blocking")?;
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            let keys = record_predicates(record, &self.fields);
            for key in &keys {
                blocks.entry(key.clone()).or_default().push(record.id());
            }
            predicates_by_record.insert(record.id(), keys.into_iter().collect());
        }

        stats.blocks_built = blocks.len();
        let max_block_size = self.config.max_block_size;
        let mut discarded = 0;
        // Oversized whole-value blocks are windowed by id instead of dropped.
        let mut windowed: HashMap<String, Vec<RecordId>> = HashMap::new();
        blocks.retain(|key, members| {
            if members.len() > max_block_size {
                if key.contains(FULL_VALUE_TAG) {
                    debug!("Windowing coarse block '{}' with {} records", key, members.len());
                    windowed.insert(key.clone(), std::mem::take(members));
                } else {
                    debug!("Discarding coarse block '{}' with {} records", key, members.len());
                    discarded += 1;
                }
                false
            } else {
                members.len() > 1
            }
        });
        stats.blocks_discarded = discarded;
        stats.blocks_windowed = windowed.len();
        let window_radius = (max_block_size / 2).max(1);

        if let Some(pb) = &pb {
            pb.set_position(0);
            pb.set_message("Generating candidates...");
        }

        let mut candidates: BTreeSet<CandidatePair> = BTreeSet::new();
        for (i, id1) in records.ids().enumerate() {
            cancel.check(i, "Candidate generation")?;
            if let Some(pb) = &pb {
                pb.inc(1);
            }

            let mut shared_counts: HashMap<RecordId, usize> = HashMap::new();
            for key in predicates_by_record.get(&id1).into_iter().flatten() {
                let neighbors: &[RecordId] = if let Some(members) = blocks.get(key) {
                    members
                } else if let Some(members) = windowed.get(key) {
                    // Members were pushed in id order, so the block is sorted.
                    match members.binary_search(&id1) {
                        Ok(pos) => {
                            let start = pos.saturating_sub(window_radius);
                            let end = (pos + window_radius + 1).min(members.len());
                            &members[start..end]
                        }
                        Err(_) => &[],
                    }
                } else {
                    &[]
                };
                for &id2 in neighbors {
                    if id1 != id2 {
                        *shared_counts.entry(id2).or_insert(0) += 1;
                    }
                }
            }

            let mut ranked: Vec<(RecordId, usize)> = shared_counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for (id2, _) in ranked.into_iter().take(self.config.max_candidates_per_record) {
                candidates.insert(CandidatePair::new(id1, id2));
            }
        }

        stats.candidate_pairs = candidates.len();
        if let Some(pb) = &pb {
            pb.finish_with_message(format!("Generated {} candidate pairs", candidates.len()));
        }
        info!(
            "Blocking produced {} candidate pairs from {} records ({} usable blocks)",
            candidates.len(),
            records.len(),
            blocks.len()
        );
        Ok((candidates, stats))
    }

    fn all_pairs(
        &self,
        records: &RecordSet,
        cancel: &CancellationFlag,
    ) -> Result<(BTreeSet<CandidatePair>, BlockingStats)> {
        let ids: Vec<RecordId> = records.ids().collect();
        let mut candidates = BTreeSet::new();
        for (i, &id1) in ids.iter().enumerate() {
            cancel.check(i, "Full pairwise comparison")?;
            for &id2 in &ids[i + 1..] {
                candidates.insert(CandidatePair::new(id1, id2));
            }
        }
        debug!(
            "{} records at or below full-comparison threshold {}; comparing all {} pairs",
            ids.len(),
            self.config.full_comparison_threshold,
            candidates.len()
        );
        let stats = BlockingStats {
            records_indexed: ids.len(),
            candidate_pairs: candidates.len(),
            full_comparison_fallback: true,
            ..Default::default()
        };
        Ok((candidates, stats))
    }
}
