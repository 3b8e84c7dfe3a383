// src/matching/feature_cache.rs
use log::{debug, info};
use lru::LruCache;
use std::num::NonZeroUsize;

use crate::error::Result;
use crate::matching::comparator::Comparator;
use crate::models::{CandidatePair, FeatureVector, RecordSet};

/// Memoizes comparator output per (record pair, field set). Feature vectors are
/// pure functions of their key, so entries never go stale.
pub struct FeatureCache {
    pair_cache: LruCache<String, FeatureVector>,
    pub hits: usize,
    pub misses: usize,
}

impl FeatureCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        debug!("Initializing FeatureCache with capacity {}", capacity);
        Self {
            pair_cache: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_pair_key(pair: &CandidatePair, field_signature: &str) -> String {
        format!("{}:{}:{}", pair.first(), pair.second(), field_signature)
    }

    pub fn get_pair_features(
        &mut self,
        comparator: &Comparator,
        records: &RecordSet,
        pair: &CandidatePair,
    ) -> Result<FeatureVector> {
        let key = Self::get_pair_key(pair, comparator.signature());

        if let Some(features) = self.pair_cache.get(&key).cloned() {
            self.hits += 1;
            if self.hits % 1000 == 0 {
                debug!(
                    "FeatureCache stats - hits: {}, misses: {}, hit rate: {:.2}%",
                    self.hits,
                    self.misses,
                    self.hit_rate() * 100.0
                );
            }
            return Ok(features);
        }

        self.misses += 1;
        let features = comparator.compare_pair(records, pair)?;
        self.pair_cache.put(key, features.clone());
        Ok(features)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// (hits, misses)
    pub fn get_stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }

    /// (entries, capacity)
    pub fn get_cache_info(&self) -> (usize, usize) {
        (self.pair_cache.len(), self.pair_cache.cap().get())
    }

    pub fn clear(&mut self) {
        self.pair_cache.clear();
        self.hits = 0;
        self.misses = 0;
        info!("Feature cache cleared");
    }
}
