// src/learning/sampler.rs
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};

use crate::learning::classifier::ClassifierModel;
use crate::models::{CandidatePair, FeatureVector};

/// A candidate with its current match probability and distance from the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPair {
    pub pair: CandidatePair,
    pub probability: f64,
    /// |p - 0.5|; lower is more informative
    pub uncertainty: f64,
}

/// Ranks unlabeled pairs by how unsure the current model is about them.
#[derive(Debug, Clone)]
pub struct ActiveLearningSampler {
    seed: u64,
}

impl ActiveLearningSampler {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Most uncertain pairs first. Labeled pairs are dropped. Without a model the
    /// mean feature similarity stands in for the match probability. Ties keep a
    /// seeded shuffle order.
    pub fn uncertain_pairs(
        &self,
        unlabeled: &[(CandidatePair, FeatureVector)],
        labeled: &HashSet<CandidatePair>,
        model: Option<&ClassifierModel>,
    ) -> UncertainPairs {
        let mut scored: Vec<ScoredPair> = unlabeled
            .iter()
            .filter(|(pair, _)| !labeled.contains(pair))
            .map(|(pair, features)| {
                let probability = match model {
                    Some(model) => model.predict(features),
                    None => cold_start_probability(features),
                };
                ScoredPair {
                    pair: *pair,
                    probability,
                    uncertainty: (probability - 0.5).abs(),
                }
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        scored.shuffle(&mut rng);
        scored.sort_by(|a, b| {
            a.uncertainty
                .partial_cmp(&b.uncertainty)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "Ranked {} unlabeled pairs (model: {})",
            scored.len(),
            model.map_or("none".to_string(), |m| format!("v{}", m.version))
        );
        UncertainPairs {
            ranked: scored.into(),
        }
    }
}

fn cold_start_probability(features: &[f64]) -> f64 {
    if features.is_empty() {
        return 0.5;
    }
    features.iter().sum::<f64>() / features.len() as f64
}

/// A pull-based ranking, consumed one pair at a time. Query the sampler again to
/// re-rank after labels or retraining.
#[derive(Debug, Clone, Default)]
pub struct UncertainPairs {
    ranked: VecDeque<ScoredPair>,
}

impl UncertainPairs {
    pub fn peek(&self) -> Option<&ScoredPair> {
        self.ranked.front()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// Drops a pair from the ranking, returning whether it was present.
    pub fn remove(&mut self, pair: &CandidatePair) -> bool {
        match self.ranked.iter().position(|s| &s.pair == pair) {
            Some(pos) => {
                self.ranked.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, pair: &CandidatePair) -> bool {
        self.ranked.iter().any(|s| &s.pair == pair)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredPair> {
        self.ranked.iter()
    }
}

impl Iterator for UncertainPairs {
    type Item = CandidatePair;

    fn next(&mut self) -> Option<Self::Item> {
        self.ranked.pop_front().map(|s| s.pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::classifier::{fit_logistic, ClassifierConfig, TrainingExamples};
    use crate::models::RecordId;

    fn pair(a: u64, b: u64) -> CandidatePair {
        CandidatePair::new(RecordId(a), RecordId(b))
    }

    fn unlabeled() -> Vec<(CandidatePair, FeatureVector)> {
        vec![
            (pair(0, 1), vec![0.95]),
            (pair(0, 2), vec![0.05]),
            (pair(1, 2), vec![0.5]),
            (pair(2, 3), vec![0.6]),
        ]
    }

    #[test]
    fn test_cold_start_ranks_middle_first() {
        let sampler = ActiveLearningSampler::new(7);
        let ranked: Vec<CandidatePair> = sampler
            .uncertain_pairs(&unlabeled(), &HashSet::new(), None)
            .collect();
        assert_eq!(ranked.len(), 4);
        assert_eq!(ranked[0], pair(1, 2));
        assert_eq!(ranked[1], pair(2, 3));
    }

    #[test]
    fn test_labeled_pairs_are_never_returned() {
        let sampler = ActiveLearningSampler::new(7);
        let labeled: HashSet<CandidatePair> = [pair(1, 2), pair(0, 1)].into_iter().collect();
        let ranked: Vec<CandidatePair> = sampler
            .uncertain_pairs(&unlabeled(), &labeled, None)
            .collect();
        assert_eq!(ranked.len(), 2);
        assert!(ranked.iter().all(|p| !labeled.contains(p)));
    }

    #[test]
    fn test_empty_input_gives_empty_sequence() {
        let sampler = ActiveLearningSampler::new(7);
        let mut ranked = sampler.uncertain_pairs(&[], &HashSet::new(), None);
        assert!(ranked.is_empty());
        assert_eq!(ranked.next(), None);
    }

    #[test]
    fn test_model_changes_ranking() {
        let examples = TrainingExamples {
            matches: vec![vec![0.9], vec![0.8]],
            distinct: vec![vec![0.7], vec![0.1]],
        };
        let model = fit_logistic(&examples, &ClassifierConfig::default()).unwrap();
        let sampler = ActiveLearningSampler::new(7);
        let ranked = sampler.uncertain_pairs(&unlabeled(), &HashSet::new(), Some(&model));
        // The learned boundary sits between 0.7 and 0.8, away from the cold-start midpoint.
        assert_ne!(ranked.peek().unwrap().pair, pair(1, 2));
        assert!(ranked.iter().all(|s| (0.0..=1.0).contains(&s.probability)));
        let probability_of = |p: CandidatePair| {
            ranked.iter().find(|s| s.pair == p).map(|s| s.probability).unwrap()
        };
        assert!(probability_of(pair(0, 2)) < probability_of(pair(2, 3)));
    }

    #[test]
    fn test_remove_and_ordering_by_uncertainty() {
        let sampler = ActiveLearningSampler::new(1);
        let mut ranked = sampler.uncertain_pairs(&unlabeled(), &HashSet::new(), None);
        assert!(ranked.remove(&pair(1, 2)));
        assert!(!ranked.remove(&pair(1, 2)));
        assert!(!ranked.contains(&pair(1, 2)));
        let uncertainties: Vec<f64> = ranked.iter().map(|s| s.uncertainty).collect();
        assert!(uncertainties.windows(2).all(|w| w[0] <= w[1]));
    }
}
