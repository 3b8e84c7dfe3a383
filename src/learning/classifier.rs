// src/learning/classifier.rs
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{DedupeError, Result};
use crate::models::FeatureVector;
use crate::utils::env::env_or;

const MIN_LABELED_PAIRS: usize = 2;
const RECOMMENDED_LABELED_PAIRS: usize = 10;
const LEARNING_RATE: f64 = 1.0;
const EPOCHS: usize = 1000;
const BATCH_SIZE: usize = 16;
const L2_PENALTY: f64 = 0.001;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Training fails below this many labeled pairs
    pub min_labeled_pairs: usize,
    /// Training below this count proceeds with a warning
    pub recommended_labeled_pairs: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub l2_penalty: f64,
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_labeled_pairs: MIN_LABELED_PAIRS,
            recommended_labeled_pairs: RECOMMENDED_LABELED_PAIRS,
            learning_rate: LEARNING_RATE,
            epochs: EPOCHS,
            batch_size: BATCH_SIZE,
            l2_penalty: L2_PENALTY,
            seed: DEFAULT_SEED,
        }
    }
}

impl ClassifierConfig {
    pub fn from_env() -> Self {
        Self {
            min_labeled_pairs: env_or("DEDUPE_MIN_LABELED_PAIRS", MIN_LABELED_PAIRS),
            recommended_labeled_pairs: env_or(
                "DEDUPE_RECOMMENDED_LABELED_PAIRS",
                RECOMMENDED_LABELED_PAIRS,
            ),
            learning_rate: env_or("DEDUPE_LEARNING_RATE", LEARNING_RATE),
            epochs: env_or("DEDUPE_EPOCHS", EPOCHS),
            batch_size: env_or("DEDUPE_BATCH_SIZE", BATCH_SIZE).max(1),
            l2_penalty: env_or("DEDUPE_L2_PENALTY", L2_PENALTY),
            seed: env_or("DEDUPE_SEED", DEFAULT_SEED),
        }
    }
}

/// Feature vectors of labeled pairs, split by class.
#[derive(Debug, Clone, Default)]
pub struct TrainingExamples {
    pub matches: Vec<FeatureVector>,
    pub distinct: Vec<FeatureVector>,
}

impl TrainingExamples {
    pub fn len(&self) -> usize {
        self.matches.len() + self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Logistic regression weights over the feature space. The last weight is the bias.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClassifierModel {
    weights: Vec<f64>,
    pub version: u32,
    pub training_examples: usize,
}

impl ClassifierModel {
    pub fn feature_count(&self) -> usize {
        self.weights.len() - 1
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Match probability in [0, 1].
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != self.feature_count() {
            warn!(
                "Expected {} features, but got {}. Prediction will be unreliable.",
                self.feature_count(),
                features.len()
            );
            return 0.5;
        }
        sigmoid(logit(&self.weights, features))
    }
}

fn logit(weights: &[f64], features: &[f64]) -> f64 {
    let features_with_bias = features.iter().chain(std::iter::once(&1.0));
    weights.iter().zip(features_with_bias).map(|(w, f)| w * f).sum()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Fits a fresh model. Deterministic for a given config and example set.
pub fn fit_logistic(examples: &TrainingExamples, config: &ClassifierConfig) -> Result<ClassifierModel> {
    let matches = examples.matches.len();
    let distinct = examples.distinct.len();
    let minimum = config.min_labeled_pairs.max(2);
    if matches == 0 || distinct == 0 || matches + distinct < minimum {
        return Err(DedupeError::InsufficientTrainingData {
            matches,
            distinct,
            minimum,
        });
    }

    let feature_count = examples.matches[0].len();
    let samples: Vec<(&FeatureVector, f64)> = examples
        .matches
        .iter()
        .map(|f| (f, 1.0))
        .chain(examples.distinct.iter().map(|f| (f, 0.0)))
        .collect();
    if let Some((bad, _)) = samples.iter().find(|(f, _)| f.len() != feature_count) {
        return Err(DedupeError::processing(format!(
            "Feature vector length mismatch: expected {}, got {}",
            feature_count,
            bad.len()
        )));
    }

    // Balance the classes so a skewed label set does not drag the boundary.
    let total = samples.len() as f64;
    let match_weight = total / (2.0 * matches as f64);
    let distinct_weight = total / (2.0 * distinct as f64);

    let mut weights = vec![0.0; feature_count + 1];
    let mut order: Vec<usize> = (0..samples.len()).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let batch_size = config.batch_size.max(1);

    for _ in 0..config.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(batch_size) {
            let mut gradient = vec![0.0; feature_count + 1];
            for &idx in batch {
                let (features, target) = samples[idx];
                let class_weight = if target > 0.5 { match_weight } else { distinct_weight };
                let error = (sigmoid(logit(&weights, features)) - target) * class_weight;
                for (g, x) in gradient.iter_mut().zip(features.iter()) {
                    *g += error * x;
                }
                gradient[feature_count] += error;
            }
            let n = batch.len() as f64;
            for (i, w) in weights.iter_mut().enumerate() {
                // The bias is not regularized.
                let penalty = if i < feature_count { config.l2_penalty * *w } else { 0.0 };
                *w -= config.learning_rate * (gradient[i] / n + penalty);
            }
        }
    }

    debug!("Fitted logistic weights: {:?}", weights);
    Ok(ClassifierModel {
        weights,
        version: 0,
        training_examples: samples.len(),
    })
}

/// Owns the current model. Each successful `train` replaces it outright and bumps
/// the version; a failed `train` leaves the previous model in place.
#[derive(Debug, Clone)]
pub struct Classifier {
    config: ClassifierConfig,
    model: Option<ClassifierModel>,
    retrain_count: u32,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            model: None,
            retrain_count: 0,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn train(&mut self, examples: &TrainingExamples) -> Result<&ClassifierModel> {
        let mut model = fit_logistic(examples, &self.config)?;
        self.retrain_count += 1;
        model.version = self.retrain_count;
        info!(
            "Classifier (v{}) trained on {} match / {} distinct examples",
            model.version,
            examples.matches.len(),
            examples.distinct.len()
        );
        Ok(self.model.insert(model))
    }

    pub fn model(&self) -> Option<&ClassifierModel> {
        self.model.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    pub fn version(&self) -> u32 {
        self.retrain_count
    }

    /// Match probability under the current model, if one has been trained.
    pub fn score(&self, features: &[f64]) -> Option<f64> {
        self.model.as_ref().map(|m| m.predict(features))
    }
}
