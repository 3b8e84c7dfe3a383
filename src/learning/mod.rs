// src/learning/mod.rs
//! Active learning: the classifier fitted on human labels and the sampler that
//! decides which pair the human sees next.

pub mod classifier;
pub mod sampler;

pub use classifier::{
    fit_logistic, Classifier, ClassifierConfig, ClassifierModel, TrainingExamples,
};
pub use sampler::{ActiveLearningSampler, ScoredPair, UncertainPairs};
