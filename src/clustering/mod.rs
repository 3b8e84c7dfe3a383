// src/clustering/mod.rs
pub mod partition;

pub use partition::{
    partition, score_candidates, score_features, Cluster, ClusterConfig, Partitioner,
};
