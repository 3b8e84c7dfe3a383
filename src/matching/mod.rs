// src/matching/mod.rs
pub mod comparator;
pub mod feature_cache;
pub mod normalize;

pub use comparator::{field_similarity, Comparator};
pub use feature_cache::FeatureCache;
