pub mod core;
pub mod stats_models;

pub use self::core::{
    CandidatePair, FeatureVector, FieldDefinition, FieldKind, FieldSet, Label, Record, RecordId,
    RecordSet, TrainingSet,
};
pub use self::stats_models::{BlockingStats, CoherenceScore, PartitionStats, SessionStats};
