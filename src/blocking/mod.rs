// src/blocking/mod.rs
pub mod index;
pub mod predicates;

pub use index::{BlockingConfig, BlockingIndex};
pub use predicates::{field_predicates, record_predicates};
