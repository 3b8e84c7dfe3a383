// src/lib.rs
//! Active-learning record deduplication: blocking, pairwise comparison,
//! uncertainty sampling, a logistic classifier and graph partitioning, driven
//! by an explicit labeling session.

pub mod blocking;
pub mod clustering;
pub mod error;
pub mod learning;
pub mod matching;
pub mod models;
pub mod session;
pub mod utils;

pub use error::{DedupeError, Result};
pub use session::{DedupeSession, SessionState};
pub use utils::dedupe_config::DedupeConfig;
