// src/utils/cancellation.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{DedupeError, Result};

/// How many loop iterations pass between flag checks in long operations.
pub const CANCELLATION_CHECK_INTERVAL: usize = 256;

/// Shared flag an operator (or a signal handler) sets to interrupt blocking or
/// partition scoring. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears the flag so an interrupted operation can be resumed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Interrupted` when the flag is set and `step` is on a check boundary.
    pub fn check(&self, step: usize, operation: &str) -> Result<()> {
        if step % CANCELLATION_CHECK_INTERVAL == 0 && self.is_cancelled() {
            return Err(DedupeError::Interrupted(format!(
                "{} stopped after {} steps",
                operation, step
            )));
        }
        Ok(())
    }
}
