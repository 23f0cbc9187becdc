//! Recursion limits for nested PDF structures
//!
//! Arrays and dictionaries may nest arbitrarily deep in hostile input; the
//! tokenizer tracks its depth here so that a deep file turns into an error
//! instead of a stack overflow.

use crate::error::{PdfError, Result};

/// Default maximum nesting depth for direct values
pub const MAX_RECURSION_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct StackSafeContext {
    /// Current recursion depth
    pub depth: usize,
    /// Maximum allowed depth
    pub max_depth: usize,
}

impl Default for StackSafeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl StackSafeContext {
    pub fn new() -> Self {
        Self::with_limit(MAX_RECURSION_DEPTH)
    }

    pub fn with_limit(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    /// Enter a new recursion level
    pub fn enter(&mut self) -> Result<()> {
        if self.depth + 1 > self.max_depth {
            return Err(PdfError::RecursionLimit {
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Exit a recursion level
    pub fn exit(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
        }
    }

    pub fn reset(&mut self) {
        self.depth = 0;
    }
}
