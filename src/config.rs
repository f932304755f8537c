//! Process-wide and per-matcher configuration.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default cap on grammar-expansion recursion depth. Applied to both the
/// compiler's position enumeration and the matcher's runtime stack.
const DEFAULT_MAX_RECURSION_DEPTH: usize = 10_000;

static MAX_RECURSION_DEPTH: AtomicUsize = AtomicUsize::new(DEFAULT_MAX_RECURSION_DEPTH);

/// Returns the current process-wide recursion depth cap.
///
/// Read live by the matcher on every call rather than snapshotted at
/// construction, so a process that lowers the cap mid-run affects matchers
/// already in flight.
pub fn max_recursion_depth() -> usize {
    MAX_RECURSION_DEPTH.load(Ordering::Relaxed)
}

/// Sets the process-wide recursion depth cap used by every matcher and
/// compiler in this process from now on.
pub fn set_max_recursion_depth(depth: usize) {
    MAX_RECURSION_DEPTH.store(depth, Ordering::Relaxed);
}

/// Construction-time options for a [`crate::matcher::Matcher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatcherOptions {
    /// Overrides the compiled grammar's own stop-token set when `Some`.
    pub override_stop_tokens: Option<Vec<u32>>,
    /// When `true`, a completed match terminates the matcher even if no
    /// stop token is subsequently accepted.
    pub terminate_without_stop_token: bool,
    /// How many previously accepted tokens can be undone by `rollback`.
    pub max_rollback_tokens: usize,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        MatcherOptions {
            override_stop_tokens: None,
            terminate_without_stop_token: false,
            max_rollback_tokens: 0,
        }
    }
}

/// Options controlling how a [`crate::compiler::GrammarCompiler`] builds a
/// [`crate::compiler::CompiledGrammar`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Number of worker threads used to compute the adaptive token mask
    /// cache. `0` means use all available parallelism.
    pub max_threads: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions { max_threads: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn recursion_depth_round_trips() {
        let original = max_recursion_depth();
        set_max_recursion_depth(42);
        assert_eq!(max_recursion_depth(), 42);
        set_max_recursion_depth(original);
    }
}
