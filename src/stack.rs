//! Stack growth for the recursive parser and evaluator.
//!
//! Deeply nested source recurses once per nesting level. `stacker` moves
//! the work onto a fresh heap-allocated segment when the current stack runs low.

/// Stack space to keep free before recursing (100KB red zone).
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment (1MB).
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
