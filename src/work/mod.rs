//! Work dispatch
//!
//! Turns a test's input set into indexed work items and runs them
//! under a concurrency cap.

pub mod generator;
pub mod worker;

pub use generator::{InputSource, WorkGenerator};
pub use worker::{ItemHandler, Worker, WorkerOptions};

use serde::Serialize;
use std::collections::BTreeSet;

/// One unit of test input paired with its position in the input sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem<T> {
    /// Stable position in the original input sequence (used for resume)
    pub index: usize,
    /// The test input
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(index: usize, payload: T) -> Self {
        Self { index, payload }
    }
}

/// Progress of a single test run
///
/// `resume_offset` is what the caller asked to skip, not proof that the
/// skipped items ever completed. Verified completions live in `completed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    /// Items pushed into the worker
    pub total: usize,
    /// Caller-supplied resume offset
    pub resume_offset: usize,
    /// Handler invocations currently running
    pub in_flight: usize,
    /// Indices whose handler returned successfully
    pub completed: BTreeSet<usize>,
    /// Indices whose handler failed, panicked or timed out
    pub failed: BTreeSet<usize>,
}

impl RunState {
    pub fn new(resume_offset: usize) -> Self {
        Self {
            resume_offset,
            ..Self::default()
        }
    }

    /// Lowest index not yet verified complete, if any item was pushed.
    ///
    /// Failed items are not skipped by this offset, so feeding it back
    /// as `--resume` retries them.
    pub fn safe_resume_offset(&self) -> usize {
        let mut next = self.resume_offset;
        while self.completed.contains(&next) {
            next += 1;
        }
        next
    }

    /// Number of items that reached a terminal outcome
    pub fn finished(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_resume_offset_stops_at_first_gap() {
        let mut state = RunState::new(2);
        state.completed.extend([2, 3, 5]);
        state.failed.insert(4);

        assert_eq!(state.safe_resume_offset(), 4);
        assert_eq!(state.finished(), 4);
    }

    #[test]
    fn test_safe_resume_offset_without_progress() {
        let state = RunState::new(7);
        assert_eq!(state.safe_resume_offset(), 7);
    }
}
