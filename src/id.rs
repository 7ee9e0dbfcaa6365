//! ID generation utilities for overlayd
//!
//! Provides the job identifier type and its sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one queued job.
///
/// Completion events carry this id so the scheduler can tell the running head
/// apart from a stale or duplicated signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Raw sequence number
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Monotonic job id source, owned by the scheduler
#[derive(Debug)]
pub struct JobIdSequence {
    next: u64,
}

impl Default for JobIdSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl JobIdSequence {
    /// Create a sequence starting at 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next id
    pub fn next_id(&mut self) -> JobId {
        let id = JobId(self.next);
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_at_one() {
        let mut seq = JobIdSequence::new();
        assert_eq!(seq.next_id().get(), 1);
        assert_eq!(seq.next_id().get(), 2);
    }

    #[test]
    fn test_job_id_display() {
        let mut seq = JobIdSequence::new();
        let id = seq.next_id();
        assert_eq!(id.to_string(), "job-1");
    }

    #[test]
    fn test_job_ids_are_ordered() {
        let mut seq = JobIdSequence::new();
        let a = seq.next_id();
        let b = seq.next_id();
        assert!(a < b);
        assert_ne!(a, b);
    }
}
