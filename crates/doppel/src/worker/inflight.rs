//! Bounded admission table for jobs being fingerprinted.
//!
//! The dispatch loop only takes a new job off the wire when this table
//! has room, so the number of concurrently processing images never
//! exceeds the configured limit.

use std::collections::HashSet;

use url::Url;

/// Identity of a crawl job: the collection source plus the image link.
pub type JobKey = (Url, Url);

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The same identity is already being processed.
    Duplicate,
    /// The table is at capacity.
    Full,
}

/// Tracks jobs currently in flight and enforces the concurrency bound.
#[derive(Debug)]
pub struct InFlightTable {
    capacity: usize,
    active: HashSet<JobKey>,
}

impl InFlightTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            active: HashSet::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.capacity
    }

    /// Tries to admit a job. The key is only stored on `Admitted`.
    pub fn try_admit(&mut self, key: &JobKey) -> Admission {
        if self.active.contains(key) {
            return Admission::Duplicate;
        }
        if self.active.len() >= self.capacity {
            return Admission::Full;
        }
        self.active.insert(key.clone());
        Admission::Admitted
    }

    /// Releases a completed job. Returns false if the key was not held.
    pub fn release(&mut self, key: &JobKey) -> bool {
        self.active.remove(key)
    }
}
