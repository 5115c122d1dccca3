//! History Buffer
//!
//! Ordered log of every enriched message accepted so far. New joiners get a
//! snapshot replayed before any live traffic.

use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct HistoryBuffer {
    entries: VecDeque<Arc<str>>,
    /// Ring capacity; `None` keeps everything for the life of the process
    limit: Option<usize>,
    dropped: u64,
}

impl HistoryBuffer {
    /// Unbounded buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer that discards its oldest entries beyond `limit`
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn append(&mut self, entry: Arc<str>) {
        if let Some(limit) = self.limit {
            if limit == 0 {
                self.dropped += 1;
                return;
            }
            while self.entries.len() >= limit {
                self.entries.pop_front();
                self.dropped += 1;
            }
        }
        self.entries.push_back(entry);
    }

    /// Entries in append order
    pub fn snapshot(&self) -> Vec<Arc<str>> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted by the ring limit so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
