use std::collections::{HashSet, VecDeque};

use crate::modules::Handle;

/// Deduplicating work queue of program handles.
#[derive(Debug, Default)]
pub struct HandleQueue {
    queue: VecDeque<Handle>,
    seen: HashSet<Handle>,
}

impl HandleQueue {
    /// Creates a new, empty `HandleQueue`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform listing first, then any known handles it no longer surfaces.
    pub fn from_sources(listed: Vec<Handle>, known: &[Handle]) -> Self {
        let mut queue = Self::new();
        for handle in listed {
            queue.add(handle);
        }
        for handle in known {
            queue.add(handle.clone());
        }
        queue
    }

    /// Adds a handle if it has not been seen before. Blank handles are ignored.
    pub fn add(&mut self, handle: Handle) {
        let handle = handle.trim().to_string();
        if handle.is_empty() {
            return;
        }
        if self.seen.insert(handle.clone()) {
            self.queue.push_back(handle);
        }
    }

    /// Returns the next pending handle, or `None` if the queue is drained.
    pub fn next(&mut self) -> Option<Handle> {
        self.queue.pop_front()
    }

    /// Number of handles still queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
