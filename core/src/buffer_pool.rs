use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::candidate::Candidate;

pub const DEFAULT_MAX_IDLE_BUFFERS: usize = 64;

/// Shared free list of candidate buffers for the pooled sort aggregator.
///
/// The capacity hint only ever grows: once a query asks for a large buffer,
/// every freshly allocated buffer afterwards is at least that large. Idle
/// buffers beyond `max_idle` are released instead of retained.
#[derive(Debug)]
pub struct CandidatePool {
    capacity_hint: AtomicUsize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<Candidate>>>,
}

impl Default for CandidatePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_BUFFERS)
    }
}

impl CandidatePool {
    pub fn new(max_idle: usize) -> Self {
        Self {
            capacity_hint: AtomicUsize::new(0),
            max_idle,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity_hint(&self) -> usize {
        self.capacity_hint.load(Ordering::Relaxed)
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Raises the capacity hint to `capacity` if it is larger.
    pub fn grow_hint(&self, capacity: usize) {
        let _ = self.capacity_hint.fetch_max(capacity, Ordering::Relaxed);
    }

    /// Takes an empty buffer from the free list, allocating one sized to the
    /// capacity hint when none is idle.
    pub fn checkout(&self, capacity: usize) -> Vec<Candidate> {
        self.grow_hint(capacity);
        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match reused {
            Some(mut buffer) => {
                buffer.clear();
                buffer.reserve(capacity);
                buffer
            }
            None => Vec::with_capacity(self.capacity_hint()),
        }
    }

    pub fn give_back(&self, mut buffer: Vec<Candidate>) {
        buffer.clear();
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buffer);
            }
        }
    }
}
