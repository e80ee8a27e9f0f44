use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio_util::sync::CancellationToken;

use super::{AggregationAlgorithm, Aggregator};
use crate::candidate::Candidate;
use crate::pairing_heap::PairingHeap;

/// Collects into a pairing heap under one coarse lock; the O(1) meld keeps
/// the critical section short, and extraction is deferred to `result`.
pub struct PairingHeapAggregator {
    num: usize,
    fnum: usize,
    visited: DashSet<String>,
    heap: Mutex<PairingHeap>,
}

impl PairingHeapAggregator {
    pub fn new(num: usize, fnum: usize) -> Self {
        Self {
            num,
            fnum: fnum.max(num),
            visited: DashSet::new(),
            heap: Mutex::new(PairingHeap::new()),
        }
    }
}

#[async_trait]
impl Aggregator for PairingHeapAggregator {
    fn start(&self, _token: &CancellationToken) {}

    async fn send(&self, token: &CancellationToken, candidates: &[Candidate]) {
        for candidate in candidates.iter().take(self.fnum) {
            if token.is_cancelled() {
                return;
            }
            if !self.visited.insert(candidate.id.clone()) {
                continue;
            }
            let Ok(mut heap) = self.heap.lock() else {
                tracing::warn!("pairing heap aggregator lock poisoned");
                return;
            };
            heap.insert(candidate.clone());
        }
    }

    async fn result(&self) -> Vec<Candidate> {
        let mut heap = match self.heap.lock() {
            Ok(mut heap) => std::mem::take(&mut *heap),
            Err(_) => {
                tracing::warn!("pairing heap aggregator lock poisoned");
                return Vec::new();
            }
        };
        let mut merged = Vec::with_capacity(self.num.min(heap.len()));
        while merged.len() < self.num {
            let Some(candidate) = heap.pop_min() else {
                break;
            };
            merged.push(candidate);
        }
        merged
    }

    fn num(&self) -> usize {
        self.num
    }

    fn fnum(&self) -> usize {
        self.fnum
    }

    fn algorithm(&self) -> AggregationAlgorithm {
        AggregationAlgorithm::PairingHeap
    }
}
