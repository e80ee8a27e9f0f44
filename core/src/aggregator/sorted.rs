use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{AggregationAlgorithm, Aggregator};
use crate::buffer_pool::CandidatePool;
use crate::candidate::Candidate;

/// Appends every admitted candidate and sorts once at finalize time.
///
/// Duplicates are not filtered on admission. After a stable sort by distance
/// the first occurrence of each id wins, so ties resolve by arrival order.
pub struct SortAggregator {
    num: usize,
    fnum: usize,
    admitted: Mutex<Vec<Candidate>>,
    pool: Option<Arc<CandidatePool>>,
}

impl SortAggregator {
    pub fn new(num: usize, fnum: usize, replica: usize) -> Self {
        Self {
            num,
            fnum: fnum.max(num),
            admitted: Mutex::new(Vec::with_capacity(num.saturating_mul(replica))),
            pool: None,
        }
    }

    /// Same strategy, with the backing buffer checked out of `pool` and
    /// handed back after finalize.
    pub fn pooled(num: usize, fnum: usize, replica: usize, pool: Arc<CandidatePool>) -> Self {
        let buffer = pool.checkout(num.saturating_mul(replica));
        Self {
            num,
            fnum: fnum.max(num),
            admitted: Mutex::new(buffer),
            pool: Some(pool),
        }
    }
}

impl Drop for SortAggregator {
    fn drop(&mut self) {
        // Queries abandoned before finalize still return their buffer.
        let Some(pool) = &self.pool else {
            return;
        };
        if let Ok(admitted) = self.admitted.get_mut() {
            if admitted.capacity() > 0 {
                pool.give_back(std::mem::take(admitted));
            }
        }
    }
}

#[async_trait]
impl Aggregator for SortAggregator {
    fn start(&self, _token: &CancellationToken) {}

    async fn send(&self, token: &CancellationToken, candidates: &[Candidate]) {
        for candidate in candidates.iter().take(self.fnum) {
            if token.is_cancelled() {
                return;
            }
            let Ok(mut admitted) = self.admitted.lock() else {
                tracing::warn!("sort aggregator lock poisoned");
                return;
            };
            admitted.push(candidate.clone());
        }
    }

    async fn result(&self) -> Vec<Candidate> {
        let mut admitted = match self.admitted.lock() {
            Ok(mut admitted) => std::mem::take(&mut *admitted),
            Err(_) => {
                tracing::warn!("sort aggregator lock poisoned");
                return Vec::new();
            }
        };
        admitted.sort_by(Candidate::cmp_distance);

        let merged = {
            let mut seen = HashSet::with_capacity(admitted.len());
            admitted
                .iter()
                .filter(|candidate| seen.insert(candidate.id.as_str()))
                .take(self.num)
                .cloned()
                .collect::<Vec<_>>()
        };

        if let Some(pool) = &self.pool {
            if admitted.capacity() > 0 {
                pool.give_back(admitted);
            }
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
        if self.pool.is_some() {
            AggregationAlgorithm::SortPoolSlice
        } else {
            AggregationAlgorithm::SortSlice
        }
    }
}
