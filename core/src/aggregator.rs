//! Merging of many shards' partial top-K lists into one global top-K list.
//!
//! Four interchangeable strategies implement [`Aggregator`]:
//! - [`StandardAggregator`]: pruned ordered insertion behind a bounded queue
//!   drained by one consumer task (the default).
//! - [`PairingHeapAggregator`]: O(1) melds while collecting, extraction at
//!   finalize time.
//! - [`SortAggregator`]: append everything, stable sort and dedupe at
//!   finalize time, optionally backed by a shared [`CandidatePool`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::buffer_pool::CandidatePool;
use crate::candidate::Candidate;

mod pairing;
mod sorted;
mod standard;

pub use pairing::PairingHeapAggregator;
pub use sorted::SortAggregator;
pub use standard::StandardAggregator;

/// Contract shared by every merge strategy.
///
/// `send` may be called concurrently from many shard tasks; `start` and
/// `result` are each called once by the task that owns the query.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Starts background processing. A no-op for batch strategies.
    fn start(&self, token: &CancellationToken);

    /// Admits one shard's distance-sorted batch, capped at `fnum` entries.
    /// Returns early, without error, once `token` is cancelled.
    async fn send(&self, token: &CancellationToken, candidates: &[Candidate]);

    /// Stops background work and returns at most `num` unique candidates in
    /// ascending distance order. Later calls return an empty list.
    async fn result(&self) -> Vec<Candidate>;

    fn num(&self) -> usize;

    fn fnum(&self) -> usize;

    fn algorithm(&self) -> AggregationAlgorithm;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationAlgorithm {
    #[default]
    Unknown,
    ConcurrentQueue,
    SortSlice,
    SortPoolSlice,
    PairingHeap,
}

impl AggregationAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::ConcurrentQueue => "concurrent_queue",
            Self::SortSlice => "sort_slice",
            Self::SortPoolSlice => "sort_pool_slice",
            Self::PairingHeap => "pairing_heap",
        }
    }

    /// Replaces `Unknown` with `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        match self {
            Self::Unknown => fallback,
            other => other,
        }
    }
}

impl fmt::Display for AggregationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAlgorithmError(pub String);

impl fmt::Display for UnknownAlgorithmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown aggregation algorithm '{}'", self.0)
    }
}

impl std::error::Error for UnknownAlgorithmError {}

impl FromStr for AggregationAlgorithm {
    type Err = UnknownAlgorithmError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "unknown" => Ok(Self::Unknown),
            "concurrent_queue" | "concurrentqueue" | "queue" | "std" => Ok(Self::ConcurrentQueue),
            "sort_slice" | "sortslice" | "slice" => Ok(Self::SortSlice),
            "sort_pool_slice" | "sortpoolslice" | "pool_slice" => Ok(Self::SortPoolSlice),
            "pairing_heap" | "pairingheap" | "heap" => Ok(Self::PairingHeap),
            _ => Err(UnknownAlgorithmError(raw.to_string())),
        }
    }
}

/// Builds the aggregator for `algorithm`. `Unknown` maps to the standard
/// ordered-insertion strategy. `pool` is only used by `SortPoolSlice`.
pub fn select_aggregator(
    algorithm: AggregationAlgorithm,
    num: usize,
    fnum: usize,
    replica: usize,
    pool: &Arc<CandidatePool>,
) -> Arc<dyn Aggregator> {
    match algorithm {
        AggregationAlgorithm::Unknown | AggregationAlgorithm::ConcurrentQueue => {
            Arc::new(StandardAggregator::new(num, fnum, replica))
        }
        AggregationAlgorithm::SortSlice => Arc::new(SortAggregator::new(num, fnum, replica)),
        AggregationAlgorithm::SortPoolSlice => Arc::new(SortAggregator::pooled(
            num,
            fnum,
            replica,
            Arc::clone(pool),
        )),
        AggregationAlgorithm::PairingHeap => Arc::new(PairingHeapAggregator::new(num, fnum)),
    }
}
