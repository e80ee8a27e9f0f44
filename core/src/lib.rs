#![forbid(unsafe_code)]
//! Core primitives for Meldgate.
//!
//! Everything needed to merge many shards' partial top-K candidate lists into
//! one global top-K list: the candidate record, a meldable pairing heap, the
//! shared buffer pool, and the interchangeable aggregation strategies.

pub mod aggregator;
pub mod buffer_pool;
pub mod candidate;
pub mod pairing_heap;

pub use aggregator::{
    select_aggregator, AggregationAlgorithm, Aggregator, PairingHeapAggregator, SortAggregator,
    StandardAggregator, UnknownAlgorithmError,
};
pub use buffer_pool::{CandidatePool, DEFAULT_MAX_IDLE_BUFFERS};
pub use candidate::{Candidate, SearchResponse};
pub use pairing_heap::PairingHeap;
