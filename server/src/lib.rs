#![forbid(unsafe_code)]
//! Search gateway for a sharded vector index: fans a query out to every shard,
//! merges the partial top-K lists and applies the deadline and minimum-result
//! policy.

mod aggregation;
pub mod broadcast;
pub mod config;
mod env_utils;
pub mod errors;
pub mod metrics;
pub mod search;

use tracing_subscriber::EnvFilter;

pub use broadcast::{Broadcast, ShardClient, ShardEntry, ShardSet, ShardTask, ShardTaskFuture};
pub use config::GatewayConfig;
pub use errors::{Code, ErrorKind, SearchError, ShardError, ShardErrorClass};
pub use metrics::{GatewayMetrics, MetricsRenderError};
pub use search::{forward_num, SearchConfig, SearchGateway, ShardCall, ShardCallFuture};

/// Installs the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(error) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("failed to initialize tracing subscriber: {error}");
    }
}
