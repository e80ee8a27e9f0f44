use std::time::Duration;

use anyhow::Result;
use meldgate_core::{AggregationAlgorithm, DEFAULT_MAX_IDLE_BUFFERS};

use crate::env_utils::{env_or, parse_bool_env, parse_env};

const SEARCH_TIMEOUT_MS_DEFAULT: u64 = 3_000;
const REPLICA_DEFAULT: usize = 1;
const EMPTY_RESULT_RETRY_DEFAULT: bool = true;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Gateway name, used in error resources and generated request ids.
    pub name: String,
    pub addr: String,
    /// Applied when a request does not carry its own timeout.
    pub search_timeout_ms: u64,
    pub replica: usize,
    /// Used when a request leaves the algorithm unset.
    pub default_algorithm: AggregationAlgorithm,
    pub pool_max_idle: usize,
    /// Re-query a shard once when it answers with no candidates.
    pub empty_result_retry: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: "meldgate".to_string(),
            addr: "127.0.0.1".to_string(),
            search_timeout_ms: SEARCH_TIMEOUT_MS_DEFAULT,
            replica: REPLICA_DEFAULT,
            default_algorithm: AggregationAlgorithm::ConcurrentQueue,
            pool_max_idle: DEFAULT_MAX_IDLE_BUFFERS,
            empty_result_retry: EMPTY_RESULT_RETRY_DEFAULT,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let name = env_or("MELDGATE_NAME", "meldgate");
        let addr = env_or("MELDGATE_ADDR", "127.0.0.1");
        let search_timeout_ms = parse_env("MELDGATE_SEARCH_TIMEOUT_MS", SEARCH_TIMEOUT_MS_DEFAULT)?;
        let replica = parse_env("MELDGATE_REPLICA", REPLICA_DEFAULT)?;
        let default_algorithm = parse_env(
            "MELDGATE_DEFAULT_ALGORITHM",
            AggregationAlgorithm::ConcurrentQueue,
        )?
        .or(AggregationAlgorithm::ConcurrentQueue);
        let pool_max_idle = parse_env("MELDGATE_POOL_MAX_IDLE", DEFAULT_MAX_IDLE_BUFFERS)?;
        let empty_result_retry =
            parse_bool_env("MELDGATE_EMPTY_RESULT_RETRY", EMPTY_RESULT_RETRY_DEFAULT)?;

        if name.trim().is_empty() {
            anyhow::bail!("MELDGATE_NAME must not be empty");
        }
        if search_timeout_ms == 0 {
            anyhow::bail!("MELDGATE_SEARCH_TIMEOUT_MS must be > 0");
        }
        if replica == 0 {
            anyhow::bail!("MELDGATE_REPLICA must be > 0");
        }
        if pool_max_idle == 0 {
            anyhow::bail!("MELDGATE_POOL_MAX_IDLE must be > 0");
        }

        Ok(Self {
            name,
            addr,
            search_timeout_ms,
            replica,
            default_algorithm,
            pool_max_idle,
            empty_result_retry,
        })
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    /// `name(addr)`, the origin half of an error resource.
    pub fn origin(&self) -> String {
        format!("{}({})", self.name, self.addr)
    }
}
