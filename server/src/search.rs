use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meldgate_core::{select_aggregator, AggregationAlgorithm, CandidatePool, SearchResponse};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{Broadcast, ShardClient};
use crate::config::GatewayConfig;
use crate::errors::{SearchError, ShardError};
use crate::metrics::GatewayMetrics;

/// Per-request search options, as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub request_id: String,
    pub num: u32,
    /// Fewer merged results than this fails the search; 0 disables the check.
    #[serde(default)]
    pub min_num: u32,
    /// 0 uses the gateway default.
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub aggregation_algorithm: AggregationAlgorithm,
    /// Over-fetch ratio for the per-shard forward count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f32>,
}

pub type ShardCallFuture = Pin<Box<dyn Future<Output = Result<SearchResponse, ShardError>> + Send>>;

/// One request against one shard, given the forwarded config.
pub type ShardCall =
    Arc<dyn Fn(Arc<SearchConfig>, Arc<dyn ShardClient>) -> ShardCallFuture + Send + Sync>;

/// Per-shard forward count. `replica / agents` of `num` is always requested;
/// `ratio` moves the count from that floor towards `num`. With more replicas
/// than live agents the count exceeds `num`. Aggregators never forward less
/// than `num`.
pub fn forward_num(num: u32, ratio: f32, replica: usize, agents: usize) -> u32 {
    if agents == 0 {
        return num;
    }
    let min = replica as f64 / agents as f64;
    let num = f64::from(num);
    let floor = (num * min).ceil() as u32;
    if ratio <= 0.0 {
        return floor;
    }
    let n = (num * (min + (1.0 - min) * f64::from(ratio))).ceil() as u32;
    n.saturating_sub(1).max(floor)
}

pub struct SearchGateway {
    pub(crate) config: GatewayConfig,
    pub(crate) shards: Arc<dyn Broadcast>,
    pub(crate) pool: Arc<CandidatePool>,
    pub(crate) metrics: Arc<GatewayMetrics>,
    request_seq: AtomicU64,
}

impl SearchGateway {
    pub fn new(config: GatewayConfig, shards: Arc<dyn Broadcast>) -> Result<Self, prometheus::Error> {
        let pool = Arc::new(CandidatePool::new(config.pool_max_idle));
        Ok(Self {
            config,
            shards,
            pool,
            metrics: Arc::new(GatewayMetrics::new()?),
            request_seq: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn pool(&self) -> &Arc<CandidatePool> {
        &self.pool
    }

    pub fn calculate_num(&self, num: u32, ratio: f32) -> u32 {
        forward_num(num, ratio, self.config.replica, self.shards.agent_count())
    }

    pub async fn search(
        &self,
        token: &CancellationToken,
        vector: Vec<f32>,
        config: Option<SearchConfig>,
    ) -> Result<SearchResponse, SearchError> {
        if vector.len() < 2 {
            let error = SearchError::invalid_argument(format!(
                "vector must have at least 2 dimensions, got {}",
                vector.len()
            ));
            return Err(self.reject(error, config.as_ref()));
        }
        let vector: Arc<[f32]> = Arc::from(vector);
        let call: ShardCall = Arc::new(
            move |config: Arc<SearchConfig>, client: Arc<dyn ShardClient>| -> ShardCallFuture {
                let vector = Arc::clone(&vector);
                Box::pin(async move { client.search(&vector, &config).await })
            },
        );
        self.do_search(token, config.as_ref(), call).await
    }

    pub async fn search_by_id(
        &self,
        token: &CancellationToken,
        id: String,
        config: Option<SearchConfig>,
    ) -> Result<SearchResponse, SearchError> {
        if id.is_empty() {
            let error = SearchError::invalid_argument("id must not be empty");
            return Err(self.reject(error, config.as_ref()));
        }
        let id: Arc<str> = Arc::from(id);
        let call: ShardCall = Arc::new(
            move |config: Arc<SearchConfig>, client: Arc<dyn ShardClient>| -> ShardCallFuture {
                let id = Arc::clone(&id);
                Box::pin(async move { client.search_by_id(&id, &config).await })
            },
        );
        self.do_search(token, config.as_ref(), call).await
    }

    /// Picks the aggregator for `config` and runs the aggregated search.
    pub async fn do_search(
        &self,
        token: &CancellationToken,
        config: Option<&SearchConfig>,
        call: ShardCall,
    ) -> Result<SearchResponse, SearchError> {
        let Some(config) = config else {
            return Err(self.reject(SearchError::invalid_config("search config is required"), None));
        };

        let num = config.num as usize;
        let fnum = match config.ratio {
            Some(ratio) => self.calculate_num(config.num, ratio) as usize,
            None => 0,
        };
        let fnum = if fnum == 0 { num } else { fnum };
        let algorithm = config
            .aggregation_algorithm
            .or(self.config.default_algorithm);
        let replica = self.shards.agent_count().max(1);
        let aggregator = select_aggregator(algorithm, num, fnum, replica, &self.pool);

        let result = self.aggregation_search(token, aggregator, config, call).await;
        self.metrics
            .record_search(result.as_ref().err().map(SearchError::code));
        result
    }

    pub(crate) fn next_request_id(&self) -> String {
        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{seq}", self.config.name)
    }

    /// `name(addr) to [shard, ...]`, naming both ends of a failed search.
    pub(crate) fn resource(&self) -> String {
        format!(
            "{} to [{}]",
            self.config.origin(),
            self.shards.addrs().join(", ")
        )
    }

    fn reject(&self, error: SearchError, config: Option<&SearchConfig>) -> SearchError {
        self.metrics.record_search(Some(error.code()));
        let error = error.with_resource(self.config.origin());
        match config {
            Some(config) if !config.request_id.is_empty() => error
                .with_request_id(config.request_id.clone())
                .with_serving_data(config),
            Some(config) => error.with_serving_data(config),
            None => error,
        }
    }
}
