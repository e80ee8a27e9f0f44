//! Fan-out orchestration: one shard task per live shard feeding a shared
//! aggregator, bounded by the request deadline, followed by the completion
//! policy that decides between a (possibly partial) result and an error.

use std::sync::Arc;
use std::time::Duration;

use meldgate_core::{Aggregator, SearchResponse};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::broadcast::{ShardClient, ShardTask, ShardTaskFuture};
use crate::errors::{Code, SearchError, ShardError, ShardErrorClass};
use crate::metrics::GatewayMetrics;
use crate::search::{SearchConfig, SearchGateway, ShardCall};

impl SearchGateway {
    /// Broadcasts `call` to every shard, merges replies through
    /// `aggregator`, and applies the deadline and minimum-result policy.
    ///
    /// Shards are asked for `aggregator.fnum()` candidates with no minimum.
    /// A broadcast failure is only surfaced when nothing was merged.
    pub async fn aggregation_search(
        &self,
        token: &CancellationToken,
        aggregator: Arc<dyn Aggregator>,
        config: &SearchConfig,
        call: ShardCall,
    ) -> Result<SearchResponse, SearchError> {
        let request_id = if config.request_id.is_empty() {
            self.next_request_id()
        } else {
            config.request_id.clone()
        };
        let span = tracing::info_span!(
            "aggregation_search",
            request_id = %request_id,
            algorithm = %aggregator.algorithm(),
            num = aggregator.num(),
            fnum = aggregator.fnum(),
        );
        self.aggregate(token, aggregator, config, call, request_id)
            .instrument(span)
            .await
    }

    async fn aggregate(
        &self,
        token: &CancellationToken,
        aggregator: Arc<dyn Aggregator>,
        config: &SearchConfig,
        call: ShardCall,
        request_id: String,
    ) -> Result<SearchResponse, SearchError> {
        let num = config.num as usize;
        let min_num = config.min_num as usize;
        let timeout = if config.timeout_ms != 0 {
            Duration::from_millis(config.timeout_ms)
        } else {
            self.config.search_timeout()
        };
        let forward = Arc::new(SearchConfig {
            request_id: request_id.clone(),
            num: u32::try_from(aggregator.fnum()).unwrap_or(u32::MAX),
            min_num: 0,
            ..config.clone()
        });

        let fanout = token.child_token();
        aggregator.start(&fanout);
        let task = ShardSearch {
            aggregator: Arc::clone(&aggregator),
            forward,
            call,
            metrics: Arc::clone(&self.metrics),
            retry_empty: self.config.empty_result_retry,
        }
        .into_task();

        let mut broadcast = self.shards.broadcast(&fanout, task);
        let mut deadline_exceeded = false;
        let timed = tokio::time::timeout(timeout, &mut broadcast).await;
        let broadcast_result = match timed {
            Ok(result) => result,
            Err(_) => {
                deadline_exceeded = true;
                fanout.cancel();
                broadcast.await
            }
        };
        fanout.cancel();

        let mut merged = aggregator.result().await;
        if num != 0 {
            merged.truncate(num);
        }

        let fail = |error: SearchError| {
            error
                .with_request_id(request_id.clone())
                .with_resource(self.resource())
                .with_serving_data(config)
        };

        if deadline_exceeded {
            if merged.is_empty() {
                tracing::debug!(?timeout, "deadline exceeded before any candidate arrived");
                return Err(fail(SearchError::empty_result(
                    Code::DeadlineExceeded,
                    "search deadline exceeded with an empty result",
                )));
            }
            if min_num > 0 && merged.len() < min_num {
                tracing::debug!(found = merged.len(), min_num, "deadline exceeded below minimum");
                return Err(fail(SearchError::insufficient_result(
                    Code::DeadlineExceeded,
                    min_num,
                    merged.len(),
                )));
            }
        }

        if let Err(error) = broadcast_result {
            if merged.is_empty() {
                tracing::warn!(%error, "broadcast failed with an empty result");
                return Err(fail(error));
            }
            tracing::warn!(%error, found = merged.len(), "broadcast failed, keeping partial result");
        }

        if num != 0 && merged.is_empty() {
            tracing::debug!("search finished with an empty result");
            return Err(fail(SearchError::empty_result(
                Code::NotFound,
                "search result is empty",
            )));
        }
        if min_num > 0 && merged.len() < min_num {
            tracing::debug!(found = merged.len(), min_num, "search finished below minimum");
            return Err(fail(SearchError::insufficient_result(
                Code::NotFound,
                min_num,
                merged.len(),
            )));
        }

        Ok(SearchResponse {
            request_id,
            results: merged,
        })
    }
}

/// Everything a shard task needs, shared across all shards of one search.
struct ShardSearch {
    aggregator: Arc<dyn Aggregator>,
    forward: Arc<SearchConfig>,
    call: ShardCall,
    metrics: Arc<GatewayMetrics>,
    retry_empty: bool,
}

impl ShardSearch {
    fn into_task(self) -> ShardTask {
        let job = Arc::new(self);
        Arc::new(
            move |scope: CancellationToken,
                  target: String,
                  client: Arc<dyn ShardClient>|
                  -> ShardTaskFuture {
                let job = Arc::clone(&job);
                let span = tracing::debug_span!("broadcast", target = %target);
                Box::pin(async move { job.run(&scope, &target, client).await }.instrument(span))
            },
        )
    }

    async fn run(
        &self,
        scope: &CancellationToken,
        target: &str,
        client: Arc<dyn ShardClient>,
    ) -> Result<(), SearchError> {
        let mut response = match self.call_once(scope, &client).await {
            Ok(response) => response,
            Err(error) => return self.classify(target, error),
        };

        if response.is_empty() {
            if scope.is_cancelled() || !self.retry_empty {
                return self.skip_empty();
            }
            tracing::debug!("shard returned no candidates, retrying once");
            self.metrics.record_retry();
            response = match self.call_once(scope, &client).await {
                Ok(response) => response,
                Err(error) => return self.classify(target, error),
            };
            if response.is_empty() {
                return self.skip_empty();
            }
        }

        self.aggregator.send(scope, &response.results).await;
        Ok(())
    }

    async fn call_once(
        &self,
        scope: &CancellationToken,
        client: &Arc<dyn ShardClient>,
    ) -> Result<SearchResponse, ShardError> {
        let call = (self.call)(Arc::clone(&self.forward), Arc::clone(client));
        tokio::select! {
            biased;
            () = scope.cancelled() => Err(ShardError::cancelled()),
            result = call => result,
        }
    }

    fn skip_empty(&self) -> Result<(), SearchError> {
        tracing::debug!("shard returned no candidates");
        self.metrics.record_shard_error(ShardErrorClass::Soft);
        Ok(())
    }

    fn classify(&self, target: &str, error: ShardError) -> Result<(), SearchError> {
        let class = error.class();
        self.metrics.record_shard_error(class);
        match class {
            ShardErrorClass::Transient => {
                tracing::trace!(%error, "shard call interrupted");
                Ok(())
            }
            ShardErrorClass::Soft => {
                tracing::debug!(%error, "shard call skipped");
                Ok(())
            }
            ShardErrorClass::Fatal => {
                tracing::warn!(%error, "shard call failed, aborting broadcast");
                Err(SearchError::shard(target, error))
            }
        }
    }
}
