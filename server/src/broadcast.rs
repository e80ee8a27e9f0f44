//! Shard fan-out: the client seam to one shard and the set that calls every
//! live shard concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use meldgate_core::SearchResponse;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::{Code, ErrorKind, SearchError, ShardError};
use crate::search::SearchConfig;

/// Connection to a single shard.
#[async_trait]
pub trait ShardClient: Send + Sync {
    async fn search(
        &self,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError>;

    async fn search_by_id(
        &self,
        id: &str,
        config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError>;
}

pub type ShardTaskFuture = Pin<Box<dyn Future<Output = Result<(), SearchError>> + Send>>;

/// Work run once per shard: `(shard scope, target, client)`.
pub type ShardTask =
    Arc<dyn Fn(CancellationToken, String, Arc<dyn ShardClient>) -> ShardTaskFuture + Send + Sync>;

#[async_trait]
pub trait Broadcast: Send + Sync {
    /// Runs `task` against every live shard and waits for all of them. The
    /// first task error cancels the remaining shards and is returned.
    async fn broadcast(&self, token: &CancellationToken, task: ShardTask)
        -> Result<(), SearchError>;

    fn agent_count(&self) -> usize;

    fn addrs(&self) -> Vec<String>;
}

#[derive(Clone)]
pub struct ShardEntry {
    pub target: String,
    pub client: Arc<dyn ShardClient>,
}

impl ShardEntry {
    pub fn new(target: impl Into<String>, client: Arc<dyn ShardClient>) -> Self {
        Self {
            target: target.into(),
            client,
        }
    }
}

/// Live shard connections. The list is swapped atomically so membership
/// changes never block an in-flight broadcast.
#[derive(Default)]
pub struct ShardSet {
    shards: ArcSwap<Vec<ShardEntry>>,
}

impl ShardSet {
    pub fn new(shards: Vec<ShardEntry>) -> Self {
        Self {
            shards: ArcSwap::from_pointee(shards),
        }
    }

    pub fn replace(&self, shards: Vec<ShardEntry>) {
        self.shards.store(Arc::new(shards));
    }

    /// Adds `entry`, replacing any shard with the same target.
    pub fn upsert(&self, entry: ShardEntry) {
        self.shards.rcu(|current| {
            let mut next: Vec<ShardEntry> = current
                .iter()
                .filter(|shard| shard.target != entry.target)
                .cloned()
                .collect();
            next.push(entry.clone());
            next
        });
    }

    pub fn remove(&self, target: &str) -> bool {
        let previous = self.shards.rcu(|current| {
            current
                .iter()
                .filter(|shard| shard.target != target)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|shard| shard.target == target)
    }
}

#[async_trait]
impl Broadcast for ShardSet {
    async fn broadcast(
        &self,
        token: &CancellationToken,
        task: ShardTask,
    ) -> Result<(), SearchError> {
        let shards = self.shards.load_full();
        if shards.is_empty() {
            return Err(SearchError::connection_not_found(
                "no live shard connections",
            ));
        }

        let scope = token.child_token();
        let mut tasks = JoinSet::new();
        for shard in shards.iter() {
            tasks.spawn(task(
                scope.child_token(),
                shard.target.clone(),
                Arc::clone(&shard.client),
            ));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => {
                    tracing::warn!(error = %join_error, "shard task did not complete");
                    SearchError::new(
                        Code::Internal,
                        ErrorKind::Shard {
                            target: String::new(),
                        },
                        format!("shard task did not complete: {join_error}"),
                    )
                }
            };
            if first_error.is_none() {
                scope.cancel();
                first_error = Some(error);
            } else {
                tracing::debug!(%error, "additional shard failure after broadcast abort");
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn agent_count(&self) -> usize {
        self.shards.load().len()
    }

    fn addrs(&self) -> Vec<String> {
        self.shards
            .load()
            .iter()
            .map(|shard| shard.target.clone())
            .collect()
    }
}
