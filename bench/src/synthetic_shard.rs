use async_trait::async_trait;
use meldgate_core::{Candidate, SearchResponse};
use meldgate_server::{SearchConfig, ShardClient, ShardError};

/// In-memory shard with a fixed, distance-sorted result list. Ids overlap
/// across shards so the aggregators have duplicates to collapse.
pub(crate) struct SyntheticShard {
    results: Vec<Candidate>,
}

impl SyntheticShard {
    pub(crate) fn new(shard: usize, size: usize, id_space: usize) -> Self {
        let mut results: Vec<Candidate> = (0..size)
            .map(|rank| {
                let id = shard.wrapping_mul(7).wrapping_add(rank.wrapping_mul(13)) % id_space;
                Candidate::new(format!("doc-{id}"), deterministic_distance(id))
            })
            .collect();
        results.sort_by(Candidate::cmp_distance);
        Self { results }
    }

    fn reply(&self, config: &SearchConfig) -> SearchResponse {
        let take = (config.num as usize).min(self.results.len());
        SearchResponse::new(self.results[..take].to_vec())
    }
}

#[async_trait]
impl ShardClient for SyntheticShard {
    async fn search(
        &self,
        _vector: &[f32],
        config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError> {
        Ok(self.reply(config))
    }

    async fn search_by_id(
        &self,
        _id: &str,
        config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError> {
        Ok(self.reply(config))
    }
}

/// Distance depends on the id only, as it would for a real index.
fn deterministic_distance(id: usize) -> f32 {
    (id.wrapping_mul(7_919) % 100_000) as f32 / 100_000.0
}
