use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A single search hit produced by a shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub distance: f32,
}

impl Candidate {
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
        }
    }

    /// Orders candidates by distance only, using the IEEE total order so that
    /// NaN never poisons a merge.
    pub fn cmp_distance(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// Shard and gateway response body: a distance-ascending candidate list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub results: Vec<Candidate>,
}

impl SearchResponse {
    pub fn new(results: Vec<Candidate>) -> Self {
        Self {
            request_id: String::new(),
            results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}
