#![forbid(unsafe_code)]
//! Aggregation benchmarks for Meldgate.
//!
//! Each scenario runs full gateway searches against in-memory shards:
//! - `concurrent_queue`: pruned ordered insertion behind a bounded queue
//! - `sort_slice`: append, then sort and dedupe at finalize
//! - `sort_pool_slice`: same, with pooled buffers
//! - `pairing_heap`: heap melds, extraction at finalize

mod synthetic_shard;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meldgate_core::AggregationAlgorithm;
use meldgate_server::{GatewayConfig, SearchConfig, SearchGateway, ShardClient, ShardEntry, ShardSet};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use synthetic_shard::SyntheticShard;

const SHARDS: usize = 16;
const PER_SHARD: usize = 1_000;
const ID_SPACE: usize = 8_000;
const NUM: u32 = 100;
const DIMENSION: usize = 128;
const WARMUP_RUNS: usize = 8;
const MEASURED_RUNS: usize = 50;

fn main() {
    meldgate_server::init_tracing();

    if cfg!(debug_assertions) && env::var("MELDGATE_ALLOW_DEBUG_BENCH").as_deref() != Ok("1") {
        eprintln!(
            "error=debug_build_not_allowed message=\"run `cargo run --release -p meldgate-bench`\""
        );
        process::exit(2);
    }

    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error=runtime_build_failed detail=\"{error}\"");
            process::exit(1);
        }
    };

    let scenario = env::var("MELDGATE_BENCH_SCENARIO").unwrap_or_else(|_| "all".to_string());
    let ok = match scenario.as_str() {
        "all" => [
            AggregationAlgorithm::ConcurrentQueue,
            AggregationAlgorithm::SortSlice,
            AggregationAlgorithm::SortPoolSlice,
            AggregationAlgorithm::PairingHeap,
        ]
        .into_iter()
        .all(|algorithm| run_aggregation_bench(&runtime, mode, algorithm)),
        other => match other.parse::<AggregationAlgorithm>() {
            Ok(algorithm) if algorithm != AggregationAlgorithm::Unknown => {
                run_aggregation_bench(&runtime, mode, algorithm)
            }
            _ => {
                eprintln!(
                    "error=invalid_scenario scenario=\"{scenario}\" allowed=\"all,concurrent_queue,sort_slice,sort_pool_slice,pairing_heap\""
                );
                false
            }
        },
    };

    if !ok {
        process::exit(1);
    }
}

fn run_aggregation_bench(runtime: &Runtime, mode: &str, algorithm: AggregationAlgorithm) -> bool {
    let Some(gateway) = build_gateway() else {
        return false;
    };
    let query = deterministic_vector(42, DIMENSION);
    let config = SearchConfig {
        request_id: format!("bench-{algorithm}"),
        num: NUM,
        aggregation_algorithm: algorithm,
        ..SearchConfig::default()
    };

    for _ in 0..WARMUP_RUNS {
        if runtime
            .block_on(run_search_once(&gateway, &query, &config))
            .is_none()
        {
            return false;
        }
    }

    let mut elapsed_samples = Vec::with_capacity(MEASURED_RUNS);
    let mut total_duration = Duration::from_secs(0);
    let mut last_best_id = String::new();
    let mut last_best_distance = f32::MAX;

    for _ in 0..MEASURED_RUNS {
        let Some((elapsed, best_id, best_distance)) =
            runtime.block_on(run_search_once(&gateway, &query, &config))
        else {
            return false;
        };
        elapsed_samples.push(elapsed.as_secs_f64() * 1_000.0);
        total_duration += elapsed;
        last_best_id = best_id;
        last_best_distance = best_distance;
    }

    let (p50_ms, p95_ms, avg_ms) = summarize_ms(&elapsed_samples);
    let qps = MEASURED_RUNS as f64 / total_duration.as_secs_f64();

    println!(
        "bench=aggregation algorithm={algorithm} mode={mode} shards={SHARDS} per_shard={PER_SHARD} num={NUM} warmup_runs={WARMUP_RUNS} measured_runs={MEASURED_RUNS} p50_ms={p50_ms:.6} p95_ms={p95_ms:.6} avg_ms={avg_ms:.6} qps={qps:.2} best_id={last_best_id} best_distance={last_best_distance:.6}"
    );

    true
}

fn build_gateway() -> Option<SearchGateway> {
    let shards = (0..SHARDS)
        .map(|shard| {
            let client: Arc<dyn ShardClient> =
                Arc::new(SyntheticShard::new(shard, PER_SHARD, ID_SPACE));
            ShardEntry::new(format!("synthetic-{shard}"), client)
        })
        .collect();
    let config = GatewayConfig {
        name: "meldgate-bench".to_string(),
        search_timeout_ms: 10_000,
        ..GatewayConfig::default()
    };
    match SearchGateway::new(config, Arc::new(ShardSet::new(shards))) {
        Ok(gateway) => Some(gateway),
        Err(error) => {
            eprintln!("error=gateway_build_failed detail=\"{error}\"");
            None
        }
    }
}

async fn run_search_once(
    gateway: &SearchGateway,
    query: &[f32],
    config: &SearchConfig,
) -> Option<(Duration, String, f32)> {
    let started_at = Instant::now();
    let response = match gateway
        .search(&CancellationToken::new(), query.to_vec(), Some(config.clone()))
        .await
    {
        Ok(response) => response,
        Err(error) => {
            eprintln!("error=search_failed detail=\"{error}\"");
            return None;
        }
    };
    let elapsed = started_at.elapsed();

    let Some(best) = response.results.first() else {
        eprintln!("error=search_empty request_id={}", response.request_id);
        return None;
    };
    Some((elapsed, best.id.clone(), best.distance))
}

fn summarize_ms(samples_ms: &[f64]) -> (f64, f64, f64) {
    let p50_ms = percentile_ms(samples_ms, 0.50);
    let p95_ms = percentile_ms(samples_ms, 0.95);
    let avg_ms = samples_ms.iter().sum::<f64>() / samples_ms.len() as f64;
    (p50_ms, p95_ms, avg_ms)
}

fn percentile_ms(samples_ms: &[f64], quantile: f64) -> f64 {
    if samples_ms.is_empty() {
        return 0.0;
    }

    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last_index = sorted.len().saturating_sub(1);
    let position = (quantile.clamp(0.0, 1.0) * last_index as f64).round() as usize;
    sorted[position]
}

fn deterministic_vector(seed: u64, dimension: usize) -> Vec<f32> {
    (0..dimension)
        .map(|index| {
            let mixed = (seed as usize)
                .wrapping_mul(31)
                .wrapping_add(index.wrapping_mul(17))
                % 10_000;
            mixed as f32 / 10_000.0
        })
        .collect()
}
