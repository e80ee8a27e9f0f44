use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::errors::{Code, ErrorKind, ShardErrorClass};

const QUERY: [f32; 2] = [0.25, 0.75];

fn disjoint_shards() -> Vec<(String, Arc<FakeShard>)> {
    (0..3)
        .map(|shard| {
            let results = (0..5)
                .map(|rank| {
                    let order = shard + 3 * rank;
                    Candidate::new(format!("s{shard}-{rank}"), order as f32 * 0.1)
                })
                .collect();
            (format!("10.0.0.{shard}:7000"), FakeShard::replying(results))
        })
        .collect()
}

#[tokio::test]
async fn disjoint_shards_merge_into_global_top_k() {
    for algorithm in ALL_ALGORITHMS {
        let owned = disjoint_shards();
        let shards: Vec<(&str, Arc<FakeShard>)> = owned
            .iter()
            .map(|(target, shard)| (target.as_str(), Arc::clone(shard)))
            .collect();
        let gateway = gateway(&shards);
        let config = SearchConfig {
            aggregation_algorithm: algorithm,
            ..search_config("req-a", 10, 0)
        };

        let response = gateway
            .search(&CancellationToken::new(), QUERY.to_vec(), Some(config))
            .await
            .unwrap_or_else(|error| panic!("{algorithm}: search failed: {error}"));

        assert_eq!(response.request_id, "req-a", "{algorithm}");
        assert_eq!(response.results.len(), 10, "{algorithm}");
        assert_ascending(&response.results);
        let ids: BTreeSet<_> = response.results.iter().map(|c| c.id.clone()).collect();
        let expected: BTreeSet<_> = (0..3)
            .flat_map(|shard| (0..5).map(move |rank| (shard, rank)))
            .filter(|(shard, rank)| shard + 3 * rank < 10)
            .map(|(shard, rank)| format!("s{shard}-{rank}"))
            .collect();
        assert_eq!(ids, expected, "{algorithm}");
    }
}

#[tokio::test]
async fn soft_shard_errors_are_skipped() {
    let good = FakeShard::replying(candidates("good", &[0.1, 0.2, 0.3, 0.4, 0.5]));
    let gateway = gateway(&[
        ("missing", FakeShard::failing(ShardError::new(Code::NotFound, "no index"))),
        ("garbled", FakeShard::failing(ShardError::unparsed("<html>"))),
        ("good", good),
    ]);

    let response = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-b", 10, 0)),
        )
        .await
        .expect("soft errors must not fail the search");

    assert_eq!(response.results.len(), 5);
    assert_ascending(&response.results);
    assert_eq!(gateway.metrics().shard_errors(ShardErrorClass::Soft), 2);
    assert_eq!(gateway.metrics().search_requests("ok"), 1);
}

#[tokio::test]
async fn empty_shards_are_retried_once_then_skipped() {
    let shards: Vec<Arc<FakeShard>> = (0..3).map(|_| FakeShard::replying(Vec::new())).collect();
    let gateway = gateway(&[
        ("a", Arc::clone(&shards[0])),
        ("b", Arc::clone(&shards[1])),
        ("c", Arc::clone(&shards[2])),
    ]);

    let error = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-c", 10, 0)),
        )
        .await
        .expect_err("all-empty shards must yield not found");

    for shard in &shards {
        assert_eq!(shard.calls(), 2);
    }
    assert_eq!(error.code(), Code::NotFound);
    assert_eq!(error.kind(), &ErrorKind::EmptyResult);
    assert_eq!(gateway.metrics().shard_retries(), 3);
    assert_eq!(gateway.metrics().shard_errors(ShardErrorClass::Fatal), 0);
}

/// Answers empty after cancelling the request it belongs to, so the reply
/// lands once its own scope is already done.
struct LateEmptyShard {
    request: CancellationToken,
    calls: AtomicUsize,
}

#[async_trait]
impl ShardClient for LateEmptyShard {
    async fn search(
        &self,
        _vector: &[f32],
        _config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.request.cancel();
        Ok(SearchResponse::default())
    }

    async fn search_by_id(
        &self,
        _id: &str,
        config: &SearchConfig,
    ) -> Result<SearchResponse, ShardError> {
        self.search(&[], config).await
    }
}

#[tokio::test]
async fn empty_reply_after_scope_is_done_is_skipped_without_retry() {
    let request = CancellationToken::new();
    let shard = Arc::new(LateEmptyShard {
        request: request.clone(),
        calls: AtomicUsize::new(0),
    });
    let client: Arc<dyn ShardClient> = Arc::clone(&shard) as Arc<dyn ShardClient>;
    let gateway = SearchGateway::new(
        test_config(),
        Arc::new(ShardSet::new(vec![ShardEntry::new("late", client)])),
    )
    .expect("gateway must build");

    let error = gateway
        .search(&request, QUERY.to_vec(), Some(search_config("req-c4", 5, 0)))
        .await
        .expect_err("an empty reply must not produce results");

    assert_eq!(shard.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.metrics().shard_retries(), 0);
    assert_eq!(gateway.metrics().shard_errors(ShardErrorClass::Soft), 1);
    assert_eq!(gateway.metrics().shard_errors(ShardErrorClass::Fatal), 0);
    assert_eq!(error.code(), Code::NotFound);
    assert_eq!(error.kind(), &ErrorKind::EmptyResult);
}

#[tokio::test]
async fn retry_after_empty_reply_contributes_candidates() {
    let flaky = FakeShard::scripted(vec![
        (Duration::ZERO, Ok(Vec::new())),
        (Duration::ZERO, Ok(candidates("flaky", &[0.05, 0.15]))),
    ]);
    let steady = FakeShard::replying(candidates("steady", &[0.1]));
    let gateway = gateway(&[("flaky", Arc::clone(&flaky)), ("steady", Arc::clone(&steady))]);

    let response = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-c2", 5, 3)),
        )
        .await
        .expect("retried shard must contribute");

    assert_eq!(flaky.calls(), 2);
    assert_eq!(steady.calls(), 1);
    let ids: Vec<_> = response.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["flaky-0", "steady-0", "flaky-1"]);
}

#[tokio::test]
async fn empty_reply_is_not_retried_when_disabled() {
    let shard = FakeShard::replying(Vec::new());
    let config = GatewayConfig {
        empty_result_retry: false,
        ..test_config()
    };
    let gateway = gateway_with(config, &[("a", Arc::clone(&shard))]);

    let error = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-c3", 4, 0)),
        )
        .await
        .expect_err("empty shard must yield not found");

    assert_eq!(shard.calls(), 1);
    assert_eq!(error.kind(), &ErrorKind::EmptyResult);
}

#[tokio::test]
async fn fatal_shard_error_aborts_broadcast() {
    let slow_a = FakeShard::slow(Duration::from_secs(5), candidates("a", &[0.1, 0.2]));
    let slow_b = FakeShard::slow(Duration::from_secs(5), candidates("b", &[0.3]));
    let gateway = gateway(&[
        ("slow-a", slow_a),
        ("broken", FakeShard::failing(ShardError::new(Code::Internal, "disk gone"))),
        ("slow-b", slow_b),
    ]);

    let started = Instant::now();
    let error = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-d", 10, 0)),
        )
        .await
        .expect_err("internal shard error must fail the search");

    assert!(started.elapsed() < Duration::from_secs(2), "slow shards were not cancelled");
    assert_eq!(error.code(), Code::Internal);
    assert_eq!(
        error.kind(),
        &ErrorKind::Shard {
            target: "broken".to_string()
        }
    );
    assert_eq!(error.request_id(), Some("req-d"));
    assert_eq!(
        error.resource(),
        Some("gw-test(127.0.0.1) to [slow-a, broken, slow-b]")
    );
    assert!(error.serving_data().is_some());
    assert_eq!(gateway.metrics().shard_errors(ShardErrorClass::Fatal), 1);
    assert_eq!(gateway.metrics().search_requests("internal"), 1);
}

#[tokio::test]
async fn unavailable_shard_is_fatal_too() {
    let gateway = gateway(&[(
        "down",
        FakeShard::failing(ShardError::new(Code::Unavailable, "connection refused")),
    )]);

    let error = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-d2", 3, 0)),
        )
        .await
        .expect_err("unavailable shard must fail the search");

    assert_eq!(error.code(), Code::Unavailable);
}

#[tokio::test]
async fn broadcast_error_after_partial_result_is_swallowed() {
    let good = FakeShard::replying(candidates("good", &[0.1, 0.2, 0.3]));
    let late_failure = FakeShard::scripted(vec![(
        Duration::from_millis(150),
        Err(ShardError::new(Code::ResourceExhausted, "queue full")),
    )]);
    let gateway = gateway(&[("good", good), ("late", late_failure)]);

    let response = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-partial", 5, 0)),
        )
        .await
        .expect("partial result must win over a broadcast error");

    assert_eq!(response.results.len(), 3);
    assert_eq!(response.request_id, "req-partial");
}

#[tokio::test]
async fn deadline_with_nothing_merged_is_empty_result() {
    let gateway = gateway(&[
        ("a", FakeShard::slow(Duration::from_secs(5), candidates("a", &[0.1]))),
        ("b", FakeShard::slow(Duration::from_secs(5), candidates("b", &[0.2]))),
    ]);
    let config = SearchConfig {
        timeout_ms: 100,
        ..search_config("req-e1", 10, 0)
    };

    let started = Instant::now();
    let error = gateway
        .search(&CancellationToken::new(), QUERY.to_vec(), Some(config))
        .await
        .expect_err("deadline with no candidates must fail");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(error.code(), Code::DeadlineExceeded);
    assert_eq!(error.kind(), &ErrorKind::EmptyResult);
    assert_eq!(gateway.metrics().search_requests("deadline_exceeded"), 1);
}

#[tokio::test]
async fn deadline_below_minimum_is_insufficient() {
    for algorithm in ALL_ALGORITHMS {
        let gateway = gateway(&[
            ("fast", FakeShard::replying(candidates("fast", &[0.1, 0.2, 0.3]))),
            ("slow", FakeShard::slow(Duration::from_secs(5), candidates("slow", &[0.05]))),
        ]);
        let config = SearchConfig {
            timeout_ms: 100,
            aggregation_algorithm: algorithm,
            ..search_config("req-e2", 10, 5)
        };

        let error = gateway
            .search(&CancellationToken::new(), QUERY.to_vec(), Some(config))
            .await
            .expect_err("deadline below minimum must fail");

        assert_eq!(error.code(), Code::DeadlineExceeded, "{algorithm}");
        assert_eq!(
            error.kind(),
            &ErrorKind::InsufficientResult {
                required: 5,
                found: 3
            },
            "{algorithm}"
        );
    }
}

#[tokio::test]
async fn deadline_at_or_above_minimum_returns_partial_result() {
    let gateway = gateway(&[
        ("fast", FakeShard::replying(candidates("fast", &[0.1, 0.2, 0.3]))),
        ("slow", FakeShard::slow(Duration::from_secs(5), candidates("slow", &[0.05]))),
    ]);
    let config = SearchConfig {
        timeout_ms: 100,
        ..search_config("req-e3", 10, 2)
    };

    let response = gateway
        .search(&CancellationToken::new(), QUERY.to_vec(), Some(config))
        .await
        .expect("partial result above minimum must succeed");

    let ids: Vec<_> = response.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["fast-0", "fast-1", "fast-2"]);
    assert_eq!(response.request_id, "req-e3");
}

#[tokio::test]
async fn result_below_minimum_without_deadline_is_not_found() {
    let gateway = gateway(&[("only", FakeShard::replying(candidates("only", &[0.1, 0.2])))]);

    let error = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-min", 10, 4)),
        )
        .await
        .expect_err("too few results must fail");

    assert_eq!(error.code(), Code::NotFound);
    assert_eq!(
        error.kind(),
        &ErrorKind::InsufficientResult {
            required: 4,
            found: 2
        }
    );
}

#[tokio::test]
async fn merged_result_is_truncated_to_num() {
    let gateway = gateway(&[
        ("a", FakeShard::replying(candidates("a", &[0.1, 0.3, 0.5, 0.7]))),
        ("b", FakeShard::replying(candidates("b", &[0.2, 0.4, 0.6, 0.8]))),
    ]);

    let response = gateway
        .search(
            &CancellationToken::new(),
            QUERY.to_vec(),
            Some(search_config("req-k", 3, 0)),
        )
        .await
        .expect("search must succeed");

    let ids: Vec<_> = response.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["a-0", "b-0", "a-1"]);
}
