use std::fmt;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::{Code, ShardErrorClass};

#[derive(Debug)]
pub enum MetricsRenderError {
    Encode(prometheus::Error),
    Utf8(std::string::FromUtf8Error),
}

impl fmt::Display for MetricsRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(error) => write!(f, "failed to encode prometheus payload: {error}"),
            Self::Utf8(error) => write!(f, "prometheus payload is not utf-8: {error}"),
        }
    }
}

impl std::error::Error for MetricsRenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(error) => Some(error),
            Self::Utf8(error) => Some(error),
        }
    }
}

/// Counters for gateway searches and the shard calls they fan out to.
pub struct GatewayMetrics {
    registry: Registry,
    search_requests: IntCounterVec,
    shard_errors: IntCounterVec,
    shard_retries: IntCounter,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let search_requests = IntCounterVec::new(
            Opts::new(
                "meldgate_search_requests_total",
                "Total aggregated searches by outcome.",
            ),
            &["outcome"],
        )?;
        let shard_errors = IntCounterVec::new(
            Opts::new(
                "meldgate_shard_errors_total",
                "Total failed shard calls by error class.",
            ),
            &["class"],
        )?;
        let shard_retries = IntCounter::new(
            "meldgate_shard_retries_total",
            "Total shard calls repeated after an empty response.",
        )?;

        registry.register(Box::new(search_requests.clone()))?;
        registry.register(Box::new(shard_errors.clone()))?;
        registry.register(Box::new(shard_retries.clone()))?;

        Ok(Self {
            registry,
            search_requests,
            shard_errors,
            shard_retries,
        })
    }

    /// Records a finished search; `None` means success.
    pub fn record_search(&self, failure: Option<Code>) {
        let outcome = failure.map_or("ok", Code::as_str);
        self.search_requests.with_label_values(&[outcome]).inc();
    }

    pub fn record_shard_error(&self, class: ShardErrorClass) {
        self.shard_errors.with_label_values(&[class.as_str()]).inc();
    }

    pub fn record_retry(&self) {
        self.shard_retries.inc();
    }

    pub fn search_requests(&self, outcome: &str) -> u64 {
        self.search_requests.with_label_values(&[outcome]).get()
    }

    pub fn shard_errors(&self, class: ShardErrorClass) -> u64 {
        self.shard_errors.with_label_values(&[class.as_str()]).get()
    }

    pub fn shard_retries(&self) -> u64 {
        self.shard_retries.get()
    }

    pub fn render(&self) -> Result<String, MetricsRenderError> {
        let families = self.registry.gather();
        let mut encoded = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut encoded)
            .map_err(MetricsRenderError::Encode)?;
        String::from_utf8(encoded).map_err(MetricsRenderError::Utf8)
    }
}
