//! Metrics sink.
//!
//! Components receive an `Arc<dyn Metrics>` at construction. The process-wide
//! registry is created once in the binary and scraped through
//! [`PrometheusMetrics::encode`].

use anyhow::Context;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::GatewayResult;

/// Counters emitted by the gateway.
pub trait Metrics: Send + Sync + std::fmt::Debug {
    /// One S3 call reached the network, successful or not.
    fn inc_s3_operations(&self, target: &str, bucket: &str, operation: &str);
    /// A webhook answered with a status below 400.
    fn inc_succeed_webhooks(&self, target: &str, action: &str);
    /// A webhook failed at transport level or answered 400 or above.
    fn inc_failed_webhooks(&self, target: &str, action: &str);
    /// One HTTP request was answered.
    fn inc_http_requests(&self, method: &str, status: u16);
}

/// [`Metrics`] backed by a `prometheus` registry.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    s3_operations: IntCounterVec,
    succeed_webhooks: IntCounterVec,
    failed_webhooks: IntCounterVec,
    http_requests: IntCounterVec,
}

impl PrometheusMetrics {
    /// Create and register every counter on a fresh registry.
    pub fn new() -> GatewayResult<Self> {
        let registry = Registry::new();

        let s3_operations = IntCounterVec::new(
            Opts::new("s3gate_s3_operations_total", "Number of S3 operations"),
            &["target_name", "bucket_name", "operation"],
        )
        .context("create s3 operations counter")?;
        registry
            .register(Box::new(s3_operations.clone()))
            .context("register s3 operations counter")?;

        let succeed_webhooks = IntCounterVec::new(
            Opts::new(
                "s3gate_succeed_webhooks_total",
                "Number of succeeded webhooks",
            ),
            &["target_name", "action"],
        )
        .context("create succeeded webhooks counter")?;
        registry
            .register(Box::new(succeed_webhooks.clone()))
            .context("register succeeded webhooks counter")?;

        let failed_webhooks = IntCounterVec::new(
            Opts::new("s3gate_failed_webhooks_total", "Number of failed webhooks"),
            &["target_name", "action"],
        )
        .context("create failed webhooks counter")?;
        registry
            .register(Box::new(failed_webhooks.clone()))
            .context("register failed webhooks counter")?;

        let http_requests = IntCounterVec::new(
            Opts::new("s3gate_http_requests_total", "Number of answered HTTP requests"),
            &["method", "status_code"],
        )
        .context("create http requests counter")?;
        registry
            .register(Box::new(http_requests.clone()))
            .context("register http requests counter")?;

        Ok(Self {
            registry,
            s3_operations,
            succeed_webhooks,
            failed_webhooks,
            http_requests,
        })
    }

    /// Render every registered metric in the text exposition format.
    pub fn encode(&self) -> GatewayResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("encode prometheus metrics")?;
        Ok(String::from_utf8(buf).context("metrics are not UTF-8")?)
    }
}

impl Metrics for PrometheusMetrics {
    fn inc_s3_operations(&self, target: &str, bucket: &str, operation: &str) {
        self.s3_operations
            .with_label_values(&[target, bucket, operation])
            .inc();
    }

    fn inc_succeed_webhooks(&self, target: &str, action: &str) {
        self.succeed_webhooks
            .with_label_values(&[target, action])
            .inc();
    }

    fn inc_failed_webhooks(&self, target: &str, action: &str) {
        self.failed_webhooks.with_label_values(&[target, action]).inc();
    }

    fn inc_http_requests(&self, method: &str, status: u16) {
        self.http_requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }
}
