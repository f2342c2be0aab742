//! Prometheus metrics for endpoint refreshes and routing decisions

use crate::Result;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Label for services outside the tracked set, keeping label cardinality bounded
pub const UNTRACKED_SERVICE: &str = "untracked";

/// Metrics shared by the registry cache and the load balancer.
///
/// Clones share the same registry and collectors.
#[derive(Clone)]
pub struct BalancerMetrics {
    /// Refresh attempts by service and outcome (`success` / `failure`)
    pub refreshes_total: CounterVec,
    /// Time spent waiting on the endpoint source
    pub refresh_duration_seconds: HistogramVec,
    /// Endpoints in the currently published snapshot
    pub endpoints: IntGaugeVec,
    /// Successful endpoint selections
    pub selections_total: CounterVec,
    /// Selections that failed because the snapshot was empty
    pub no_instances_total: CounterVec,
    pub registry: Arc<Registry>,
}

impl BalancerMetrics {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Register the collectors on an existing registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let refreshes_total = CounterVec::new(
            Opts::new("endpoint_refreshes_total", "Endpoint list refresh attempts"),
            &["service", "outcome"],
        )?;

        let refresh_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "endpoint_refresh_duration_seconds",
                "Endpoint source latency in seconds",
            ),
            &["service"],
        )?;

        let endpoints = IntGaugeVec::new(
            Opts::new("published_endpoints", "Endpoints in the published snapshot"),
            &["service"],
        )?;

        let selections_total = CounterVec::new(
            Opts::new("endpoint_selections_total", "Endpoints selected for requests"),
            &["service"],
        )?;

        let no_instances_total = CounterVec::new(
            Opts::new(
                "no_instances_available_total",
                "Selections rejected because no instances were available",
            ),
            &["service"],
        )?;

        registry.register(Box::new(refreshes_total.clone()))?;
        registry.register(Box::new(refresh_duration_seconds.clone()))?;
        registry.register(Box::new(endpoints.clone()))?;
        registry.register(Box::new(selections_total.clone()))?;
        registry.register(Box::new(no_instances_total.clone()))?;

        Ok(Self {
            refreshes_total,
            refresh_duration_seconds,
            endpoints,
            selections_total,
            no_instances_total,
            registry,
        })
    }

    pub(crate) fn record_refresh(&self, service: &str, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.refreshes_total
            .with_label_values(&[service, outcome])
            .inc();
        self.refresh_duration_seconds
            .with_label_values(&[service])
            .observe(seconds);
    }

    pub(crate) fn record_published(&self, service: &str, count: usize) {
        self.endpoints
            .with_label_values(&[service])
            .set(count as i64);
    }

    pub fn record_selection(&self, service: &str) {
        self.selections_total.with_label_values(&[service]).inc();
    }

    /// `service` should be a tracked name or [`UNTRACKED_SERVICE`]
    pub fn record_no_instances(&self, service: &str) {
        self.no_instances_total.with_label_values(&[service]).inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| crate::CoreError::Internal(format!("metrics output: {}", e)))
    }
}
