//! Registry cache holding the last published endpoint snapshot per service

use crate::metrics::BalancerMetrics;
use crate::source::{EndpointSource, SourceError};
use crate::{CoreError, EndpointSnapshot, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default upper bound for a single source query
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(2);

/// Routing availability of a service, derived from refresh outcomes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingState {
    /// No successful refresh yet
    Unknown,
    /// Last successful refresh reported at least one endpoint
    Available,
    /// Last successful refresh reported no endpoints
    Unavailable,
}

/// A refresh that failed and left the previous snapshot in place
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshFailure {
    pub error: SourceError,
    pub at: DateTime<Utc>,
}

/// Cached state for one service
#[derive(Clone, Debug, Default)]
pub struct ServiceEntry {
    /// Last successfully published snapshot; `None` until the first success
    pub snapshot: Option<EndpointSnapshot>,
    pub last_attempt: Option<DateTime<Utc>>,
    /// Set while the most recent attempt failed
    pub last_failure: Option<RefreshFailure>,
    /// Attempt number of the refresh that produced this entry
    attempt: u64,
}

impl ServiceEntry {
    pub fn state(&self) -> RoutingState {
        match &self.snapshot {
            None => RoutingState::Unknown,
            Some(snapshot) if snapshot.is_empty() => RoutingState::Unavailable,
            Some(_) => RoutingState::Available,
        }
    }

    fn endpoint_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |s| s.len())
    }
}

/// RegistryCache maps service names to their most recently observed endpoints.
///
/// Reads are lock-free loads of an immutable map; every write publishes a
/// new map, so a reader sees either the old or the new snapshot of a service,
/// never a partial update.
pub struct RegistryCache {
    entries: ArcSwap<HashMap<String, ServiceEntry>>,
    source: Arc<dyn EndpointSource>,
    source_timeout: Duration,
    metrics: Option<BalancerMetrics>,
    attempts: AtomicU64,
}

impl RegistryCache {
    pub fn new(source: Arc<dyn EndpointSource>) -> Self {
        Self {
            entries: ArcSwap::from_pointee(HashMap::new()),
            attempts: AtomicU64::new(0),
            source,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            metrics: None,
        }
    }

    /// Track the given services from the start
    pub fn with_services<I, S>(self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for service in services {
            self.track(service);
        }
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: BalancerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add a service to the refresh set; no-op if already tracked
    pub fn track(&self, service: impl Into<String>) {
        let service = service.into();
        if self.entries.load().contains_key(&service) {
            return;
        }
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.entry(service.clone()).or_default();
            next
        });
        debug!("Tracking service: {}", service);
    }

    /// Names of all tracked services, sorted
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.entries.load().keys().cloned().collect();
        services.sort();
        services
    }

    /// Current snapshot for a service, or an empty one if it was never refreshed
    pub fn snapshot(&self, service: &str) -> EndpointSnapshot {
        self.entries
            .load()
            .get(service)
            .and_then(|entry| entry.snapshot.clone())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, service: &str) -> bool {
        self.entries.load().contains_key(service)
    }

    pub fn entry(&self, service: &str) -> Option<ServiceEntry> {
        self.entries.load().get(service).cloned()
    }

    pub fn state(&self, service: &str) -> RoutingState {
        self.entries
            .load()
            .get(service)
            .map_or(RoutingState::Unknown, ServiceEntry::state)
    }

    /// Query the source for `service` and publish the result.
    ///
    /// Returns the number of endpoints the source reported. On source failure
    /// the previous snapshot stays in place and `SourceUnavailable` is returned.
    /// Overlapping refreshes of one service publish in the order they started;
    /// a result that lands after a later attempt's is dropped.
    pub async fn refresh(&self, service: &str) -> Result<usize> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.source_timeout, self.source.list_endpoints(service))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout(self.source_timeout)),
            };
        let elapsed = started.elapsed().as_secs_f64();
        let now = Utc::now();

        match result {
            Ok(endpoints) => {
                let count = endpoints.len();
                let snapshot = EndpointSnapshot::new(endpoints, now);
                let Some(previous) = self.publish(service, attempt, |entry| {
                    entry.snapshot = Some(snapshot.clone());
                    entry.last_attempt = Some(now);
                    entry.last_failure = None;
                }) else {
                    debug!("Dropped superseded refresh of {} ({} endpoints)", service, count);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_refresh(service, true, elapsed);
                    }
                    return Ok(count);
                };

                debug!("Refreshed {}: {} endpoints in {:.3}s", service, count, elapsed);
                let state = if count == 0 {
                    RoutingState::Unavailable
                } else {
                    RoutingState::Available
                };
                if previous.state() != state {
                    info!(
                        "Service {} is now {:?} (was {:?}, {} endpoints)",
                        service,
                        state,
                        previous.state(),
                        count
                    );
                }

                if let Some(metrics) = &self.metrics {
                    metrics.record_refresh(service, true, elapsed);
                    metrics.record_published(service, count);
                }
                Ok(count)
            }
            Err(error) => {
                let failure = RefreshFailure {
                    error: error.clone(),
                    at: now,
                };
                let previous = self.publish(service, attempt, |entry| {
                    entry.last_attempt = Some(now);
                    entry.last_failure = Some(failure.clone());
                });

                match previous {
                    Some(previous) => warn!(
                        "Refresh of {} from {} source failed, keeping {} known endpoints: {}",
                        service,
                        self.source.name(),
                        previous.endpoint_count(),
                        error
                    ),
                    None => debug!("Dropped superseded failed refresh of {}: {}", service, error),
                }

                if let Some(metrics) = &self.metrics {
                    metrics.record_refresh(service, false, elapsed);
                }
                Err(CoreError::SourceUnavailable {
                    service: service.to_string(),
                    source: error,
                })
            }
        }
    }

    /// Refresh every tracked service concurrently.
    ///
    /// Failures are absorbed; returns how many services refreshed successfully.
    pub async fn refresh_all(&self) -> usize {
        let services = self.services();
        let results = join_all(services.iter().map(|service| self.refresh(service))).await;
        results.iter().filter(|result| result.is_ok()).count()
    }

    /// Apply `update` to the entry of `service` and publish a new map.
    ///
    /// Returns the entry as it was before the update, or `None` without
    /// changing anything if a later attempt has already published.
    fn publish<F>(&self, service: &str, attempt: u64, update: F) -> Option<ServiceEntry>
    where
        F: Fn(&mut ServiceEntry),
    {
        let superseded = |map: &HashMap<String, ServiceEntry>| {
            map.get(service).is_some_and(|entry| entry.attempt > attempt)
        };

        let previous = self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            if !superseded(&**current) {
                let entry = next.entry(service.to_string()).or_default();
                update(&mut *entry);
                entry.attempt = attempt;
            }
            next
        });

        if superseded(&*previous) {
            return None;
        }
        Some(previous.get(service).cloned().unwrap_or_default())
    }
}
