//! Endpoint selection over registry cache snapshots

use dashmap::DashMap;
use rand::Rng;
use router_core::metrics::UNTRACKED_SERVICE;
use router_core::{
    BalancerMetrics, CoreError, Endpoint, RegistryCache, Result, RoutingState, SelectionStrategy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Load balancer picking one endpoint per request from the current snapshot.
///
/// Holds no endpoint state of its own besides the per-service round-robin
/// cursors; every call reads the latest published snapshot.
pub struct LoadBalancer {
    cache: Arc<RegistryCache>,
    strategy: SelectionStrategy,
    cursors: DashMap<String, AtomicUsize>,
    metrics: Option<BalancerMetrics>,
}

impl LoadBalancer {
    /// Create a new load balancer with the specified strategy
    pub fn new(cache: Arc<RegistryCache>, strategy: SelectionStrategy) -> Self {
        Self {
            cache,
            strategy,
            cursors: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: BalancerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cache(&self) -> &Arc<RegistryCache> {
        &self.cache
    }

    /// Routing state of a service as of the last refresh
    pub fn state(&self, service: &str) -> RoutingState {
        self.cache.state(service)
    }

    /// Select an endpoint for `service` using the configured strategy.
    ///
    /// Fails with `NoInstancesAvailable` when the current snapshot is empty,
    /// whether the service was never observed or its last refresh was empty.
    pub fn select_endpoint(&self, service: &str) -> Result<Endpoint> {
        let snapshot = self.cache.snapshot(service);
        if snapshot.is_empty() {
            return Err(self.no_instances(service));
        }

        let index = match self.strategy {
            SelectionStrategy::RoundRobin => self.next_round_robin(service, snapshot.len()),
            SelectionStrategy::Random => rand::thread_rng().gen_range(0..snapshot.len()),
        };
        Ok(self.selected(service, &snapshot[index]))
    }

    /// Hash-based endpoint selection for sticky sessions
    pub fn select_endpoint_by_key(&self, service: &str, hash_key: &str) -> Result<Endpoint> {
        let snapshot = self.cache.snapshot(service);
        if snapshot.is_empty() {
            return Err(self.no_instances(service));
        }

        let index = Self::compute_hash(hash_key) % snapshot.len();
        Ok(self.selected(service, &snapshot[index]))
    }

    /// Advance the service's cursor and return the index to use.
    ///
    /// The stored cursor stays below `len`; a cursor left over from a longer
    /// snapshot wraps via modulo.
    fn next_round_robin(&self, service: &str, len: usize) -> usize {
        let advance = |cursor: &AtomicUsize| {
            let previous = cursor
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c % len + 1) % len))
                .unwrap_or_else(|c| c);
            previous % len
        };

        if let Some(cursor) = self.cursors.get(service) {
            return advance(cursor.value());
        }
        let cursor = self
            .cursors
            .entry(service.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        advance(cursor.value())
    }

    fn selected(&self, service: &str, endpoint: &Endpoint) -> Endpoint {
        debug!("Selected {} for {}", endpoint, service);
        if let Some(metrics) = &self.metrics {
            metrics.record_selection(service);
        }
        endpoint.clone()
    }

    fn no_instances(&self, service: &str) -> CoreError {
        debug!("No instances available for {} ({:?})", service, self.cache.state(service));
        if let Some(metrics) = &self.metrics {
            let label = if self.cache.is_tracked(service) {
                service
            } else {
                UNTRACKED_SERVICE
            };
            metrics.record_no_instances(label);
        }
        CoreError::no_instances(service)
    }

    /// Compute hash for a string
    fn compute_hash(s: &str) -> usize {
        // FNV-1a
        const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
        const FNV_PRIME: u64 = 1099511628211;

        let mut hash = FNV_OFFSET_BASIS;
        for byte in s.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash as usize
    }
}
