//! Background task that periodically refreshes the registry cache

use crate::RegistryCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Default interval between refreshes
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Periodic refresher for a [`RegistryCache`].
///
/// The first refresh happens immediately after spawning; after that a
/// source change is published within one interval plus source latency.
pub struct Refresher {
    cache: Arc<RegistryCache>,
    interval: Duration,
}

impl Refresher {
    pub fn new(cache: Arc<RegistryCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Spawn the refresh loop on the current tokio runtime
    pub fn spawn(self) -> RefreshHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let task = tokio::spawn(self.run(shutdown_rx));
        info!("Endpoint refresher started with interval: {:?}", interval);
        RefreshHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let tracked = self.cache.services().len();
                    let refreshed = self.cache.refresh_all().await;
                    debug!("Refreshed {}/{} services", refreshed, tracked);
                }
                changed = shutdown.changed() => {
                    // An error means the handle was dropped
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Endpoint refresher stopped");
    }
}

/// Owned handle to a running refresher; dropping it stops the loop
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Signal the loop to stop and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticEndpointSource;
    use crate::{Endpoint, RoutingState};

    const INTERVAL: Duration = Duration::from_millis(20);

    async fn settle() {
        tokio::time::sleep(INTERVAL * 5).await;
    }

    #[tokio::test]
    async fn test_refresher_tracks_source_changes() {
        let source = Arc::new(StaticEndpointSource::new());
        source.set("testapp", vec![Endpoint::http("a", 80)]).await;
        let cache = Arc::new(RegistryCache::new(source.clone()).with_services(["testapp"]));

        let handle = Refresher::new(cache.clone(), INTERVAL).spawn();
        settle().await;
        assert_eq!(cache.state("testapp"), RoutingState::Available);

        source.set("testapp", vec![]).await;
        settle().await;
        assert_eq!(cache.state("testapp"), RoutingState::Unavailable);

        source
            .set("testapp", vec![Endpoint::http("a", 80), Endpoint::http("b", 80)])
            .await;
        settle().await;
        assert_eq!(cache.snapshot("testapp").len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_published_within_one_interval() {
        let interval = Duration::from_millis(100);
        let slack = Duration::from_millis(5);
        let source = Arc::new(StaticEndpointSource::new());
        source.set("testapp", vec![Endpoint::http("a", 80)]).await;
        let cache = Arc::new(RegistryCache::new(source.clone()).with_services(["testapp"]));

        let handle = Refresher::new(cache.clone(), interval).spawn();
        tokio::time::sleep(slack).await;
        assert_eq!(cache.state("testapp"), RoutingState::Available);

        // Each change lands on the next tick, not a later one
        for expected in [RoutingState::Unavailable, RoutingState::Available] {
            let endpoints = match expected {
                RoutingState::Available => vec![Endpoint::http("b", 80)],
                _ => vec![],
            };
            source.set("testapp", endpoints).await;
            tokio::time::sleep(interval).await;
            assert_eq!(cache.state("testapp"), expected);
        }
        assert_eq!(cache.snapshot("testapp")[0].host, "b");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_refreshing() {
        let source = Arc::new(StaticEndpointSource::new());
        source.set("testapp", vec![Endpoint::http("a", 80)]).await;
        let cache = Arc::new(RegistryCache::new(source.clone()).with_services(["testapp"]));

        let handle = Refresher::new(cache.clone(), INTERVAL).spawn();
        settle().await;
        handle.shutdown().await;

        source.set("testapp", vec![]).await;
        settle().await;
        assert_eq!(cache.state("testapp"), RoutingState::Available);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_loop() {
        let cache = Arc::new(RegistryCache::new(Arc::new(StaticEndpointSource::new())));
        let handle = Refresher::new(cache, INTERVAL).spawn();
        let RefreshHandle { shutdown, task } = handle;
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("refresher did not stop")
            .unwrap();
    }
}
