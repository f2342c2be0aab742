use anyhow::Result;
use router_core::{
    BalancerConfig, BalancerMetrics, EndpointSource, Refresher, RegistryCache,
    StaticEndpointSource,
};
use router_kube::{ClusterClient, KubernetesEndpointSource};
use router_proxy::LoadBalancer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::fmt::init as tracing_init;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    info!("Starting service-discovery daemon...");

    let config = load_config()?;
    info!(
        "Tracking {} services in namespace {} every {:?}",
        config.all_services().len(),
        config.namespace,
        config.refresh_interval()
    );

    let metrics = BalancerMetrics::new()?;
    let source = build_source(&config).await?;
    let cache = Arc::new(
        RegistryCache::new(source)
            .with_services(config.all_services())
            .with_source_timeout(config.source_timeout())
            .with_metrics(metrics.clone()),
    );
    let balancer = LoadBalancer::new(cache.clone(), config.strategy).with_metrics(metrics.clone());

    let refresher = Refresher::new(cache.clone(), config.refresh_interval()).spawn();

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => log_status(&balancer, &metrics),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutdown signal received, stopping refresher...");
    refresher.shutdown().await;
    Ok(())
}

/// Config file from `ROUTER_CONFIG` (optional), then `ROUTER_*` overrides
fn load_config() -> Result<BalancerConfig> {
    let config = match std::env::var("ROUTER_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            BalancerConfig::from_file(path)?
        }
        Err(_) => BalancerConfig::default(),
    };
    Ok(config.apply_env()?)
}

async fn build_source(config: &BalancerConfig) -> Result<Arc<dyn EndpointSource>> {
    if !config.static_endpoints.is_empty() {
        info!("Using {} statically configured services", config.static_endpoints.len());
        return Ok(Arc::new(StaticEndpointSource::from_map(
            config.static_endpoints.clone(),
        )));
    }

    let client = match &config.api_proxy_url {
        Some(url) => ClusterClient::from_proxy_url(url)?,
        None => ClusterClient::new().await?,
    };
    Ok(Arc::new(KubernetesEndpointSource::new(
        &client,
        config.namespace.clone(),
        config.port_name.clone(),
    )))
}

fn log_status(balancer: &LoadBalancer, metrics: &BalancerMetrics) {
    let cache = balancer.cache();
    for service in cache.services() {
        let snapshot = cache.snapshot(&service);
        match cache.entry(&service).and_then(|entry| entry.last_failure) {
            Some(failure) => warn!(
                "{}: {:?}, {} endpoints, last refresh failed at {}: {}",
                service,
                balancer.state(&service),
                snapshot.len(),
                failure.at,
                failure.error
            ),
            None => info!(
                "{}: {:?}, {} endpoints",
                service,
                balancer.state(&service),
                snapshot.len()
            ),
        }
    }

    match metrics.gather() {
        Ok(text) => debug!("Metrics:\n{}", text),
        Err(e) => debug!("Failed to gather metrics: {}", e),
    }
}
