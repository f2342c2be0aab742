//! Endpoint sources consumed by the registry cache

use crate::Endpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Why a source could not produce an endpoint list
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("service not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Supplies the current set of reachable addresses for a logical service
#[async_trait]
pub trait EndpointSource: Send + Sync {
    /// List endpoints for `service` in the order the registry reports them
    async fn list_endpoints(&self, service: &str) -> Result<Vec<Endpoint>, SourceError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

#[derive(Clone, Debug)]
enum StaticEntry {
    Endpoints(Vec<Endpoint>),
    Failing(SourceError),
}

/// In-memory source whose contents can be changed at runtime
#[derive(Debug, Default)]
pub struct StaticEndpointSource {
    services: RwLock<HashMap<String, StaticEntry>>,
}

impl StaticEndpointSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from a fixed service map, as read from configuration
    pub fn from_map(services: HashMap<String, Vec<Endpoint>>) -> Self {
        let services = services
            .into_iter()
            .map(|(name, endpoints)| (name, StaticEntry::Endpoints(endpoints)))
            .collect();
        Self {
            services: RwLock::new(services),
        }
    }

    /// Replace the endpoints reported for a service
    pub async fn set(&self, service: impl Into<String>, endpoints: Vec<Endpoint>) {
        let service = service.into();
        debug!("Static source: {} now has {} endpoints", service, endpoints.len());
        self.services
            .write()
            .await
            .insert(service, StaticEntry::Endpoints(endpoints));
    }

    /// Forget a service; subsequent lookups report `NotFound`
    pub async fn remove(&self, service: &str) {
        self.services.write().await.remove(service);
    }

    /// Make lookups for a service fail with `error` until the next `set`
    pub async fn fail(&self, service: impl Into<String>, error: SourceError) {
        self.services
            .write()
            .await
            .insert(service.into(), StaticEntry::Failing(error));
    }
}

#[async_trait]
impl EndpointSource for StaticEndpointSource {
    async fn list_endpoints(&self, service: &str) -> Result<Vec<Endpoint>, SourceError> {
        let services = self.services.read().await;
        match services.get(service) {
            Some(StaticEntry::Endpoints(endpoints)) => Ok(endpoints.clone()),
            Some(StaticEntry::Failing(error)) => Err(error.clone()),
            None => Err(SourceError::NotFound(service.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
