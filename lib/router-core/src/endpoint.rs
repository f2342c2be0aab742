//! Endpoint and snapshot value types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::ops::Deref;
use std::sync::Arc;

/// A routable address for one backend instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: protocol.into(),
        }
    }

    /// Plain HTTP endpoint
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, default_protocol())
    }

    /// Base URL for this endpoint, e.g. `http://10.0.0.1:8080`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self)
    }

    pub fn is_ipv6(&self) -> bool {
        self.host.parse::<Ipv6Addr>().is_ok()
    }
}

/// `host:port`, with IPv6 literals in brackets
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn default_protocol() -> String {
    "http".to_string()
}

/// Immutable, ordered list of endpoints for one service as published by a refresh.
///
/// Cloning is cheap: the endpoint list is shared. A snapshot is never mutated
/// after it is built; a refresh publishes a new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointSnapshot {
    endpoints: Arc<[Endpoint]>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl EndpointSnapshot {
    pub fn new(endpoints: Vec<Endpoint>, refreshed_at: DateTime<Utc>) -> Self {
        Self {
            endpoints: endpoints.into(),
            refreshed_at: Some(refreshed_at),
        }
    }

    /// Snapshot for a service that has never been refreshed
    pub fn empty() -> Self {
        Self {
            endpoints: Arc::from(Vec::new()),
            refreshed_at: None,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// When the source reported this list; `None` if never observed
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

impl Default for EndpointSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for EndpointSnapshot {
    type Target = [Endpoint];

    fn deref(&self) -> &[Endpoint] {
        &self.endpoints
    }
}
