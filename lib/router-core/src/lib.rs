//! Endpoint registry cache and refresh core
//!
//! This library provides:
//! - Endpoint and snapshot value types
//! - The endpoint source seam and an in-memory source
//! - A registry cache of atomically published per-service snapshots
//! - The background refresher that keeps the cache current
//! - Configuration and Prometheus metrics shared with the load balancer

pub mod config;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod refresher;
pub mod registry;
pub mod source;

pub use config::{BalancerConfig, SelectionStrategy};
pub use endpoint::{Endpoint, EndpointSnapshot};
pub use error::{CoreError, Result};
pub use metrics::BalancerMetrics;
pub use refresher::{RefreshHandle, Refresher};
pub use registry::{RegistryCache, RoutingState, ServiceEntry};
pub use source::{EndpointSource, SourceError, StaticEndpointSource};
