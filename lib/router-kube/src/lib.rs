//! Kubernetes `Endpoints` integration for the registry cache
pub mod client;
pub mod source;

pub use client::ClusterClient;
pub use source::{endpoints_from_object, KubernetesEndpointSource};
