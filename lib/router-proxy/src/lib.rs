//! Client-side load balancing and request dispatch
pub mod client;
pub mod load_balancer;

pub use client::{BalancedClient, DispatchError, DispatchResult};
pub use load_balancer::LoadBalancer;
