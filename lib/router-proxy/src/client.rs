//! HTTP client that routes `http://<service>/...` URLs through the load balancer

use crate::LoadBalancer;
use reqwest::{Response, Url};
use router_core::CoreError;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Selection failed; the message is the routing error's own
    #[error(transparent)]
    Routing(#[from] CoreError),

    #[error("Invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl DispatchError {
    pub fn is_no_instances(&self) -> bool {
        matches!(self, DispatchError::Routing(e) if e.is_no_instances())
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Client that treats the URL host as a logical service name
pub struct BalancedClient {
    balancer: Arc<LoadBalancer>,
    http: reqwest::Client,
}

impl BalancedClient {
    pub fn new(balancer: Arc<LoadBalancer>) -> Self {
        Self {
            balancer,
            http: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured reqwest client (proxies, TLS, timeouts)
    pub fn with_http_client(balancer: Arc<LoadBalancer>, http: reqwest::Client) -> Self {
        Self { balancer, http }
    }

    /// Create a client with a per-request timeout
    pub fn with_timeout(balancer: Arc<LoadBalancer>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { balancer, http })
    }

    /// Rewrite a logical URL to the endpoint selected for its host.
    ///
    /// The service name is read from the URL as written; `Url` lowercases
    /// hosts, service names are case-sensitive.
    pub fn resolve(&self, url: &str) -> DispatchResult<Url> {
        let mut target = Url::parse(url).map_err(|e| invalid(url, e.to_string()))?;
        if target.host_str().map_or(true, str::is_empty) {
            return Err(invalid(url, "missing service name".to_string()));
        }
        let service = service_name(url)
            .ok_or_else(|| invalid(url, "missing service name".to_string()))?;

        let endpoint = self.balancer.select_endpoint(service)?;

        target
            .set_scheme(&endpoint.protocol)
            .map_err(|_| invalid(url, format!("unsupported protocol {}", endpoint.protocol)))?;
        match endpoint.host.parse::<IpAddr>() {
            Ok(ip) => target
                .set_ip_host(ip)
                .map_err(|_| invalid(url, format!("cannot set host {}", ip)))?,
            Err(_) => target
                .set_host(Some(&endpoint.host))
                .map_err(|e| invalid(url, e.to_string()))?,
        }
        target
            .set_port(Some(endpoint.port))
            .map_err(|_| invalid(url, "cannot set port".to_string()))?;

        debug!("Resolved {} to {}", url, target);
        Ok(target)
    }

    /// Issue a GET to the endpoint selected for the URL's service
    pub async fn get(&self, url: &str) -> DispatchResult<Response> {
        let target = self.resolve(url)?;
        let response = self
            .http
            .get(target.clone())
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|source| DispatchError::Http {
                url: target.to_string(),
                source,
            })?;
        Ok(response)
    }

    /// GET and return the body as text
    pub async fn get_text(&self, url: &str) -> DispatchResult<String> {
        let response = self.get(url).await?;
        let target = response.url().to_string();
        response
            .text()
            .await
            .map_err(|source| DispatchError::Http { url: target, source })
    }
}

/// Host part of the authority in `url`, without userinfo or port
fn service_name(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(|c: char| matches!(c, '/' | '?' | '#')).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    (!host.is_empty()).then_some(host)
}

fn invalid(url: &str, reason: String) -> DispatchError {
    DispatchError::InvalidUrl {
        url: url.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use router_core::{Endpoint, RegistryCache, SelectionStrategy, StaticEndpointSource};

    async fn balancer_for(service: &str, endpoints: Vec<Endpoint>) -> Arc<LoadBalancer> {
        let source = Arc::new(StaticEndpointSource::new());
        source.set(service, endpoints).await;
        let cache = Arc::new(RegistryCache::new(source).with_services([service]));
        cache.refresh(service).await.unwrap();
        Arc::new(LoadBalancer::new(cache, SelectionStrategy::RoundRobin))
    }

    async fn client_with(endpoints: Vec<Endpoint>) -> BalancedClient {
        BalancedClient::new(balancer_for("testapp", endpoints).await)
    }

    #[tokio::test]
    async fn test_resolve_rewrites_host_and_port() {
        let client = client_with(vec![Endpoint::http("10.0.0.1", 8080)]).await;
        let url = client.resolve("http://testapp/greeting?name=a").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/greeting?name=a");
    }

    #[tokio::test]
    async fn test_resolve_ipv6_endpoint() {
        let client = client_with(vec![Endpoint::http("fd00::1", 8080)]).await;
        let url = client.resolve("http://testapp/greeting").unwrap();
        assert_eq!(url.host_str(), Some("[fd00::1]"));
        assert_eq!(url.as_str(), "http://[fd00::1]:8080/greeting");
    }

    #[tokio::test]
    async fn test_resolve_keeps_service_name_case() {
        let balancer = balancer_for("TestApp", vec![Endpoint::http("10.0.0.1", 8080)]).await;
        let client = BalancedClient::new(balancer);
        let url = client.resolve("http://TestApp/greeting").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/greeting");

        let err = client.resolve("http://testapp/greeting").unwrap_err();
        assert_eq!(err.to_string(), "No instances available for testapp");
    }

    #[test]
    fn test_service_name_strips_userinfo_and_port() {
        assert_eq!(service_name("http://TestApp/greeting"), Some("TestApp"));
        assert_eq!(service_name("http://user:pw@TestApp:8080?x=1"), Some("TestApp"));
        assert_eq!(service_name("http:///greeting"), None);
    }

    #[tokio::test]
    async fn test_with_timeout_routes_like_default_client() {
        let balancer = balancer_for("testapp", vec![Endpoint::http("10.0.0.1", 8080)]).await;
        let client = BalancedClient::with_timeout(balancer, Duration::from_secs(1)).unwrap();
        let url = client.resolve("http://testapp/").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.1:8080/");
    }

    #[tokio::test]
    async fn test_resolve_uses_endpoint_protocol() {
        let client = client_with(vec![Endpoint::new("10.0.0.1", 8443, "https")]).await;
        let url = client.resolve("http://testapp/").unwrap();
        assert_eq!(url.as_str(), "https://10.0.0.1:8443/");
    }

    #[tokio::test]
    async fn test_resolve_without_instances() {
        let client = client_with(vec![]).await;
        let err = client.resolve("http://testapp/greeting").unwrap_err();
        assert!(err.is_no_instances());
        assert_eq!(err.to_string(), "No instances available for testapp");
    }

    #[tokio::test]
    async fn test_resolve_rejects_bad_url() {
        let client = client_with(vec![Endpoint::http("10.0.0.1", 8080)]).await;
        assert!(matches!(
            client.resolve("not a url"),
            Err(DispatchError::InvalidUrl { .. })
        ));
    }
}
