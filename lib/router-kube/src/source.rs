//! Endpoint source backed by core/v1 `Endpoints` objects

use crate::ClusterClient;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EndpointPort, Endpoints};
use kube::{Api, Client};
use router_core::{Endpoint, EndpointSource, SourceError};
use tracing::debug;

/// Reads the `Endpoints` object named after the service in one namespace
pub struct KubernetesEndpointSource {
    client: Client,
    namespace: String,
    port_name: String,
}

impl KubernetesEndpointSource {
    pub fn new(
        client: &ClusterClient,
        namespace: impl Into<String>,
        port_name: impl Into<String>,
    ) -> Self {
        Self {
            client: client.clone_client(),
            namespace: namespace.into(),
            port_name: port_name.into(),
        }
    }
}

#[async_trait]
impl EndpointSource for KubernetesEndpointSource {
    async fn list_endpoints(&self, service: &str) -> Result<Vec<Endpoint>, SourceError> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &self.namespace);
        let object = api
            .get_opt(service)
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        match object {
            Some(object) => {
                let endpoints = endpoints_from_object(&object, &self.port_name);
                debug!(
                    "Endpoints {}/{} resolved to {} addresses",
                    self.namespace,
                    service,
                    endpoints.len()
                );
                Ok(endpoints)
            }
            // The object is deleted together with its service
            None => {
                debug!("Endpoints {}/{} not found, treating as empty", self.namespace, service);
                Ok(Vec::new())
            }
        }
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

/// Flatten an `Endpoints` object into routable addresses.
///
/// Only ready addresses are used. Within a subset the port named `port_name`
/// is picked, or the only port when there is exactly one; subsets without a
/// usable port are skipped.
pub fn endpoints_from_object(object: &Endpoints, port_name: &str) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();

    for subset in object.subsets.iter().flatten() {
        let ports = subset.ports.as_deref().unwrap_or_default();
        let Some(port) = select_port(ports, port_name) else {
            debug!("Skipping subset without a port named {}", port_name);
            continue;
        };
        let Ok(port_number) = u16::try_from(port.port) else {
            debug!("Skipping subset with out-of-range port {}", port.port);
            continue;
        };
        let protocol = port_protocol(port);

        for address in subset.addresses.iter().flatten() {
            endpoints.push(Endpoint::new(address.ip.clone(), port_number, protocol.clone()));
        }
    }

    endpoints
}

fn select_port<'a>(ports: &'a [EndpointPort], port_name: &str) -> Option<&'a EndpointPort> {
    if let [only] = ports {
        return Some(only);
    }
    ports.iter().find(|p| p.name.as_deref() == Some(port_name))
}

// appProtocol, then the port name; anything but http/https falls back to http
fn port_protocol(port: &EndpointPort) -> String {
    [port.app_protocol.as_deref(), port.name.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_ascii_lowercase)
        .find(|p| p == "http" || p == "https")
        .unwrap_or_else(|| "http".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset};

    fn address(ip: &str) -> EndpointAddress {
        EndpointAddress {
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn port(name: Option<&str>, number: i32) -> EndpointPort {
        EndpointPort {
            name: name.map(String::from),
            port: number,
            ..Default::default()
        }
    }

    fn object(subsets: Vec<EndpointSubset>) -> Endpoints {
        Endpoints {
            subsets: Some(subsets),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_port_subset() {
        let endpoints = endpoints_from_object(
            &object(vec![EndpointSubset {
                addresses: Some(vec![address("10.0.0.1"), address("10.0.0.2")]),
                ports: Some(vec![port(Some("web"), 8080)]),
                ..Default::default()
            }]),
            "http",
        );
        assert_eq!(
            endpoints,
            vec![Endpoint::http("10.0.0.1", 8080), Endpoint::http("10.0.0.2", 8080)]
        );
    }

    #[test]
    fn test_named_port_selected_from_many() {
        let endpoints = endpoints_from_object(
            &object(vec![EndpointSubset {
                addresses: Some(vec![address("10.0.0.1")]),
                ports: Some(vec![port(Some("metrics"), 9090), port(Some("https"), 8443)]),
                ..Default::default()
            }]),
            "https",
        );
        assert_eq!(endpoints, vec![Endpoint::new("10.0.0.1", 8443, "https")]);
    }

    #[test]
    fn test_subset_without_matching_port_skipped() {
        let endpoints = endpoints_from_object(
            &object(vec![
                EndpointSubset {
                    addresses: Some(vec![address("10.0.0.1")]),
                    ports: Some(vec![port(Some("a"), 1), port(Some("b"), 2)]),
                    ..Default::default()
                },
                EndpointSubset {
                    addresses: Some(vec![address("10.0.0.2")]),
                    ports: Some(vec![port(Some("http"), 80)]),
                    ..Default::default()
                },
            ]),
            "http",
        );
        assert_eq!(endpoints, vec![Endpoint::http("10.0.0.2", 80)]);
    }

    #[test]
    fn test_not_ready_addresses_ignored() {
        let endpoints = endpoints_from_object(
            &object(vec![EndpointSubset {
                addresses: None,
                not_ready_addresses: Some(vec![address("10.0.0.9")]),
                ports: Some(vec![port(None, 80)]),
                ..Default::default()
            }]),
            "http",
        );
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_no_subsets_is_empty() {
        assert!(endpoints_from_object(&Endpoints::default(), "http").is_empty());
    }

    #[test]
    fn test_app_protocol_wins() {
        let mut p = port(Some("web"), 443);
        p.app_protocol = Some("HTTPS".to_string());
        assert_eq!(port_protocol(&p), "https");
        assert_eq!(port_protocol(&port(Some("grpc"), 443)), "http");
    }
}
