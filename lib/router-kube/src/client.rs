//! Kubernetes client construction

use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use kube::client::{Body, ConfigExt};
use kube::{Client, Config};
use tower::ServiceBuilder;
use tracing::info;

/// ClusterClient wraps the Kubernetes client used to read endpoint objects
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    /// Connect using the in-cluster service account or the local kubeconfig
    pub async fn new() -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    /// Connect to an unauthenticated plain-HTTP API endpoint, such as
    /// `kubectl proxy` on `http://127.0.0.1:8001`
    pub fn from_proxy_url(url: &str) -> anyhow::Result<Self> {
        let uri: http::Uri = url.parse()?;
        let config = Config::new(uri);

        let service = ServiceBuilder::new()
            .layer(config.base_uri_layer())
            .service(
                hyper_util::client::legacy::Client::builder(TokioExecutor::new())
                    .build::<_, Body>(HttpConnector::new()),
            );

        info!("Using Kubernetes API proxy at {}", url);
        Ok(Self {
            client: Client::new(service, config.default_namespace),
        })
    }

    /// Get a clone of the Kubernetes client
    pub fn clone_client(&self) -> Client {
        self.client.clone()
    }
}
