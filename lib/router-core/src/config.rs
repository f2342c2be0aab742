//! Load balancer configuration

use crate::refresher::DEFAULT_REFRESH_INTERVAL;
use crate::registry::DEFAULT_SOURCE_TIMEOUT;
use crate::{CoreError, Endpoint, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Endpoint selection strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Cycle through the snapshot in order
    #[default]
    RoundRobin,
    /// Uniform random pick
    Random,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown selection strategy: {}",
                other
            ))),
        }
    }
}

/// Configuration for the registry cache, refresher and load balancer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BalancerConfig {
    /// Namespace holding the `Endpoints` objects
    pub namespace: String,
    /// Interval between refreshes in milliseconds
    pub refresh_interval_ms: u64,
    /// Upper bound for one source query in milliseconds
    pub source_timeout_ms: u64,
    pub strategy: SelectionStrategy,
    /// Port name picked from multi-port subsets
    pub port_name: String,
    /// Services refreshed from startup
    pub services: Vec<String>,
    /// Fixed endpoint lists; when non-empty these replace the cluster registry
    pub static_endpoints: HashMap<String, Vec<Endpoint>>,
    /// Plain-HTTP API proxy (`kubectl proxy`) instead of the inferred cluster config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_proxy_url: Option<String>,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
            source_timeout_ms: DEFAULT_SOURCE_TIMEOUT.as_millis() as u64,
            strategy: SelectionStrategy::RoundRobin,
            port_name: "http".to_string(),
            services: Vec::new(),
            static_endpoints: HashMap::new(),
            api_proxy_url: None,
        }
    }
}

impl BalancerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Override fields from `ROUTER_*` environment variables
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(std::env::vars())
    }

    fn apply_vars<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "ROUTER_NAMESPACE" => self.namespace = value,
                "ROUTER_REFRESH_INTERVAL_MS" => {
                    self.refresh_interval_ms = parse_millis(&key, &value)?
                }
                "ROUTER_SOURCE_TIMEOUT_MS" => self.source_timeout_ms = parse_millis(&key, &value)?,
                "ROUTER_STRATEGY" => self.strategy = value.parse()?,
                "ROUTER_PORT_NAME" => self.port_name = value,
                "ROUTER_API_PROXY_URL" => self.api_proxy_url = Some(value),
                "ROUTER_SERVICES" => {
                    self.services = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                }
                _ => {}
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(CoreError::InvalidConfiguration(
                "refreshIntervalMs must be greater than zero".to_string(),
            ));
        }
        if self.source_timeout_ms == 0 {
            return Err(CoreError::InvalidConfiguration(
                "sourceTimeoutMs must be greater than zero".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(CoreError::InvalidConfiguration(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    /// Tracked services plus every statically configured one
    pub fn all_services(&self) -> Vec<String> {
        let mut services = self.services.clone();
        for name in self.static_endpoints.keys() {
            if !services.contains(name) {
                services.push(name.clone());
            }
        }
        services
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        CoreError::InvalidConfiguration(format!("{} must be milliseconds, got {:?}", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = BalancerConfig::default();
        assert_eq!(config.refresh_interval(), DEFAULT_REFRESH_INTERVAL);
        assert_eq!(config.refresh_interval(), Duration::from_millis(500));
        assert_eq!(config.source_timeout(), DEFAULT_SOURCE_TIMEOUT);
        assert_eq!(config.strategy, SelectionStrategy::RoundRobin);
        assert_eq!(config.port_name, "http");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml() {
        let config = BalancerConfig::from_yaml(
            r#"
namespace: testns
refreshIntervalMs: 250
strategy: random
services:
  - testapp
staticEndpoints:
  greeter:
    - host: 10.0.0.1
      port: 8080
"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "testns");
        assert_eq!(config.refresh_interval_ms, 250);
        assert_eq!(config.source_timeout_ms, 2_000);
        assert_eq!(config.strategy, SelectionStrategy::Random);
        assert_eq!(config.static_endpoints["greeter"], vec![Endpoint::http("10.0.0.1", 8080)]);
        assert_eq!(config.all_services(), vec!["testapp", "greeter"]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "namespace: testns\nservices: [testapp]").unwrap();

        let config = BalancerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "testns");
        assert_eq!(config.services, vec!["testapp"]);
        assert_eq!(config.refresh_interval_ms, 500);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BalancerConfig::from_file(dir.path().join("router.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = BalancerConfig::from_yaml("refreshIntervalMs: 0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = BalancerConfig::default()
            .apply_vars(vars(&[
                ("ROUTER_NAMESPACE", "testns"),
                ("ROUTER_REFRESH_INTERVAL_MS", "100"),
                ("ROUTER_STRATEGY", "round-robin"),
                ("ROUTER_SERVICES", "testapp, other,"),
                ("ROUTER_API_PROXY_URL", "http://127.0.0.1:8001"),
                ("UNRELATED", "x"),
            ]))
            .unwrap();
        assert_eq!(config.namespace, "testns");
        assert_eq!(config.refresh_interval_ms, 100);
        assert_eq!(config.services, vec!["testapp", "other"]);
        assert_eq!(config.api_proxy_url.as_deref(), Some("http://127.0.0.1:8001"));
    }

    #[test]
    fn test_env_bad_values() {
        assert!(BalancerConfig::default()
            .apply_vars(vars(&[("ROUTER_SOURCE_TIMEOUT_MS", "soon")]))
            .is_err());
        assert!(BalancerConfig::default()
            .apply_vars(vars(&[("ROUTER_STRATEGY", "fastest")]))
            .is_err());
    }
}
