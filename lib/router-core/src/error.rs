use crate::source::SourceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("No instances available for {service}")]
    NoInstancesAvailable { service: String },

    #[error("Endpoint source unavailable for {service}: {source}")]
    SourceUnavailable {
        service: String,
        #[source]
        source: SourceError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration parse error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn no_instances(service: impl Into<String>) -> Self {
        CoreError::NoInstancesAvailable {
            service: service.into(),
        }
    }

    pub fn is_no_instances(&self) -> bool {
        matches!(self, CoreError::NoInstancesAvailable { .. })
    }

    /// Service the error refers to, for routing and refresh errors
    pub fn service(&self) -> Option<&str> {
        match self {
            CoreError::NoInstancesAvailable { service }
            | CoreError::SourceUnavailable { service, .. } => Some(service),
            _ => None,
        }
    }
}
