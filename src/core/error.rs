//! Service error taxonomy

use thiserror::Error;

/// Errors raised by the runtime and by collaborator implementations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or malformed configuration key. Fatal at startup, never retried.
    #[error("configuration error for '{key}': {reason}")]
    Configuration { key: String, reason: String },

    /// Backend unreachable when opening a connection
    #[error("cannot connect to {backend}: {source}")]
    Connectivity {
        backend: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Backend failure that is expected to clear on an immediate retry
    #[error("transient failure from {backend}: {message}")]
    TransientBackend { backend: String, message: String },

    /// Backend failure that will not clear on retry
    #[error("backend error from {backend}: {message}")]
    Backend { backend: String, message: String },

    /// Error raised by model, input or output business code
    #[error("business logic error: {0}")]
    BusinessLogic(String),

    /// A collaborator failed its startup health check
    #[error("health check failed for {component}: {source}")]
    HealthCheckFailed {
        component: &'static str,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::config(key, "required key is missing")
    }

    pub fn connectivity<E>(backend: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ServiceError::Connectivity {
            backend: backend.into(),
            source: Box::new(source),
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        ServiceError::BusinessLogic(message.into())
    }

    /// Whether this error belongs to the retryable category
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::TransientBackend { .. })
    }

    /// Whether this error is a configuration problem (fatal at startup)
    pub fn is_configuration(&self) -> bool {
        match self {
            ServiceError::Configuration { .. } => true,
            ServiceError::HealthCheckFailed { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, ServiceError>;
