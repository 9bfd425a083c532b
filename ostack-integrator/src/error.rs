//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by a load balancer provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Cloud-side failure (auth, quota, network). Displayed verbatim.
    #[error("{0}")]
    Api(String),

    /// The provider command could not be executed.
    #[error("failed to run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider returned output we could not interpret.
    #[error("unexpected output from {command}: {message}")]
    Parse { command: String, message: String },

    /// Local cache of provisioned load balancers could not be read or written.
    #[error("load balancer cache {path}: {message}")]
    Cache { path: PathBuf, message: String },

    /// Credentials or settings in the configuration are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Credential or proxy refresh failed; the pass is aborted.
#[derive(Debug, Error)]
pub enum StateFetchError {
    #[error("failed to fetch credentials: {0}")]
    Credentials(#[source] ProviderError),

    #[error("failed to fetch proxy settings: {0}")]
    Proxy(#[source] ProviderError),

    #[error("failed to read client proxy configuration: {0}")]
    Clients(#[source] EndpointError),
}

/// Configuration could not be loaded or holds an invalid value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for config {key}={value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Request/response transport failures.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed payload {path}: {source}")]
    Payload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    StateFetch(#[from] StateFetchError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Reconcile(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
