pub mod agent;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod freshness;
pub mod ports;
pub mod provider;
pub mod reconciler;
pub mod request;
pub mod status;
pub mod validation;

pub use agent::{Endpoints, IntegratorAgent, PassReport};
pub use config::{Config, SharedConfig};
pub use error::{AgentError, ConfigError, EndpointError, ProviderError, StateFetchError};
pub use provider::{LbProvider, MemoryProvider, OpenStackProvider};
pub use status::{Status, StatusReporter, StatusSink};
