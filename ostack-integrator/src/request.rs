//! Requests and responses exchanged with consumers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialSet, ProxySettings};
use crate::endpoint::{Keyed, Settled};
use crate::ports::PortMapping;
use crate::provider::Member;

/// Field-qualified validation errors (`"hc[0].path" -> "Only valid ..."`).
pub type ErrorFields = BTreeMap<String, String>;

/// Protocol named in a request.
///
/// Unknown spellings are kept so they can be reported back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Http,
    Https,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Other(s) => s,
        }
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            _ => Protocol::Other(s),
        }
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        Protocol::from(s.to_string())
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health check requested for the backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A consumer's desired load balancer ("lb-consumers" relation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRequest {
    /// Requester identity; also keys the provider-side load balancer name.
    pub name: String,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub tls_termination: bool,
    #[serde(default)]
    pub health_checks: Vec<HealthCheck>,
    #[serde(default)]
    pub port_mapping: PortMapping,
    /// Empty means there is nothing to provision yet.
    #[serde(default)]
    pub backends: Vec<String>,
}

impl LoadBalancerRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public: true,
            protocol: Protocol::Tcp,
            algorithm: None,
            tls_termination: false,
            health_checks: Vec::new(),
            port_mapping: PortMapping::new(),
            backends: Vec::new(),
        }
    }
}

impl Keyed for LoadBalancerRequest {
    fn key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseError {
    ProviderError,
}

/// Outcome of one reconciliation of a `LoadBalancerRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub error: Option<ResponseError>,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub error_fields: ErrorFields,
}

impl ProvisionResponse {
    pub fn invalid(error_fields: ErrorFields) -> Self {
        Self {
            error_fields,
            ..Default::default()
        }
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(ResponseError::ProviderError),
            error_message: message.into(),
            ..Default::default()
        }
    }

    pub fn provisioned(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }
}

impl Settled for ProvisionResponse {
    /// Provider failures leave the request pending so the next pass retries it.
    fn settled(&self) -> bool {
        self.error != Some(ResponseError::ProviderError)
    }
}

/// An integration client asking for cloud access ("clients" relation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub unit_name: String,
}

impl Keyed for ClientRequest {
    fn key(&self) -> &str {
        &self.unit_name
    }
}

/// LBaaS options handed to integration clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbaasConfig {
    pub subnet_id: Option<String>,
    pub floating_network_id: Option<String>,
    pub lb_method: String,
    pub manage_security_groups: bool,
    pub has_octavia: bool,
    pub lb_enabled: bool,
    pub internal_lb: bool,
}

/// Block storage options handed to integration clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStorageConfig {
    pub bs_version: Option<String>,
    pub trust_device_path: Option<String>,
    pub ignore_volume_az: Option<String>,
}

/// Everything granted to an integration client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientGrant {
    pub credentials: CredentialSet,
    pub proxy_config: ProxySettings,
    pub lbaas: LbaasConfig,
    pub block_storage: BlockStorageConfig,
}

impl Settled for ClientGrant {
    fn settled(&self) -> bool {
        true
    }
}

/// Request on the older "loadbalancer" relation: members are given directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyLbRequest {
    pub application_name: String,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

impl Keyed for LegacyLbRequest {
    fn key(&self) -> &str {
        &self.application_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyLbResponse {
    pub address: String,
    pub port: u16,
}

impl Settled for LegacyLbResponse {
    fn settled(&self) -> bool {
        true
    }
}
