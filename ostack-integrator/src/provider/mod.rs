//! Cloud load balancer providers.
//!
//! The agent talks to the cloud only through [`LbProvider`]:
//! - `openstack`: drives the `openstack` command line client
//! - `memory`: in-process provider for development mode and tests

pub mod memory;
pub mod openstack;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialSet, ProxySettings};
use crate::error::ProviderError;

pub use memory::MemoryProvider;
pub use openstack::OpenStackProvider;

/// Prefix shared by every load balancer the integrator owns.
pub const LB_NAME_PREFIX: &str = "openstack-integrator";

/// Purpose tag for requests from the "lb-consumers" relation.
pub const PURPOSE_LB_CONSUMERS: &str = "lb-consumers";

/// Purpose tag for requests from the "loadbalancer" relation.
pub const PURPOSE_LOADBALANCER: &str = "loadbalancer";

/// Backend member of a load balancer pool.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub address: String,
    pub port: u16,
}

impl Member {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Desired load balancer, as handed to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbSpec {
    /// Deterministic name; see [`lb_name`].
    pub name: String,
    pub requester: String,
    pub purpose: String,
    pub members: Vec<Member>,
    /// Port the load balancer listens on.
    pub port: u16,
    pub algorithm: String,
}

impl LbSpec {
    pub fn new(
        requester: &str,
        purpose: &str,
        members: Vec<Member>,
        port: u16,
        algorithm: &str,
    ) -> Self {
        Self {
            name: lb_name(purpose, requester),
            requester: requester.to_string(),
            purpose: purpose.to_string(),
            members,
            port,
            algorithm: algorithm.to_string(),
        }
    }
}

/// Provider-side load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    pub members: Vec<Member>,
    pub algorithm: String,
    pub address: String,
    #[serde(default)]
    pub floating_address: Option<String>,
    pub port: u16,
}

impl LoadBalancer {
    /// Address consumers should use: the floating IP when there is one.
    pub fn public_address(&self) -> &str {
        self.floating_address.as_deref().unwrap_or(&self.address)
    }
}

/// Deterministic load balancer name for a requester.
///
/// Namespaced by purpose so two request sources never collide; characters the
/// cloud may reject are replaced with `-`.
pub fn lb_name(purpose: &str, requester: &str) -> String {
    let sanitized: String = requester
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{}-{}", LB_NAME_PREFIX, purpose, sanitized)
}

/// Cloud load balancer manager.
#[async_trait]
pub trait LbProvider: Send + Sync {
    /// Whether the cloud offers the extended (Octavia) load balancer API.
    async fn detect_extended_lb_features(&self) -> bool;

    /// Credentials currently in use.
    async fn get_credentials(&self) -> Result<CredentialSet, ProviderError>;

    /// Reload credentials from their source; `false` if none are available.
    async fn update_credentials(&self) -> Result<bool, ProviderError>;

    /// Proxy settings the provider would use for outbound calls.
    async fn current_proxy_settings(&self) -> Result<ProxySettings, ProviderError>;

    /// Create the load balancer named `spec.name`, or update its members,
    /// algorithm and port if it already exists.
    async fn upsert_load_balancer(&self, spec: &LbSpec) -> Result<LoadBalancer, ProviderError>;

    async fn delete_load_balancer(&self, lb: &LoadBalancer) -> Result<(), ProviderError>;

    /// Load balancers created by this integrator, by name.
    async fn list_cached_load_balancers(
        &self,
    ) -> Result<BTreeMap<String, LoadBalancer>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lb_name_is_deterministic() {
        assert_eq!(
            lb_name(PURPOSE_LB_CONSUMERS, "kubernetes-control-plane/0"),
            "openstack-integrator-lb-consumers-kubernetes-control-plane-0"
        );
        assert_eq!(
            lb_name(PURPOSE_LOADBALANCER, "kubeapi"),
            lb_name(PURPOSE_LOADBALANCER, "kubeapi")
        );
        assert_ne!(
            lb_name(PURPOSE_LOADBALANCER, "kubeapi"),
            lb_name(PURPOSE_LB_CONSUMERS, "kubeapi")
        );
    }

    #[test]
    fn test_public_address_prefers_floating() {
        let mut lb = LoadBalancer {
            name: "lb".to_string(),
            id: None,
            members: vec![],
            algorithm: "ROUND_ROBIN".to_string(),
            address: "192.168.0.10".to_string(),
            floating_address: None,
            port: 443,
        };
        assert_eq!(lb.public_address(), "192.168.0.10");
        lb.floating_address = Some("203.0.113.5".to_string());
        assert_eq!(lb.public_address(), "203.0.113.5");
    }
}
