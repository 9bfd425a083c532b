//! Reconcilers for the request types the integrator serves.
//!
//! Each reconciler turns one request into one response, given what the agent
//! gathered at the start of the pass.

pub mod clients;
pub mod lb_consumers;
pub mod loadbalancer;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::credentials::{CredentialSet, ProxySettings};

pub use clients::ClientsReconciler;
pub use lb_consumers::LbConsumersReconciler;
pub use loadbalancer::LegacyLbReconciler;

/// Inputs shared by every reconciler during one pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub config: Config,
    pub credentials: CredentialSet,
    pub proxy: ProxySettings,
    pub has_octavia: bool,
    pub manage_security_groups: bool,
}

/// Trait for request reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    type Request;
    type Response;

    /// Converge the provider towards `request` and describe the outcome.
    async fn reconcile(&self, request: &Self::Request, ctx: &PassContext)
    -> Result<Self::Response>;
}
