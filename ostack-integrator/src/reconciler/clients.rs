//! "clients" reconciler - grants integration clients access to the cloud.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{PassContext, Reconciler};
use crate::config::or_none;
use crate::request::{BlockStorageConfig, ClientGrant, ClientRequest, LbaasConfig};

/// Hands out credentials, proxy settings, LBaaS and block storage options.
#[derive(Debug, Default)]
pub struct ClientsReconciler;

impl ClientsReconciler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Reconciler for ClientsReconciler {
    type Request = ClientRequest;
    type Response = ClientGrant;

    async fn reconcile(&self, request: &ClientRequest, ctx: &PassContext) -> Result<ClientGrant> {
        info!(unit = %request.unit_name, "Granting request");
        let config = &ctx.config;
        Ok(ClientGrant {
            credentials: ctx.credentials.clone(),
            proxy_config: ctx.proxy.clone(),
            lbaas: LbaasConfig {
                subnet_id: config.subnet_id.clone(),
                floating_network_id: config.floating_network_id.clone(),
                lb_method: config.lb_method.clone(),
                manage_security_groups: ctx.manage_security_groups,
                has_octavia: ctx.has_octavia,
                lb_enabled: config.lb_enabled,
                internal_lb: config.internal_lb,
            },
            block_storage: BlockStorageConfig {
                bs_version: or_none(config.bs_version.as_deref()),
                trust_device_path: or_none(config.trust_device_path.as_deref()),
                ignore_volume_az: or_none(config.ignore_volume_az.as_deref()),
            },
        })
    }
}
