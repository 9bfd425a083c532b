//! "loadbalancer" reconciler - the older relation where requesters list the
//! pool members themselves.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{PassContext, Reconciler};
use crate::provider::{LbProvider, LbSpec, PURPOSE_LOADBALANCER};
use crate::request::{LegacyLbRequest, LegacyLbResponse};
use crate::validation::resolve_algorithm;

pub struct LegacyLbReconciler {
    provider: Arc<dyn LbProvider>,
}

impl LegacyLbReconciler {
    pub fn new(provider: Arc<dyn LbProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Reconciler for LegacyLbReconciler {
    type Request = LegacyLbRequest;
    type Response = LegacyLbResponse;

    /// Fails with the provider error; callers stop the batch on the first one.
    async fn reconcile(
        &self,
        request: &LegacyLbRequest,
        ctx: &PassContext,
    ) -> Result<LegacyLbResponse> {
        let algorithm = resolve_algorithm(request.algorithm.as_deref(), &ctx.config.lb_method)
            .unwrap_or_else(|| ctx.config.lb_method.clone());
        let spec = LbSpec::new(
            &request.application_name,
            PURPOSE_LOADBALANCER,
            request.members.clone(),
            ctx.config.lb_port,
            &algorithm,
        );

        info!(
            application = %request.application_name,
            lb = %spec.name,
            members = spec.members.len(),
            "Provisioning load balancer"
        );
        let lb = self.provider.upsert_load_balancer(&spec).await?;
        Ok(LegacyLbResponse {
            address: lb.public_address().to_string(),
            port: lb.port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{CredentialSet, ProxySettings};
    use crate::provider::{Member, MemoryProvider, lb_name};

    fn ctx() -> PassContext {
        let mut config = Config::default();
        config.lb_port = 6443;
        PassContext {
            config,
            credentials: CredentialSet::new(),
            proxy: ProxySettings::new(),
            has_octavia: true,
            manage_security_groups: false,
        }
    }

    fn request() -> LegacyLbRequest {
        LegacyLbRequest {
            application_name: "kubeapi".to_string(),
            members: vec![Member::new("10.0.0.1", 6443), Member::new("10.0.0.2", 6443)],
            algorithm: Some("LEAST_CONNECTIONS".to_string()),
        }
    }

    #[tokio::test]
    async fn test_provisions_with_configured_port() {
        let provider = Arc::new(MemoryProvider::new());
        provider.set_floating_ips(false).await;
        let reconciler = LegacyLbReconciler::new(provider.clone());

        let response = reconciler.reconcile(&request(), &ctx()).await.unwrap();

        assert_eq!(response.address, "192.0.2.1");
        assert_eq!(response.port, 6443);
        let upserts = provider.upserts().await;
        assert_eq!(upserts[0].name, lb_name(PURPOSE_LOADBALANCER, "kubeapi"));
        assert_eq!(upserts[0].members.len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_algorithm_uses_default() {
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = LegacyLbReconciler::new(provider.clone());
        let mut request = request();
        request.algorithm = Some("BOGUS".to_string());

        reconciler.reconcile(&request, &ctx()).await.unwrap();
        assert_eq!(provider.upserts().await[0].algorithm, "ROUND_ROBIN");
    }

    #[tokio::test]
    async fn test_provider_error_is_returned() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_upserts(Some("quota exceeded")).await;
        let reconciler = LegacyLbReconciler::new(provider);

        let err = reconciler.reconcile(&request(), &ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
    }
}
