//! "lb-consumers" reconciler - validates a load balancer request and upserts
//! the load balancer for its backends.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{PassContext, Reconciler};
use crate::provider::{LbProvider, LbSpec, Member, PURPOSE_LB_CONSUMERS};
use crate::request::{LoadBalancerRequest, ProvisionResponse};
use crate::validation::{ValidationSettings, validate};

pub struct LbConsumersReconciler {
    provider: Arc<dyn LbProvider>,
}

impl LbConsumersReconciler {
    pub fn new(provider: Arc<dyn LbProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Reconciler for LbConsumersReconciler {
    type Request = LoadBalancerRequest;
    type Response = ProvisionResponse;

    /// Never fails: provider errors are reported in the response.
    async fn reconcile(
        &self,
        request: &LoadBalancerRequest,
        ctx: &PassContext,
    ) -> Result<ProvisionResponse> {
        let validated = validate(request, &ValidationSettings::from(&ctx.config));
        if !validated.is_valid() {
            return Ok(ProvisionResponse::invalid(validated.errors));
        }

        let request = &validated.request;
        if request.backends.is_empty() {
            debug!(request = %request.name, "No backends yet, nothing to provision");
            return Ok(ProvisionResponse::default());
        }
        // A valid request with backends always resolved a port pair.
        let Some((local_port, remote_port)) = validated.ports else {
            return Ok(ProvisionResponse::default());
        };
        let algorithm = validated
            .algorithm
            .unwrap_or_else(|| ctx.config.lb_method.clone());

        let members: Vec<Member> = request
            .backends
            .iter()
            .map(|address| Member::new(address.clone(), remote_port))
            .collect();
        let spec = LbSpec::new(
            &request.name,
            PURPOSE_LB_CONSUMERS,
            members,
            local_port,
            &algorithm,
        );

        info!(
            request = %request.name,
            lb = %spec.name,
            members = spec.members.len(),
            port = local_port,
            "Provisioning load balancer"
        );
        match self.provider.upsert_load_balancer(&spec).await {
            Ok(lb) => Ok(ProvisionResponse::provisioned(lb.public_address())),
            Err(e) => {
                error!(request = %request.name, error = %e, "Failed to provision load balancer");
                Ok(ProvisionResponse::provider_error(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::{CredentialSet, ProxySettings};
    use crate::ports::PortMapping;
    use crate::provider::MemoryProvider;
    use crate::request::ResponseError;

    fn ctx() -> PassContext {
        PassContext {
            config: Config::default(),
            credentials: CredentialSet::new(),
            proxy: ProxySettings::new(),
            has_octavia: true,
            manage_security_groups: false,
        }
    }

    fn request() -> LoadBalancerRequest {
        let mut request = LoadBalancerRequest::new("kube-api");
        request.algorithm = Some("ROUND_ROBIN".to_string());
        request.port_mapping = PortMapping::single(443, 6443);
        request.backends = vec!["10.0.0.1".to_string()];
        request
    }

    #[tokio::test]
    async fn test_provisions_valid_request() {
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = LbConsumersReconciler::new(provider.clone());

        let response = reconciler.reconcile(&request(), &ctx()).await.unwrap();

        let upserts = provider.upserts().await;
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].members, vec![Member::new("10.0.0.1", 6443)]);
        assert_eq!(upserts[0].port, 443);
        assert_eq!(upserts[0].algorithm, "ROUND_ROBIN");
        assert_eq!(response.address.as_deref(), Some("203.0.113.1"));
        assert!(response.error_fields.is_empty());
    }

    #[tokio::test]
    async fn test_falls_back_to_first_mapping() {
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = LbConsumersReconciler::new(provider.clone());
        let mut request = request();
        request.port_mapping = PortMapping::single(80, 8080);

        reconciler.reconcile(&request, &ctx()).await.unwrap();

        let upserts = provider.upserts().await;
        assert_eq!(upserts[0].port, 80);
        assert_eq!(upserts[0].members, vec![Member::new("10.0.0.1", 8080)]);
    }

    #[tokio::test]
    async fn test_invalid_request_skips_provider() {
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = LbConsumersReconciler::new(provider.clone());
        let mut request = request();
        request.public = false;

        let response = reconciler.reconcile(&request, &ctx()).await.unwrap();

        assert!(provider.upserts().await.is_empty());
        assert_eq!(
            response.error_fields.get("public").map(String::as_str),
            Some("Only support public loadbalancers")
        );
        assert_eq!(response.address, None);
    }

    #[tokio::test]
    async fn test_empty_backends_is_noop() {
        let provider = Arc::new(MemoryProvider::new());
        let reconciler = LbConsumersReconciler::new(provider.clone());
        let mut request = request();
        request.backends.clear();

        let response = reconciler.reconcile(&request, &ctx()).await.unwrap();

        assert!(provider.upserts().await.is_empty());
        assert_eq!(response, ProvisionResponse::default());
    }

    #[tokio::test]
    async fn test_provider_error_in_response() {
        let provider = Arc::new(MemoryProvider::new());
        provider.fail_upserts(Some("quota exceeded")).await;
        let reconciler = LbConsumersReconciler::new(provider.clone());

        let response = reconciler.reconcile(&request(), &ctx()).await.unwrap();

        assert_eq!(response.error, Some(ResponseError::ProviderError));
        assert_eq!(response.error_message, "quota exceeded");
        assert_eq!(response.address, None);
    }
}
