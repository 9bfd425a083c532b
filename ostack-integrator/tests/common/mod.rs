//! Shared test utilities for ostack-integrator integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use ostack_integrator::credentials::CredentialSet;
use ostack_integrator::endpoint::{
    MemoryCredentials, MemoryEndpoint, RELATION_CLIENTS, RELATION_CREDENTIALS,
    RELATION_LB_CONSUMERS, RELATION_LOADBALANCER,
};
use ostack_integrator::ports::PortMapping;
use ostack_integrator::request::{
    ClientGrant, ClientRequest, LegacyLbRequest, LegacyLbResponse, LoadBalancerRequest,
    ProvisionResponse,
};
use ostack_integrator::{
    Config, Endpoints, IntegratorAgent, MemoryProvider, SharedConfig, Status, StatusSink,
};

/// Status sink that remembers every status it was given.
#[derive(Default)]
pub struct RecordingStatus {
    history: Mutex<Vec<Status>>,
}

impl RecordingStatus {
    pub fn history(&self) -> Vec<Status> {
        self.history.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Status> {
        self.history.lock().unwrap().last().cloned()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap().clear();
    }
}

impl StatusSink for RecordingStatus {
    fn set(&self, status: Status) {
        self.history.lock().unwrap().push(status);
    }
}

pub fn test_credentials() -> CredentialSet {
    CredentialSet::new()
        .with("auth_url", Some("https://keystone.example:5000/v3"))
        .with("username", Some("admin"))
        .with("password", Some("secret"))
        .with("project_name", Some("k8s"))
        .with("region", Some("RegionOne"))
}

/// The request from the end-to-end scenario: one backend, 443 -> 6443.
pub fn lb_request(name: &str) -> LoadBalancerRequest {
    let mut request = LoadBalancerRequest::new(name);
    request.algorithm = Some("ROUND_ROBIN".to_string());
    request.port_mapping = PortMapping::single(443, 6443);
    request.backends = vec!["10.0.0.1".to_string()];
    request
}

pub fn legacy_request(application: &str) -> LegacyLbRequest {
    LegacyLbRequest {
        application_name: application.to_string(),
        members: vec![ostack_integrator::provider::Member::new("10.0.0.1", 6443)],
        algorithm: None,
    }
}

/// Agent wired to an in-memory provider and endpoints, with handles to all of
/// them.
pub struct TestAgent {
    pub agent: IntegratorAgent,
    pub config: SharedConfig,
    pub provider: Arc<MemoryProvider>,
    pub status: Arc<RecordingStatus>,
    pub lb_consumers: MemoryEndpoint<LoadBalancerRequest, ProvisionResponse>,
    pub clients: MemoryEndpoint<ClientRequest, ClientGrant>,
    pub loadbalancer: MemoryEndpoint<LegacyLbRequest, LegacyLbResponse>,
    pub credentials: MemoryCredentials,
}

impl TestAgent {
    /// Agent with valid credentials and default configuration.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let config: SharedConfig = Arc::new(RwLock::new(config));
        let provider = Arc::new(MemoryProvider::new());
        provider.set_credentials(Some(test_credentials())).await;
        let status = Arc::new(RecordingStatus::default());

        let lb_consumers = MemoryEndpoint::new(RELATION_LB_CONSUMERS);
        let clients = MemoryEndpoint::new(RELATION_CLIENTS);
        let loadbalancer = MemoryEndpoint::new(RELATION_LOADBALANCER);
        let credentials = MemoryCredentials::new(RELATION_CREDENTIALS);
        let endpoints = Endpoints {
            lb_consumers: Some(Box::new(lb_consumers.clone())),
            clients: Some(Box::new(clients.clone())),
            loadbalancer: Some(Box::new(loadbalancer.clone())),
            credentials: Some(Box::new(credentials.clone())),
        };

        let agent = IntegratorAgent::new(
            Arc::clone(&config),
            provider.clone(),
            endpoints,
            status.clone(),
        );

        Self {
            agent,
            config,
            provider,
            status,
            lb_consumers,
            clients,
            loadbalancer,
            credentials,
        }
    }

    /// Requester of every upsert so far, in call order.
    pub async fn upserted(&self) -> Vec<String> {
        self.provider
            .upserts()
            .await
            .into_iter()
            .map(|spec| spec.requester)
            .collect()
    }
}
