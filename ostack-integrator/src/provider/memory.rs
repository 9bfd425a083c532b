//! In-process provider used by `--dev` and tests.
//!
//! Keeps load balancers in a map keyed by name, hands out addresses from
//! documentation ranges, and can be told to fail.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{LbProvider, LbSpec, LoadBalancer};
use crate::credentials::{CredentialSet, ProxySettings};
use crate::error::ProviderError;

#[derive(Default)]
struct MemoryState {
    /// What `update_credentials` will load; `None` means no credentials exist.
    credential_source: Option<CredentialSet>,
    credentials: CredentialSet,
    proxy: ProxySettings,
    extended_features: bool,
    floating_ips: bool,
    fail_upserts: Option<String>,
    fail_credentials: Option<String>,
    load_balancers: BTreeMap<String, LoadBalancer>,
    upserts: Vec<LbSpec>,
    allocated: u32,
}

pub struct MemoryProvider {
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                extended_features: true,
                floating_ips: true,
                ..Default::default()
            }),
        }
    }

    pub async fn set_credentials(&self, credentials: Option<CredentialSet>) {
        self.state.lock().await.credential_source = credentials;
    }

    pub async fn set_proxy(&self, proxy: ProxySettings) {
        self.state.lock().await.proxy = proxy;
    }

    pub async fn set_floating_ips(&self, enabled: bool) {
        self.state.lock().await.floating_ips = enabled;
    }

    /// Make every upsert fail with `message` (or succeed again with `None`).
    pub async fn fail_upserts(&self, message: Option<&str>) {
        self.state.lock().await.fail_upserts = message.map(str::to_string);
    }

    /// Make credential reloads fail with `message`.
    pub async fn fail_credentials(&self, message: Option<&str>) {
        self.state.lock().await.fail_credentials = message.map(str::to_string);
    }

    /// Every upsert attempted so far, including failed ones.
    pub async fn upserts(&self) -> Vec<LbSpec> {
        self.state.lock().await.upserts.clone()
    }

    pub async fn load_balancers(&self) -> BTreeMap<String, LoadBalancer> {
        self.state.lock().await.load_balancers.clone()
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LbProvider for MemoryProvider {
    async fn detect_extended_lb_features(&self) -> bool {
        self.state.lock().await.extended_features
    }

    async fn get_credentials(&self) -> Result<CredentialSet, ProviderError> {
        Ok(self.state.lock().await.credentials.clone())
    }

    async fn update_credentials(&self) -> Result<bool, ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(message) = &state.fail_credentials {
            return Err(ProviderError::Api(message.clone()));
        }
        match state.credential_source.clone() {
            Some(credentials) => {
                state.credentials = credentials;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn current_proxy_settings(&self) -> Result<ProxySettings, ProviderError> {
        Ok(self.state.lock().await.proxy.clone())
    }

    async fn upsert_load_balancer(&self, spec: &LbSpec) -> Result<LoadBalancer, ProviderError> {
        let mut state = self.state.lock().await;
        state.upserts.push(spec.clone());
        if let Some(message) = &state.fail_upserts {
            return Err(ProviderError::Api(message.clone()));
        }

        let floating_ips = state.floating_ips;
        let existing = state.load_balancers.get(&spec.name).cloned();
        let lb = match existing {
            Some(existing) => LoadBalancer {
                members: spec.members.clone(),
                algorithm: spec.algorithm.clone(),
                port: spec.port,
                ..existing
            },
            None => {
                state.allocated += 1;
                let n = state.allocated;
                info!(name = %spec.name, "Creating load balancer");
                LoadBalancer {
                    name: spec.name.clone(),
                    id: Some(format!("lb-{}", n)),
                    members: spec.members.clone(),
                    algorithm: spec.algorithm.clone(),
                    address: format!("192.0.2.{}", n),
                    floating_address: floating_ips.then(|| format!("203.0.113.{}", n)),
                    port: spec.port,
                }
            }
        };
        state.load_balancers.insert(lb.name.clone(), lb.clone());
        Ok(lb)
    }

    async fn delete_load_balancer(&self, lb: &LoadBalancer) -> Result<(), ProviderError> {
        self.state.lock().await.load_balancers.remove(&lb.name);
        Ok(())
    }

    async fn list_cached_load_balancers(
        &self,
    ) -> Result<BTreeMap<String, LoadBalancer>, ProviderError> {
        Ok(self.state.lock().await.load_balancers.clone())
    }
}
