//! OpenStack provider - drives Octavia through the `openstack` command line
//! client.
//!
//! Credentials and proxy settings come from the shared configuration and are
//! exported to the client as `OS_*` and `*_PROXY` environment variables.
//! Load balancers this integrator creates are remembered in a JSON cache file
//! so they can be cleaned up later.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{LbProvider, LbSpec, LoadBalancer, Member};
use crate::config::SharedConfig;
use crate::credentials::{CredentialSet, ProxySettings};
use crate::error::ProviderError;

const CLI: &str = "openstack";

/// How long to wait for Octavia to finish provisioning after each change.
const ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ACTIVE_POLL_ATTEMPTS: u32 = 120;

pub struct OpenStackProvider {
    config: SharedConfig,
    credentials: Mutex<CredentialSet>,
    cache_path: PathBuf,
    extended_features: Mutex<Option<bool>>,
}

impl OpenStackProvider {
    pub fn new(config: SharedConfig, cache_path: PathBuf) -> Self {
        Self {
            config,
            credentials: Mutex::new(CredentialSet::new()),
            cache_path,
            extended_features: Mutex::new(None),
        }
    }

    /// Run the client and return stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ProviderError> {
        let credentials = self.credentials.lock().await.clone();
        let proxy = self.config.read().await.proxy.to_settings();
        let command_line = format!("{} {}", CLI, args.join(" "));
        debug!(command = %command_line, "Running openstack client");

        let output = Command::new(CLI)
            .args(args)
            .envs(credentials.to_env())
            .envs(proxy.iter())
            .output()
            .await
            .map_err(|source| ProviderError::Command {
                command: command_line.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Api(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run the client with `-f json` and parse the result.
    async fn run_json(&self, args: &[&str]) -> Result<Value, ProviderError> {
        let mut full: Vec<&str> = args.to_vec();
        full.extend(["-f", "json"]);
        let stdout = self.run(&full).await?;
        serde_json::from_str(&stdout).map_err(|e| ProviderError::Parse {
            command: format!("{} {}", CLI, args.join(" ")),
            message: e.to_string(),
        })
    }

    /// `show` a resource, mapping "not found" to `None`.
    async fn show(&self, args: &[&str]) -> Result<Option<Value>, ProviderError> {
        match self.run_json(args).await {
            Ok(value) => Ok(Some(value)),
            Err(ProviderError::Api(message)) if is_not_found(&message) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Poll until the load balancer leaves its PENDING_* state.
    async fn wait_active(&self, lb_id: &str) -> Result<Value, ProviderError> {
        for _ in 0..ACTIVE_POLL_ATTEMPTS {
            let lb = self.run_json(&["loadbalancer", "show", lb_id]).await?;
            match field(&lb, "provisioning_status") {
                Some("ACTIVE") => return Ok(lb),
                Some("ERROR") => {
                    return Err(ProviderError::Api(format!(
                        "load balancer {} went into ERROR state",
                        lb_id
                    )));
                }
                status => debug!(lb = lb_id, ?status, "Waiting for load balancer"),
            }
            tokio::time::sleep(ACTIVE_POLL_INTERVAL).await;
        }
        Err(ProviderError::Api(format!(
            "timed out waiting for load balancer {} to become ACTIVE",
            lb_id
        )))
    }

    async fn ensure_loadbalancer(&self, spec: &LbSpec) -> Result<Value, ProviderError> {
        if let Some(lb) = self.show(&["loadbalancer", "show", &spec.name]).await? {
            return Ok(lb);
        }

        let subnet = self.config.read().await.subnet_id.clone().ok_or_else(|| {
            ProviderError::Api("subnet-id must be configured to create load balancers".into())
        })?;
        info!(name = %spec.name, "Creating load balancer");
        self.run_json(&[
            "loadbalancer",
            "create",
            "--name",
            &spec.name,
            "--vip-subnet-id",
            &subnet,
        ])
        .await
    }

    /// Listener on `spec.port`; a listener on another port is replaced
    /// together with its pool.
    async fn ensure_listener(
        &self,
        spec: &LbSpec,
        lb_id: &str,
        listener_name: &str,
        pool_name: &str,
    ) -> Result<Value, ProviderError> {
        if let Some(listener) = self
            .show(&["loadbalancer", "listener", "show", listener_name])
            .await?
        {
            if listener.get("protocol_port").and_then(Value::as_u64) == Some(u64::from(spec.port)) {
                return Ok(listener);
            }
            info!(listener = listener_name, port = spec.port, "Replacing listener on new port");
            if self
                .show(&["loadbalancer", "pool", "show", pool_name])
                .await?
                .is_some()
            {
                self.run(&["loadbalancer", "pool", "delete", pool_name]).await?;
                self.wait_active(lb_id).await?;
            }
            self.run(&["loadbalancer", "listener", "delete", listener_name])
                .await?;
            self.wait_active(lb_id).await?;
        }

        let port = spec.port.to_string();
        let listener = self
            .run_json(&[
                "loadbalancer",
                "listener",
                "create",
                "--name",
                listener_name,
                "--protocol",
                "TCP",
                "--protocol-port",
                &port,
                lb_id,
            ])
            .await?;
        self.wait_active(lb_id).await?;
        Ok(listener)
    }

    async fn ensure_pool(
        &self,
        spec: &LbSpec,
        lb_id: &str,
        listener_name: &str,
        pool_name: &str,
    ) -> Result<(), ProviderError> {
        match self.show(&["loadbalancer", "pool", "show", pool_name]).await? {
            Some(pool) => {
                if field(&pool, "lb_algorithm") != Some(spec.algorithm.as_str()) {
                    info!(pool = pool_name, algorithm = %spec.algorithm, "Updating pool algorithm");
                    self.run(&[
                        "loadbalancer",
                        "pool",
                        "set",
                        "--lb-algorithm",
                        &spec.algorithm,
                        pool_name,
                    ])
                    .await?;
                    self.wait_active(lb_id).await?;
                }
            }
            None => {
                self.run_json(&[
                    "loadbalancer",
                    "pool",
                    "create",
                    "--name",
                    pool_name,
                    "--listener",
                    listener_name,
                    "--protocol",
                    "TCP",
                    "--lb-algorithm",
                    &spec.algorithm,
                ])
                .await?;
                self.wait_active(lb_id).await?;
            }
        }
        Ok(())
    }

    /// Converge pool members to `spec.members`.
    async fn sync_members(
        &self,
        spec: &LbSpec,
        lb_id: &str,
        pool_name: &str,
    ) -> Result<(), ProviderError> {
        let current = self
            .run_json(&["loadbalancer", "member", "list", pool_name])
            .await?;
        let current: Vec<(String, Member)> = current
            .as_array()
            .map(|members| members.iter().filter_map(parse_member).collect())
            .unwrap_or_default();

        for (id, member) in &current {
            if !spec.members.contains(member) {
                info!(pool = pool_name, address = %member.address, "Removing member");
                self.run(&["loadbalancer", "member", "delete", pool_name, id])
                    .await?;
                self.wait_active(lb_id).await?;
            }
        }

        for member in &spec.members {
            if current.iter().any(|(_, m)| m == member) {
                continue;
            }
            info!(pool = pool_name, address = %member.address, port = member.port, "Adding member");
            let port = member.port.to_string();
            self.run_json(&[
                "loadbalancer",
                "member",
                "create",
                "--address",
                &member.address,
                "--protocol-port",
                &port,
                pool_name,
            ])
            .await?;
            self.wait_active(lb_id).await?;
        }
        Ok(())
    }

    /// Attach a floating IP to the VIP port unless the load balancer is internal.
    async fn ensure_floating_ip(&self, vip_port_id: &str) -> Result<Option<String>, ProviderError> {
        let (internal, network) = {
            let config = self.config.read().await;
            (config.internal_lb, config.floating_network_id.clone())
        };
        let Some(network) = network.filter(|_| !internal) else {
            return Ok(None);
        };

        let existing = self
            .run_json(&["floating", "ip", "list", "--port", vip_port_id])
            .await?;
        if let Some(address) = existing
            .as_array()
            .and_then(|ips| ips.first())
            .and_then(|ip| field(ip, "Floating IP Address"))
        {
            return Ok(Some(address.to_string()));
        }

        let created = self
            .run_json(&["floating", "ip", "create", "--port", vip_port_id, &network])
            .await?;
        field(&created, "floating_ip_address")
            .map(|a| Some(a.to_string()))
            .ok_or_else(|| ProviderError::Parse {
                command: "openstack floating ip create".into(),
                message: "missing floating_ip_address".into(),
            })
    }

    async fn load_cache(&self) -> Result<BTreeMap<String, LoadBalancer>, ProviderError> {
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|e| ProviderError::Cache {
                path: self.cache_path.clone(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ProviderError::Cache {
                path: self.cache_path.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Cache a freshly found or created load balancer unless it is already
    /// known, so `cleanup` can delete it even if a later step keeps failing.
    async fn remember_created(
        &self,
        spec: &LbSpec,
        lb_id: &str,
        lb: &Value,
    ) -> Result<(), ProviderError> {
        let mut cache = self.load_cache().await?;
        if cache.contains_key(&spec.name) {
            return Ok(());
        }
        cache.insert(
            spec.name.clone(),
            LoadBalancer {
                name: spec.name.clone(),
                id: Some(lb_id.to_string()),
                members: Vec::new(),
                algorithm: spec.algorithm.clone(),
                address: field(lb, "vip_address").unwrap_or_default().to_string(),
                floating_address: None,
                port: spec.port,
            },
        );
        debug!(name = %spec.name, id = lb_id, "Load balancer cached");
        self.store_cache(&cache).await
    }

    async fn store_cache(&self, cache: &BTreeMap<String, LoadBalancer>) -> Result<(), ProviderError> {
        let cache_error = |message: String| ProviderError::Cache {
            path: self.cache_path.clone(),
            message,
        };
        let text = serde_json::to_string_pretty(cache).map_err(|e| cache_error(e.to_string()))?;
        tokio::fs::write(&self.cache_path, text)
            .await
            .map_err(|e| cache_error(e.to_string()))
    }
}

#[async_trait]
impl LbProvider for OpenStackProvider {
    async fn detect_extended_lb_features(&self) -> bool {
        let mut detected = self.extended_features.lock().await;
        if let Some(has_octavia) = *detected {
            return has_octavia;
        }
        let has_octavia = match self.run(&["catalog", "show", "load-balancer"]).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Octavia not found in service catalog");
                false
            }
        };
        info!(has_octavia, "Detected load balancer features");
        *detected = Some(has_octavia);
        has_octavia
    }

    async fn get_credentials(&self) -> Result<CredentialSet, ProviderError> {
        Ok(self.credentials.lock().await.clone())
    }

    async fn update_credentials(&self) -> Result<bool, ProviderError> {
        let credentials = self.config.read().await.credentials.to_credentials()?;
        if !credentials.is_complete() {
            warn!("Credentials are incomplete (need at least auth-url and username)");
            return Ok(false);
        }
        *self.credentials.lock().await = credentials;
        // Feature detection depends on the cloud the credentials point at.
        *self.extended_features.lock().await = None;
        Ok(true)
    }

    async fn current_proxy_settings(&self) -> Result<ProxySettings, ProviderError> {
        Ok(self.config.read().await.proxy.to_settings())
    }

    async fn upsert_load_balancer(&self, spec: &LbSpec) -> Result<LoadBalancer, ProviderError> {
        let listener_name = format!("{}-listener", spec.name);
        let pool_name = format!("{}-pool", spec.name);

        let lb = self.ensure_loadbalancer(spec).await?;
        let lb_id = field(&lb, "id")
            .ok_or_else(|| ProviderError::Parse {
                command: "openstack loadbalancer show".into(),
                message: "missing id".into(),
            })?
            .to_string();
        self.remember_created(spec, &lb_id, &lb).await?;
        let lb = self.wait_active(&lb_id).await?;

        self.ensure_listener(spec, &lb_id, &listener_name, &pool_name)
            .await?;
        self.ensure_pool(spec, &lb_id, &listener_name, &pool_name).await?;
        self.sync_members(spec, &lb_id, &pool_name).await?;

        let address = field(&lb, "vip_address").unwrap_or_default().to_string();
        let floating_address = match field(&lb, "vip_port_id") {
            Some(port_id) => self.ensure_floating_ip(port_id).await?,
            None => None,
        };

        let result = LoadBalancer {
            name: spec.name.clone(),
            id: Some(lb_id),
            members: spec.members.clone(),
            algorithm: spec.algorithm.clone(),
            address,
            floating_address,
            port: spec.port,
        };

        let mut cache = self.load_cache().await?;
        cache.insert(result.name.clone(), result.clone());
        self.store_cache(&cache).await?;

        info!(
            name = %result.name,
            address = %result.public_address(),
            port = result.port,
            "Load balancer ready"
        );
        Ok(result)
    }

    async fn delete_load_balancer(&self, lb: &LoadBalancer) -> Result<(), ProviderError> {
        let target = lb.id.as_deref().unwrap_or(&lb.name);
        match self
            .run(&["loadbalancer", "delete", "--cascade", target])
            .await
        {
            Ok(_) => {}
            Err(ProviderError::Api(message)) if is_not_found(&message) => {
                debug!(name = %lb.name, "Load balancer already gone");
            }
            Err(e) => return Err(e),
        }
        if let Some(address) = &lb.floating_address {
            if let Err(e) = self.run(&["floating", "ip", "delete", address]).await {
                warn!(address = %address, error = %e, "Failed to release floating IP");
            }
        }

        let mut cache = self.load_cache().await?;
        cache.remove(&lb.name);
        self.store_cache(&cache).await
    }

    async fn list_cached_load_balancers(
        &self,
    ) -> Result<BTreeMap<String, LoadBalancer>, ProviderError> {
        self.load_cache().await
    }
}

fn field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// `(id, member)` from one entry of `loadbalancer member list`.
fn parse_member(value: &Value) -> Option<(String, Member)> {
    let id = field(value, "id")?.to_string();
    let address = field(value, "address")?.to_string();
    let port = u16::try_from(value.get("protocol_port")?.as_u64()?).ok()?;
    Some((id, Member::new(address, port)))
}

fn is_not_found(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("unable to locate")
        || message.contains("not found")
        || message.contains("could not be found")
        || message.contains("no loadbalancer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(is_not_found("Unable to locate lb-1 in load balancers"));
        assert!(is_not_found("Load Balancer lb-1 could not be found."));
        assert!(!is_not_found("Quota exceeded for resources: ['loadbalancer']"));
    }

    #[test]
    fn test_field() {
        let value = serde_json::json!({"id": "abc", "protocol_port": 443});
        assert_eq!(field(&value, "id"), Some("abc"));
        assert_eq!(field(&value, "protocol_port"), None);
        assert_eq!(field(&value, "missing"), None);
    }

    #[test]
    fn test_parse_member() {
        let member = serde_json::json!({"id": "m1", "address": "10.0.0.1", "protocol_port": 6443});
        assert_eq!(
            parse_member(&member),
            Some(("m1".to_string(), Member::new("10.0.0.1", 6443)))
        );

        let out_of_range =
            serde_json::json!({"id": "m2", "address": "10.0.0.2", "protocol_port": 70000});
        assert_eq!(parse_member(&out_of_range), None);
    }

    #[tokio::test]
    async fn test_created_load_balancer_is_cached_before_completion() {
        let dir = tempfile::tempdir().unwrap();
        let provider = OpenStackProvider::new(SharedConfig::default(), dir.path().join("cache.json"));
        let spec = LbSpec::new(
            "app",
            "lb-consumers",
            vec![Member::new("10.0.0.1", 6443)],
            443,
            "ROUND_ROBIN",
        );
        let created = serde_json::json!({"id": "lb-1", "vip_address": "192.168.1.10"});

        provider.remember_created(&spec, "lb-1", &created).await.unwrap();
        let cached = provider.list_cached_load_balancers().await.unwrap();
        let lb = cached.get(&spec.name).unwrap();
        assert_eq!(lb.id.as_deref(), Some("lb-1"));
        assert_eq!(lb.address, "192.168.1.10");

        // A completed entry is not replaced by a later partial one.
        let mut cache = cached.clone();
        cache.get_mut(&spec.name).unwrap().floating_address = Some("203.0.113.1".into());
        provider.store_cache(&cache).await.unwrap();
        provider.remember_created(&spec, "lb-1", &created).await.unwrap();
        let cached = provider.list_cached_load_balancers().await.unwrap();
        assert_eq!(
            cached.get(&spec.name).unwrap().floating_address.as_deref(),
            Some("203.0.113.1")
        );
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SharedConfig::default();
        let provider = OpenStackProvider::new(config, dir.path().join("lb-cache.json"));

        assert!(provider.list_cached_load_balancers().await.unwrap().is_empty());

        let lb = LoadBalancer {
            name: "openstack-integrator-loadbalancer-app".into(),
            id: Some("1234".into()),
            members: vec![Member::new("10.0.0.1", 6443)],
            algorithm: "ROUND_ROBIN".into(),
            address: "192.168.1.10".into(),
            floating_address: None,
            port: 443,
        };
        let mut cache = BTreeMap::new();
        cache.insert(lb.name.clone(), lb.clone());
        provider.store_cache(&cache).await.unwrap();

        let loaded = provider.list_cached_load_balancers().await.unwrap();
        assert_eq!(loaded.get(&lb.name), Some(&lb));
    }

    #[tokio::test]
    async fn test_update_credentials_requires_auth_url() {
        let dir = tempfile::tempdir().unwrap();
        let config = SharedConfig::default();
        let provider = OpenStackProvider::new(config.clone(), dir.path().join("cache.json"));
        assert!(!provider.update_credentials().await.unwrap());

        {
            let mut config = config.write().await;
            config.credentials.auth_url = Some("https://keystone:5000/v3".into());
            config.credentials.username = Some("admin".into());
        }
        assert!(provider.update_credentials().await.unwrap());
        assert_eq!(
            provider.get_credentials().await.unwrap().get("username"),
            Some("admin")
        );
    }
}
