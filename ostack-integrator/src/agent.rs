//! Integrator agent - refreshes credentials and proxy settings, selects the
//! requests a trigger has to (re)process, and reconciles them against the
//! cloud provider.
//!
//! Triggers only raise level-sensitive flags (stale inputs, `config_changed`);
//! [`IntegratorAgent::run_pass`] observes the union of everything raised since
//! the previous pass. Passes never overlap: the agent is driven through
//! `&mut self`.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigDiff, SharedConfig};
use crate::credentials::CredentialSet;
use crate::endpoint::{CredentialsEndpoint, Endpoint};
use crate::error::{AgentError, Result, StateFetchError};
use crate::freshness::{ChangeTicket, CredentialState, ProxyState, credential_state, proxy_state};
use crate::provider::LbProvider;
use crate::reconciler::{
    ClientsReconciler, LbConsumersReconciler, LegacyLbReconciler, PassContext, Reconciler,
};
use crate::request::{
    ClientGrant, ClientRequest, LegacyLbRequest, LegacyLbResponse, LoadBalancerRequest,
    ProvisionResponse, ResponseError,
};
use crate::status::{Status, StatusSink};

pub type LbConsumersEndpoint =
    Box<dyn Endpoint<Request = LoadBalancerRequest, Response = ProvisionResponse>>;
pub type ClientsEndpoint = Box<dyn Endpoint<Request = ClientRequest, Response = ClientGrant>>;
pub type LegacyLbEndpoint =
    Box<dyn Endpoint<Request = LegacyLbRequest, Response = LegacyLbResponse>>;
pub type CredentialsRelation = Box<dyn CredentialsEndpoint>;

pub const STATUS_READY: &str = "Ready";
pub const STATUS_SERIES_UPGRADE: &str = "Series upgrade in progress";
pub const STATUS_MISSING_CREDENTIALS: &str = "missing credentials; set via config";

/// Relations the agent serves. Absent endpoints are skipped.
#[derive(Default)]
pub struct Endpoints {
    pub lb_consumers: Option<LbConsumersEndpoint>,
    pub clients: Option<ClientsEndpoint>,
    pub loadbalancer: Option<LegacyLbEndpoint>,
    pub credentials: Option<CredentialsRelation>,
}

/// What a completed pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// The full request set was reprocessed (config, credentials or proxy changed).
    pub full: bool,
    /// Requests a response was written for.
    pub processed: usize,
    /// Provider errors, in request order.
    pub errors: Vec<String>,
    /// Credentials were (re)published on the credentials relation.
    pub credentials_exposed: bool,
}

/// Tickets of the change edges a full pass consumes.
struct ConsumedChanges {
    credentials: Option<ChangeTicket>,
    proxy: Option<ChangeTicket>,
}

pub struct IntegratorAgent {
    config: SharedConfig,
    provider: Arc<dyn LbProvider>,
    endpoints: Endpoints,
    status: Arc<dyn StatusSink>,
    credentials: CredentialState,
    proxy: ProxyState,
    config_changed: bool,
    series_upgrade: bool,
    lb_consumers: LbConsumersReconciler,
    clients: ClientsReconciler,
    legacy: LegacyLbReconciler,
}

impl IntegratorAgent {
    pub fn new(
        config: SharedConfig,
        provider: Arc<dyn LbProvider>,
        endpoints: Endpoints,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            config,
            lb_consumers: LbConsumersReconciler::new(Arc::clone(&provider)),
            clients: ClientsReconciler::new(),
            legacy: LegacyLbReconciler::new(Arc::clone(&provider)),
            provider,
            endpoints,
            status,
            credentials: credential_state(),
            proxy: proxy_state(),
            config_changed: false,
            series_upgrade: false,
        }
    }

    pub fn credentials(&self) -> &CredentialState {
        &self.credentials
    }

    pub fn proxy(&self) -> &ProxyState {
        &self.proxy
    }

    pub fn config_changed(&self) -> bool {
        self.config_changed
    }

    /// Install a new configuration and invalidate what it affects.
    pub async fn apply_config(&mut self, new: Config) -> ConfigDiff {
        let diff = {
            let mut config = self.config.write().await;
            let diff = config.diff(&new);
            if diff.any {
                *config = new;
            }
            diff
        };
        self.on_config_changed(diff);
        diff
    }

    /// Configuration trigger.
    pub fn on_config_changed(&mut self, diff: ConfigDiff) {
        if !diff.any {
            return;
        }
        info!(
            credentials = diff.credentials,
            proxy = diff.proxy,
            "Configuration changed"
        );
        if diff.credentials {
            self.credentials.invalidate();
        }
        if diff.proxy {
            self.proxy.invalidate();
        }
        self.config_changed = true;
    }

    /// Periodic health trigger: credentials and proxy may have changed at the
    /// source, so recheck both.
    pub fn on_update_status(&mut self) {
        self.credentials.invalidate();
        self.proxy.invalidate();
    }

    /// Upgrade trigger: recheck credentials and proxy in case they are
    /// interpreted differently now.
    pub fn on_upgrade(&mut self) {
        self.credentials.invalidate();
        self.proxy.invalidate();
    }

    pub fn invalidate_credentials(&mut self) {
        self.credentials.invalidate();
    }

    pub fn invalidate_proxy(&mut self) {
        self.proxy.invalidate();
    }

    pub fn set_series_upgrade(&mut self, in_progress: bool) {
        if in_progress != self.series_upgrade {
            info!(in_progress, "Series upgrade");
        }
        self.series_upgrade = in_progress;
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `Ok(None)` when a precondition blocked the pass before any
    /// request was touched. A failed credential or proxy fetch aborts the pass
    /// with an error, leaves the input stale and consumes no change edge.
    pub async fn run_pass(&mut self) -> Result<Option<PassReport>> {
        if self.series_upgrade {
            self.status.set(Status::blocked(STATUS_SERIES_UPGRADE));
            return Ok(None);
        }

        let config = self.config.read().await.clone();
        let manage_security_groups = match config.manage_security_groups() {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Invalid configuration");
                self.status.set(Status::blocked(e.to_string()));
                return Ok(None);
            }
        };

        if !self.credentials.is_fresh() {
            match self.refresh_credentials().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("No credentials available");
                    self.status.set(Status::blocked(STATUS_MISSING_CREDENTIALS));
                    return Ok(None);
                }
                Err(e) => return Err(self.abort(e)),
            }
        }

        if !self.proxy.is_fresh() {
            if let Err(e) = self.refresh_proxy().await {
                return Err(self.abort(e));
            }
        }

        let consumed = ConsumedChanges {
            credentials: self.credentials.ticket(),
            proxy: self.proxy.ticket(),
        };
        let full =
            self.config_changed || consumed.credentials.is_some() || consumed.proxy.is_some();
        debug!(
            full,
            config_changed = self.config_changed,
            credentials_changed = consumed.credentials.is_some(),
            proxy_changed = consumed.proxy.is_some(),
            "Selecting requests"
        );

        let ctx = PassContext {
            config,
            credentials: self.credentials.cached().cloned().unwrap_or_default(),
            proxy: self.proxy.cached().cloned().unwrap_or_default(),
            has_octavia: false,
            manage_security_groups,
        };

        let mut report = PassReport {
            full,
            ..Default::default()
        };
        // Change edges stay raised so the next trigger retries the whole pass.
        let legacy_error = match self.reconcile_relations(&ctx, full, &mut report).await {
            Ok(legacy_error) => legacy_error,
            Err(e) => {
                error!(error = %e, "Reconciliation pass failed");
                self.status.set(Status::blocked(e.to_string()));
                return Err(e);
            }
        };

        if full {
            if let Some(ticket) = consumed.credentials {
                self.credentials.acknowledge(ticket);
            }
            if let Some(ticket) = consumed.proxy {
                self.proxy.acknowledge(ticket);
            }
        }
        self.config_changed = false;

        if !report.errors.is_empty() {
            self.status.set(Status::blocked(report.errors.join(", ")));
        } else if let Some(message) = legacy_error {
            self.status.set(Status::blocked(message));
        } else {
            self.status.set(Status::active(STATUS_READY));
        }

        info!(
            full = report.full,
            processed = report.processed,
            errors = report.errors.len(),
            "Reconciliation pass complete"
        );
        Ok(Some(report))
    }

    /// Delete every load balancer this integrator created.
    pub async fn cleanup(&self) -> Result<usize> {
        self.status.set(Status::maintenance("Cleaning load balancers"));
        let cached = self.provider.list_cached_load_balancers().await?;
        let mut deleted = 0;
        for lb in cached.values() {
            self.provider.delete_load_balancer(lb).await?;
            info!(name = %lb.name, "Load balancer was deleted");
            deleted += 1;
        }
        Ok(deleted)
    }

    fn abort(&self, e: StateFetchError) -> AgentError {
        error!(error = %e, "Aborting reconciliation pass");
        self.status.set(Status::blocked(e.to_string()));
        e.into()
    }

    /// Reload credentials; `Ok(false)` if none are configured.
    async fn refresh_credentials(&mut self) -> std::result::Result<bool, StateFetchError> {
        let found = self
            .provider
            .update_credentials()
            .await
            .map_err(StateFetchError::Credentials)?;
        if !found {
            return Ok(false);
        }
        let credentials = self
            .provider
            .get_credentials()
            .await
            .map_err(StateFetchError::Credentials)?;
        if self.credentials.refresh(credentials) {
            info!("Credentials changed");
        }
        Ok(true)
    }

    /// Reload proxy settings and compare them with what clients were last sent.
    async fn refresh_proxy(&mut self) -> std::result::Result<(), StateFetchError> {
        let settings = self
            .provider
            .current_proxy_settings()
            .await
            .map_err(StateFetchError::Proxy)?;

        let mut clients_outdated = false;
        if let Some(clients) = &self.endpoints.clients {
            for request in clients.all_requests().await.map_err(StateFetchError::Clients)? {
                let granted = clients
                    .last_response(&request.unit_name)
                    .await
                    .map_err(StateFetchError::Clients)?;
                if granted.is_some_and(|grant| grant.proxy_config != settings) {
                    clients_outdated = true;
                }
            }
        }

        let changed = self.proxy.refresh(settings);
        if changed {
            info!("Proxy settings changed");
        }
        if clients_outdated {
            self.status.set(Status::maintenance("Clients proxy settings changed"));
            if !changed {
                self.proxy.mark_changed();
            }
        }
        Ok(())
    }

    /// Returns the provider error that stopped the legacy batch, if any.
    async fn reconcile_relations(
        &self,
        ctx: &PassContext,
        full: bool,
        report: &mut PassReport,
    ) -> Result<Option<String>> {
        report.credentials_exposed = self.handle_credentials(&ctx.credentials).await?;
        report.processed += self.handle_clients(ctx, full).await?;
        report.processed += self
            .handle_lb_consumers(ctx, full, &mut report.errors)
            .await?;
        self.handle_legacy(ctx, full, &mut report.processed).await
    }

    /// Publish the credentials unless the relation already has them.
    async fn handle_credentials(&self, credentials: &CredentialSet) -> Result<bool> {
        let Some(relation) = &self.endpoints.credentials else {
            return Ok(false);
        };
        if !relation.is_joined().await {
            return Ok(false);
        }
        if relation.exposed().await?.as_ref() == Some(credentials) {
            return Ok(false);
        }
        relation.expose_credentials(credentials).await?;
        info!(relation = relation.name(), "Credentials published");
        Ok(true)
    }

    async fn handle_clients(&self, ctx: &PassContext, full: bool) -> Result<usize> {
        let Some(clients) = &self.endpoints.clients else {
            return Ok(0);
        };
        if !clients.is_joined().await {
            return Ok(0);
        }
        let requests = if full {
            clients.all_requests().await?
        } else {
            clients.new_requests().await?
        };
        if requests.is_empty() && !full {
            return Ok(0);
        }

        self.status.set(Status::maintenance("Granting integration requests"));
        let ctx = PassContext {
            has_octavia: self.provider.detect_extended_lb_features().await,
            ..ctx.clone()
        };
        for request in &requests {
            self.status.set(Status::maintenance(format!(
                "Granting request for {}",
                request.unit_name
            )));
            let grant = self.clients.reconcile(request, &ctx).await?;
            clients.send_response(request, grant).await?;
            info!(unit = %request.unit_name, "Finished request");
        }
        clients.mark_completed().await?;
        Ok(requests.len())
    }

    async fn handle_lb_consumers(
        &self,
        ctx: &PassContext,
        full: bool,
        errors: &mut Vec<String>,
    ) -> Result<usize> {
        let Some(lb_consumers) = &self.endpoints.lb_consumers else {
            return Ok(0);
        };
        let requests = if full {
            lb_consumers.all_requests().await?
        } else {
            lb_consumers.new_requests().await?
        };
        if requests.is_empty() {
            return Ok(0);
        }

        self.status.set(Status::maintenance("Managing load balancers"));
        for request in &requests {
            let response = match self.lb_consumers.reconcile(request, ctx).await {
                Ok(response) => response,
                Err(e) => ProvisionResponse::provider_error(e.to_string()),
            };
            if response.error == Some(ResponseError::ProviderError) {
                errors.push(response.error_message.clone());
            }
            lb_consumers.send_response(request, response).await?;
        }
        Ok(requests.len())
    }

    async fn handle_legacy(
        &self,
        ctx: &PassContext,
        full: bool,
        processed: &mut usize,
    ) -> Result<Option<String>> {
        let Some(loadbalancer) = &self.endpoints.loadbalancer else {
            return Ok(None);
        };
        if !loadbalancer.is_joined().await {
            return Ok(None);
        }

        let requests = if full {
            loadbalancer.all_requests().await?
        } else {
            loadbalancer.new_requests().await?
        };
        let requests: Vec<_> = requests
            .into_iter()
            .filter(|request| !request.members.is_empty())
            .collect();
        if requests.is_empty() {
            return Ok(None);
        }
        self.status.set(Status::maintenance("Managing load balancers"));
        for request in &requests {
            match self.legacy.reconcile(request, ctx).await {
                Ok(response) => {
                    loadbalancer.send_response(request, response).await?;
                    *processed += 1;
                }
                Err(e) => {
                    error!(
                        application = %request.application_name,
                        error = %e,
                        "Failed to provision load balancer"
                    );
                    return Ok(Some(e.to_string()));
                }
            }
        }
        Ok(None)
    }
}
