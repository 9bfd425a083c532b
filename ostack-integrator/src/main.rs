//! ostack-integrator: OpenStack integrator daemon.
//!
//! This daemon runs next to the cluster and:
//! - Reads cloud credentials and proxy settings from a JSON config file
//! - Publishes credentials and grants to integration clients
//! - Provisions Octavia load balancers for requests in the spool directory
//! - Writes responses and the current status back to the spool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ostack_integrator::endpoint::{
    RELATION_CLIENTS, RELATION_CREDENTIALS, RELATION_LB_CONSUMERS, RELATION_LOADBALANCER,
    SpoolCredentials, SpoolEndpoint,
};
use ostack_integrator::request::LoadBalancerRequest;
use ostack_integrator::validation::{ValidationSettings, validate};
use ostack_integrator::{
    Config, Endpoints, IntegratorAgent, LbProvider, MemoryProvider, OpenStackProvider,
    SharedConfig, StatusReporter,
};

/// Marker file in the spool directory that pauses reconciliation.
const SERIES_UPGRADE_MARKER: &str = "series-upgrade";

#[derive(Parser)]
#[command(name = "ostack-integrator", version)]
#[command(about = "OpenStack integrator - provisions cloud load balancers for cluster components")]
struct Args {
    /// Integrator configuration (JSON, kebab-case keys)
    #[arg(short, long, global = true, default_value = "/etc/ostack-integrator/config.json")]
    config: PathBuf,

    /// Spool directory holding relation requests, responses and state
    #[arg(short, long, global = true, default_value = "/var/lib/ostack-integrator")]
    spool: PathBuf,

    /// Run in development mode (in-memory provider, no cloud calls)
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the reconciliation loop
    Run {
        /// Seconds between periodic credential and proxy rechecks
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Seconds between polls of the configuration and spool directory
        #[arg(long, default_value = "10")]
        poll: u64,
    },

    /// Validate a load balancer request file and print the result
    Validate {
        /// Request JSON file
        request: PathBuf,
    },

    /// Delete every load balancer created by the integrator
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ostack_integrator=info".parse()?),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Cmd::Run { interval, poll } => {
            run(
                &args.config,
                &args.spool,
                args.dev,
                Duration::from_secs(interval),
                Duration::from_secs(poll),
            )
            .await
        }
        Cmd::Validate { request } => validate_request(&args.config, &request).await,
        Cmd::Cleanup => cleanup(&args.config, &args.spool, args.dev).await,
    }
}

/// Provider plus, in development mode, a handle to feed it configuration.
struct Backend {
    provider: Arc<dyn LbProvider>,
    dev: Option<Arc<MemoryProvider>>,
}

impl Backend {
    fn new(config: &SharedConfig, spool: &Path, dev: bool) -> Self {
        if dev {
            let memory = Arc::new(MemoryProvider::new());
            Self {
                provider: memory.clone(),
                dev: Some(memory),
            }
        } else {
            let cache = spool.join("lb-cache.json");
            Self {
                provider: Arc::new(OpenStackProvider::new(Arc::clone(config), cache)),
                dev: None,
            }
        }
    }

    /// The in-memory provider has no configuration of its own.
    async fn sync(&self, config: &Config) -> Result<()> {
        if let Some(memory) = &self.dev {
            let credentials = config.credentials.to_credentials()?;
            memory
                .set_credentials(credentials.is_complete().then_some(credentials))
                .await;
            memory.set_proxy(config.proxy.to_settings()).await;
        }
        Ok(())
    }
}

async fn run(
    config_path: &Path,
    spool: &Path,
    dev: bool,
    health_interval: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let initial = Config::load(config_path).await?;
    tokio::fs::create_dir_all(spool)
        .await
        .with_context(|| format!("Failed to create spool directory {}", spool.display()))?;

    info!(
        "Starting ostack-integrator - config: {}, spool: {}, dev: {}",
        config_path.display(),
        spool.display(),
        dev
    );

    let config: SharedConfig = Arc::new(RwLock::new(initial.clone()));
    let backend = Backend::new(&config, spool, dev);
    backend.sync(&initial).await?;

    let status = Arc::new(StatusReporter::new());
    let endpoints = Endpoints {
        lb_consumers: Some(Box::new(SpoolEndpoint::new(spool, RELATION_LB_CONSUMERS))),
        clients: Some(Box::new(SpoolEndpoint::new(spool, RELATION_CLIENTS))),
        loadbalancer: Some(Box::new(SpoolEndpoint::new(spool, RELATION_LOADBALANCER))),
        credentials: Some(Box::new(SpoolCredentials::new(spool, RELATION_CREDENTIALS))),
    };
    let mut agent = IntegratorAgent::new(
        Arc::clone(&config),
        Arc::clone(&backend.provider),
        endpoints,
        status.clone(),
    );

    let status_path = spool.join("status.json");
    let marker = spool.join(SERIES_UPGRADE_MARKER);

    let mut poll = tokio::time::interval(poll_interval);
    let mut health = tokio::time::interval(health_interval);
    // The first health tick fires immediately; inputs start stale anyway.
    health.tick().await;

    let mut sigterm = unix_signal(SignalKind::terminate())?;
    let mut sighup = unix_signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                match Config::load(config_path).await {
                    Ok(new) => {
                        let diff = agent.apply_config(new.clone()).await;
                        if diff.any {
                            backend.sync(&new).await?;
                        }
                    }
                    Err(e) => warn!("Keeping previous configuration: {}", e),
                }
                let series_upgrade = tokio::fs::try_exists(&marker).await.unwrap_or(false);
                agent.set_series_upgrade(series_upgrade);
            }
            _ = health.tick() => {
                agent.on_update_status();
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP, rechecking credentials and proxy settings");
                agent.on_upgrade();
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
        }

        if let Err(e) = agent.run_pass().await {
            error!("Reconciliation pass failed: {}", e);
        }
        if let Err(e) = status.persist(&status_path).await {
            warn!("Failed to write {}: {}", status_path.display(), e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn validate_request(config_path: &Path, request_path: &Path) -> Result<()> {
    let config = if tokio::fs::try_exists(config_path).await.unwrap_or(false) {
        Config::load(config_path).await?
    } else {
        Config::default()
    };

    let text = tokio::fs::read_to_string(request_path)
        .await
        .with_context(|| format!("Failed to read {}", request_path.display()))?;
    let request: LoadBalancerRequest = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", request_path.display()))?;

    let validated = validate(&request, &ValidationSettings::from(&config));
    let output = serde_json::json!({
        "request": validated.request,
        "algorithm": validated.algorithm,
        "error_fields": validated.errors,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !validated.is_valid() {
        bail!("{} invalid field(s)", validated.errors.len());
    }
    Ok(())
}

async fn cleanup(config_path: &Path, spool: &Path, dev: bool) -> Result<()> {
    let initial = Config::load(config_path).await?;
    let config: SharedConfig = Arc::new(RwLock::new(initial.clone()));
    let backend = Backend::new(&config, spool, dev);
    backend.sync(&initial).await?;

    if !backend.provider.update_credentials().await? {
        bail!("No credentials configured, cannot clean up load balancers");
    }

    let status = Arc::new(StatusReporter::new());
    let agent = IntegratorAgent::new(
        config,
        Arc::clone(&backend.provider),
        Endpoints::default(),
        status,
    );
    let deleted = agent.cleanup().await?;
    info!("Deleted {} load balancer(s)", deleted);
    Ok(())
}
