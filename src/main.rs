//! labrange - lab environment server entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use labrange::{
    clock::SystemClock,
    config::Config,
    gateway::{GatewayState, LabGateway},
    lifecycle::{LabLifecycle, LifecycleSettings, TeardownExecutor},
    orchestrator::{
        AddressResolver, ComposeCli, Firewall, HttpAddressResolver, NoopFirewall,
        OrchestrationClient, UfwFirewall,
    },
    provisioning::{Credentials, PipelineSettings, ProgressStore, ProvisioningPipeline},
};

#[derive(Parser, Debug)]
#[command(name = "labrange")]
#[command(about = "Provisions short-lived per-user lab environments")]
#[command(version)]
struct Args {
    /// Env file to load before reading configuration (defaults to ./.env)
    #[arg(long, env = "LAB_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Listen host, overrides GATEWAY_HOST
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides GATEWAY_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("labrange=info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    tracing::info!("Starting labrange...");

    let mut config = Config::from_env(args.env_file.as_deref())?;
    if let Some(host) = args.host {
        config.gateway.host = host;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }
    tracing::info!(
        compose_file = %config.compose.compose_file.display(),
        service = %config.compose.service,
        session_ttl_secs = config.lab.session_ttl.as_secs(),
        "Loaded configuration"
    );

    let orchestrator: Arc<dyn OrchestrationClient> =
        Arc::new(ComposeCli::new(config.compose.clone()));

    let firewall: Arc<dyn Firewall> = if config.lab.firewall_enabled {
        Arc::new(UfwFirewall::new(config.compose.command_timeout))
    } else {
        tracing::info!("Firewall updates disabled");
        Arc::new(NoopFirewall)
    };

    let resolver: Arc<dyn AddressResolver> = Arc::new(HttpAddressResolver::new(
        config.lab.ip_resolver_url.clone(),
        config.lab.ip_lookup_timeout,
    )?);

    let pipeline = ProvisioningPipeline::new(
        orchestrator.clone(),
        firewall,
        resolver,
        Arc::new(ProgressStore::new()),
        PipelineSettings {
            service_port: config.compose.service_port,
            credentials: Credentials {
                username: config.lab.ssh_username.clone(),
                password: config.lab.ssh_password.clone(),
            },
            address_timeout: config.lab.ip_lookup_timeout,
            rollback_on_failure: config.lab.rollback_on_failure,
        },
    );

    let lifecycle = Arc::new(LabLifecycle::new(
        Arc::new(pipeline),
        TeardownExecutor::new(orchestrator),
        Arc::new(SystemClock),
        LifecycleSettings::from_config(&config.lab)?,
    ));

    let (stop_reaper, reaper_shutdown) = oneshot::channel();
    let reaper = match config.lab.reap_interval {
        Some(every) => {
            tracing::info!(interval_secs = every.as_secs(), "Expiry reaper enabled");
            Some(lifecycle.spawn_reaper(every, reaper_shutdown))
        }
        None => {
            tracing::info!("Expiry reaper disabled");
            None
        }
    };

    let addr = config.gateway.bind_addr()?;
    LabGateway::start(GatewayState::new(lifecycle), addr, shutdown_signal()).await?;

    let _ = stop_reaper.send(());
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }

    tracing::info!("labrange shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
