mod config;
mod database;
mod monitoring;
mod orchestrator;
mod pool;
mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, load_sites};
use crate::database::StorePool;
use crate::monitoring::{IcmpProber, Prober, Resolver, SystemLookup, TracerouteDiscovery};
use crate::orchestrator::Supervisor;

/// Probe hosts over ICMP and store round-trip times in a SQL database
#[derive(Parser, Debug)]
#[command(name = "pingnstor", version, about)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/pingnstor/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store URL, overrides `store.url`
    #[arg(long)]
    dsn: Option<String>,

    /// File listing one target per line
    #[arg(short = 'f', long)]
    sites: Option<PathBuf>,

    /// Probe interval in seconds for targets read from --sites; must be at least probe.timeout_seconds (default 2)
    #[arg(short, long, default_value_t = 60)]
    delay: u64,

    /// Log output: "compact" or "json"
    #[arg(long)]
    log_format: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

/// Cancel `cancel` on ctrl-c or, on unix, SIGTERM
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
                info!("Interrupt received, shutting down");
            }
            _ = terminate => info!("SIGTERM received, shutting down"),
        }
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_config(args.config.as_ref()).context("failed to load configuration")?;
    if let Some(dsn) = args.dsn {
        config.store.url = dsn;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(path) = &args.sites {
        config.add_sites(load_sites(path)?, args.delay);
    }
    config.validate()?;

    if args.show_config {
        print!("{config}");
        return Ok(());
    }

    logger::init_with(config.log_options()?);
    info!("Starting pingnstor");

    let targets = config.targets();
    let hop = config.hop_settings();
    if targets.is_empty() && hop.is_none() {
        warn!("No targets configured, nothing to probe");
    }

    let store = config.store_settings();
    let pool = StorePool::open(&store).await?;
    info!(backend = %store.backend, table = %store.schema.table, "Result store ready");

    let prober: Arc<dyn Prober> = Arc::new(IcmpProber::new());
    let resolver = Arc::new(Resolver::new(Arc::new(SystemLookup), prober.clone(), config.arbitration_timeout()));

    let schema = store.schema.clone();
    let sink_settings = store.sink;
    let mut supervisor = Supervisor::new(resolver, prober, config.probe_timeout(), move |results, cancel| async move {
        pool.run_sink(&schema, sink_settings, results, cancel).await
    })
    .with_targets(targets);
    if let Some(settings) = hop {
        info!(hop = settings.hop, destination = %settings.destination, "Tracking next hop");
        supervisor = supervisor.with_hop(settings, Arc::new(TracerouteDiscovery::new()));
    }

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let outcome = supervisor.run(cancel).await;
    match &outcome {
        Ok(()) => info!("pingnstor stopped"),
        Err(e) => error!("pingnstor stopped with an error: {:#}", e),
    }
    outcome
}
