#![forbid(unsafe_code)]

use anyhow::Result;
use arbd::config::{ArbiterConfig, Args};
use arbd::metrics::start_metrics_server;
use arbd::netlog::NetworkLog;
use arbd::policy::PermissionTable;
use arbd::run_with_shutdown;
use arbd::server::ArbiterState;
use arbd::transport::{Listener, WsListener};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config: ArbiterConfig = args.clone().into();
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let table = match &args.policy {
        Some(path) => PermissionTable::load(path)?,
        None => PermissionTable::new(),
    };
    let table = Arc::new(table);

    let timestamps = !args.no_timestamps;
    let netlog = match &args.log_file {
        Some(path) => NetworkLog::open(path, timestamps)
            .map_err(|e| anyhow::anyhow!("failed to open network log {}: {e}", path.display()))?,
        None => NetworkLog::stdout(timestamps),
    };

    let listener = WsListener::bind(config.listen, config.handshake_deadline()).await?;
    info!(
        name = %config.name,
        listen = %listener.local_addr(),
        devices = config.devices.len(),
        policy_entries = table.len(),
        "arbiter starting"
    );

    let metrics_addr = config.metrics_addr;
    let state = Arc::new(ArbiterState::new(config, table, netlog));
    tokio::spawn({
        let health_state = state.health.clone();
        async move {
            if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                warn!("metrics server error: {}", e);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut arbiter = tokio::spawn(run_with_shutdown(listener, state, shutdown_rx));

    tokio::select! {
        result = &mut arbiter => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            shutdown_tx.send_replace(true);
            arbiter.await??;
        }
    }

    Ok(())
}
