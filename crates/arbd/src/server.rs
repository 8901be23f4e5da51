use crate::config::ArbiterConfig;
use crate::error::ArbiterError;
use crate::maintenance::{flush_log, run_maintenance};
use crate::metrics::{counters, gauges, HealthState};
use crate::monitor::{CloseReason, ConnectionMonitor, NoopReports, ReportSink};
use crate::netlog::NetworkLog;
use crate::policy::AuthorizationPort;
use crate::registry::{ConnectionRegistry, Direction};
use crate::transport::{self, Listener};
use arb_common::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Shared state for the arbiter node.
pub struct ArbiterState {
    /// Runtime configuration, including the arbiter's name.
    pub config: ArbiterConfig,
    /// Currently open connections.
    pub registry: ConnectionRegistry,
    /// Authorization decisions for incoming commands.
    pub policy: Arc<dyn AuthorizationPort>,
    /// Buffered record of network activity.
    pub netlog: NetworkLog,
    /// Receiver of authorized reports.
    pub reports: Arc<dyn ReportSink>,
    /// Readiness reported on `/ready`. Set once every device is announced.
    pub health: HealthState,
}

impl ArbiterState {
    /// Build the state with no report consumer attached.
    pub fn new(config: ArbiterConfig, policy: Arc<dyn AuthorizationPort>, netlog: NetworkLog) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            policy,
            netlog,
            reports: Arc::new(NoopReports),
            health: HealthState::new(),
        }
    }

    /// Replace the report consumer.
    #[must_use]
    pub fn with_report_sink(mut self, reports: Arc<dyn ReportSink>) -> Self {
        self.reports = reports;
        self
    }

    /// Name this arbiter identifies itself with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Resolves once shutdown is requested or the sender is dropped.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// How far startup got before the accept loop.
enum Startup {
    Complete,
    Interrupted,
}

/// Run the arbiter until the process is killed.
///
/// # Errors
///
/// Returns an error if a configured device cannot be reached at startup.
pub async fn run<L: Listener>(listener: L, state: Arc<ArbiterState>) -> Result<(), ArbiterError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the arbiter with an externally-controlled shutdown signal.
///
/// Connects to every configured device, then accepts inbound connections
/// until `true` is sent on the channel or its sender is dropped. A shutdown
/// during startup abandons the remaining devices. On shutdown the monitors
/// are given `drain_timeout` to retire their connections and the network log
/// is flushed one last time.
///
/// # Errors
///
/// Returns [`ArbiterError::Connect`] if a configured device cannot be reached
/// or does not accept the `addmeter` announcement. Connections opened before
/// the failure are retired before returning.
pub async fn run_with_shutdown<L: Listener>(
    mut listener: L,
    state: Arc<ArbiterState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), ArbiterError> {
    let mut monitors: JoinSet<CloseReason> = JoinSet::new();
    // Monitors and maintenance stop on this, not on the caller's channel, so
    // a failed startup can retire what it already opened.
    let (stop_tx, stop_rx) = watch::channel(false);

    let startup = connect_devices(&state, &stop_rx, &mut shutdown_rx, &mut monitors).await;
    match startup {
        Ok(Startup::Complete) => {}
        Ok(Startup::Interrupted) => {
            info!("shutdown signal received during startup");
            stop_tx.send_replace(true);
            drain(&state, &mut monitors).await;
            final_flush(&state).await;
            return Ok(());
        }
        Err(e) => {
            stop_tx.send_replace(true);
            drain(&state, &mut monitors).await;
            final_flush(&state).await;
            return Err(e);
        }
    }

    let maintenance = tokio::spawn(run_maintenance(
        Arc::clone(&state),
        state.config.flush_period(),
        stop_rx.clone(),
    ));

    info!(
        name = %state.name(),
        "arbiter listening on {}",
        listener.local_addr()
    );
    state.health.set_ready(true);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => {
                        let monitor = ConnectionMonitor::register(conn, Direction::Inbound, Arc::clone(&state));
                        monitors.spawn(monitor.run(stop_rx.clone()));
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
            Some(joined) = monitors.join_next() => {
                if let Err(e) = joined {
                    error!("connection task failed: {}", e);
                }
            }
            () = shutdown_requested(&mut shutdown_rx) => {
                info!("shutdown signal received, draining {} connections", state.registry.len());
                break;
            }
        }
    }

    state.health.set_ready(false);
    drop(listener);
    stop_tx.send_replace(true);
    drain(&state, &mut monitors).await;
    if let Err(e) = maintenance.await {
        error!("maintenance task failed: {}", e);
    }
    final_flush(&state).await;

    info!("arbiter shut down gracefully");
    Ok(())
}

/// Open, register and announce to every configured device.
///
/// Stops early, without error, if shutdown is requested while a device is
/// being dialled or announced to.
async fn connect_devices(
    state: &Arc<ArbiterState>,
    stop_rx: &watch::Receiver<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
    monitors: &mut JoinSet<CloseReason>,
) -> Result<Startup, ArbiterError> {
    let config = &state.config;
    for addr in &config.devices {
        let conn = tokio::select! {
            result = transport::open(addr, config.device_port, config.connect_deadline()) => result?,
            () = shutdown_requested(shutdown_rx) => return Ok(Startup::Interrupted),
        };
        let mut monitor = ConnectionMonitor::register(conn, Direction::Outbound, Arc::clone(state));

        let addmeter = Message::addmeter(state.name());
        let announced = tokio::select! {
            result = monitor.send(&addmeter) => Some(result),
            () = shutdown_requested(shutdown_rx) => None,
        };
        match announced {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                monitor.retire(CloseReason::SendFailed).await;
                return Err(ArbiterError::Connect {
                    addr: addr.clone(),
                    reason: format!("addmeter announcement failed: {e}"),
                });
            }
            None => {
                monitor.retire(CloseReason::Shutdown).await;
                return Ok(Startup::Interrupted);
            }
        }

        info!(device = %addr, peer = %monitor.info().peer, "connected to device");
        monitors.spawn(monitor.run(stop_rx.clone()));
    }
    Ok(Startup::Complete)
}

/// Wait up to `drain_timeout` for every monitor to finish, then drop
/// whatever the registry still holds.
async fn drain(state: &ArbiterState, monitors: &mut JoinSet<CloseReason>) {
    let deadline = tokio::time::Instant::now() + state.config.drain_deadline();
    while !monitors.is_empty() {
        match tokio::time::timeout_at(deadline, monitors.join_next()).await {
            Ok(Some(Err(e))) => error!("connection task failed: {}", e),
            Ok(_) => {}
            Err(_) => {
                warn!(
                    "drain timeout reached with {} connections still active",
                    monitors.len()
                );
                monitors.abort_all();
                while monitors.join_next().await.is_some() {}
                break;
            }
        }
    }

    for conn in state.registry.snapshot() {
        if state.registry.deregister(conn.id) {
            gauges::dec_connections_active();
            counters::connections_closed_total("aborted");
            state.netlog.record(format!(
                "closed connection {} with {} (aborted)",
                conn.id, conn.peer
            ));
            warn!(conn_id = %conn.id, peer = %conn.peer, "connection abandoned at shutdown");
        }
    }
}

async fn final_flush(state: &Arc<ArbiterState>) {
    if let Err(e) = flush_log(state).await {
        counters::log_flush_failures_total();
        warn!("final network log flush failed: {}", e);
    }
}
