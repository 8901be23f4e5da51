use crate::metrics::counters;
use crate::server::{shutdown_requested, ArbiterState};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

/// Flush the network log every `period` until shutdown.
///
/// The first flush happens immediately.
pub async fn run_maintenance(
    state: Arc<ArbiterState>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => tick(&state).await,
            () = shutdown_requested(&mut shutdown_rx) => break,
        }
    }
    trace!("maintenance stopped");
}

/// Write out the network log on the blocking pool.
pub(crate) async fn flush_log(state: &Arc<ArbiterState>) -> io::Result<usize> {
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || state.netlog.flush())
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)))
}

/// One maintenance pass. Never fails; flush errors are counted and logged.
pub async fn tick(state: &Arc<ArbiterState>) {
    match flush_log(state).await {
        Ok(0) => {}
        Ok(lines) => trace!(lines, "network log flushed"),
        Err(e) => {
            counters::log_flush_failures_total();
            warn!(pending = state.netlog.pending(), "network log flush failed: {}", e);
        }
    }

    let conns = state.registry.snapshot();
    debug!(active = conns.len(), "active connections");
    for conn in &conns {
        debug!(
            conn_id = %conn.id,
            peer = %conn.peer,
            direction = conn.direction.as_str(),
            age_secs = conn.opened_at.elapsed().as_secs(),
            "connection"
        );
    }
}
