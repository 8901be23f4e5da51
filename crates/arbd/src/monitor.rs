use crate::error::ArbiterError;
use crate::metrics::{counters, gauges};
use crate::registry::{ConnInfo, Direction};
use crate::server::{shutdown_requested, ArbiterState};
use crate::transport::Connection;
use arb_common::types::kind;
use arb_common::Message;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Consumer of authorized `report` payloads.
pub trait ReportSink: Send + Sync {
    /// Called once per authorized report, in arrival order per connection.
    fn on_report(&self, sender: &str, payload: &[String]);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReports;

impl ReportSink for NoopReports {
    fn on_report(&self, _sender: &str, _payload: &[String]) {}
}

/// Lifecycle of a monitored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Reading and reacting to messages.
    Active,
    /// Deregistered and closed. Terminal.
    Closed,
}

/// Why a connection was retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream.
    EndOfStream,
    /// Reading failed or the peer sent something undecodable.
    ReceiveFailed,
    /// Writing a reply failed.
    SendFailed,
    /// The arbiter is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndOfStream => "end_of_stream",
            Self::ReceiveFailed => "receive_failed",
            Self::SendFailed => "send_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

fn kind_label(kind: Option<&str>) -> &'static str {
    match kind {
        Some(kind::ADDMETER) => kind::ADDMETER,
        Some(kind::PING) => kind::PING,
        Some(kind::PONG) => kind::PONG,
        Some(kind::REPORT) => kind::REPORT,
        Some(_) => "unknown",
        None => "malformed",
    }
}

/// Owns one connection for its whole registered lifetime.
pub struct ConnectionMonitor<C> {
    info: ConnInfo,
    conn: C,
    state: MonitorState,
    ctx: Arc<ArbiterState>,
}

impl<C: Connection> ConnectionMonitor<C> {
    /// Register `conn` and take ownership of it.
    pub fn register(conn: C, direction: Direction, ctx: Arc<ArbiterState>) -> Self {
        let info = ctx.registry.register(conn.peer(), direction);
        gauges::inc_connections_active();
        counters::connections_total(direction.as_str());
        ctx.netlog.record(format!(
            "opened {} connection {} with {}",
            direction.as_str(),
            info.id,
            info.peer
        ));
        debug!(conn_id = %info.id, peer = %info.peer, direction = direction.as_str(), "connection registered");
        Self {
            info,
            conn,
            state: MonitorState::Active,
            ctx,
        }
    }

    /// Registry descriptor of the monitored connection.
    #[must_use]
    pub fn info(&self) -> &ConnInfo {
        &self.info
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Send a message on the monitored connection.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::ConnectionClosed`] once retired, or the
    /// transport's error.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ArbiterError> {
        if self.state == MonitorState::Closed {
            return Err(ArbiterError::ConnectionClosed);
        }
        self.conn.send(msg).await?;
        self.ctx.netlog.record(format!("sent {msg} to {}", self.info.peer));
        Ok(())
    }

    /// Read and handle messages until the connection ends or shutdown is
    /// signalled, then retire. Shutdown also interrupts a pending reply.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> CloseReason {
        let reason = loop {
            let received = tokio::select! {
                result = self.conn.receive() => result,
                () = shutdown_requested(&mut shutdown_rx) => break CloseReason::Shutdown,
            };

            match received {
                Ok(Some(msg)) => {
                    let handled = tokio::select! {
                        result = self.handle(msg) => result,
                        () = shutdown_requested(&mut shutdown_rx) => break CloseReason::Shutdown,
                    };
                    if let Err(e) = handled {
                        debug!(conn_id = %self.info.id, "send failed: {}", e);
                        break CloseReason::SendFailed;
                    }
                }
                Ok(None) => break CloseReason::EndOfStream,
                Err(e) => {
                    debug!(conn_id = %self.info.id, "receive failed: {}", e);
                    break CloseReason::ReceiveFailed;
                }
            }
        };

        self.retire(reason).await;
        reason
    }

    /// React to one received message.
    ///
    /// Only a failed reply is an error; unknown or short messages are ignored.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if a reply cannot be sent.
    pub async fn handle(&mut self, msg: Message) -> Result<(), ArbiterError> {
        counters::messages_received_total(kind_label(msg.kind()));
        self.ctx
            .netlog
            .record(format!("received {msg} from {}", self.info.peer));

        let (Some(sender), Some(command)) = (msg.sender(), msg.kind()) else {
            debug!(conn_id = %self.info.id, fields = msg.len(), "ignoring message without sender and kind");
            return Ok(());
        };

        match command {
            kind::PING => {
                trace!(conn_id = %self.info.id, sender, "ping");
                let pong = Message::pong(self.ctx.name());
                self.send(&pong).await?;
            }
            kind::REPORT => {
                if self.authorize(sender, kind::REPORT) {
                    self.ctx.reports.on_report(sender, msg.payload());
                }
            }
            kind::ADDMETER => {
                if self.authorize(sender, kind::ADDMETER) {
                    debug!(conn_id = %self.info.id, sender, "device announced itself");
                }
            }
            kind::PONG => {
                trace!(conn_id = %self.info.id, sender, "pong");
            }
            other => {
                debug!(conn_id = %self.info.id, sender, kind = other, "ignoring unknown message kind");
            }
        }
        Ok(())
    }

    fn authorize(&self, sender: &str, command: &'static str) -> bool {
        let allowed = self
            .ctx
            .policy
            .is_authorized(sender, self.ctx.name(), command);
        let decision = if allowed { "allowed" } else { "denied" };

        counters::authorizations_total(command, decision);
        self.ctx
            .netlog
            .record(format!("{command} from {sender} {decision}"));
        if !allowed {
            warn!(conn_id = %self.info.id, sender, command, "unauthorized command dropped");
        }
        allowed
    }

    /// Deregister and close the connection.
    ///
    /// The registry entry is removed before the transport is closed, so a
    /// close that never completes still leaves the registry accurate.
    /// Returns `false` if it was already retired, in which case nothing happens.
    pub async fn retire(&mut self, reason: CloseReason) -> bool {
        if self.state == MonitorState::Closed {
            return false;
        }
        self.state = MonitorState::Closed;

        self.ctx.registry.deregister(self.info.id);
        gauges::dec_connections_active();
        counters::connections_closed_total(reason.as_str());
        self.ctx.netlog.record(format!(
            "closed connection {} with {} ({})",
            self.info.id,
            self.info.peer,
            reason.as_str()
        ));
        debug!(conn_id = %self.info.id, peer = %self.info.peer, reason = reason.as_str(), "connection retired");

        self.conn.close().await;
        true
    }
}
