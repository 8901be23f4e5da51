use arb_common::message::MAX_FIELD_LEN;
use arb_common::types::{DEFAULT_DEVICE_PORT, DEFAULT_LISTEN_PORT};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments for the arbiter daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "arbd")]
#[command(about = "IoT access-control arbiter")]
#[command(version)]
pub struct Args {
    /// Name this arbiter identifies itself with in outgoing messages.
    pub name: String,
    /// Device addresses to connect to at startup (`host` or `host:port`).
    pub devices: Vec<String>,
    /// Socket address to accept device connections on.
    #[arg(
        long,
        default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
        env = "ARBD_LISTEN"
    )]
    pub listen: SocketAddr,
    /// Port used for device addresses given without one.
    #[arg(long, default_value_t = DEFAULT_DEVICE_PORT, env = "ARBD_DEVICE_PORT")]
    pub device_port: u16,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "ARBD_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Seconds between network log flushes.
    #[arg(long, default_value = "30", env = "ARBD_FLUSH_INTERVAL")]
    pub flush_interval: u64,
    /// Outbound connect timeout in seconds.
    #[arg(long, default_value = "5")]
    pub connect_timeout: u64,
    /// Inbound WebSocket handshake timeout in seconds.
    #[arg(long, default_value = "5")]
    pub handshake_timeout: u64,
    /// Seconds to wait for connections to close on shutdown.
    #[arg(long, default_value = "30")]
    pub drain_timeout: u64,
    /// TOML file of `[[allow]]` entries to seed the permission table.
    #[arg(long, env = "ARBD_POLICY")]
    pub policy: Option<PathBuf>,
    /// Append the network log to this file instead of stdout.
    #[arg(long, env = "ARBD_LOG_FILE")]
    pub log_file: Option<PathBuf>,
    /// Write network log lines without timestamps.
    #[arg(long)]
    pub no_timestamps: bool,
    /// Increase diagnostic verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Name this arbiter identifies itself with.
    pub name: String,
    /// Device addresses to connect to at startup.
    pub devices: Vec<String>,
    /// Socket address to accept device connections on.
    pub listen: SocketAddr,
    /// Port used for device addresses given without one.
    pub device_port: u16,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Seconds between network log flushes.
    pub flush_interval: u64,
    /// Outbound connect timeout in seconds.
    pub connect_timeout: u64,
    /// Inbound WebSocket handshake timeout in seconds.
    pub handshake_timeout: u64,
    /// Seconds to wait for connections to close on shutdown.
    pub drain_timeout: u64,
}

impl ArbiterConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err("name must not contain whitespace".to_string());
        }
        if self.name.len() > MAX_FIELD_LEN {
            return Err(format!("name exceeds {MAX_FIELD_LEN} bytes"));
        }

        if let Some(pos) = self.devices.iter().position(|d| d.trim().is_empty()) {
            return Err(format!("device address #{pos} is empty"));
        }

        if self.device_port == 0 {
            return Err("device_port must be greater than 0".to_string());
        }

        if self.flush_interval == 0 {
            return Err("flush_interval must be greater than 0".to_string());
        }
        if self.flush_interval > 86_400 {
            return Err(
                "flush_interval exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }

        if self.connect_timeout == 0 {
            return Err("connect_timeout must be greater than 0".to_string());
        }
        if self.connect_timeout > 300 {
            return Err("connect_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.handshake_timeout == 0 {
            return Err("handshake_timeout must be greater than 0".to_string());
        }
        if self.handshake_timeout > 300 {
            return Err("handshake_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.drain_timeout == 0 {
            return Err("drain_timeout must be greater than 0".to_string());
        }
        if self.drain_timeout > 3600 {
            return Err("drain_timeout exceeds reasonable limit (3600 seconds)".to_string());
        }
        Ok(())
    }

    /// Flush interval as a [`Duration`].
    #[must_use]
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_deadline(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub fn handshake_deadline(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// Drain timeout as a [`Duration`].
    #[must_use]
    pub fn drain_deadline(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }
}

impl From<Args> for ArbiterConfig {
    fn from(args: Args) -> Self {
        Self {
            name: args.name,
            devices: args.devices,
            listen: args.listen,
            device_port: args.device_port,
            metrics_addr: args.metrics_addr,
            flush_interval: args.flush_interval,
            connect_timeout: args.connect_timeout,
            handshake_timeout: args.handshake_timeout,
            drain_timeout: args.drain_timeout,
        }
    }
}
