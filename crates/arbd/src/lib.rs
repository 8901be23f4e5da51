//! ARB arbiter node: access-control arbiter for a network of IoT devices.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI argument parsing and arbiter configuration.
pub mod config;
/// Error types for arbiter operations.
pub mod error;
/// Periodic network log flushing.
pub mod maintenance;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Per-connection monitor: reads one connection and answers its commands.
pub mod monitor;
/// Buffered record of network activity.
pub mod netlog;
/// Authorization port and the permission table behind it.
pub mod policy;
/// Live set of open device connections.
pub mod registry;
/// Orchestrator and shared arbiter state.
pub mod server;
/// Connection and listener traits with their WebSocket implementation.
pub mod transport;

pub use error::ArbiterError;
pub use policy::{AuthorizationPort, PermissionKey, PermissionTable};
pub use server::{run, run_with_shutdown, ArbiterState};
