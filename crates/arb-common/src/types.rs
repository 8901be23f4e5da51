//! Protocol constants shared by arbiters and devices.

/// Port an arbiter listens on for inbound device connections.
pub const DEFAULT_LISTEN_PORT: u16 = 5008;

/// Port devices listen on; arbiters dial it when connecting out at startup.
pub const DEFAULT_DEVICE_PORT: u16 = 5007;

/// Message kinds carried in field 1 of every message.
pub mod kind {
    /// Handshake: the sender announces itself to the peer.
    pub const ADDMETER: &str = "addmeter";
    /// Liveness check.
    pub const PING: &str = "ping";
    /// Liveness reply.
    pub const PONG: &str = "pong";
    /// Telemetry payload from a device.
    pub const REPORT: &str = "report";
}
