use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-unique identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dialed by the arbiter at startup.
    Outbound,
    /// Accepted by the arbiter's listener.
    Inbound,
}

impl Direction {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

/// Descriptor held in the registry for each live connection.
#[derive(Clone, Debug)]
pub struct ConnInfo {
    /// Registry key.
    pub id: ConnId,
    /// Remote address as a display string.
    pub peer: String,
    /// Which side opened the connection.
    pub direction: Direction,
    /// When the connection was registered.
    pub opened_at: Instant,
}

/// Concurrent set of currently open connections.
///
/// The connection itself is owned by its monitor; the registry only tracks
/// which connections are live.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: DashMap<ConnId, ConnInfo>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id and register a connection under it.
    pub fn register(&self, peer: &str, direction: Direction) -> ConnInfo {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ConnInfo {
            id,
            peer: peer.to_string(),
            direction,
            opened_at: Instant::now(),
        };
        self.conns.insert(id, info.clone());
        info
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn deregister(&self, id: ConnId) -> bool {
        self.conns.remove(&id).is_some()
    }

    /// Returns `true` if the connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Point-in-time copy of every registered connection, ordered by id.
    ///
    /// Concurrent registrations and removals may make it stale immediately.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnInfo> {
        let mut all: Vec<ConnInfo> = self.conns.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|info| info.id);
        all
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Returns `true` if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = ConnectionRegistry::new();
        let a = registry.register("10.0.0.1:5007", Direction::Outbound);
        let b = registry.register("10.0.0.2:40000", Direction::Inbound);

        assert_ne!(a.id, b.id);
        assert!(registry.contains(a.id));
        assert!(registry.contains(b.id));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_deregister_removes_entry() {
        let registry = ConnectionRegistry::new();
        let info = registry.register("10.0.0.1:5007", Direction::Outbound);

        assert!(registry.deregister(info.id));
        assert!(!registry.contains(info.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        let info = registry.register("10.0.0.1:5007", Direction::Outbound);
        registry.deregister(info.id);

        assert!(!registry.deregister(info.id));
        assert!(!registry.deregister(ConnId(999)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered_by_id() {
        let registry = ConnectionRegistry::new();
        for i in 0..5 {
            registry.register(&format!("10.0.0.{i}:5007"), Direction::Inbound);
        }

        let ids: Vec<u64> = registry.snapshot().iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_snapshot_does_not_track_later_changes() {
        let registry = ConnectionRegistry::new();
        let info = registry.register("10.0.0.1:5007", Direction::Outbound);
        let snapshot = registry.snapshot();

        registry.deregister(info.id);
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_register_and_deregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let info = registry.register(&format!("peer{t}-{i}"), Direction::Inbound);
                        if i % 4 != 0 {
                            assert!(registry.deregister(info.id));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 25);
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Outbound.as_str(), "outbound");
        assert_eq!(Direction::Inbound.as_str(), "inbound");
    }
}
