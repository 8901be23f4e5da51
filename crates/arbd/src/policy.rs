use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

/// Answers whether `sender` may invoke `command` against `recipient`.
///
/// Implementations must be total: unknown identifiers are simply not
/// authorized, and a query never fails.
pub trait AuthorizationPort: Send + Sync {
    /// Returns `true` if the triple is allowed.
    fn is_authorized(&self, sender: &str, recipient: &str, command: &str) -> bool;
}

/// One allowed (sender, recipient, command) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionKey {
    /// Device sending the command.
    pub sender: String,
    /// Device receiving the command.
    pub recipient: String,
    /// Command name.
    pub command: String,
}

impl PermissionKey {
    /// Builds a key from borrowed parts.
    #[must_use]
    pub fn new(sender: &str, recipient: &str, command: &str) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            command: command.to_string(),
        }
    }
}

/// On-disk policy seed format.
#[derive(Debug, Default, Deserialize, Serialize)]
struct PolicyFile {
    #[serde(default)]
    allow: Vec<PermissionKey>,
}

/// Default-deny set of allowed interactions.
///
/// Uses `std::sync::RwLock` so the hot-path `is_authorized()` check is a
/// shared read lock with no async overhead.
#[derive(Debug, Default)]
pub struct PermissionTable {
    allowed: RwLock<HashSet<PermissionKey>>,
}

impl PermissionTable {
    /// Creates an empty table; every query is denied.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-populated with the given entries.
    #[must_use]
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = PermissionKey>,
    {
        Self {
            allowed: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Seeds a table from a TOML policy file of `[[allow]]` entries.
    ///
    /// The file is only read; changes made at runtime are never written back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read policy file {}: {e}", path.display()))?;
        let file: PolicyFile = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid policy file {}: {e}", path.display()))?;
        Ok(Self::from_entries(file.allow))
    }

    /// Allows `sender` to use `command` on `recipient`.
    ///
    /// Returns `true` if the entry was newly added.
    pub fn allow(&self, sender: &str, recipient: &str, command: &str) -> bool {
        let key = PermissionKey::new(sender, recipient, command);
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key)
    }

    /// Revokes `sender`'s use of `command` on `recipient`.
    ///
    /// Returns `true` if the entry was present.
    pub fn disallow(&self, sender: &str, recipient: &str, command: &str) -> bool {
        let key = PermissionKey::new(sender, recipient, command);
        self.allowed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    /// Number of allowed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of every allowed entry.
    #[must_use]
    pub fn entries(&self) -> Vec<PermissionKey> {
        let mut entries: Vec<_> = self
            .allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        entries.sort();
        entries
    }
}

impl AuthorizationPort for PermissionTable {
    fn is_authorized(&self, sender: &str, recipient: &str, command: &str) -> bool {
        let key = PermissionKey::new(sender, recipient, command);
        self.allowed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&key)
    }
}
