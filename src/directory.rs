//! Presence directory: who is logged in and where their push listener lives.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use tracing::info;

use crate::error::DirectoryError;

/// Address at which a participant accepts pushed envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse the `[host, port]` payload carried by a login request.
    pub fn from_login_recipients(recipients: &[String]) -> Result<Self, DirectoryError> {
        match recipients {
            [host, port] => {
                if host.trim().is_empty() {
                    return Err(DirectoryError::EmptyHost);
                }
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| DirectoryError::InvalidPort(port.clone()))?;
                Ok(Self::new(host.trim(), port))
            }
            other => Err(DirectoryError::MalformedLoginPayload(other.len())),
        }
    }

    pub fn to_login_recipients(&self) -> Vec<String> {
        vec![self.host.clone(), self.port.to_string()]
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registry of logged-in participants.
///
/// Every operation is atomic on its own. Sequences that must not interleave
/// with logins and logouts are serialized by the dispatcher, not here.
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    entries: RwLock<HashMap<String, PeerAddress>>,
}

impl PresenceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` at `address` and return the address it replaced.
    ///
    /// Any other participant registered at the same address is dropped first:
    /// a reused port means its session is gone.
    pub fn register(&self, name: &str, address: PeerAddress) -> Option<PeerAddress> {
        let mut entries = self.entries.write();
        entries.retain(|other, other_address| {
            let stale = other != name && *other_address == address;
            if stale {
                info!("Discarded client {other} at {other_address}");
            }
            !stale
        });
        entries.insert(name.to_string(), address)
    }

    pub fn unregister(&self, name: &str) -> Option<PeerAddress> {
        self.entries.write().remove(name)
    }

    /// Remove `name` only if it is still registered at `address`.
    pub fn evict(&self, name: &str, address: &PeerAddress) -> bool {
        let mut entries = self.entries.write();
        if entries.get(name) == Some(address) {
            entries.remove(name);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, name: &str) -> Option<PeerAddress> {
        self.entries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn snapshot_names(&self) -> BTreeSet<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot_names().into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
