use std::collections::HashMap;

use crate::{
    peer::Timestamp,
    wg::{Key, WgState},
};

/// Online means a handshake within this window.
pub const ONLINE_WINDOW_SECS: u64 = 180;

/// Daemon-side counters for one peer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeerUsage {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake: Option<Timestamp>,
}

impl PeerUsage {
    /// Cumulative since the daemon (re)registered the peer.
    pub fn total(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }

    pub fn is_online(&self, now: Timestamp) -> bool {
        self.last_handshake
            .is_some_and(|at| now.saturating_sub(at) < ONLINE_WINDOW_SECS)
    }
}

/// One poll of the daemon, keyed by public key.
///
/// An unavailable snapshot (daemon missing or failing) is empty; callers
/// read absence as "never connected" and never as an error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    peers: HashMap<Key, PeerUsage>,
    available: bool,
}

impl TelemetrySnapshot {
    pub fn unavailable() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            peers: HashMap::new(),
            available: true,
        }
    }

    #[cfg(test)]
    pub fn with(mut self, key: Key, usage: PeerUsage) -> Self {
        self.peers.insert(key, usage);
        self.available = true;
        self
    }

    /// Whether the daemon answered. Only then does absence mean "not registered".
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn get(&self, key: &Key) -> Option<&PeerUsage> {
        self.peers.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.peers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.peers.keys()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl From<WgState> for TelemetrySnapshot {
    fn from(state: WgState) -> Self {
        let peers = state
            .peers
            .into_iter()
            .map(|peer| {
                let (rx_bytes, tx_bytes) = peer.transfer.unwrap_or_default();
                let usage = PeerUsage {
                    rx_bytes,
                    tx_bytes,
                    last_handshake: peer.latest_handshake,
                };
                (peer.public_key, usage)
            })
            .collect();

        Self {
            peers,
            available: true,
        }
    }
}

/// Read-only view of the daemon's live counters. Free of side effects.
pub trait TelemetrySource {
    fn snapshot(&self) -> TelemetrySnapshot;
}
