//! Per-peer record of requests we already served or sent
//!
//! Keys are `(peer, request name)`. An entry lasts until it expires or the
//! peer disconnects.

use dashmap::DashMap;
use govnode_core::PeerId;

/// How long a fulfilled request is remembered
pub const FULFILLED_EXPIRY_SECONDS: i64 = 60 * 60 * 3;

#[derive(Debug, Default)]
pub struct FulfilledRequests {
    entries: DashMap<(PeerId, &'static str), i64>,
}

impl FulfilledRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, peer: PeerId, request: &'static str, now: i64) -> bool {
        self.entries
            .get(&(peer, request))
            .map(|expires| *expires > now)
            .unwrap_or(false)
    }

    pub fn add(&self, peer: PeerId, request: &'static str, now: i64) {
        self.entries
            .insert((peer, request), now + FULFILLED_EXPIRY_SECONDS);
    }

    /// Record `request` unless it is already fulfilled; `true` when recorded
    pub fn check_and_add(&self, peer: PeerId, request: &'static str, now: i64) -> bool {
        if self.has(peer, request, now) {
            return false;
        }
        self.add(peer, request, now);
        true
    }

    /// Forget `request` for every peer
    pub fn forget(&self, request: &'static str) {
        self.entries.retain(|(_, r), _| *r != request);
    }

    pub fn remove_peer(&self, peer: PeerId) {
        self.entries.retain(|(p, _), _| *p != peer);
    }

    pub fn prune(&self, now: i64) {
        self.entries.retain(|_, expires| *expires > now);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_and_add_once() {
        let fulfilled = FulfilledRequests::new();
        assert!(fulfilled.check_and_add(PeerId(1), "mnget", 100));
        assert!(!fulfilled.check_and_add(PeerId(1), "mnget", 101));
        assert!(fulfilled.check_and_add(PeerId(2), "mnget", 101));
        assert!(fulfilled.check_and_add(PeerId(1), "mnvs", 101));
    }

    #[test]
    fn test_expiry() {
        let fulfilled = FulfilledRequests::new();
        fulfilled.add(PeerId(1), "mnget", 0);
        assert!(fulfilled.has(PeerId(1), "mnget", FULFILLED_EXPIRY_SECONDS - 1));
        assert!(!fulfilled.has(PeerId(1), "mnget", FULFILLED_EXPIRY_SECONDS));

        fulfilled.prune(FULFILLED_EXPIRY_SECONDS);
        assert!(fulfilled.is_empty());
    }

    #[test]
    fn test_remove_peer() {
        let fulfilled = FulfilledRequests::new();
        fulfilled.add(PeerId(1), "mnget", 0);
        fulfilled.add(PeerId(1), "mnsync", 0);
        fulfilled.add(PeerId(2), "mnget", 0);
        fulfilled.remove_peer(PeerId(1));
        assert_eq!(fulfilled.len(), 1);
        assert!(fulfilled.has(PeerId(2), "mnget", 1));
    }
}
