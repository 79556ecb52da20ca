//! Mutable topology state: hosts, their lifecycle state, and the map that
//! owns them.
//!
//! Everything in this module is mutated only from the processor's worker
//! task (spec §3 invariants); the types themselves carry no internal
//! synchronization. Cross-task sharing happens only via `Arc<Host>` clones
//! handed to dispatched handlers and load-balancing policies.

use std::{collections::HashMap, sync::Arc};

use crate::address::Address;

/// The lifecycle state of a host as tracked by the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostState {
    /// The host was just added to the topology and has not yet reported up.
    Added,
    /// The host's pool reported at least one healthy connection.
    Up,
    /// The host's pool reported down, or a critical connection error.
    Down,
    /// The host has been removed from the topology by the topology
    /// subsystem; only `on_remove` fan-out still references it.
    Removed,
}

/// A load-balancing policy's classification of how a host should be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostDistance {
    /// Prefer this host; it is "close" by whatever metric the policy uses
    /// (same datacenter, lowest latency, etc).
    Local,
    /// Usable, but only as a fallback after `Local` hosts are exhausted.
    Remote,
    /// Never route to this host and never deliver lifecycle events for it.
    Ignore,
}

/// One node in the cluster, reference-shared between the processor and the
/// load-balancing policies that classify it.
#[derive(Debug)]
pub struct Host {
    address: Address,
    state: HostState,
}

impl Host {
    /// Constructs a new `Host` in the given state.
    pub fn new(address: Address, state: HostState) -> Self {
        Self { address, state }
    }

    /// The host's network address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The host's current lifecycle state.
    pub fn state(&self) -> HostState {
        self.state
    }

    /// Returns a copy of this host with a new lifecycle state.
    ///
    /// `Host` itself has no interior mutability: the worker builds a fresh
    /// `Arc<Host>` on every state transition and replaces the `HostMap`
    /// entry, rather than mutating a shared instance in place. This keeps
    /// any `Arc<Host>` a request handler is holding onto a stable snapshot
    /// of the host as it was at dispatch time.
    pub fn with_state(&self, state: HostState) -> Self {
        Self {
            address: self.address,
            state,
        }
    }
}

/// The worker-owned map from address to host.
///
/// Invariant (spec §3): every address the pool manager knows about is
/// present here or in the process of being added.
#[derive(Debug, Default)]
pub struct HostMap {
    hosts: HashMap<Address, Arc<Host>>,
}

impl HostMap {
    /// Constructs an empty `HostMap`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a `HostMap` from an initial snapshot of hosts, as supplied
    /// to [`crate::processor::RequestProcessor::init`].
    pub fn from_hosts(hosts: impl IntoIterator<Item = Arc<Host>>) -> Self {
        let mut map = Self::new();
        for host in hosts {
            map.insert(host);
        }
        map
    }

    /// Inserts or replaces the entry for `host.address()`.
    pub fn insert(&mut self, host: Arc<Host>) {
        self.hosts.insert(host.address(), host);
    }

    /// Removes the entry for `address`, if present.
    pub fn remove(&mut self, address: Address) -> Option<Arc<Host>> {
        self.hosts.remove(&address)
    }

    /// Looks up the host at `address`.
    pub fn get(&self, address: Address) -> Option<Arc<Host>> {
        self.hosts.get(&address).cloned()
    }

    /// Iterates over every known host.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values()
    }

    /// The number of hosts currently tracked.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns `true` if no hosts are tracked.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(last_octet: u8) -> Address {
        Address::new(std::net::IpAddr::from([127, 0, 0, last_octet]), 9042)
    }

    #[test]
    fn insert_and_get_round_trips() {
        let mut map = HostMap::new();
        let host = Arc::new(Host::new(addr(1), HostState::Up));
        map.insert(host.clone());

        let found = map.get(addr(1)).unwrap();
        assert_eq!(found.address(), addr(1));
        assert_eq!(found.state(), HostState::Up);
    }

    #[test]
    fn remove_clears_entry() {
        let mut map = HostMap::new();
        map.insert(Arc::new(Host::new(addr(1), HostState::Up)));
        assert!(map.remove(addr(1)).is_some());
        assert!(map.get(addr(1)).is_none());
    }

    #[test]
    fn with_state_does_not_mutate_original() {
        let host = Host::new(addr(1), HostState::Added);
        let up = host.with_state(HostState::Up);
        assert_eq!(host.state(), HostState::Added);
        assert_eq!(up.state(), HostState::Up);
    }
}
