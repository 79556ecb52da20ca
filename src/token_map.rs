//! The opaque, copy-on-write token map snapshot.
//!
//! Construction of the token map (parsing the keyspace → token ring →
//! replica-set mapping) is out of scope for this spec (§1): the processor
//! only ever receives a fully-built, immutable snapshot and swaps its
//! pointer wholesale. Modeled as a trait object so the processor and its
//! tests don't need to know anything about partitioners or replication
//! strategies.

use std::{fmt::Debug, sync::Arc};

use crate::address::Address;

/// An immutable snapshot of keyspace → token ring → replica set.
///
/// Replaced wholesale on [`crate::processor::RequestProcessor::notify_token_map_update`];
/// never mutated in place. A dispatched handler that cloned the `Arc` at
/// `init` time keeps that exact snapshot alive for as long as it needs it,
/// even if the worker swaps in a newer one in the meantime (spec §3/§4.5).
pub trait TokenMap: Debug + Send + Sync {
    /// Returns the replicas responsible for `token` in `keyspace`, in no
    /// particular order. Returns an empty vec if the keyspace is unknown.
    fn replicas(&self, keyspace: &str, token: i64) -> Vec<Address>;
}

/// A `TokenMap` with no replication information. Callers that don't have a
/// real snapshot yet at [`crate::processor::RequestProcessor::init`] time
/// can pass this in; it's also used throughout this crate's tests.
#[derive(Debug, Default)]
pub struct EmptyTokenMap;

impl TokenMap for EmptyTokenMap {
    fn replicas(&self, _keyspace: &str, _token: i64) -> Vec<Address> {
        Vec::new()
    }
}

/// Convenience alias for the `Arc` handle the processor stores and hands to
/// dispatched handlers.
pub type TokenMapSnapshot = Arc<dyn TokenMap>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_token_map_has_no_replicas() {
        let map: TokenMapSnapshot = Arc::new(EmptyTokenMap);
        assert!(map.replicas("ks", 42).is_empty());
    }

    #[test]
    fn snapshot_survives_pointer_replacement() {
        // Simulates a handler holding onto a clone while the worker swaps
        // the current snapshot for a new one.
        let old: TokenMapSnapshot = Arc::new(EmptyTokenMap);
        let held = old.clone();
        let _new: TokenMapSnapshot = Arc::new(EmptyTokenMap);
        assert_eq!(Arc::strong_count(&held), 2);
    }
}
