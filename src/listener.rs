//! Outbound notifications forwarded to an external observer (spec §4.7/§6).
//!
//! Grounded on the original `RequestProcessorListener` interface and its
//! `NopRequestProcessorListener` default, which exists so the processor
//! always has a non-null listener to call into rather than branching on an
//! optional one at every callsite. Note this is narrower than the
//! topology-lifecycle fan-out the load-balancing policies receive: the
//! listener only hears about keyspace changes, prepared-metadata changes,
//! and pool-level up/down/critical-error transitions, not raw host
//! add/remove or token-map-replacement events.

use std::{fmt::Debug, sync::Arc};

use once_cell::sync::Lazy;

use crate::address::Address;

/// One entry in the driver-wide prepared-statement metadata cache, as
/// forwarded by [`RequestProcessorListener::on_prepared_metadata_update`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreparedMetadataEntry {
    /// The original query string that was prepared.
    pub query: String,
    /// The keyspace the query was prepared against, if any.
    pub keyspace: Option<String>,
    /// The opaque result-metadata id the server returned.
    pub result_metadata_id: Vec<u8>,
    /// The raw prepared response, opaque at this layer (wire decoding is
    /// out of scope).
    pub response: Vec<u8>,
}

/// Receives the processor's outbound notifications, called exclusively
/// from the worker task.
///
/// Every method has a default no-op body so implementors only need to
/// override the callbacks they actually care about.
pub trait RequestProcessorListener: Debug + Send + Sync {
    /// The pool reported that a `USE` side-effect took hold.
    fn on_keyspace_update(&self, _keyspace: &str) {}

    /// A result's metadata id changed; the cache entry at `prepared_id`
    /// should be refreshed.
    fn on_prepared_metadata_update(&self, _prepared_id: &[u8], _entry: PreparedMetadataEntry) {}

    /// A host's pool reported up.
    fn on_pool_up(&self, _address: Address) {}

    /// A host's pool reported down.
    fn on_pool_down(&self, _address: Address) {}

    /// A host's pool hit a critical connection error.
    fn on_pool_critical_error(&self, _address: Address, _code: i32, _message: &str) {}
}

/// A listener that does nothing, used whenever a processor is constructed
/// without an explicit listener.
#[derive(Debug, Default)]
pub struct NopRequestProcessorListener;

impl RequestProcessorListener for NopRequestProcessorListener {}

/// A process-wide, shared instance of [`NopRequestProcessorListener`], so
/// that constructing a processor without a listener doesn't allocate a new
/// `Arc` every time.
pub static NOP_LISTENER: Lazy<Arc<dyn RequestProcessorListener>> =
    Lazy::new(|| Arc::new(NopRequestProcessorListener));

#[cfg(test)]
mod test {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Mutex;

    fn addr() -> Address {
        Address::new(IpAddr::from([127, 0, 0, 1]), 9042)
    }

    #[test]
    fn nop_listener_accepts_every_callback() {
        let listener = NopRequestProcessorListener;
        listener.on_keyspace_update("ks");
        listener.on_prepared_metadata_update(b"id", PreparedMetadataEntry::default());
        listener.on_pool_up(addr());
        listener.on_pool_down(addr());
        listener.on_pool_critical_error(addr(), 42, "boom");
    }

    #[derive(Debug, Default)]
    struct RecordingListener {
        events: Mutex<Vec<&'static str>>,
    }

    impl RequestProcessorListener for RecordingListener {
        fn on_pool_up(&self, _address: Address) {
            self.events.lock().unwrap().push("up");
        }
        fn on_keyspace_update(&self, _keyspace: &str) {
            self.events.lock().unwrap().push("keyspace");
        }
    }

    #[test]
    fn unimplemented_callbacks_fall_back_to_default() {
        let listener = RecordingListener::default();
        listener.on_pool_up(addr());
        listener.on_pool_down(addr()); // not overridden, should not panic or record
        assert_eq!(*listener.events.lock().unwrap(), vec!["up"]);
    }

    #[test]
    fn nop_listener_static_is_shared() {
        let a = NOP_LISTENER.clone();
        let b = NOP_LISTENER.clone();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
