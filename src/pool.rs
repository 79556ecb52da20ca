//! Capability interfaces for the connection-pool subsystem this crate
//! dispatches onto.
//!
//! Establishing, pooling, and writing on actual TCP connections is out of
//! scope for this crate (spec §1's Non-goals); the pool manager and its
//! connections are modeled here purely as the seam the processor calls
//! through, grounded on the shapes `ConnectionPoolManager` and
//! `Connection` take in the original.

use std::fmt::Debug;

use crate::{address::Address, error::Result};

/// A single pooled connection to one host, handed to a [`crate::handler::RequestHandler`]
/// once the processor has picked a host to dispatch to.
pub trait PooledConnection: Debug + Send + Sync {
    /// The host this connection is pooled against.
    fn address(&self) -> Address;

    /// Returns `true` if the connection is still usable for new writes.
    fn is_available(&self) -> bool;
}

/// The processor's view of the pool subsystem: find a connection, flush
/// buffered writes, and react to topology/keyspace changes.
///
/// A full implementation owns the actual TCP connections, write
/// coalescing, and backpressure; none of that is this crate's concern. The
/// pool manager in turn calls back into [`crate::processor::RequestProcessor::on_pool_up`]
/// / `on_pool_down` / `on_pool_critical_error` / `on_keyspace_update` as its
/// own connections come up, go down, or finish a `USE` side-effect — this
/// crate only specifies the shape of that callback edge, not how the pool
/// manager decides to fire it.
pub trait ConnectionPoolManager: Debug + Send + Sync {
    /// Returns the least-busy ready connection to `address`, or an error if
    /// none is currently available (the request should be retried against
    /// the next host in its query plan).
    fn find_least_busy(&self, address: Address) -> Result<Box<dyn PooledConnection>>;

    /// Begins establishing a pool for a newly added host.
    fn add_host(&self, address: Address);

    /// Forwards a keyspace change to every pool; the manager calls back
    /// into [`crate::processor::RequestProcessor::on_keyspace_update`] once
    /// the change has actually taken effect on at least one connection.
    fn set_keyspace(&self, keyspace: &str);

    /// Flushes any connections written to since the last call.
    ///
    /// Mirrors `manager_->flush()` at the end of `internal_flush_requests()`:
    /// called exactly once per flush cycle, after every dispatched request
    /// in that cycle has called `execute`, so that a batch of requests
    /// issued to the same connection share one write syscall instead of
    /// one each.
    fn flush(&self);

    /// Instructs the pool manager to begin closing every connection it
    /// holds. Called once, when the processor itself is closing.
    fn close(&self);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// A `ConnectionPoolManager` that always succeeds and counts calls, for
    /// use in processor-level tests.
    #[derive(Debug, Default)]
    pub struct CountingPoolManager {
        pub flush_count: Arc<AtomicUsize>,
        pub close_count: Arc<AtomicUsize>,
        pub keyspaces: Arc<Mutex<Vec<String>>>,
    }

    impl ConnectionPoolManager for CountingPoolManager {
        fn find_least_busy(&self, address: Address) -> Result<Box<dyn PooledConnection>> {
            Ok(Box::new(StubConnection { address }))
        }

        fn add_host(&self, _address: Address) {}

        fn set_keyspace(&self, keyspace: &str) {
            self.keyspaces.lock().unwrap().push(keyspace.to_string());
        }

        fn flush(&self) {
            self.flush_count.fetch_add(1, Ordering::Relaxed);
        }

        fn close(&self) {
            self.close_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[derive(Debug)]
    pub struct StubConnection {
        pub address: Address,
    }

    impl PooledConnection for StubConnection {
        fn address(&self) -> Address {
            self.address
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    /// A `ConnectionPoolManager` whose `find_least_busy` always reports the
    /// write as refused, to exercise the handler's `set_error` path.
    #[derive(Debug, Default)]
    pub struct RefusingPoolManager;

    impl ConnectionPoolManager for RefusingPoolManager {
        fn find_least_busy(&self, address: Address) -> Result<Box<dyn PooledConnection>> {
            Err(crate::error::ErrorKind::PoolWriteRefused { address }.into())
        }

        fn add_host(&self, _address: Address) {}

        fn set_keyspace(&self, _keyspace: &str) {}

        fn flush(&self) {}

        fn close(&self) {}
    }
}
