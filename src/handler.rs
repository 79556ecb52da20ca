//! Per-request dispatch targets, and the two fan-out handlers the
//! processor itself constructs: prepare-on-all-hosts and
//! wait-for-schema-agreement.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    error::Error, policy::LoadBalancingPolicy, pool::ConnectionPoolManager, processor::RequestProcessor,
    settings::TimestampGenerator, token_map::TokenMapSnapshot,
};

/// Processor-owned context handed to a handler right before
/// [`RequestHandler::execute`], per spec §4.4's `handler.init(profile,
/// pool_manager, token_map_snapshot, timestamp_generator,
/// processor_callbacks)`.
///
/// The handler is responsible for asking `policy` for a query plan and
/// iterating it itself, obtaining a connection from `pool_manager` for each
/// candidate host in turn; the processor only supplies the context, not the
/// dispatch loop.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    /// The routing policy for the request's execution profile.
    pub policy: Arc<dyn LoadBalancingPolicy>,
    /// The pool manager to obtain connections from.
    pub pool_manager: Arc<dyn ConnectionPoolManager>,
    /// The token map snapshot in effect at dispatch time.
    pub token_map: TokenMapSnapshot,
    /// The client-side timestamp source.
    pub timestamp_generator: Arc<dyn TimestampGenerator>,
    /// How long a schema-agreement wait started by this handler may run
    /// before giving up.
    pub max_schema_wait_time: Duration,
    /// Whether a `PREPARE` response should trigger re-preparing on every
    /// other known host.
    pub prepare_on_all_hosts: bool,
    /// A handle back to the processor, for `wait_for_schema_agreement` and
    /// `prepare_on_all_hosts` follow-ons (spec §4.6).
    pub processor: RequestProcessor,
}

/// One unit of work submitted to the processor.
///
/// Dispatched exactly once: either [`RequestHandler::execute`] or
/// [`RequestHandler::set_error`] is called, never both, and never more than
/// once (spec §4.4).
pub trait RequestHandler: Debug + Send + Sync {
    /// The execution profile this request was submitted under, or `None` to
    /// use the processor's default profile.
    fn profile_name(&self) -> Option<&str> {
        None
    }

    /// Hands the handler the context it needs to dispatch itself. Called
    /// once, immediately before `execute`.
    fn init(&self, context: DispatchContext);

    /// Asks its policy for a query plan and iterates it, writing to the
    /// first host whose pool yields a connection. Calls `set_error` if the
    /// plan is empty or every host refuses the write.
    fn execute(&self);

    /// Called instead of `execute` when the request could not be
    /// dispatched: the named profile doesn't exist, the query plan was
    /// empty, or every host in the plan refused the write.
    fn set_error(&self, error: Error);
}

/// A handler wrapped with the execution profile it was submitted under, as
/// buffered by [`crate::queue::RequestQueue`].
#[derive(Debug)]
pub struct DispatchedRequest {
    /// The handler to dispatch.
    pub handler: Arc<dyn RequestHandler>,
}

impl DispatchedRequest {
    /// Wraps `handler` for submission to a [`crate::queue::RequestQueueHandle`].
    pub fn new(handler: Arc<dyn RequestHandler>) -> Self {
        Self { handler }
    }

    #[cfg(test)]
    pub(crate) fn test_noop() -> Self {
        #[derive(Debug)]
        struct NoopHandler;
        impl RequestHandler for NoopHandler {
            fn init(&self, _context: DispatchContext) {}
            fn execute(&self) {}
            fn set_error(&self, _error: Error) {}
        }
        Self::new(Arc::new(NoopHandler))
    }
}

/// Decrements a shared counter on drop, invoking a completion callback once
/// the last outstanding reference is gone.
///
/// Ported from the original `PrepareAllCallback`, whose destructor
/// decremented a `remaining` count and invoked the original request's
/// callback when it reached zero: in C++ that decrement rides on whichever
/// mechanism frees the last `Ptr` (response arrival or error), so modeling
/// it as a `Drop` impl here reproduces the same "last one out" semantics
/// without needing a separate explicit completion call at every call site.
pub struct PrepareAllCallback {
    remaining: Arc<AtomicU32>,
    on_complete: Arc<dyn Fn() + Send + Sync>,
}

impl PrepareAllCallback {
    fn new(remaining: Arc<AtomicU32>, on_complete: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            remaining,
            on_complete,
        }
    }
}

impl Debug for PrepareAllCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepareAllCallback")
            .field("remaining", &self.remaining.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for PrepareAllCallback {
    fn drop(&mut self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            (self.on_complete)();
        }
    }
}

/// Fans a successful `PREPARE` response out to every other known host, per
/// spec §4.6.
///
/// Constructed once the original request's own `PREPARE` has already
/// succeeded against its first host; [`PrepareAllHandler::callbacks`]
/// yields one [`PrepareAllCallback`] per remaining host, and `on_complete`
/// fires exactly once, after the last one is dropped.
#[derive(Debug)]
pub struct PrepareAllHandler {
    remaining: Arc<AtomicU32>,
    on_complete: Arc<dyn Fn() + Send + Sync>,
}

impl PrepareAllHandler {
    /// Constructs a handler that will call `on_complete` once a callback
    /// has been created and dropped for each of `host_count` hosts. If
    /// `host_count` is zero, `on_complete` fires immediately.
    pub fn new(host_count: u32, on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        let on_complete: Arc<dyn Fn() + Send + Sync> = Arc::new(on_complete);
        if host_count == 0 {
            on_complete();
        }
        Self {
            remaining: Arc::new(AtomicU32::new(host_count)),
            on_complete,
        }
    }

    /// Produces one callback. The caller is responsible for dropping it
    /// once the re-prepare against that host has settled (successfully or
    /// not; prepare-all fan-out is best-effort and does not surface
    /// per-host errors to the original request).
    pub fn callback(&self) -> PrepareAllCallback {
        PrepareAllCallback::new(self.remaining.clone(), self.on_complete.clone())
    }
}

/// Polls for schema agreement across the cluster, up to a bound, per spec
/// §4.7.
///
/// A full implementation would query `system.local`/`system.peers` schema
/// version columns on each poll; that querying is out of scope here (it
/// requires the pool/wire layers this crate doesn't implement). This type
/// models the waiting and timeout policy: [`SchemaAgreementWaiter::poll`]
/// is driven by the caller, and [`SchemaAgreementWaiter::is_expired`] tells
/// the worker when to give up and complete the original request anyway,
/// carrying [`crate::error::ErrorKind::SchemaAgreementTimeout`] as a
/// non-fatal warning.
#[derive(Debug)]
pub struct SchemaAgreementWaiter {
    started: std::time::Instant,
    max_wait: std::time::Duration,
}

impl SchemaAgreementWaiter {
    /// Starts a new waiter with the given maximum wait.
    pub fn new(max_wait: std::time::Duration) -> Self {
        Self {
            started: std::time::Instant::now(),
            max_wait,
        }
    }

    /// Returns `true` once `max_wait` has elapsed since construction.
    pub fn is_expired(&self) -> bool {
        self.started.elapsed() >= self.max_wait
    }

    /// How long this waiter has been polling so far.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn prepare_all_callback_fires_once_all_dropped() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let handler = PrepareAllHandler::new(3, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        let a = handler.callback();
        let b = handler.callback();
        let c = handler.callback();
        drop(a);
        assert!(!fired.load(Ordering::SeqCst));
        drop(b);
        assert!(!fired.load(Ordering::SeqCst));
        drop(c);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn prepare_all_handler_with_zero_hosts_fires_immediately() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let _handler = PrepareAllHandler::new(0, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn schema_agreement_waiter_expires_after_max_wait() {
        let waiter = SchemaAgreementWaiter::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(waiter.is_expired());
    }

    #[test]
    fn schema_agreement_waiter_not_expired_immediately() {
        let waiter = SchemaAgreementWaiter::new(Duration::from_secs(10));
        assert!(!waiter.is_expired());
    }
}
