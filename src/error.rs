//! Contains the `Error` and `Result` types that this crate uses.

use std::sync::Arc;

use thiserror::Error;

use crate::address::Address;

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while dispatching or orchestrating a request.
///
/// The inner [`ErrorKind`] is wrapped in an `Arc` so that an error can be
/// cloned to more than one waiter (for example, a `PoolCleared` error is
/// delivered both to the handler that triggered it and to every other
/// handler already queued on the same connection).
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: Arc<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Arc::new(kind),
        }
    }

    /// Returns `true` if this error indicates that retrying against a
    /// different host is likely to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::PoolWriteRefused { .. } | ErrorKind::HostDown { .. }
        )
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// The specific kind of error that occurred.
///
/// This type is `#[non_exhaustive]` so that new dispositions can be added
/// without breaking downstream `match` expressions.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A request named an execution profile that does not exist.
    ///
    /// Surfaced via [`crate::handler::RequestHandler::set_error`] rather
    /// than returned from any processor method directly (see spec §7).
    #[error("{name} does not exist")]
    ExecutionProfileInvalid {
        /// The profile name that failed to resolve.
        name: String,
    },

    /// A pooled connection refused a write (e.g. its send buffer is full or
    /// the connection is shutting down).
    #[error("connection to {address} refused the write")]
    PoolWriteRefused {
        /// The host the write was attempted against.
        address: Address,
    },

    /// The pool for a host reported it is down, or hit a critical error.
    #[error("host {address} is down: {message}")]
    HostDown {
        /// The host that went down.
        address: Address,
        /// A human-readable description of why.
        message: String,
    },

    /// Schema agreement did not converge before `max_schema_wait_time_ms`
    /// elapsed. This is non-fatal: the originating request still completes
    /// with its original response, carrying this as a warning.
    #[error("schema agreement timed out after {waited_ms}ms")]
    SchemaAgreementTimeout {
        /// How long the processor waited, in milliseconds.
        waited_ms: u64,
    },

    /// The processor is closing or has closed and can no longer accept
    /// work.
    #[error("request processor is closing")]
    Closing,

    /// An invariant the processor relies on its collaborators to uphold was
    /// violated (e.g. a host reported `up` that was never added).
    #[error("internal error: {message}")]
    Internal {
        /// A human-readable description of the violated invariant.
        message: String,
    },
}
