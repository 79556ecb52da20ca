#![warn(missing_docs)]
#![warn(clippy::cast_possible_truncation)]

//! Core request dispatch engine for a Cassandra-compatible wide-column
//! database client driver.
//!
//! This crate implements the *Request Processor*: the single-threaded,
//! per-worker component that accepts queued requests, picks a replica via a
//! pluggable [`policy::LoadBalancingPolicy`], writes to a pooled connection,
//! and orchestrates schema-agreement and prepare-on-all-hosts follow-ons.
//! Wire framing, TLS, authentication, and the public session API are out of
//! scope: they are modeled here as capability traits that a full driver
//! would implement and plug in.

pub mod address;
pub mod error;
pub mod handler;
pub mod host;
pub mod listener;
pub mod policy;
pub mod pool;
pub mod processor;
pub mod profile;
pub mod queue;
pub mod settings;
pub mod token_map;

pub use crate::{
    address::Address,
    error::{Error, ErrorKind, Result},
    processor::RequestProcessor,
    settings::RequestProcessorSettings,
};
