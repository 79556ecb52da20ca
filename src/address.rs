//! The network endpoint identifying a single node.

use std::net::IpAddr;

use derive_more::Display;

/// Identifies one node in the cluster by its connect-to endpoint.
///
/// `Address` is the key type for [`crate::host::HostMap`] and is threaded
/// through every pool/listener/policy interface that needs to name a host
/// without carrying its full [`crate::host::Host`] state. It is cheap to
/// copy and compare, matching how it is used as a hash map key on the
/// worker's hot path.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{ip}:{port}")]
pub struct Address {
    /// The node's IP address.
    pub ip: IpAddr,
    /// The node's native-protocol port.
    pub port: u16,
}

impl Address {
    /// Constructs a new `Address`.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}
