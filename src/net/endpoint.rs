//! Connection endpoints produced by resolution.

use std::fmt;
use std::net::SocketAddr;

/// One candidate address for a connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Resolved socket address (family + address + port).
    pub addr: SocketAddr,
    /// Whether TLS is negotiated on this endpoint.
    pub tls: bool,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "{} (tls)", self.addr)
        } else {
            write!(f, "{}", self.addr)
        }
    }
}
