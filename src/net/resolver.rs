//! Asynchronous hostname resolution.
//!
//! Wraps the Tokio resolver and caches the outcome so a connection ladder
//! re-entering `connect()` does not re-query. IPv6 and IPv4 results are both
//! requested and kept in the order the resolver yields them.

use std::net::{IpAddr, SocketAddr};

use hickory_resolver::config::{LookupIpStrategy, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use thiserror::Error;
use tracing::debug;

use super::endpoint::Endpoint;

/// Resolution failure: no endpoints for this attempt.
#[derive(Debug, Clone, Error)]
#[error("hostname resolution failed: {0}")]
pub struct ResolveError(pub String);

#[derive(Debug, Default)]
enum ResolveState {
    #[default]
    Idle,
    Resolved(Vec<Endpoint>),
    Failed(String),
}

/// Hostname resolver with a cached result.
pub struct Resolver {
    inner: TokioResolver,
    state: ResolveState,
}

impl Resolver {
    /// Create a resolver from the system configuration, falling back to the
    /// library defaults when none can be read.
    pub fn new() -> Self {
        let inner = TokioResolver::builder_tokio()
            .map(|mut builder| {
                builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
                builder.build()
            })
            .unwrap_or_else(|_| {
                let mut builder = TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                );
                builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
                builder.build()
            });
        Resolver {
            inner,
            state: ResolveState::Idle,
        }
    }

    /// Resolve `host` into endpoints carrying `port` and the `tls` flag.
    ///
    /// The result (success or failure) is cached until [`Resolver::clear`].
    /// Dropping the future makes an in-flight query's completion a no-op.
    pub async fn resolve(
        &mut self,
        host: &str,
        port: u16,
        tls: bool,
    ) -> Result<Vec<Endpoint>, ResolveError> {
        if let ResolveState::Idle = self.state {
            self.state = self.lookup(host).await;
        }
        match &self.state {
            ResolveState::Resolved(ips) => Ok(ips
                .iter()
                .map(|e| Endpoint {
                    addr: SocketAddr::new(e.addr.ip(), port),
                    tls,
                })
                .collect()),
            ResolveState::Failed(msg) => Err(ResolveError(msg.clone())),
            ResolveState::Idle => unreachable!("lookup always resolves or fails"),
        }
    }

    async fn lookup(&self, host: &str) -> ResolveState {
        // Address literals skip the query entirely.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return ResolveState::Resolved(vec![Endpoint {
                addr: SocketAddr::new(ip, 0),
                tls: false,
            }]);
        }
        match self.inner.lookup_ip(host).await {
            Ok(lookup) => {
                let ips: Vec<Endpoint> = lookup
                    .iter()
                    .map(|ip| Endpoint {
                        addr: SocketAddr::new(ip, 0),
                        tls: false,
                    })
                    .collect();
                debug!(host, count = ips.len(), "hostname resolved");
                if ips.is_empty() {
                    ResolveState::Failed(format!("no addresses found for {host}"))
                } else {
                    ResolveState::Resolved(ips)
                }
            }
            Err(e) => ResolveState::Failed(e.to_string()),
        }
    }

    /// True while no resolution outcome has been cached yet.
    pub fn is_resolving(&self) -> bool {
        matches!(self.state, ResolveState::Idle)
    }

    /// True once a resolution outcome is cached.
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ResolveState::Resolved(_))
    }

    /// The cached addresses, when resolution succeeded.
    pub fn get_result(&self) -> Option<&[Endpoint]> {
        match &self.state {
            ResolveState::Resolved(ips) => Some(ips),
            _ => None,
        }
    }

    /// The cached failure message, when resolution failed.
    pub fn get_error_message(&self) -> Option<&str> {
        match &self.state {
            ResolveState::Failed(msg) => Some(msg),
            _ => None,
        }
    }

    /// Forget the cached outcome.
    pub fn clear(&mut self) {
        self.state = ResolveState::Idle;
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ip_literal_short_circuits() {
        let mut r = Resolver::new();
        let eps = r.resolve("127.0.0.1", 6667, false).await.unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].addr, "127.0.0.1:6667".parse().unwrap());
        assert!(!eps[0].tls);
        assert!(r.is_resolved());
    }

    #[tokio::test]
    async fn cached_result_is_reused_with_new_port() {
        let mut r = Resolver::new();
        r.resolve("::1", 6697, true).await.unwrap();
        let eps = r.resolve("::1", 6667, false).await.unwrap();
        assert_eq!(eps[0].addr.port(), 6667);
        assert!(!eps[0].tls);

        r.clear();
        assert!(!r.is_resolved());
        assert!(r.get_result().is_none());
    }
}
