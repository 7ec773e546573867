//! Resolve-and-classify admission check for a single target host.

use std::{net::IpAddr, sync::Arc, time::Duration};

use tracing::{debug, instrument};

use crate::{Error, PrivateRanges, Resolver, Result};

/// Default deadline for resolving a target host.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of [`HostChecker::check_host`].
///
/// The payloads are for server-side logging only and must not be echoed to
/// clients.
#[derive(Debug)]
pub enum Verdict {
    /// Every resolved address is public.
    Allow,
    /// At least one resolved address is private; carries the first one found.
    Deny(IpAddr),
    /// The host could not be resolved.
    ResolutionError(Error),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Decides whether a host may be reached through the proxy.
///
/// Holds no per-request state; one instance serves every concurrent check.
pub struct HostChecker {
    ranges: Arc<PrivateRanges>,
    resolver: Arc<dyn Resolver>,
    resolve_timeout: Duration,
}

impl HostChecker {
    pub fn new(ranges: Arc<PrivateRanges>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            ranges,
            resolver,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Resolve `host` and deny if any address it resolves to is private.
    ///
    /// Runs a fresh lookup on every call; answers are never cached.
    #[instrument(skip(self), fields(host = %host))]
    pub async fn check_host(&self, host: &str) -> Verdict {
        let ips = match self.resolve(host).await {
            Ok(ips) => ips,
            Err(e) => return Verdict::ResolutionError(e),
        };

        match ips.iter().copied().find(|ip| self.ranges.is_private(*ip)) {
            Some(ip) => Verdict::Deny(ip),
            None => {
                debug!(count = ips.len(), "all resolved addresses are public");
                Verdict::Allow
            },
        }
    }

    /// Full address set for `host`. IP literals (bracketed or not) resolve to
    /// themselves without a lookup.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        if bare.is_empty() {
            return Err(Error::NoAddresses {
                host: host.to_string(),
            });
        }

        let ips = tokio::time::timeout(self.resolve_timeout, self.resolver.lookup_ip(bare))
            .await
            .map_err(|_| Error::ResolveTimeout {
                host: host.to_string(),
                timeout: self.resolve_timeout,
            })??;

        if ips.is_empty() {
            return Err(Error::NoAddresses {
                host: host.to_string(),
            });
        }
        Ok(ips)
    }
}
