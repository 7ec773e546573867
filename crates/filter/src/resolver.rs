//! Hostname resolution.

use std::{collections::HashMap, io, net::IpAddr};

use {async_trait::async_trait, tracing::debug};

use crate::{Error, Result};

/// Looks up every address a hostname currently resolves to.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo`), run off the
/// async worker threads by tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| Error::Resolve {
                host: host.to_string(),
                source,
            })?;

        // getaddrinfo reports one entry per socket type; keep each address once.
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        debug!(host = %host, count = ips.len(), "resolved");
        Ok(ips)
    }
}

/// Resolver answering from a fixed table. Unknown names fail like NXDOMAIN.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the answer for `host`.
    #[must_use]
    pub fn with_host(mut self, host: &str, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        self.records
            .insert(host.to_lowercase(), ips.into_iter().collect());
        self
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.records
            .get(&host.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::Resolve {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such host"),
            })
    }
}
