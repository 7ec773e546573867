//! Startup configuration: command-line flags, environment variables, and an
//! optional TOML file. Immutable once the proxy starts.

use std::{
    net::{Ipv4Addr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    clap::Parser,
    serde::Deserialize,
};

pub const DEFAULT_ADDR: &str = ":8080";
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Forward HTTP/HTTPS proxy that refuses to reach private addresses.
///
/// Every request and CONNECT target is resolved first; if any address it
/// resolves to is loopback, RFC 1918, link-local, or IPv6 unique-local, the
/// request is rejected.
#[derive(Parser, Debug, Default)]
#[command(name = "ssrf-proxy", version)]
pub struct Args {
    /// Proxy listen address (`host:port`, or `:port` for all interfaces).
    #[arg(long, env = "SSRF_PROXY_ADDR")]
    pub addr: Option<String>,

    /// Log every allowed request, not only rejections.
    #[arg(short, long, env = "SSRF_PROXY_VERBOSE")]
    pub verbose: bool,

    /// Seconds to wait for a target hostname to resolve.
    #[arg(long = "resolve-timeout", env = "SSRF_PROXY_RESOLVE_TIMEOUT", value_name = "SECS")]
    pub resolve_timeout_secs: Option<u64>,

    /// Seconds to wait when dialing an upstream host.
    #[arg(long = "connect-timeout", env = "SSRF_PROXY_CONNECT_TIMEOUT", value_name = "SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// TOML file providing defaults for the settings above.
    #[arg(long, env = "SSRF_PROXY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Settings read from the `--config` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub addr: Option<String>,
    pub verbose: Option<bool>,
    pub resolve_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

/// Effective proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub verbose: bool,
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Config {
    /// Merge flags/environment over the config file over built-in defaults.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, &file)
    }

    fn merge(args: &Args, file: &FileConfig) -> Result<Self> {
        let addr = args
            .addr
            .as_deref()
            .or(file.addr.as_deref())
            .unwrap_or(DEFAULT_ADDR);
        let resolve_secs = args
            .resolve_timeout_secs
            .or(file.resolve_timeout_secs)
            .unwrap_or(DEFAULT_RESOLVE_TIMEOUT_SECS);
        let connect_secs = args
            .connect_timeout_secs
            .or(file.connect_timeout_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        if resolve_secs == 0 {
            bail!("resolve timeout must be at least one second");
        }
        if connect_secs == 0 {
            bail!("connect timeout must be at least one second");
        }

        Ok(Self {
            listen_addr: parse_listen_addr(addr)?,
            verbose: args.verbose || file.verbose.unwrap_or(false),
            resolve_timeout: Duration::from_secs(resolve_secs),
            connect_timeout: Duration::from_secs(connect_secs),
        })
    }
}

/// Parse a listen address. `:PORT` binds every IPv4 interface; hostnames are
/// resolved once and the first address is used.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    if let Some(port) = addr.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in listen address {addr:?}"))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        return Ok(socket_addr);
    }
    addr.to_socket_addrs()
        .with_context(|| format!("invalid listen address {addr:?}"))?
        .next()
        .with_context(|| format!("listen address {addr:?} resolved to nothing"))
}
