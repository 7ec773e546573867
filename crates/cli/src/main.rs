use std::sync::Arc;

use {
    anyhow::{Context, Result},
    clap::Parser,
    ssrf_proxy_engine::{ProxyConfig, proxy::ProxyServer},
    ssrf_proxy_filter::{HostChecker, PrivateRanges, SsrfPolicy, SystemResolver},
    tokio::sync::watch,
    tracing::{debug, info},
};

mod config;

use config::{Args, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_args(&args)?;

    // A corrupt range table must stop the process before it accepts traffic.
    let ranges = Arc::new(PrivateRanges::new().context("private range table is invalid")?);
    for block in ranges.blocks() {
        debug!(%block, "blocking range");
    }

    let checker = HostChecker::new(ranges, Arc::new(SystemResolver))
        .with_resolve_timeout(config.resolve_timeout);
    let hooks = SsrfPolicy::new(checker)
        .verbose(config.verbose)
        .into_hooks();

    let proxy_config = ProxyConfig {
        connect_timeout: config.connect_timeout,
        ..ProxyConfig::default()
    };
    let server = ProxyServer::bind(config.listen_addr, hooks, proxy_config)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        addr = %config.listen_addr,
        verbose = config.verbose,
        resolve_timeout_secs = config.resolve_timeout.as_secs(),
        "ssrf-proxy starting"
    );
    server.run(shutdown_rx).await?;
    Ok(())
}
