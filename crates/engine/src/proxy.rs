//! Forward proxy server.
//!
//! Handles both `CONNECT host:port` (HTTPS) and plain HTTP forward requests.
//! Every request passes through the configured [`Hooks`] before anything is
//! sent upstream.

use std::net::SocketAddr;

use {
    http::StatusCode,
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream, ToSocketAddrs},
        sync::watch,
    },
    tracing::{debug, info, instrument, warn},
    url::Url,
};

use crate::{
    ConnectAction, Error, Hooks, ProxyConfig, ProxyRequest, RequestAction, Result,
    SynthesizedResponse,
};

/// Body of the response sent to clients that talk to the proxy as if it were
/// an origin server.
pub const NON_PROXY_BODY: &str = "This is a proxy server. Does not respond to non-proxy requests.";

const TUNNEL_REJECTED: &[u8] =
    b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Header fields that describe the client-to-proxy hop and are not forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authorization",
    "proxy-connection",
];

/// Forward proxy server that consults [`Hooks`] for every request and tunnel.
pub struct ProxyServer {
    listener: TcpListener,
    hooks: Hooks,
    config: ProxyConfig,
}

impl ProxyServer {
    /// Bind the listening socket. Use port `0` to let the OS pick one.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        hooks: Hooks,
        config: ProxyConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hooks,
            config,
        })
    }

    /// The address the proxy is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `shutdown` flips to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(addr = %self.local_addr()?, "proxy listening");

        loop {
            tokio::select! {
                accept = self.listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let hooks = self.hooks.clone();
                            let config = self.config.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, peer, hooks, config).await {
                                    debug!(peer = %peer, error = %e, "proxy client error");
                                }
                            });
                        },
                        Err(e) => {
                            warn!(error = %e, "proxy accept error");
                        },
                    }
                },
                _ = shutdown_signal(&shutdown) => {
                    info!("proxy shutting down");
                    break;
                },
            }
        }
        Ok(())
    }
}

async fn shutdown_signal(rx: &watch::Receiver<bool>) {
    let mut rx = rx.clone();
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            // Sender gone without a shutdown request; keep serving.
            std::future::pending::<()>().await;
        }
    }
}

/// Handle a single client connection.
///
/// Reads the request line to decide between a tunnel and a plain forward.
#[instrument(skip(stream, hooks, config), fields(peer = %peer))]
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    hooks: Hooks,
    config: ProxyConfig,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut budget = config.max_header_bytes;

    let mut request_line = String::new();
    read_bounded_line(
        &mut reader,
        &mut request_line,
        &mut budget,
        config.max_header_bytes,
    )
    .await?;
    let request_line = request_line.trim_end();

    if request_line.is_empty() {
        return Err(Error::message("empty request"));
    }

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(Error::message(format!(
            "malformed request line: {request_line}"
        )));
    }

    let method = parts[0];
    let target = parts[1];

    let headers = read_headers(&mut reader, &mut budget, config.max_header_bytes).await?;

    if method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(reader, target, &hooks, &config).await
    } else {
        handle_http_forward(reader, method, target, headers, &hooks, &config).await
    }
}

/// Read one line, charging it against the remaining header budget.
async fn read_bounded_line<R>(
    reader: &mut R,
    line: &mut String,
    budget: &mut usize,
    limit: usize,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    if *budget == 0 {
        return Err(Error::HeadersTooLarge { limit });
    }
    let allowed = *budget;
    let n = (&mut *reader).take(allowed as u64).read_line(line).await?;
    if n == allowed && !line.ends_with('\n') {
        return Err(Error::HeadersTooLarge { limit });
    }
    *budget -= n;
    Ok(n)
}

/// Read header fields up to the blank line that ends the head.
async fn read_headers<R>(
    reader: &mut R,
    budget: &mut usize,
    limit: usize,
) -> Result<Vec<(String, String)>>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        let n = read_bounded_line(reader, &mut line, budget, limit).await?;
        let line = line.trim_end();
        if n == 0 || line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            },
            None => debug!(line = %line, "skipping malformed header line"),
        }
    }
    Ok(headers)
}

/// Dial `target` within the configured connect timeout.
async fn dial(target: &str, config: &ProxyConfig) -> Result<TcpStream> {
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(target)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(Error::message(format!(
            "connect to {target} timed out after {:?}",
            config.connect_timeout
        ))),
    }
}

/// Relay bytes both ways, starting with anything the client already sent
/// past the request head.
async fn relay(reader: BufReader<TcpStream>, mut upstream: TcpStream) -> Result<(u64, u64)> {
    let pending = reader.buffer().to_vec();
    let mut client = reader.into_inner();
    if !pending.is_empty() {
        upstream.write_all(&pending).await?;
    }
    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok((sent + pending.len() as u64, received))
}

/// Handle an HTTP CONNECT tunnel request.
#[instrument(skip(reader, hooks, config), fields(target = %target))]
async fn handle_connect(
    mut reader: BufReader<TcpStream>,
    target: &str,
    hooks: &Hooks,
    config: &ProxyConfig,
) -> Result<()> {
    let start = std::time::Instant::now();

    let (action, target) = hooks.connect.on_connect(target).await;
    if action == ConnectAction::Reject {
        reader.get_mut().write_all(TUNNEL_REJECTED).await?;
        debug!(upstream = %target, "tunnel rejected");
        return Ok(());
    }

    let upstream = match dial(&target, config).await {
        Ok(s) => s,
        Err(e) => {
            warn!(upstream = %target, error = %e, "tunnel upstream connect failed");
            let resp = SynthesizedResponse::text(StatusCode::BAD_GATEWAY, "Bad Gateway");
            reader.get_mut().write_all(&resp.to_bytes()).await?;
            return Ok(());
        },
    };

    reader.get_mut().write_all(TUNNEL_ESTABLISHED).await?;

    let (bytes_sent, bytes_received) = relay(reader, upstream).await?;
    debug!(
        upstream = %target,
        bytes_sent,
        bytes_received,
        duration_ms = start.elapsed().as_millis() as u64,
        "tunnel closed"
    );
    Ok(())
}

/// Handle a plain HTTP forward request (non-CONNECT).
#[instrument(skip(reader, headers, hooks, config), fields(method = %method, target = %target))]
async fn handle_http_forward(
    mut reader: BufReader<TcpStream>,
    method: &str,
    target: &str,
    headers: Vec<(String, String)>,
    hooks: &Hooks,
    config: &ProxyConfig,
) -> Result<()> {
    let start = std::time::Instant::now();

    let url = match Url::parse(target) {
        Ok(url) if url.scheme() == "http" && url.has_host() => url,
        _ => {
            debug!("non-proxy request");
            let resp =
                SynthesizedResponse::text(StatusCode::INTERNAL_SERVER_ERROR, NON_PROXY_BODY);
            reader.get_mut().write_all(&resp.to_bytes()).await?;
            return Ok(());
        },
    };

    let request = ProxyRequest {
        method: method.to_string(),
        url,
        headers,
    };

    if let RequestAction::Respond(resp) = hooks.request.on_request(&request).await {
        reader.get_mut().write_all(&resp.to_bytes()).await?;
        return Ok(());
    }

    let Some(authority) = request.authority() else {
        return Err(Error::message("request URL has no host"));
    };

    let mut upstream = match dial(&authority, config).await {
        Ok(s) => s,
        Err(e) => {
            warn!(upstream = %authority, error = %e, "upstream connect failed");
            let resp = SynthesizedResponse::text(StatusCode::BAD_GATEWAY, "Bad Gateway");
            reader.get_mut().write_all(&resp.to_bytes()).await?;
            return Ok(());
        },
    };

    upstream.write_all(&upstream_head(&request)).await?;

    let (bytes_sent, bytes_received) = relay(reader, upstream).await?;
    debug!(
        upstream = %authority,
        bytes_sent,
        bytes_received,
        duration_ms = start.elapsed().as_millis() as u64,
        "request forwarded"
    );
    Ok(())
}

/// Request head sent upstream: origin-form target, hop-by-hop fields removed,
/// one request per upstream connection.
fn upstream_head(request: &ProxyRequest) -> Vec<u8> {
    let mut head = format!("{} {} HTTP/1.1\r\n", request.method, request.origin_form());
    if request.header("host").is_none()
        && let Some(host) = request.url.host_str()
    {
        match request.url.port() {
            Some(port) => head.push_str(&format!("Host: {host}:{port}\r\n")),
            None => head.push_str(&format!("Host: {host}\r\n")),
        }
    }
    for (name, value) in &request.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");
    head.into_bytes()
}
