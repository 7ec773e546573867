//! Integration tests driving a bound proxy server over loopback TCP.

#![allow(clippy::unwrap_used)]

use std::{net::SocketAddr, sync::Arc};

use {
    async_trait::async_trait,
    http::StatusCode,
    ssrf_proxy_engine::{
        ConnectAction, ConnectHook, Hooks, ProxyConfig, ProxyRequest, RequestAction, RequestHook,
        SynthesizedResponse, proxy::{NON_PROXY_BODY, ProxyServer},
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::{oneshot, watch},
    },
};

/// Hooks that refuse everything.
struct DenyAll;

#[async_trait]
impl RequestHook for DenyAll {
    async fn on_request(&self, _request: &ProxyRequest) -> RequestAction {
        RequestAction::Respond(SynthesizedResponse::text(StatusCode::FORBIDDEN, "blocked"))
    }
}

#[async_trait]
impl ConnectHook for DenyAll {
    async fn on_connect(&self, hostport: &str) -> (ConnectAction, String) {
        (ConnectAction::Reject, hostport.to_string())
    }
}

/// Start a proxy on an ephemeral port. The returned sender keeps it alive.
async fn start_proxy(hooks: Hooks) -> (SocketAddr, watch::Sender<bool>) {
    let server = ProxyServer::bind("127.0.0.1:0", hooks, ProxyConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        server.run(rx).await.unwrap();
    });
    (addr, tx)
}

/// Upstream that captures one request head and answers `hello`.
async fn start_http_upstream() -> (SocketAddr, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            if line.trim().is_empty() {
                break;
            }
            head.push_str(&line);
        }
        reader
            .get_mut()
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello")
            .await
            .unwrap();
        let _ = tx.send(head);
    });
    (addr, rx)
}

/// Upstream that echoes whatever it receives.
async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (mut read, mut write) = stream.split();
        let _ = tokio::io::copy(&mut read, &mut write).await;
    });
    addr
}

async fn roundtrip(proxy: SocketAddr, raw: &str) -> String {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(raw.as_bytes()).await.unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn forwards_plain_request_in_origin_form() {
    let (upstream, head_rx) = start_http_upstream().await;
    let (proxy, _shutdown) = start_proxy(Hooks::default()).await;

    let raw = format!(
        "GET http://{upstream}/path?q=1 HTTP/1.1\r\nHost: {upstream}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    let resp = roundtrip(proxy, &raw).await;
    assert!(resp.starts_with("HTTP/1.1 200 OK"));
    assert!(resp.ends_with("hello"));

    let head = head_rx.await.unwrap();
    assert!(head.starts_with("GET /path?q=1 HTTP/1.1\r\n"));
    assert!(!head.contains("Proxy-Connection"));
    assert!(head.contains("Connection: close"));
}

#[tokio::test]
async fn tunnels_connect_bytes_both_ways() {
    let upstream = start_echo_upstream().await;
    let (proxy, _shutdown) = start_proxy(Hooks::default()).await;

    let mut client = BufReader::new(TcpStream::connect(proxy).await.unwrap());
    client
        .get_mut()
        .write_all(
            format!("CONNECT {upstream} HTTP/1.1\r\nHost: {upstream}\r\n\r\n").as_bytes(),
        )
        .await
        .unwrap();

    let mut status = String::new();
    client.read_line(&mut status).await.unwrap();
    assert!(status.starts_with("HTTP/1.1 200"));
    let mut blank = String::new();
    client.read_line(&mut blank).await.unwrap();
    assert_eq!(blank, "\r\n");

    client.get_mut().write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");
}

#[tokio::test]
async fn request_hook_response_is_sent_verbatim() {
    let (proxy, _shutdown) = start_proxy(Hooks::from_policy(Arc::new(DenyAll))).await;
    let resp = roundtrip(
        proxy,
        "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(resp.contains("Content-Type: text/plain\r\n"));
    assert!(resp.ends_with("\r\n\r\nblocked"));
}

#[tokio::test]
async fn connect_hook_rejection_refuses_tunnel() {
    let (proxy, _shutdown) = start_proxy(Hooks::from_policy(Arc::new(DenyAll))).await;
    let resp = roundtrip(proxy, "CONNECT example.com:443 HTTP/1.1\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[tokio::test]
async fn non_proxy_request_gets_500() {
    let (proxy, _shutdown) = start_proxy(Hooks::default()).await;
    let resp = roundtrip(proxy, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(resp.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(resp.ends_with(NON_PROXY_BODY));
}

#[tokio::test]
async fn unreachable_upstream_gets_502() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (proxy, _shutdown) = start_proxy(Hooks::default()).await;
    let resp = roundtrip(proxy, &format!("CONNECT {closed} HTTP/1.1\r\n\r\n")).await;
    assert!(resp.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[tokio::test]
async fn run_returns_on_shutdown() {
    let server = ProxyServer::bind("127.0.0.1:0", Hooks::default(), ProxyConfig::default())
        .await
        .unwrap();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(server.run(rx));
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}
