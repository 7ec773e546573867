//! Hook types shared between the proxy server and the policies plugged into it.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    http::StatusCode,
    url::{Host, Position, Url},
};

/// Content type used for every response the proxy synthesizes itself.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

// ── Engine configuration ────────────────────────────────────────────────────

/// Tunables for the proxy server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Deadline for dialing the upstream host of an accepted request or tunnel.
    pub connect_timeout: Duration,
    /// Upper bound on the request line plus headers of a single request.
    pub max_header_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_header_bytes: 64 * 1024,
        }
    }
}

// ── Plain HTTP requests ─────────────────────────────────────────────────────

/// A plain HTTP request received in absolute form (`GET http://host/path`).
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    pub url: Url,
    /// Header fields in arrival order.
    pub headers: Vec<(String, String)>,
}

impl ProxyRequest {
    /// Target hostname without port and without IPv6 brackets.
    pub fn hostname(&self) -> Option<String> {
        match self.url.host()? {
            Host::Domain(domain) => Some(domain.to_string()),
            Host::Ipv4(ip) => Some(ip.to_string()),
            Host::Ipv6(ip) => Some(ip.to_string()),
        }
    }

    /// Target port, defaulting to the scheme's well-known port.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// `host:port` suitable for dialing; IPv6 hosts keep their brackets.
    pub fn authority(&self) -> Option<String> {
        self.url
            .host_str()
            .map(|host| format!("{host}:{}", self.port()))
    }

    /// Origin-form request target (`/path?query`) sent to the upstream.
    pub fn origin_form(&self) -> &str {
        &self.url[Position::BeforePath..Position::AfterQuery]
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A complete response produced by a hook instead of forwarding the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedResponse {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: String,
}

impl SynthesizedResponse {
    /// A `text/plain` response with the given status and body.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: CONTENT_TYPE_TEXT,
            body: body.into(),
        }
    }

    /// Serialize as an HTTP/1.1 response that closes the connection.
    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or(""),
            self.content_type,
            self.body.len(),
        );
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body.as_bytes());
        bytes
    }
}

/// What the proxy should do with a plain HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAction {
    /// Forward the request upstream unchanged.
    Forward,
    /// Answer the client directly; nothing is sent upstream.
    Respond(SynthesizedResponse),
}

// ── CONNECT tunnels ─────────────────────────────────────────────────────────

/// What the proxy should do with a `CONNECT` tunnel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAction {
    /// Dial the target and relay bytes in both directions.
    Accept,
    /// Refuse the tunnel.
    Reject,
}

impl std::fmt::Display for ConnectAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

// ── Hooks ───────────────────────────────────────────────────────────────────

/// Called before a plain HTTP request is forwarded.
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn on_request(&self, request: &ProxyRequest) -> RequestAction;
}

/// Called before a `CONNECT` tunnel is established.
///
/// Returns the action and the `host:port` to dial, which is normally the
/// target it was given.
#[async_trait]
pub trait ConnectHook: Send + Sync {
    async fn on_connect(&self, hostport: &str) -> (ConnectAction, String);
}

/// Hooks that let every request and tunnel through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl RequestHook for AllowAll {
    async fn on_request(&self, _request: &ProxyRequest) -> RequestAction {
        RequestAction::Forward
    }
}

#[async_trait]
impl ConnectHook for AllowAll {
    async fn on_connect(&self, hostport: &str) -> (ConnectAction, String) {
        (ConnectAction::Accept, hostport.to_string())
    }
}

/// The pair of hooks a [`crate::proxy::ProxyServer`] consults.
#[derive(Clone)]
pub struct Hooks {
    pub request: Arc<dyn RequestHook>,
    pub connect: Arc<dyn ConnectHook>,
}

impl Hooks {
    /// Use a single policy object for both extension points.
    pub fn from_policy<P>(policy: Arc<P>) -> Self
    where
        P: RequestHook + ConnectHook + 'static,
    {
        Self {
            request: Arc::clone(&policy) as Arc<dyn RequestHook>,
            connect: policy,
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::from_policy(Arc::new(AllowAll))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
