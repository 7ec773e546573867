//! Request and `CONNECT` hooks that turn admission verdicts into proxy
//! actions.

use std::sync::Arc;

use {
    async_trait::async_trait,
    http::StatusCode,
    ssrf_proxy_engine::{
        ConnectAction, ConnectHook, Hooks, ProxyRequest, RequestAction, RequestHook,
        SynthesizedResponse,
    },
    tracing::{debug, info, warn},
};

use crate::{HostChecker, Verdict};

/// Body returned when the target resolves to a private address.
pub const PRIVATE_IP_BODY: &str = "Private IP is not allowed";

/// Body returned when the target cannot be resolved.
pub const HOST_NOT_FOUND_BODY: &str = "Host not found";

/// SSRF admission policy for the proxy engine.
///
/// Both hooks share one [`HostChecker`]; each only adapts the verdict to its
/// protocol's accept/reject shape.
pub struct SsrfPolicy {
    checker: HostChecker,
    verbose: bool,
}

impl SsrfPolicy {
    pub fn new(checker: HostChecker) -> Self {
        Self {
            checker,
            verbose: false,
        }
    }

    /// Log every allowed request at `info` instead of `debug`.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Wrap the policy as engine hooks.
    pub fn into_hooks(self) -> Hooks {
        Hooks::from_policy(Arc::new(self))
    }

    fn log_allowed(&self, kind: &str, target: &str) {
        if self.verbose {
            info!(kind, dest = %target, "allowed");
        } else {
            debug!(kind, dest = %target, "allowed");
        }
    }
}

fn private_ip_response() -> SynthesizedResponse {
    SynthesizedResponse::text(StatusCode::FORBIDDEN, PRIVATE_IP_BODY)
}

fn host_not_found_response() -> SynthesizedResponse {
    SynthesizedResponse::text(StatusCode::BAD_GATEWAY, HOST_NOT_FOUND_BODY)
}

#[async_trait]
impl RequestHook for SsrfPolicy {
    async fn on_request(&self, request: &ProxyRequest) -> RequestAction {
        let Some(host) = request.hostname() else {
            warn!(url = %request.url, "request URL has no host");
            return RequestAction::Respond(host_not_found_response());
        };

        match self.checker.check_host(&host).await {
            Verdict::Allow => {
                self.log_allowed("request", request.url.as_str());
                RequestAction::Forward
            },
            Verdict::Deny(addr) => {
                warn!(host = %host, addr = %addr, "rejected host that resolves to private IP");
                RequestAction::Respond(private_ip_response())
            },
            Verdict::ResolutionError(e) => {
                warn!(host = %host, error = %e, "host resolution failed");
                RequestAction::Respond(host_not_found_response())
            },
        }
    }
}

#[async_trait]
impl ConnectHook for SsrfPolicy {
    async fn on_connect(&self, hostport: &str) -> (ConnectAction, String) {
        let Some((host, _port)) = split_host_port(hostport) else {
            warn!(dest = %hostport, "rejected malformed CONNECT target");
            return (ConnectAction::Reject, hostport.to_string());
        };

        let action = match self.checker.check_host(host).await {
            Verdict::Allow => {
                self.log_allowed("connect", hostport);
                ConnectAction::Accept
            },
            Verdict::Deny(addr) => {
                warn!(dest = %hostport, addr = %addr, "rejected host that resolves to private IP");
                ConnectAction::Reject
            },
            Verdict::ResolutionError(e) => {
                warn!(dest = %hostport, error = %e, "host resolution failed");
                ConnectAction::Reject
            },
        };
        (action, hostport.to_string())
    }
}

/// Split `host:port`, `[v6]:port`. Returns `None` for anything else,
/// including an unbracketed IPv6 host.
fn split_host_port(hostport: &str) -> Option<(&str, &str)> {
    let colon = hostport.rfind(':')?;
    let (host, rest) = if let Some(inner) = hostport.strip_prefix('[') {
        let close = inner.find(']')?;
        // `]` must sit immediately before the port separator.
        if close + 2 != colon {
            return None;
        }
        (&inner[..close], &hostport[close + 2..])
    } else {
        let host = &hostport[..colon];
        if host.contains(':') {
            return None;
        }
        (host, &hostport[colon..])
    };
    if host.contains(['[', ']']) || rest.contains(['[', ']']) {
        return None;
    }
    Some((host, &hostport[colon + 1..]))
}
