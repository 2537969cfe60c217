// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request metadata consumed by the session core.
//!
//! The core never reads ambient process state: the client address, user
//! agent, declared host and HTTPS flag are captured once per request into a
//! [`RequestContext`] and handed to the session manager.

use axum::http::{header, HeaderMap};
use std::net::SocketAddr;

/// Read-only per-request inputs to fingerprinting and cookie defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Client address as text, if known.
    pub remote_addr: Option<String>,
    /// Raw `User-Agent` header, if sent.
    pub user_agent: Option<String>,
    /// Host name the request was addressed to (no port).
    pub server_name: String,
    /// Whether the request arrived over HTTPS.
    pub https: bool,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Build a context from HTTP request parts.
    ///
    /// IPv4-mapped IPv6 peers (`::ffff:1.2.3.4`) are reported as plain IPv4
    /// so address masking behaves the same on dual-stack listeners.
    /// `https` comes from the listener, or from `X-Forwarded-Proto: https`
    /// when `trust_forwarded_proto` is set.
    pub fn from_http(
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        https: bool,
        trust_forwarded_proto: bool,
    ) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let server_name = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(strip_port)
            .unwrap_or_default();

        let forwarded_https = trust_forwarded_proto
            && headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|proto| proto.eq_ignore_ascii_case("https"));

        Self {
            remote_addr: peer.map(|addr| addr.ip().to_canonical().to_string()),
            user_agent,
            server_name,
            https: https || forwarded_https,
        }
    }
}

/// Drop a `:port` suffix from a Host header value, leaving IPv6 literals intact.
fn strip_port(host: &str) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((addr, _)) => format!("[{}]", addr),
            None => host.to_string(),
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host.to_string(),
    }
}
