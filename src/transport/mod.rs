// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Identifier transport.
//!
//! The session core never invents identifiers. It asks an
//! [`IdentifierTransport`] for the identifier the client presented and asks
//! it to mint a replacement when a session is created, rotated or destroyed.
//! [`CookieTransport`] is the HTTP implementation: it reads the `Cookie`
//! header and renders the `Set-Cookie` header for whatever it issued.
//! `HttpOnly` is always set and cannot be turned off.

use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;

use crate::errors::SessionError;

/// Suffix appended to the application's session name to form the cookie name.
pub const COOKIE_NAME_SUFFIX: &str = "_Session";

/// Bytes of OS randomness per identifier (rendered as hex).
pub const IDENTIFIER_BYTES: usize = 32;

/// Longest identifier accepted from a client.
const MAX_IDENTIFIER_LEN: usize = 256;

/// Longest DNS name.
const MAX_DOMAIN_LEN: usize = 253;

/// Attributes the identifier cookie is sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    /// Full cookie name, including [`COOKIE_NAME_SUFFIX`].
    pub name: String,
    /// Lifetime in seconds; 0 means a browser-session cookie.
    pub lifetime_secs: u64,
    pub path: String,
    /// Empty for a host-only cookie.
    pub domain: String,
    pub secure: bool,
}

impl CookieSettings {
    pub fn new(
        session_name: &str,
        lifetime_secs: u64,
        path: impl Into<String>,
        domain: impl Into<String>,
        secure: bool,
    ) -> Self {
        Self {
            name: format!("{}{}", session_name, COOKIE_NAME_SUFFIX),
            lifetime_secs,
            path: path.into(),
            domain: domain.into(),
            secure,
        }
    }

    /// Always true: identifier cookies are never readable by page scripts.
    pub fn http_only(&self) -> bool {
        true
    }

    /// Render a `Set-Cookie` header value carrying `id`.
    pub fn to_set_cookie(&self, id: &str, now: DateTime<Utc>) -> String {
        let mut cookie = format!("{}={}; Path={}", self.name, id, self.path);

        if !self.domain.is_empty() {
            cookie.push_str(&format!("; Domain={}", self.domain));
        }

        if self.lifetime_secs > 0 {
            let secs = i64::try_from(self.lifetime_secs).unwrap_or(i64::MAX);
            let expires = Duration::try_seconds(secs)
                .and_then(|lifetime| now.checked_add_signed(lifetime))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            cookie.push_str(&format!(
                "; Expires={}; Max-Age={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT"),
                self.lifetime_secs
            ));
        }

        if self.secure {
            cookie.push_str("; Secure");
        }

        if self.http_only() {
            cookie.push_str("; HttpOnly");
        }

        cookie
    }
}

/// Identifier-transport collaborator.
pub trait IdentifierTransport {
    /// Identifier currently associated with `cookie_name`: one issued during
    /// this request if any, else the one the client presented.
    fn identifier(&self, cookie_name: &str) -> Option<String>;

    /// Mint a new identifier, make it current and schedule it for delivery.
    fn issue(&mut self, cookie: &CookieSettings) -> Result<String, SessionError>;
}

/// Mint a new identifier from the OS RNG.
pub fn generate_identifier() -> Result<String, SessionError> {
    let mut bytes = [0u8; IDENTIFIER_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::IdentifierUnavailable(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Whether a client-presented identifier is syntactically acceptable.
pub fn is_well_formed(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_IDENTIFIER_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == ',' || c == '-')
}

/// Whether `domain` may be sent as a cookie `Domain` attribute.
///
/// Accepts host names, IPv4 addresses and bracketed IPv6 literals. The empty
/// string (host-only cookie) is accepted.
pub fn is_valid_domain(domain: &str) -> bool {
    if domain.len() > MAX_DOMAIN_LEN {
        return false;
    }
    if let Some(inner) = domain.strip_prefix('[').and_then(|d| d.strip_suffix(']')) {
        return !inner.is_empty() && inner.chars().all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
    }
    domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Cookie-based transport for one HTTP request.
#[derive(Debug, Clone, Default)]
pub struct CookieTransport {
    presented: HashMap<String, String>,
    issued: Option<(CookieSettings, String)>,
}

impl CookieTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect cookies from every `Cookie` header. The first value for a name wins.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut transport = Self::new();
        for value in headers.get_all(header::COOKIE) {
            if let Ok(value) = value.to_str() {
                transport.add_cookie_header(value);
            }
        }
        transport
    }

    /// Parse one `Cookie` header value (`a=1; b=2`).
    pub fn add_cookie_header(&mut self, value: &str) {
        for pair in value.split(';') {
            if let Some((name, val)) = pair.trim().split_once('=') {
                let val = val.trim().trim_matches('"');
                self.presented
                    .entry(name.trim().to_string())
                    .or_insert_with(|| val.to_string());
            }
        }
    }

    /// Pretend the client presented `id` under `cookie_name`.
    pub fn with_cookie(mut self, cookie_name: impl Into<String>, id: impl Into<String>) -> Self {
        self.presented.insert(cookie_name.into(), id.into());
        self
    }

    /// The identifier issued during this request, with its cookie settings.
    pub fn issued(&self) -> Option<(&CookieSettings, &str)> {
        self.issued.as_ref().map(|(cookie, id)| (cookie, id.as_str()))
    }

    /// `Set-Cookie` value for the issued identifier, if one was issued.
    pub fn set_cookie_header(&self) -> Option<String> {
        self.issued
            .as_ref()
            .map(|(cookie, id)| cookie.to_set_cookie(id, Utc::now()))
    }
}

impl IdentifierTransport for CookieTransport {
    fn identifier(&self, cookie_name: &str) -> Option<String> {
        match &self.issued {
            Some((cookie, id)) if cookie.name == cookie_name => Some(id.clone()),
            _ => self.presented.get(cookie_name).cloned(),
        }
    }

    fn issue(&mut self, cookie: &CookieSettings) -> Result<String, SessionError> {
        let id = generate_identifier()?;
        self.issued = Some((cookie.clone(), id.clone()));
        Ok(id)
    }
}
