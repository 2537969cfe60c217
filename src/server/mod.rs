// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Demo HTTP server
//!
//! Exposes a session-backed key/value API so the lifecycle can be exercised
//! with any HTTP client. Every request runs the full session start (hijack
//! check, validity check, rotation draw) and returns the current identifier
//! in `Set-Cookie` whenever it changed.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /session` - Session summary (state, non-reserved keys)
//! - `GET /session/:key` - Read a value
//! - `PUT /session/:key` - Store a JSON value
//! - `DELETE /session/:key` - Remove a value
//! - `POST /session/regenerate` - Rotate the identifier now
//! - `POST /session/destroy` - Clear the session and reissue
//!
//! # Example
//!
//! ```no_run
//! use sessionguard::config::GuardConfig;
//! use sessionguard::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let server = Server::new(GuardConfig::default());
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GuardConfig, SessionFlags};
use crate::errors::{ApiResult, UserError};
use crate::request::RequestContext;
use crate::security::{SessionManager, SessionState, StartOptions};
use crate::store::{MemoryStore, EXPIRES_KEY, IP_ADDRESS_KEY, OBSOLETE_KEY, USER_AGENT_KEY};
use crate::transport::CookieTransport;
use crate::utils::mask_identifier;

// Maximum request body size (64KB)
const MAX_BODY_SIZE: usize = 64 * 1024;
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Keys the HTTP API refuses to write or delete.
const RESERVED_KEYS: [&str; 4] = [IP_ADDRESS_KEY, USER_AGENT_KEY, OBSOLETE_KEY, EXPIRES_KEY];

/// Server state shared across handlers.
pub struct AppState {
    pub config: GuardConfig,
    pub store: Arc<MemoryStore>,
    /// Process-wide feature flags, read fresh on every request.
    pub flags: Arc<SessionFlags>,
}

/// Session demo server.
#[derive(Debug)]
pub struct Server {
    config: GuardConfig,
    store: Arc<MemoryStore>,
    flags: Arc<SessionFlags>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl Server {
    /// Create a server with its own store and flags taken from `config`.
    pub fn new(config: GuardConfig) -> Self {
        let flags = Arc::new(config.flags());
        let store = Arc::new(MemoryStore::with_idle_timeout(config.idle_timeout_secs));
        Self { config, store, flags }
    }

    /// Share an existing store.
    pub fn with_store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = store;
        self
    }

    /// Share existing flags (e.g. the process-wide ones).
    pub fn with_flags(mut self, flags: Arc<SessionFlags>) -> Self {
        self.flags = flags;
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            flags: self.flags.clone(),
        });

        Router::new()
            .route("/health", get(health_handler))
            .route("/session", get(summary_handler))
            .route("/session/regenerate", post(regenerate_handler))
            .route("/session/destroy", post(destroy_handler))
            .route(
                "/session/:key",
                get(get_value_handler).put(put_value_handler).delete(delete_value_handler),
            )
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let router = self.build_router();
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);

        tracing::info!("Starting server on {}", addr);

        // Security warning if binding to all interfaces
        if self.config.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes session data to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    Try stopping other instances or use a different port with: sessionguard serve --port <PORT>",
                    self.config.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        let purge = spawn_purge_task(
            self.store.clone(),
            self.flags.clone(),
            Duration::from_secs(self.config.purge_interval_secs.max(1)),
        );

        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        purge.abort();
        result?;
        Ok(())
    }
}

/// Periodically drop idle sessions and retired identifiers whose grace
/// window has ended.
fn spawn_purge_task(
    store: Arc<MemoryStore>,
    flags: Arc<SessionFlags>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            purge_once(&store, &flags, Utc::now());
        }
    })
}

/// One reclaim pass; returns the number of identifiers removed.
fn purge_once(store: &MemoryStore, flags: &SessionFlags, now: DateTime<Utc>) -> usize {
    let idle = store.purge_idle(now);
    // Expiry markers carry no meaning while rotation is off
    let retired = if flags.rotation_enabled() {
        store.purge_expired(now)
    } else {
        0
    };
    idle + retired
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
    rotation_enabled: bool,
    address_check_enabled: bool,
}

#[derive(Serialize)]
struct SummaryResponse {
    /// Masked identifier.
    session: String,
    state: Option<SessionState>,
    rotated: bool,
    keys: Vec<String>,
}

#[derive(Serialize)]
struct ValueResponse {
    key: String,
    value: Option<Value>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.store.len(),
        rotation_enabled: state.flags.rotation_enabled(),
        address_check_enabled: state.flags.address_check_enabled(),
    })
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let session = open_session(&state, &headers, peer)?;

    let mut keys: Vec<String> = session
        .snapshot()
        .keys()
        .filter(|k| !RESERVED_KEYS.contains(k))
        .map(str::to_string)
        .collect();
    keys.sort();

    let body = SummaryResponse {
        session: session.id().map(mask_identifier).unwrap_or_default(),
        state: session.state(),
        rotated: session.rotation_count() > 0,
        keys,
    };
    Ok(with_session_cookie(Json(body).into_response(), &session))
}

async fn get_value_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let session = open_session(&state, &headers, peer)?;

    let response = match session.get(&key) {
        Some(value) => Json(ValueResponse { key, value: Some(value) }).into_response(),
        None => UserError::not_found("Session key").into_response(),
    };
    Ok(with_session_cookie(response, &session))
}

async fn put_value_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> ApiResult<Response> {
    let session = open_session(&state, &headers, peer)?;

    let response = if is_reserved(&key) {
        UserError::invalid_request("This key is managed by the server.", Some("key"), Some(&key))
            .into_response()
    } else {
        session.set(key.clone(), value.clone())?;
        Json(ValueResponse { key, value: Some(value) }).into_response()
    };
    Ok(with_session_cookie(response, &session))
}

async fn delete_value_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let session = open_session(&state, &headers, peer)?;

    let response = if is_reserved(&key) {
        UserError::invalid_request("This key is managed by the server.", Some("key"), Some(&key))
            .into_response()
    } else {
        let value = session.remove(&key);
        Json(ValueResponse { key, value }).into_response()
    };
    Ok(with_session_cookie(response, &session))
}

async fn regenerate_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut session = open_session(&state, &headers, peer)?;
    session.regenerate_session()?;

    let body = serde_json::json!({ "rotated": session.rotation_count() > 0 });
    Ok(with_session_cookie(Json(body).into_response(), &session))
}

async fn destroy_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut session = open_session(&state, &headers, peer)?;
    session.destroy_session()?;

    let body = serde_json::json!({ "destroyed": true });
    Ok(with_session_cookie(Json(body).into_response(), &session))
}

// =============================================================================
// Utilities
// =============================================================================

/// Build and start the session for one request.
fn open_session(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> ApiResult<SessionManager<CookieTransport>> {
    let request = RequestContext::from_http(
        headers,
        peer.map(|ConnectInfo(addr)| addr),
        false,
        state.config.trust_forwarded_proto,
    );

    let mut session = SessionManager::new(
        state.store.clone(),
        CookieTransport::from_headers(headers),
        request,
        state.flags.clone(),
    )
    .with_strict_identifiers(state.config.strict_identifiers);

    session.start(&state.config.cookie_name, StartOptions::from_config(&state.config))?;
    Ok(session)
}

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Attach `Set-Cookie` if the session issued an identifier during this request.
fn with_session_cookie(mut response: Response, session: &SessionManager<CookieTransport>) -> Response {
    if let Some(cookie) = session.transport().set_cookie_header() {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::error!("Failed to encode Set-Cookie header: {}", e),
        }
    }
    response
}

/// Graceful shutdown signal handler.
///
/// Waits for SIGINT/SIGTERM. If the handlers cannot be installed the server
/// keeps running until killed.
async fn shutdown_signal() {
    // On Unix, listen for SIGINT and SIGTERM
    // On Windows, fall back to Ctrl+C only
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!("Failed to install signal handlers: {}", e);
                    return std::future::pending().await;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            return std::future::pending().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server");
}
