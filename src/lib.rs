// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! sessionguard - Session integrity guard
//!
//! Binds a client's session to its user agent and masked network address,
//! wipes the session when either changes, and periodically moves it to a new
//! identifier. Retired identifiers keep working for a short grace window so
//! concurrent requests are not logged out mid-flight.
//!
//! # Core Modules
//!
//! - [`security`] - Lifecycle controller, fingerprinting, rotation policy
//! - [`store`] - Session data and the storage collaborator
//! - [`transport`] - Identifier minting and cookie delivery
//! - [`request`] - Per-request metadata (address, user agent, host, HTTPS)
//! - [`config`] - Runtime flags and server configuration
//! - [`server`] - Demo HTTP server
//! - [`errors`] - Session errors and sanitized HTTP errors

pub mod config;
pub mod errors;
pub mod request;
pub mod security;
pub mod server;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::{global_flags, load_config, GuardConfig, SessionFlags};
pub use errors::{ApiResult, ErrorResponse, SessionError, UserError};
pub use request::RequestContext;
pub use security::{
    HijackSignal, RotationPolicy, SessionEvent, SessionManager, SessionState, StartOptions,
    REGENERATE_PERCENT, ROTATION_GRACE_SECS,
};
pub use server::Server;
pub use store::{MemoryStore, SessionData, SessionHandle, SessionStore};
pub use transport::{CookieSettings, CookieTransport, IdentifierTransport};
pub use utils::mask_sensitive;
