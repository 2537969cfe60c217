// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Lifecycle Manager
//!
//! One [`SessionManager`] is built per request. [`SessionManager::start`]
//! binds it to the client's identifier and decides what to do with the
//! session:
//!
//! ```text
//! start ──► bound? ──no──► adopt presented id, or mint one
//!             │
//!             ▼
//!        is_valid? ──no──► destroy_session (clear, drop storage, fresh id)
//!             │
//!            yes
//!             ▼
//!        hijack?  ──yes─► clear, record fingerprint, regenerate_session
//!             │
//!             no
//!             ▼
//!        5% draw  ──yes─► regenerate_session
//! ```
//!
//! Lineage states: `Fresh` (no data) → `Active` → `Obsolete` (rotated away
//! from, grace window open) → `Expired` once the window lapses, which is
//! destroyed on the next request and starts a new `Fresh` lineage.
//!
//! Every transition is described by a [`SessionEvent`], logged through
//! `tracing` and kept on the manager for the rest of the request.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::config::{GuardConfig, SessionFlags};
use crate::errors::{sanitize_error_details, SessionError};
use crate::request::RequestContext;
use crate::security::fingerprint::{self, Fingerprint, HijackSignal};
use crate::security::locks::{resilient_read, resilient_write};
use crate::security::rotation::{RotationPolicy, ROTATION_GRACE_SECS};
use crate::store::{SessionData, SessionHandle, SessionStore};
use crate::transport::{is_valid_domain, is_well_formed, CookieSettings, IdentifierTransport};
use crate::utils::mask_identifier;

/// Where the bound data sits in its lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Bound, no data yet
    Fresh,
    /// Validated and in use
    Active,
    /// Rotated away from; still usable until the grace window closes
    Obsolete,
    /// Grace window lapsed or markers corrupt; destroyed on next start
    Expired,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Fresh => write!(f, "FRESH"),
            SessionState::Active => write!(f, "ACTIVE"),
            SessionState::Obsolete => write!(f, "OBSOLETE"),
            SessionState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Session events for audit logging. Identifiers are already masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    /// A new identifier was minted for a client that had none
    Created {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A presented identifier was refused and replaced
    Rejected {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Fingerprint check failed; data wiped and fingerprint re-recorded
    FingerprintReset {
        session_id: String,
        signal: HijackSignal,
        timestamp: DateTime<Utc>,
    },
    /// Identifier rotated, old one kept for the grace window
    Rotated {
        old_session_id: String,
        new_session_id: String,
        grace_secs: i64,
        timestamp: DateTime<Utc>,
    },
    /// Session data failed validation (expired or corrupt markers)
    Invalidated {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Session cleared and reissued under a fresh identifier
    Destroyed {
        old_session_id: String,
        new_session_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Format event for audit log
    pub fn to_audit_string(&self) -> String {
        match self {
            SessionEvent::Created { session_id, timestamp } => {
                format!("{} | SESSION_CREATED | session={}", fmt_ts(timestamp), session_id)
            }
            SessionEvent::Rejected { session_id, timestamp } => {
                format!("{} | SESSION_ID_REJECTED | session={}", fmt_ts(timestamp), session_id)
            }
            SessionEvent::FingerprintReset { session_id, signal, timestamp } => {
                format!(
                    "{} | SESSION_FINGERPRINT_RESET | session={} signal={}",
                    fmt_ts(timestamp),
                    session_id,
                    signal
                )
            }
            SessionEvent::Rotated { old_session_id, new_session_id, grace_secs, timestamp } => {
                format!(
                    "{} | SESSION_ROTATED | old={} new={} grace={}s",
                    fmt_ts(timestamp),
                    old_session_id,
                    new_session_id,
                    grace_secs
                )
            }
            SessionEvent::Invalidated { session_id, timestamp } => {
                format!("{} | SESSION_INVALID | session={}", fmt_ts(timestamp), session_id)
            }
            SessionEvent::Destroyed { old_session_id, new_session_id, timestamp } => {
                format!(
                    "{} | SESSION_DESTROYED | old={} new={}",
                    fmt_ts(timestamp),
                    old_session_id,
                    new_session_id
                )
            }
        }
    }
}

fn fmt_ts(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Cookie attributes for [`SessionManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    /// Cookie lifetime in seconds, 0 for a browser-session cookie.
    pub lifetime_secs: u64,
    pub path: String,
    /// `None` uses the request's host name; `Some("")` sends a host-only cookie.
    pub domain: Option<String>,
    /// `None` follows whether the request arrived over HTTPS.
    pub secure: Option<bool>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            lifetime_secs: 0,
            path: "/".to_string(),
            domain: None,
            secure: None,
        }
    }
}

impl StartOptions {
    pub fn from_config(config: &GuardConfig) -> Self {
        Self {
            lifetime_secs: config.lifetime_secs,
            path: config.path.clone(),
            domain: config.domain.clone(),
            secure: config.secure,
        }
    }

    pub fn with_lifetime(mut self, secs: u64) -> Self {
        self.lifetime_secs = secs;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    /// Fill in request-derived defaults.
    ///
    /// A domain that is not a plain host name or IP address falls back to a
    /// host-only cookie.
    pub fn resolve(&self, name: &str, request: &RequestContext) -> CookieSettings {
        let mut domain = self.domain.clone().unwrap_or_else(|| request.server_name.clone());
        if !is_valid_domain(&domain) {
            tracing::warn!(
                domain = %sanitize_error_details(&domain),
                "Refusing invalid cookie domain, sending host-only cookie"
            );
            domain = String::new();
        }

        CookieSettings::new(
            name,
            self.lifetime_secs,
            self.path.clone(),
            domain,
            self.secure.unwrap_or(request.https),
        )
    }
}

/// Storage bound to the current identifier.
struct Binding {
    id: String,
    handle: SessionHandle,
    cookie: CookieSettings,
}

/// Per-request session controller.
pub struct SessionManager<T: IdentifierTransport> {
    store: Arc<dyn SessionStore>,
    transport: T,
    request: RequestContext,
    policy: RotationPolicy,
    strict_identifiers: bool,
    binding: Option<Binding>,
    events: Vec<SessionEvent>,
}

impl<T: IdentifierTransport> SessionManager<T> {
    /// Create a manager for one request.
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: T,
        request: RequestContext,
        flags: Arc<SessionFlags>,
    ) -> Self {
        Self {
            store,
            transport,
            request,
            policy: RotationPolicy::new(flags),
            strict_identifiers: true,
            binding: None,
            events: Vec::new(),
        }
    }

    /// Replace the rotation policy (clock and RNG injection).
    pub fn with_policy(mut self, policy: RotationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether client-presented identifiers unknown to the store are refused.
    pub fn with_strict_identifiers(mut self, strict: bool) -> Self {
        self.strict_identifiers = strict;
        self
    }

    /// Bind to the client's session and validate it.
    ///
    /// Calling `start` again on a bound manager skips the binding step and
    /// re-runs validation.
    pub fn start(&mut self, name: &str, options: StartOptions) -> Result<(), SessionError> {
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }

        if self.binding.is_none() {
            let cookie = options.resolve(name, &self.request);
            let id = match self.transport.identifier(&cookie.name) {
                Some(id) if self.is_adoptable(&id)? => id,
                presented => {
                    if let Some(id) = presented {
                        self.emit(SessionEvent::Rejected {
                            session_id: mask_identifier(&id),
                            timestamp: self.policy.now(),
                        });
                    }
                    let id = self.transport.issue(&cookie)?;
                    self.emit(SessionEvent::Created {
                        session_id: mask_identifier(&id),
                        timestamp: self.policy.now(),
                    });
                    id
                }
            };
            self.bind(id, cookie)?;
        }

        if self.is_valid() {
            self.initialise()
        } else {
            if let Some(binding) = &self.binding {
                let event = SessionEvent::Invalidated {
                    session_id: mask_identifier(&binding.id),
                    timestamp: self.policy.now(),
                };
                self.emit(event);
            }
            self.destroy_session()
        }
    }

    fn is_adoptable(&self, id: &str) -> Result<bool, SessionError> {
        if !is_well_formed(id) {
            return Ok(false);
        }
        if self.strict_identifiers {
            return self.store.contains(id);
        }
        Ok(true)
    }

    fn bind(&mut self, id: String, cookie: CookieSettings) -> Result<(), SessionError> {
        let handle = self.store.open(&id)?;
        self.binding = Some(Binding { id, handle, cookie });
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::FingerprintReset { signal: HijackSignal::MissingFingerprint, .. } => {
                tracing::debug!("{}", event.to_audit_string());
            }
            SessionEvent::FingerprintReset { .. } | SessionEvent::Rejected { .. } => {
                tracing::warn!("{}", event.to_audit_string());
            }
            SessionEvent::Created { .. } => tracing::debug!("{}", event.to_audit_string()),
            _ => tracing::info!("{}", event.to_audit_string()),
        }
        self.events.push(event);
    }

    /// Hijack check, then the routine rotation draw.
    fn initialise(&mut self) -> Result<(), SessionError> {
        let Some(binding) = &self.binding else {
            return Ok(());
        };
        let handle = binding.handle.clone();
        let session_id = mask_identifier(&binding.id);

        let address_check = self.policy.flags().address_check_enabled();
        let signal = fingerprint::detect(&resilient_read(&handle), &self.request, address_check);

        if let Some(signal) = signal {
            {
                let mut data = resilient_write(&handle);
                data.clear();
                Fingerprint::from_request(&self.request).record(&mut data);
            }
            self.emit(SessionEvent::FingerprintReset {
                session_id,
                signal,
                timestamp: self.policy.now(),
            });
            return self.regenerate_session();
        }

        if self.policy.should_randomly_regenerate() {
            return self.regenerate_session();
        }

        Ok(())
    }

    /// Move the session to a new identifier, keeping its data.
    ///
    /// The old identifier's data is marked obsolete and stays resolvable for
    /// [`ROTATION_GRACE_SECS`]. Does nothing when rotation is disabled, when
    /// nothing is bound, or when the bound data is already obsolete.
    pub fn regenerate_session(&mut self) -> Result<(), SessionError> {
        if !self.policy.flags().rotation_enabled() {
            return Ok(());
        }
        let Some(binding) = &self.binding else {
            return Ok(());
        };

        let carried = {
            let mut data = resilient_write(&binding.handle);
            if !self.policy.begin_rotation(&mut data) {
                tracing::debug!(
                    session = %mask_identifier(&binding.id),
                    "Rotation already in progress, skipping"
                );
                return Ok(());
            }
            let mut carried = data.clone();
            RotationPolicy::complete_rotation(&mut carried);
            carried
        };
        let old_id = binding.id.clone();
        let cookie = binding.cookie.clone();

        let new_id = self.transport.issue(&cookie)?;
        let handle = self.store.open(&new_id)?;
        *resilient_write(&handle) = carried;

        self.emit(SessionEvent::Rotated {
            old_session_id: mask_identifier(&old_id),
            new_session_id: mask_identifier(&new_id),
            grace_secs: ROTATION_GRACE_SECS,
            timestamp: self.policy.now(),
        });
        self.binding = Some(Binding { id: new_id, handle, cookie });
        Ok(())
    }

    /// Clear the session, drop its storage and start over under a new identifier.
    ///
    /// A no-op when nothing is bound.
    pub fn destroy_session(&mut self) -> Result<(), SessionError> {
        let Some(binding) = self.binding.take() else {
            return Ok(());
        };

        resilient_write(&binding.handle).clear();
        self.store.destroy(&binding.id)?;

        let new_id = self.transport.issue(&binding.cookie)?;
        self.emit(SessionEvent::Destroyed {
            old_session_id: mask_identifier(&binding.id),
            new_session_id: mask_identifier(&new_id),
            timestamp: self.policy.now(),
        });
        self.bind(new_id, binding.cookie)
    }

    /// Whether the bound data passes the rotation policy. True when unbound.
    pub fn is_valid(&self) -> bool {
        self.binding
            .as_ref()
            .map_or(true, |b| self.policy.is_valid(&resilient_read(&b.handle)))
    }

    /// Whether the bound data's fingerprint disagrees with this request.
    pub fn is_hijack_attempt(&self) -> bool {
        let address_check = self.policy.flags().address_check_enabled();
        self.binding.as_ref().is_some_and(|b| {
            fingerprint::is_hijack_attempt(&resilient_read(&b.handle), &self.request, address_check)
        })
    }

    /// Lineage state of the bound data, `None` before `start`.
    pub fn state(&self) -> Option<SessionState> {
        let binding = self.binding.as_ref()?;
        let data = resilient_read(&binding.handle);
        let state = if !self.policy.is_valid(&data) {
            SessionState::Expired
        } else if data.is_obsolete() {
            SessionState::Obsolete
        } else if data.is_empty() {
            SessionState::Fresh
        } else {
            SessionState::Active
        };
        Some(state)
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        let binding = self.binding.as_ref()?;
        let value = resilient_read(&binding.handle).get(key).cloned();
        value
    }

    /// Get a value and deserialize it. `None` if absent or of another shape.
    pub fn get_as<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), SessionError> {
        let binding = self.binding.as_ref().ok_or(SessionError::NotStarted)?;
        resilient_write(&binding.handle).insert(key, value);
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| resilient_read(&b.handle).contains(key))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let binding = self.binding.as_ref()?;
        let value = resilient_write(&binding.handle).remove(key);
        value
    }

    /// Copy of the bound data.
    pub fn snapshot(&self) -> SessionData {
        self.binding
            .as_ref()
            .map(|b| resilient_read(&b.handle).clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Currently bound identifier.
    pub fn id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.id.as_str())
    }

    pub fn is_started(&self) -> bool {
        self.binding.is_some()
    }

    pub fn cookie(&self) -> Option<&CookieSettings> {
        self.binding.as_ref().map(|b| &b.cookie)
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Events recorded during this request, oldest first.
    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Number of identifier rotations performed during this request.
    pub fn rotation_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Rotated { .. }))
            .count()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

// ============================================================================
// TESTS
// ============================================================================
