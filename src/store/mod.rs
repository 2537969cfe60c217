// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session storage contract and an in-memory implementation.
//!
//! A store maps identifiers to shared [`SessionData`] handles. Every request
//! bound to the same identifier sees the same mapping, so concurrent writes
//! follow a last-write-wins model. The session core only ever talks to the
//! [`SessionStore`] trait; [`MemoryStore`] is the reference backend used by
//! the demo server and the tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::SessionError;
use crate::security::locks::{resilient_read, resilient_write};

/// Fingerprint: client address recorded at the last reset.
pub const IP_ADDRESS_KEY: &str = "ipAddress";
/// Fingerprint: user agent recorded at the last reset.
pub const USER_AGENT_KEY: &str = "userAgent";
/// Set to `true` once a rotation away from this data has started.
pub const OBSOLETE_KEY: &str = "OBSOLETE";
/// Unix timestamp (seconds) after which obsolete data is no longer valid.
pub const EXPIRES_KEY: &str = "EXPIRES";

/// Key/value data bound to one session identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData {
    values: HashMap<String, Value>,
}

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Get a string-valued key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// True when `OBSOLETE` is present and `true`.
    pub fn is_obsolete(&self) -> bool {
        matches!(self.values.get(OBSOLETE_KEY), Some(Value::Bool(true)))
    }

    /// The `EXPIRES` marker as a unix timestamp, if present and numeric.
    pub fn expires_at(&self) -> Option<i64> {
        self.values.get(EXPIRES_KEY).and_then(Value::as_i64)
    }
}

/// Shared handle to the data bound to one identifier.
pub type SessionHandle = Arc<RwLock<SessionData>>;

/// Storage collaborator: binds identifiers to session data.
pub trait SessionStore: Send + Sync {
    /// Bind storage to `id`, creating an empty mapping if none exists.
    fn open(&self, id: &str) -> Result<SessionHandle, SessionError>;

    /// Whether the store holds data for `id`.
    fn contains(&self, id: &str) -> Result<bool, SessionError>;

    /// Drop the storage bound to `id`. Unknown identifiers are ignored.
    fn destroy(&self, id: &str) -> Result<(), SessionError>;
}

/// Default seconds of inactivity after which a session is reclaimed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1440;

/// One mapping plus the time it was last opened.
#[derive(Debug)]
struct StoredSession {
    handle: SessionHandle,
    last_access: i64,
}

/// In-process session store.
///
/// Entries are reclaimed by [`MemoryStore::purge_expired`] once their
/// rotation grace window has lapsed, and by [`MemoryStore::purge_idle`] once
/// nobody has opened them for the idle timeout.
#[derive(Debug)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    idle_timeout_secs: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT_SECS)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store reclaiming sessions idle for longer than `secs`. 0 never reclaims.
    pub fn with_idle_timeout(secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout_secs: secs,
        }
    }

    pub fn idle_timeout_secs(&self) -> u64 {
        self.idle_timeout_secs
    }

    /// Number of identifiers currently held, including retired ones.
    pub fn len(&self) -> usize {
        resilient_read(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_at(&self, id: &str, now: DateTime<Utc>) -> SessionHandle {
        let mut sessions = resilient_write(&self.sessions);
        let entry = sessions.entry(id.to_string()).or_insert_with(|| StoredSession {
            handle: SessionHandle::default(),
            last_access: now.timestamp(),
        });
        entry.last_access = now.timestamp();
        entry.handle.clone()
    }

    /// Reclaim identifiers whose rotation grace window ended before `now`.
    ///
    /// Returns the number of identifiers removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now.timestamp();
        let removed = self.purge_where(|entry| {
            resilient_read(&entry.handle)
                .expires_at()
                .is_some_and(|expires| expires < cutoff)
        });

        if removed > 0 {
            tracing::debug!(removed, "Reclaimed retired session identifiers");
        }
        removed
    }

    /// Reclaim sessions not opened for longer than the idle timeout.
    ///
    /// Returns the number of identifiers removed.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        if self.idle_timeout_secs == 0 {
            return 0;
        }
        let timeout = i64::try_from(self.idle_timeout_secs).unwrap_or(i64::MAX);
        let cutoff = now.timestamp().saturating_sub(timeout);
        let removed = self.purge_where(|entry| entry.last_access < cutoff);

        if removed > 0 {
            tracing::debug!(removed, "Reclaimed idle sessions");
        }
        removed
    }

    fn purge_where(&self, expired: impl Fn(&StoredSession) -> bool) -> usize {
        let mut sessions = resilient_write(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, entry| !expired(entry));
        before - sessions.len()
    }
}

impl SessionStore for MemoryStore {
    fn open(&self, id: &str) -> Result<SessionHandle, SessionError> {
        Ok(self.open_at(id, Utc::now()))
    }

    fn contains(&self, id: &str) -> Result<bool, SessionError> {
        Ok(resilient_read(&self.sessions).contains_key(id))
    }

    fn destroy(&self, id: &str) -> Result<(), SessionError> {
        resilient_write(&self.sessions).remove(id);
        Ok(())
    }
}
