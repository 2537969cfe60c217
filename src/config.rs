// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration
//!
//! Two layers:
//!
//! - [`SessionFlags`]: the rotation and address-check switches. They are
//!   process-wide and read fresh on every evaluation, so flipping one at
//!   runtime takes effect on the next request without a restart.
//! - [`GuardConfig`]: everything else the server needs, loaded from
//!   `~/.sessionguard/config.json` with `SESSIONGUARD_*` environment
//!   overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::store::DEFAULT_IDLE_TIMEOUT_SECS;

/// Runtime feature switches for the session core.
#[derive(Debug)]
pub struct SessionFlags {
    rotation: AtomicBool,
    address_check: AtomicBool,
}

impl SessionFlags {
    pub fn new(rotation: bool, address_check: bool) -> Self {
        Self {
            rotation: AtomicBool::new(rotation),
            address_check: AtomicBool::new(address_check),
        }
    }

    /// Whether expiry checks and identifier rotation are active.
    pub fn rotation_enabled(&self) -> bool {
        self.rotation.load(Ordering::SeqCst)
    }

    pub fn set_rotation_enabled(&self, enabled: bool) {
        self.rotation.store(enabled, Ordering::SeqCst);
        tracing::info!(rotation_enabled = enabled, "Session rotation flag changed");
    }

    /// Whether the masked client address is part of the fingerprint.
    pub fn address_check_enabled(&self) -> bool {
        self.address_check.load(Ordering::SeqCst)
    }

    pub fn set_address_check_enabled(&self, enabled: bool) {
        self.address_check.store(enabled, Ordering::SeqCst);
        tracing::info!(address_check_enabled = enabled, "Session address-check flag changed");
    }
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self::new(true, true)
    }
}

static GLOBAL_FLAGS: OnceLock<Arc<SessionFlags>> = OnceLock::new();

/// Get the process-wide flags, initialising them to the defaults on first use.
pub fn global_flags() -> Arc<SessionFlags> {
    GLOBAL_FLAGS
        .get_or_init(|| Arc::new(SessionFlags::default()))
        .clone()
}

/// Server and cookie configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Cookie name prefix; the cookie is sent as `<name>_Session`.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Cookie lifetime in seconds, 0 for a browser-session cookie.
    #[serde(default)]
    pub lifetime_secs: u64,
    #[serde(default = "default_path")]
    pub path: String,
    /// Cookie domain. `None` uses the request's host name.
    #[serde(default)]
    pub domain: Option<String>,
    /// Secure attribute override. `None` follows the request's scheme.
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default = "default_true")]
    pub rotation_enabled: bool,
    #[serde(default = "default_true")]
    pub address_check_enabled: bool,
    /// Refuse client-presented identifiers the store does not know.
    #[serde(default = "default_true")]
    pub strict_identifiers: bool,
    /// Honour `X-Forwarded-Proto` when deciding whether a request is HTTPS.
    #[serde(default)]
    pub trust_forwarded_proto: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How often retired and idle sessions are reclaimed.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
    /// Seconds without a request after which a session is dropped, 0 to keep forever.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_cookie_name() -> String {
    "app".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8790
}

fn default_purge_interval_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            lifetime_secs: 0,
            path: default_path(),
            domain: None,
            secure: None,
            rotation_enabled: true,
            address_check_enabled: true,
            strict_identifiers: true,
            trust_forwarded_proto: false,
            bind_address: default_bind_address(),
            port: default_port(),
            purge_interval_secs: default_purge_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl GuardConfig {
    /// Flags initialised from this configuration.
    pub fn flags(&self) -> SessionFlags {
        SessionFlags::new(self.rotation_enabled, self.address_check_enabled)
    }

    /// Apply `SESSIONGUARD_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("SESSIONGUARD_COOKIE_NAME").filter(|v| !v.is_empty()) {
            self.cookie_name = name;
        }
        if let Some(enabled) = lookup("SESSIONGUARD_ROTATION").and_then(|v| parse_bool(&v)) {
            self.rotation_enabled = enabled;
        }
        if let Some(enabled) = lookup("SESSIONGUARD_ADDRESS_CHECK").and_then(|v| parse_bool(&v)) {
            self.address_check_enabled = enabled;
        }
        if let Some(enabled) = lookup("SESSIONGUARD_STRICT_IDS").and_then(|v| parse_bool(&v)) {
            self.strict_identifiers = enabled;
        }
        if let Some(port) = lookup("SESSIONGUARD_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(secs) = lookup("SESSIONGUARD_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.idle_timeout_secs = secs;
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(value = %value, "Ignoring unrecognised boolean override");
            None
        }
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".sessionguard").join("config.json"))
}

/// Load configuration from `path`, or defaults when the file does not exist.
pub fn load_config_from(path: &Path) -> Result<GuardConfig> {
    if !path.exists() {
        return Ok(GuardConfig::default());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// Load configuration from the default location and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<GuardConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config_from(&default_config_path()?)?,
    };
    config.apply_env_overrides();
    Ok(config)
}
