// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Integrity Controls
//!
//! ## Controls Implemented
//!
//! - **Fingerprinting**: user agent and masked client address are recorded on
//!   first use; a mismatch wipes the session and forces a new identifier
//! - **Identifier rotation**: 5% of validated requests move the session to a
//!   fresh identifier; the old one stays usable for a 10 second grace window
//! - **Expiry**: retired identifiers presented after the grace window are
//!   destroyed
//! - **Audit logging**: every transition is emitted as a [`SessionEvent`]
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use sessionguard::config::SessionFlags;
//! use sessionguard::request::RequestContext;
//! use sessionguard::security::{SessionManager, StartOptions};
//! use sessionguard::store::MemoryStore;
//! use sessionguard::transport::CookieTransport;
//!
//! let store = Arc::new(MemoryStore::new());
//! let request = RequestContext::new()
//!     .with_remote_addr("203.0.113.7")
//!     .with_user_agent("curl/8.0")
//!     .with_server_name("example.com");
//!
//! let mut session = SessionManager::new(
//!     store,
//!     CookieTransport::new(),
//!     request,
//!     Arc::new(SessionFlags::default()),
//! );
//! session.start("shop", StartOptions::default()).unwrap();
//! session.set("cart", 3).unwrap();
//!
//! let set_cookie = session.transport().set_cookie_header().unwrap();
//! assert!(set_cookie.starts_with("shop_Session="));
//! ```

pub mod fingerprint;
pub mod locks;
pub mod rotation;
pub mod session_manager;

pub use fingerprint::{Fingerprint, HijackSignal};
pub use locks::{resilient_read, resilient_write};
pub use rotation::{Clock, ManualClock, RotationPolicy, SystemClock, REGENERATE_PERCENT, ROTATION_GRACE_SECS};
pub use session_manager::{SessionEvent, SessionManager, SessionState, StartOptions};
