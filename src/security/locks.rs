// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resilient Lock Helpers
//!
//! Session mappings are shared between concurrent requests behind
//! `RwLock`s. If a request handler panics while holding one of them the lock
//! becomes poisoned; refusing every later request for that session would turn
//! one bug into a denial of service. These helpers log the event and recover
//! the guard instead.
//!
//! ```
//! use std::sync::RwLock;
//! use sessionguard::security::locks::{resilient_read, resilient_write};
//!
//! let lock = RwLock::new(42);
//! *resilient_write(&lock) = 100;
//! assert_eq!(*resilient_read(&lock), 100);
//! ```

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "sessionguard::locks",
                event = "LOCK_POISONED_READ",
                "Session lock was poisoned during read acquisition. Recovering data. \
                 A request previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "sessionguard::locks",
                event = "LOCK_POISONED_WRITE",
                "Session lock was poisoned during write acquisition. Recovering data. \
                 A request previously panicked while holding this lock."
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionData;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_write_then_read() {
        let lock = RwLock::new(SessionData::new());
        resilient_write(&lock).insert("cart", 3);
        assert_eq!(resilient_read(&lock).get("cart").and_then(|v| v.as_i64()), Some(3));
    }

    #[test]
    fn test_poisoned_session_still_readable() {
        let lock = Arc::new(RwLock::new(SessionData::new()));
        resilient_write(&lock).insert("user", "alice");

        let lock_clone = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        assert!(lock.is_poisoned());
        assert_eq!(resilient_read(&lock).get_str("user"), Some("alice"));
    }

    #[test]
    fn test_poisoned_session_still_writable() {
        let lock = Arc::new(RwLock::new(SessionData::new()));

        let lock_clone = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        resilient_write(&lock).insert("user", "bob");
        assert_eq!(resilient_read(&lock).get_str("user"), Some("bob"));
    }
}
