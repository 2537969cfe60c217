// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session validity and identifier rotation policy.
//!
//! Rotation retires an identifier without invalidating it immediately: the
//! old data is marked `OBSOLETE` with an `EXPIRES` deadline
//! [`ROTATION_GRACE_SECS`] in the future, so requests already in flight
//! with the old identifier keep working. Once the deadline passes, a request
//! presenting the old identifier finds the session invalid and it is
//! destroyed.
//!
//! Routine rotation is probabilistic ([`REGENERATE_PERCENT`] per validated
//! request) rather than clock-scheduled, which bounds identifier lifetime
//! without synchronising rotations across sessions.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::config::SessionFlags;
use crate::store::{SessionData, EXPIRES_KEY, OBSOLETE_KEY};

/// Seconds a retired identifier stays valid after rotation starts.
pub const ROTATION_GRACE_SECS: i64 = 10;

/// Chance, in percent, that a validated request rotates its identifier.
pub const REGENERATE_PERCENT: u32 = 5;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Shared clones see the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    seconds: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            seconds: Arc::new(AtomicI64::new(start.timestamp())),
        }
    }

    pub fn advance(&self, secs: i64) {
        self.seconds.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.seconds.load(Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}

/// Decides whether session data is still valid and when to rotate.
pub struct RotationPolicy {
    flags: Arc<SessionFlags>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
}

impl RotationPolicy {
    /// Policy with wall-clock time and an entropy-seeded RNG.
    pub fn new(flags: Arc<SessionFlags>) -> Self {
        Self::with_parts(flags, Arc::new(SystemClock), StdRng::from_entropy())
    }

    pub fn with_parts(flags: Arc<SessionFlags>, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self { flags, clock, rng }
    }

    /// Replace the RNG with a deterministic one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether the data may keep being used.
    ///
    /// With rotation disabled this is always true. Otherwise data is invalid
    /// when `OBSOLETE` is present without `EXPIRES`, when `EXPIRES` is not a
    /// timestamp, or when `EXPIRES` lies in the past.
    pub fn is_valid(&self, data: &SessionData) -> bool {
        if !self.flags.rotation_enabled() {
            return true;
        }

        if data.contains(OBSOLETE_KEY) && !data.contains(EXPIRES_KEY) {
            return false;
        }

        if data.contains(EXPIRES_KEY) {
            return match data.expires_at() {
                Some(expires) => expires >= self.now().timestamp(),
                None => false,
            };
        }

        true
    }

    /// Draw from [1, 100] and report whether this request should rotate.
    pub fn should_randomly_regenerate(&mut self) -> bool {
        if !self.flags.rotation_enabled() {
            return false;
        }
        self.rng.gen_range(1..=100) <= REGENERATE_PERCENT
    }

    /// Mark `data` as being rotated away from.
    ///
    /// Returns false without touching the data if a rotation already started.
    pub fn begin_rotation(&self, data: &mut SessionData) -> bool {
        if data.is_obsolete() {
            return false;
        }
        let expires = self.now() + Duration::seconds(ROTATION_GRACE_SECS);
        data.insert(OBSOLETE_KEY, true);
        data.insert(EXPIRES_KEY, expires.timestamp());
        true
    }

    /// Strip the rotation markers from the copy carried to the new identifier.
    pub fn complete_rotation(data: &mut SessionData) {
        data.remove(OBSOLETE_KEY);
        data.remove(EXPIRES_KEY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_policy(rotation: bool) -> (RotationPolicy, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let flags = Arc::new(SessionFlags::new(rotation, true));
        let policy = RotationPolicy::new(flags)
            .with_clock(Arc::new(clock.clone()))
            .with_seed(7);
        (policy, clock)
    }

    #[test]
    fn test_fresh_data_is_valid() {
        let (policy, _) = make_policy(true);
        assert!(policy.is_valid(&SessionData::new()));
    }

    #[test]
    fn test_obsolete_without_expires_is_invalid() {
        let (policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert(OBSOLETE_KEY, true);
        assert!(!policy.is_valid(&data));
    }

    #[test]
    fn test_past_expiry_is_invalid() {
        let (policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert(EXPIRES_KEY, policy.now().timestamp() - 10);
        assert!(!policy.is_valid(&data));
    }

    #[test]
    fn test_expiry_boundary_is_valid() {
        let (policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert(EXPIRES_KEY, policy.now().timestamp());
        assert!(policy.is_valid(&data));
    }

    #[test]
    fn test_non_numeric_expiry_is_invalid() {
        let (policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert(OBSOLETE_KEY, true);
        data.insert(EXPIRES_KEY, true);
        assert!(!policy.is_valid(&data));
    }

    #[test]
    fn test_grace_window_lapses() {
        let (policy, clock) = make_policy(true);
        let mut data = SessionData::new();
        assert!(policy.begin_rotation(&mut data));
        assert!(policy.is_valid(&data));

        clock.advance(ROTATION_GRACE_SECS);
        assert!(policy.is_valid(&data));

        clock.advance(1);
        assert!(!policy.is_valid(&data));
    }

    #[test]
    fn test_rotation_disabled_bypasses_checks() {
        let (mut policy, _) = make_policy(false);
        let mut data = SessionData::new();
        data.insert(OBSOLETE_KEY, true);
        assert!(policy.is_valid(&data));

        data.insert(EXPIRES_KEY, 0i64);
        assert!(policy.is_valid(&data));

        assert!((0..1000).all(|_| !policy.should_randomly_regenerate()));
    }

    #[test]
    fn test_flag_read_fresh() {
        let (mut policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert(OBSOLETE_KEY, true);
        assert!(!policy.is_valid(&data));

        policy.flags().set_rotation_enabled(false);
        assert!(policy.is_valid(&data));
        assert!(!policy.should_randomly_regenerate());
    }

    #[test]
    fn test_regenerate_rate_about_five_percent() {
        let (mut policy, _) = make_policy(true);
        let hits = (0..10_000).filter(|_| policy.should_randomly_regenerate()).count();
        // 5% of 10,000 is 500 with a standard deviation near 22
        assert!((400..=600).contains(&hits), "observed {} rotations", hits);
    }

    #[test]
    fn test_seeded_draws_are_deterministic() {
        let flags = Arc::new(SessionFlags::default());
        let mut a = RotationPolicy::new(flags.clone()).with_seed(42);
        let mut b = RotationPolicy::new(flags).with_seed(42);
        let draws_a: Vec<bool> = (0..200).map(|_| a.should_randomly_regenerate()).collect();
        let draws_b: Vec<bool> = (0..200).map(|_| b.should_randomly_regenerate()).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_begin_rotation_is_idempotent() {
        let (policy, clock) = make_policy(true);
        let mut data = SessionData::new();
        assert!(policy.begin_rotation(&mut data));
        let first_expiry = data.expires_at();

        clock.advance(3);
        assert!(!policy.begin_rotation(&mut data));
        assert_eq!(data.expires_at(), first_expiry);
    }

    #[test]
    fn test_complete_rotation_clears_markers() {
        let (policy, _) = make_policy(true);
        let mut data = SessionData::new();
        data.insert("cart", 2);
        policy.begin_rotation(&mut data);

        RotationPolicy::complete_rotation(&mut data);
        assert!(!data.contains(OBSOLETE_KEY));
        assert!(!data.contains(EXPIRES_KEY));
        assert!(data.contains("cart"));
    }
}
