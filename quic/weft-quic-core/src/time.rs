// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Monotonic time for the transport.
//!
//! Protocol logic never reads an OS clock directly; the embedding
//! loop samples its `Clock` once per tick and threads the resulting
//! `Timestamp` through every call.

use core::{
    fmt,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

/// A point on the clock owned by the event loop.
///
/// Internally a `Duration` since the clock's epoch. Timestamps from
/// different clocks must never be mixed; the transport only ever sees
/// one clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    #[inline]
    pub const fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    #[inline]
    pub const fn as_duration(self) -> Duration {
        self.0
    }

    /// Returns the time elapsed since `earlier`, or zero when
    /// `earlier` is in the future
    #[inline]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    #[inline]
    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.0.checked_sub(duration).map(Self)
    }

    /// Returns true if `self` occurs at or before `other`
    #[inline]
    pub fn has_elapsed(self, now: Self) -> bool {
        self <= now
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    #[inline]
    fn add(self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, duration: Duration) {
        self.0 += duration;
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, earlier: Timestamp) -> Duration {
        self.0
            .checked_sub(earlier.0)
            .expect("subtracted timestamp is later than self")
    }
}

/// A source of `Timestamp`s
pub trait Clock {
    fn get_time(&self) -> Timestamp;
}

/// A clock which always returns the epoch; useful where a timestamp
/// is required but its value does not matter
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopClock;

impl Clock for NoopClock {
    #[inline]
    fn get_time(&self) -> Timestamp {
        // offset from zero so subtractions have room
        Timestamp(Duration::from_secs(1))
    }
}

pub mod testing {
    use super::*;
    use core::cell::Cell;

    /// A manually advanced clock for deterministic tests
    #[derive(Debug)]
    pub struct Clock {
        now: Cell<Timestamp>,
    }

    impl Default for Clock {
        fn default() -> Self {
            Self {
                now: Cell::new(Timestamp(Duration::from_secs(1))),
            }
        }
    }

    impl Clock {
        pub fn inc_by(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }
    }

    impl super::Clock for Clock {
        fn get_time(&self) -> Timestamp {
            self.now.get()
        }
    }
}

/// A cancellable deadline.
///
/// The transport's timer ensemble is a fixed set of these; the
/// embedding loop polls `next_expiration` across all timers and calls
/// back into the transport when the earliest one elapses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timer {
    expiration: Option<Timestamp>,
}

impl Timer {
    /// Sets the timer to expire at `time`, replacing any armed deadline
    #[inline]
    pub fn set(&mut self, time: Timestamp) {
        self.expiration = Some(time);
    }

    /// Cancels the timer; cancelling an idle timer is a no-op
    #[inline]
    pub fn cancel(&mut self) {
        self.expiration = None;
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.expiration.is_some()
    }

    #[inline]
    pub fn expiration(&self) -> Option<Timestamp> {
        self.expiration
    }

    /// Returns true if the timer is armed and `now` has reached it
    #[inline]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiration
            .map(|expiration| expiration.has_elapsed(now))
            .unwrap_or(false)
    }

    /// Cancels and reports expiry in one step, so a fired timer
    /// cannot be observed twice
    #[inline]
    pub fn poll_expiration(&mut self, now: Timestamp) -> bool {
        if self.is_expired(now) {
            self.cancel();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_poll_consumes_expiry() {
        let clock = testing::Clock::default();
        let mut timer = Timer::default();
        assert!(!timer.poll_expiration(clock.get_time()));

        timer.set(clock.get_time() + Duration::from_millis(5));
        assert!(!timer.poll_expiration(clock.get_time()));
        clock.inc_by(Duration::from_millis(5));
        assert!(timer.poll_expiration(clock.get_time()));
        // a fired timer disarms itself
        assert!(!timer.poll_expiration(clock.get_time()));
    }

    #[test]
    fn saturating_duration_since() {
        let a = Timestamp(Duration::from_millis(10));
        let b = Timestamp(Duration::from_millis(25));
        assert_eq!(b.saturating_duration_since(a), Duration::from_millis(15));
        assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    }
}
