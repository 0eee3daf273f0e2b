// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection's timer ensemble.
//!
//! Every timer lives here as a plain deadline; the embedding loop
//! polls `next_expiration` and calls the connection back when the
//! earliest deadline elapses. Cancellation is idempotent and
//! rescheduling is cancel-then-set.

use weft_quic_core::time::{Timer, Timestamp};

#[derive(Debug, Default)]
pub struct Timers {
    /// Closes the connection when nothing is sent or received
    pub idle: Timer,
    /// Schedules a PING before the idle deadline
    pub keepalive: Timer,
    /// Loss detection: time-threshold losses or PTO
    pub loss: Timer,
    /// Delayed-ACK deadline across spaces
    pub ack_delay: Timer,
    /// Outstanding PATH_CHALLENGE deadline
    pub path_validation: Timer,
    /// Post-close drain period
    pub drain: Timer,
    /// Application ping-timeout surface
    pub ping: Timer,
    /// Re-enter the write loop after yielding mid-data
    pub excess_write: Timer,
}

impl Timers {
    /// The earliest armed deadline, if any
    pub fn next_expiration(&self) -> Option<Timestamp> {
        [
            &self.idle,
            &self.keepalive,
            &self.loss,
            &self.ack_delay,
            &self.path_validation,
            &self.drain,
            &self.ping,
            &self.excess_write,
        ]
        .into_iter()
        .filter_map(Timer::expiration)
        .min()
    }

    pub fn cancel_all(&mut self) {
        self.idle.cancel();
        self.keepalive.cancel();
        self.loss.cancel();
        self.ack_delay.cancel();
        self.path_validation.cancel();
        self.drain.cancel();
        self.ping.cancel();
        self.excess_write.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use weft_quic_core::time::{Clock, NoopClock};

    #[test]
    fn earliest_deadline_wins() {
        let now = NoopClock.get_time();
        let mut timers = Timers::default();
        assert_eq!(timers.next_expiration(), None);

        timers.idle.set(now + Duration::from_secs(30));
        timers.loss.set(now + Duration::from_millis(20));
        timers.ack_delay.set(now + Duration::from_millis(25));
        assert_eq!(timers.next_expiration(), Some(now + Duration::from_millis(20)));

        timers.loss.cancel();
        assert_eq!(timers.next_expiration(), Some(now + Duration::from_millis(25)));

        timers.cancel_all();
        assert_eq!(timers.next_expiration(), None);
    }
}
