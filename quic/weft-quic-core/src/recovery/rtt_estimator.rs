// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumberSpace, time::Timestamp};
use core::{
    cmp::{max, min},
    time::Duration,
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1 millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    /// Latest RTT sample, raw
    latest_rtt: Duration,
    /// Peer-reported delay attached to the latest sample
    latest_ack_delay: Duration,
    /// Minimum raw RTT observed over the connection lifetime
    min_rtt: Duration,
    /// Minimum RTT net of acknowledgment delay; `None` until a sample
    /// whose ack delay does not exceed the raw RTT arrives
    min_rtt_no_ack_delay: Option<Duration>,
    /// Exponentially-weighted moving average
    smoothed_rtt: Duration,
    /// Mean deviation of samples from the smoothed value
    rttvar: Duration,
    /// The peer's max_ack_delay transport parameter
    max_ack_delay: Duration,
    first_sample_time: Option<Timestamp>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    #[inline]
    pub fn new(initial_rtt: Duration) -> Self {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = kInitialRtt
        //# rttvar = kInitialRtt / 2
        Self {
            latest_rtt: initial_rtt,
            latest_ack_delay: Duration::ZERO,
            min_rtt: initial_rtt,
            min_rtt_no_ack_delay: None,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            max_ack_delay: Duration::ZERO,
            first_sample_time: None,
        }
    }

    /// Carries max_ack_delay over to a fresh estimator for a new path
    #[inline]
    pub fn for_new_path(&self, initial_rtt: Duration) -> Self {
        let mut estimator = Self::new(initial_rtt);
        estimator.max_ack_delay = self.max_ack_delay;
        estimator
    }

    #[inline]
    pub fn on_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.max_ack_delay = max_ack_delay;
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn latest_ack_delay(&self) -> Duration {
        self.latest_ack_delay
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn min_rtt_no_ack_delay(&self) -> Option<Duration> {
        self.min_rtt_no_ack_delay
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    #[inline]
    pub fn has_rtt_sample(&self) -> bool {
        self.first_sample_time.is_some()
    }

    pub fn update_rtt(
        &mut self,
        mut ack_delay: Duration,
        rtt_sample: Duration,
        timestamp: Timestamp,
        is_handshake_confirmed: bool,
        space: PacketNumberSpace,
    ) {
        self.latest_rtt = rtt_sample;
        self.latest_ack_delay = ack_delay;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MAY ignore the acknowledgment delay for Initial packets, since
        //#    these acknowledgments are not delayed by the peer
        if space.is_initial() {
            ack_delay = Duration::ZERO;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  SHOULD ignore the peer's max_ack_delay until the handshake is
        //#    confirmed;
        if is_handshake_confirmed {
            ack_delay = min(ack_delay, self.max_ack_delay);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        if self.first_sample_time.is_some() {
            self.min_rtt = min(self.min_rtt, rtt_sample);
        } else {
            self.min_rtt = rtt_sample;
        }

        // the delay-adjusted sample is only meaningful when the
        // reported delay fits inside the measured round trip
        if ack_delay <= rtt_sample {
            let no_ack_delay = rtt_sample - ack_delay;
            self.min_rtt_no_ack_delay = Some(
                self.min_rtt_no_ack_delay
                    .map_or(no_ack_delay, |current| min(current, no_ack_delay)),
            );
        }

        if self.first_sample_time.is_none() {
            self.first_sample_time = Some(timestamp);
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# On the first RTT sample after initialization, smoothed_rtt and rttvar
            //# are set as follows:
            //#
            //# smoothed_rtt = latest_rtt
            //# rttvar = latest_rtt / 2
            self.smoothed_rtt = rtt_sample;
            self.rttvar = rtt_sample / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        let adjusted_rtt = if self.min_rtt + ack_delay <= rtt_sample {
            rtt_sample - ack_delay
        } else {
            rtt_sample
        };

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        let rttvar_sample = if self.smoothed_rtt > adjusted_rtt {
            self.smoothed_rtt - adjusted_rtt
        } else {
            adjusted_rtt - self.smoothed_rtt
        };
        self.rttvar = self.rttvar * 3 / 4 + rttvar_sample / 4;
        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay

    /// One PTO period, before exponential backoff
    pub fn pto_period(&self, space: PacketNumberSpace) -> Duration {
        let mut period = self.smoothed_rtt + max(4 * self.rttvar, K_GRANULARITY);
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number spaces,
        //# the max_ack_delay in the PTO period computation is set to 0
        if space.is_application_data() {
            period += self.max_ack_delay;
        }
        period
    }

    /// The PTO period after `pto_count` consecutive expirations
    pub fn pto_period_backoff(&self, space: PacketNumberSpace, pto_count: u32) -> Duration {
        self.pto_period(space)
            .saturating_mul(2u32.saturating_pow(pto_count.min(16)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, NoopClock};

    const MS: Duration = Duration::from_millis(1);

    fn confirmed_update(estimator: &mut RttEstimator, rtt_ms: u32, ack_delay_ms: u32) {
        estimator.update_rtt(
            ack_delay_ms * MS,
            rtt_ms * MS,
            NoopClock.get_time(),
            true,
            PacketNumberSpace::ApplicationData,
        );
    }

    #[test]
    fn baseline_sample() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(25 * MS);
        confirmed_update(&mut estimator, 31, 5);

        assert_eq!(estimator.latest_rtt(), 31 * MS);
        assert_eq!(estimator.latest_ack_delay(), 5 * MS);
        assert_eq!(estimator.min_rtt(), 31 * MS);
        assert_eq!(estimator.min_rtt_no_ack_delay(), Some(26 * MS));
        assert_eq!(estimator.smoothed_rtt(), 31 * MS);
    }

    #[test]
    fn ack_delay_exceeding_rtt_leaves_adjusted_min_unset() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(30 * MS);
        confirmed_update(&mut estimator, 25, 26);

        assert_eq!(estimator.min_rtt(), 25 * MS);
        assert_eq!(estimator.min_rtt_no_ack_delay(), None);
    }

    #[test]
    fn zero_time_sample() {
        let mut estimator = RttEstimator::default();
        confirmed_update(&mut estimator, 0, 0);

        assert_eq!(estimator.min_rtt(), estimator.min_rtt_no_ack_delay().unwrap());
    }

    #[test]
    fn smoothing_weights() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(10 * MS);
        confirmed_update(&mut estimator, 500, 0);
        assert_eq!(estimator.smoothed_rtt(), 500 * MS);
        assert_eq!(estimator.rttvar(), 250 * MS);

        confirmed_update(&mut estimator, 800, 10);
        // adjusted sample is 790ms: 500 * 7/8 + 790 / 8 = 536.25ms
        assert_eq!(estimator.smoothed_rtt(), Duration::from_micros(536_250));
        assert_eq!(estimator.min_rtt(), 500 * MS);
    }

    #[test]
    fn initial_space_ignores_ack_delay() {
        let mut estimator = RttEstimator::default();
        estimator.update_rtt(
            50 * MS,
            100 * MS,
            NoopClock.get_time(),
            false,
            PacketNumberSpace::Initial,
        );
        // ack delay dropped entirely for Initial
        assert_eq!(estimator.min_rtt_no_ack_delay(), Some(100 * MS));
    }

    #[test]
    fn pto_backoff_doubles() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(25 * MS);
        confirmed_update(&mut estimator, 100, 0);
        let base = estimator.pto_period(PacketNumberSpace::ApplicationData);
        assert_eq!(
            estimator.pto_period_backoff(PacketNumberSpace::ApplicationData, 2),
            base * 4
        );
        // handshake space omits max_ack_delay
        assert_eq!(
            estimator.pto_period(PacketNumberSpace::Handshake) + 25 * MS,
            base
        );
    }
}
