// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plug-in interfaces for congestion control and pacing.
//!
//! The transport owns byte accounting and loss declaration; the
//! controller only decides how much may be in flight and when.

use crate::time::Timestamp;
use core::time::Duration;

/// Information about a freshly sent packet
#[derive(Clone, Copy, Debug)]
pub struct PacketInfo {
    pub sent_bytes: usize,
    pub is_app_limited: bool,
    pub time_sent: Timestamp,
}

pub trait CongestionController: 'static + Send {
    /// Current congestion window in bytes
    fn congestion_window(&self) -> u64;

    /// Bytes currently considered in flight
    fn bytes_in_flight(&self) -> u64;

    fn is_congestion_limited(&self) -> bool {
        self.bytes_in_flight() >= self.congestion_window()
    }

    fn on_packet_sent(&mut self, packet_info: PacketInfo);

    /// Bytes newly acknowledged; `largest_sent_time` is the send time
    /// of the largest newly acked packet
    fn on_ack(&mut self, newly_acked_bytes: u64, largest_sent_time: Timestamp, now: Timestamp);

    fn on_packet_lost(&mut self, lost_bytes: u64, is_persistent_congestion: bool, now: Timestamp);

    /// An ECN-CE marked round trip was reported by the peer
    fn on_congestion_event(&mut self, now: Timestamp);

    /// The sender ran out of application data while under the window
    fn on_app_limited(&mut self, now: Timestamp);

    /// All in-flight accounting is abandoned, e.g. on migration reset
    fn on_discard(&mut self);
}

pub trait Pacer: 'static + Send {
    /// Earliest time the next packet of `bytes` may leave, or `None`
    /// for immediately
    fn next_send_time(&mut self, bytes: usize, now: Timestamp) -> Option<Timestamp>;

    fn on_packet_sent(&mut self, bytes: usize, now: Timestamp);

    /// Re-derives the pacing rate from the congestion state
    fn on_rate_update(&mut self, congestion_window: u64, smoothed_rtt: Duration);
}

/// A pacer which never delays; the default until handshake keys land
#[derive(Debug, Default)]
pub struct Unpaced;

impl Pacer for Unpaced {
    fn next_send_time(&mut self, _bytes: usize, _now: Timestamp) -> Option<Timestamp> {
        None
    }

    fn on_packet_sent(&mut self, _bytes: usize, _now: Timestamp) {}

    fn on_rate_update(&mut self, _congestion_window: u64, _smoothed_rtt: Duration) {}
}

pub mod testing {
    use super::*;

    /// A controller with a fixed window; deterministic for tests
    #[derive(Debug)]
    pub struct FixedWindow {
        pub window: u64,
        pub bytes_in_flight: u64,
        pub lost_events: u64,
        pub app_limited_events: u64,
    }

    impl FixedWindow {
        pub fn new(window: u64) -> Self {
            Self {
                window,
                bytes_in_flight: 0,
                lost_events: 0,
                app_limited_events: 0,
            }
        }
    }

    impl CongestionController for FixedWindow {
        fn congestion_window(&self) -> u64 {
            self.window
        }

        fn bytes_in_flight(&self) -> u64 {
            self.bytes_in_flight
        }

        fn on_packet_sent(&mut self, packet_info: PacketInfo) {
            self.bytes_in_flight += packet_info.sent_bytes as u64;
        }

        fn on_ack(&mut self, newly_acked_bytes: u64, _largest_sent_time: Timestamp, _now: Timestamp) {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(newly_acked_bytes);
        }

        fn on_packet_lost(
            &mut self,
            lost_bytes: u64,
            _is_persistent_congestion: bool,
            _now: Timestamp,
        ) {
            self.lost_events += 1;
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(lost_bytes);
        }

        fn on_congestion_event(&mut self, _now: Timestamp) {}

        fn on_app_limited(&mut self, _now: Timestamp) {
            self.app_limited_events += 1;
        }

        fn on_discard(&mut self) {
            self.bytes_in_flight = 0;
        }
    }
}
