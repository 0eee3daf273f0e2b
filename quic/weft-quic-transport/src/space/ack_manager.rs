// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::transmission::WriteFrame;
use core::time::Duration;
use weft_quic_core::{
    ack,
    frame::{ack::TimestampRange, Ack, AckFrequency, EcnCounts, ReceiveTimestamps},
    inet::ExplicitCongestionNotification,
    interval_set::IntervalSet,
    packet::number::PacketNumberSpace,
    time::Timestamp,
    transmission::Interest,
    varint::VarInt,
};

/// Bound on receive timestamps queued between ACKs
const MAX_PENDING_RECEIVE_TIMESTAMPS: usize = 64;

/// Received-packet state for one space: what to acknowledge and when.
#[derive(Debug)]
pub struct AckManager {
    space: PacketNumberSpace,
    received: IntervalSet,
    largest_received: Option<(u64, Timestamp)>,
    settings: ack::Settings,
    /// Ack-eliciting packets received since the last ACK left
    ack_eliciting_count: u64,
    /// Deadline by which a pending ACK must leave
    ack_due: Option<Timestamp>,
    needs_immediate_ack: bool,
    /// Largest packet number covered by an ACK we have sent
    largest_ack_scheduled: Option<u64>,
    /// Highest ACK_FREQUENCY sequence number applied
    ack_frequency_seq: Option<u64>,
    ecn_counts: EcnCounts,
    /// (packet number, receive time), newest last; only populated
    /// when receive timestamps were negotiated
    pending_timestamps: Vec<(u64, Timestamp)>,
    record_timestamps: bool,
}

impl AckManager {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            received: IntervalSet::new(),
            largest_received: None,
            settings: ack::Settings::default(),
            ack_eliciting_count: 0,
            ack_due: None,
            needs_immediate_ack: false,
            largest_ack_scheduled: None,
            ack_frequency_seq: None,
            ecn_counts: EcnCounts::default(),
            pending_timestamps: Vec::new(),
            record_timestamps: false,
        }
    }

    #[inline]
    pub fn settings(&self) -> &ack::Settings {
        &self.settings
    }

    #[inline]
    pub fn settings_mut(&mut self) -> &mut ack::Settings {
        &mut self.settings
    }

    #[inline]
    pub fn set_record_timestamps(&mut self, enabled: bool) {
        self.record_timestamps = enabled;
    }

    #[inline]
    pub fn largest_received(&self) -> Option<u64> {
        self.largest_received.map(|(pn, _)| pn)
    }

    #[inline]
    pub fn largest_received_time(&self) -> Option<Timestamp> {
        self.largest_received.map(|(_, time)| time)
    }

    /// True when this packet number was already processed
    #[inline]
    pub fn is_duplicate(&self, packet_number: u64) -> bool {
        self.received.contains(packet_number)
    }

    /// Records a successfully decrypted packet
    pub fn on_packet_received(
        &mut self,
        packet_number: u64,
        is_ack_eliciting: bool,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) {
        let previous_largest = self.largest_received().unwrap_or(0);
        let is_reordered = self
            .largest_received()
            .map_or(false, |largest| packet_number < largest);

        self.received.insert_value(packet_number);
        if self
            .largest_received
            .map_or(true, |(largest, _)| packet_number > largest)
        {
            self.largest_received = Some((packet_number, now));
        }

        match ecn {
            ExplicitCongestionNotification::Ect0 => {
                self.ecn_counts.ect_0_count = self.ecn_counts.ect_0_count.saturating_add(VarInt::from_u8(1));
            }
            ExplicitCongestionNotification::Ect1 => {
                self.ecn_counts.ect_1_count = self.ecn_counts.ect_1_count.saturating_add(VarInt::from_u8(1));
            }
            ExplicitCongestionNotification::Ce => {
                self.ecn_counts.ce_count = self.ecn_counts.ce_count.saturating_add(VarInt::from_u8(1));
            }
            ExplicitCongestionNotification::NotEct => {}
        }

        if self.record_timestamps && self.pending_timestamps.len() < MAX_PENDING_RECEIVE_TIMESTAMPS
        {
            self.pending_timestamps.push((packet_number, now));
        }

        if !is_ack_eliciting {
            return;
        }
        self.ack_eliciting_count += 1;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
        //# Similarly, packets marked with the ECN Congestion Experienced (CE)
        //# codepoint in the IP header SHOULD be acknowledged immediately
        let reorder_forces_ack = is_reordered
            || packet_number
                .checked_sub(previous_largest)
                .map_or(false, |gap| gap > 1 && self.largest_received().is_some());

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
        //# An endpoint SHOULD immediately acknowledge packets marked with the
        //# ECN-CE codepoint
        if ecn.is_ce()
            || self.space != PacketNumberSpace::ApplicationData
            || reorder_forces_ack
            || self.ack_eliciting_count >= self.settings.ack_eliciting_threshold
        {
            self.needs_immediate_ack = true;
            self.ack_due = Some(now);
        } else if self.ack_due.is_none() {
            self.ack_due = Some(now + self.settings.max_ack_delay);
        }
    }

    /// A peer IMMEDIATE_ACK frame forces the next write to carry an ACK
    pub fn on_immediate_ack(&mut self, now: Timestamp) {
        if !self.received.is_empty() {
            self.needs_immediate_ack = true;
            self.ack_due = Some(now);
        }
    }

    /// Applies an ACK_FREQUENCY request, ignoring stale sequence numbers
    pub fn on_ack_frequency(&mut self, frame: &AckFrequency) -> bool {
        let sequence = frame.sequence_number.as_u64();
        if self
            .ack_frequency_seq
            .map_or(false, |applied| sequence <= applied)
        {
            return false;
        }
        self.ack_frequency_seq = Some(sequence);
        self.settings.ack_eliciting_threshold =
            frame.ack_eliciting_threshold.as_u64().saturating_add(1);
        self.settings.max_ack_delay =
            Duration::from_micros(frame.request_max_ack_delay.as_u64());
        self.settings.reordering_threshold = frame.reordering_threshold.as_u64();
        true
    }

    /// The ack-delay timer deadline, when one is pending
    #[inline]
    pub fn ack_timer(&self) -> Option<Timestamp> {
        self.ack_due
    }

    pub fn interest(&self, now: Timestamp) -> Interest {
        match self.ack_due {
            Some(due) if self.needs_immediate_ack || due.has_elapsed(now) => Interest::NewData,
            _ => Interest::None,
        }
    }

    /// Builds the ACK frame for the next packet, if one is owed
    pub fn frame(&self, now: Timestamp, extended: bool) -> Option<Ack<IntervalSet>> {
        let (largest, largest_time) = self.largest_received?;
        if self.received.is_empty() {
            return None;
        }

        let delay = now.saturating_duration_since(largest_time);
        let ack_delay = self.settings.unscale_ack_delay(delay);

        let receive_timestamps = if extended && !self.pending_timestamps.is_empty() {
            Some(self.build_timestamps(largest))
        } else {
            None
        };

        Some(Ack {
            ack_delay: VarInt::new(ack_delay).unwrap_or(VarInt::MAX),
            ack_ranges: self.received.clone(),
            ecn_counts: if self.ecn_counts == EcnCounts::default() {
                None
            } else {
                Some(self.ecn_counts)
            },
            receive_timestamps,
        })
    }

    fn build_timestamps(&self, largest: u64) -> ReceiveTimestamps {
        // one delta per pending packet, newest first, gaps relative
        // to the previous entry
        let mut ranges: Vec<TimestampRange> = Vec::new();
        let mut previous: Option<u64> = None;
        let exponent = self.settings.ack_delay_exponent;
        for (packet_number, time) in self.pending_timestamps.iter().rev() {
            let reference = previous.unwrap_or(largest);
            let gap = reference.saturating_sub(*packet_number);
            let delta = (time.as_duration().as_micros() as u64) >> exponent;
            let delta = VarInt::new(delta).unwrap_or(VarInt::MAX);
            match ranges.last_mut() {
                Some(range) if gap == 1 => range.deltas.push(delta),
                _ => ranges.push(TimestampRange {
                    gap: VarInt::new(gap).unwrap_or(VarInt::MAX),
                    deltas: vec![delta],
                }),
            }
            previous = Some(*packet_number);
        }
        ReceiveTimestamps { ranges }
    }

    /// Book-keeping after an ACK frame was placed in a packet
    pub fn on_ack_sent(&mut self) -> WriteFrame {
        let largest = self.largest_received().unwrap_or(0);
        self.largest_ack_scheduled = Some(largest);
        self.ack_eliciting_count = 0;
        self.needs_immediate_ack = false;
        self.ack_due = None;
        self.pending_timestamps.clear();
        WriteFrame::Ack {
            space: self.space,
            largest_acknowledged: largest,
        }
    }

    /// The peer acknowledged a packet carrying our ACK up to
    /// `largest_acknowledged`; ranges below it need never be resent
    pub fn on_ack_frame_acked(&mut self, largest_acknowledged: u64) {
        self.received.remove_until(largest_acknowledged);
    }

    #[inline]
    pub fn has_received_packets(&self) -> bool {
        !self.received.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use weft_quic_core::{
        frame::AckRanges,
        time::{testing, Clock},
    };

    const ECN: ExplicitCongestionNotification = ExplicitCongestionNotification::NotEct;

    #[test]
    fn threshold_forces_immediate_ack() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        let now = clock.get_time();

        manager.on_packet_received(0, true, ECN, now);
        assert_eq!(manager.interest(now), Interest::None);
        assert!(manager.ack_timer().is_some());

        manager.on_packet_received(1, true, ECN, now);
        assert_eq!(manager.interest(now), Interest::NewData);
    }

    #[test]
    fn delay_timer_elapses_into_interest() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        let now = clock.get_time();

        manager.on_packet_received(0, true, ECN, now);
        assert_eq!(manager.interest(now), Interest::None);

        clock.inc_by(manager.settings().max_ack_delay + Duration::from_millis(1));
        assert_eq!(manager.interest(clock.get_time()), Interest::NewData);
    }

    #[test]
    fn handshake_spaces_ack_immediately() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::Initial);
        manager.on_packet_received(0, true, ECN, clock.get_time());
        assert_eq!(manager.interest(clock.get_time()), Interest::NewData);
    }

    #[test]
    fn reordered_packet_acks_immediately() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        let now = clock.get_time();
        manager.on_packet_received(5, false, ECN, now);
        manager.on_packet_received(3, true, ECN, now);
        assert_eq!(manager.interest(now), Interest::NewData);
    }

    #[test]
    fn frame_reflects_received_set_and_clears_on_send() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        let now = clock.get_time();
        for pn in [0, 1, 2, 5] {
            manager.on_packet_received(pn, true, ECN, now);
        }
        let frame = manager.frame(now, false).unwrap();
        let ranges: Vec<_> = frame.ack_ranges.ack_ranges().collect();
        assert_eq!(ranges, vec![5..=5, 0..=2]);

        let write_frame = manager.on_ack_sent();
        assert!(matches!(
            write_frame,
            WriteFrame::Ack {
                largest_acknowledged: 5,
                ..
            }
        ));
        assert_eq!(manager.interest(now), Interest::None);

        // peer acked the packet carrying that ACK
        manager.on_ack_frame_acked(5);
        let frame = manager.frame(now, false).unwrap();
        let ranges: Vec<_> = frame.ack_ranges.ack_ranges().collect();
        assert_eq!(ranges, vec![5..=5]);
    }

    #[test]
    fn ack_frequency_updates_thresholds() {
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        let frame = AckFrequency {
            sequence_number: VarInt::from_u8(1),
            ack_eliciting_threshold: VarInt::from_u8(9),
            request_max_ack_delay: VarInt::from_u32(50_000),
            reordering_threshold: VarInt::from_u8(5),
        };
        assert!(manager.on_ack_frequency(&frame));
        assert_eq!(manager.settings().ack_eliciting_threshold, 10);
        assert_eq!(manager.settings().max_ack_delay, Duration::from_millis(50));

        // stale sequence numbers are ignored
        assert!(!manager.on_ack_frequency(&frame));
    }

    #[test]
    fn duplicates_detected() {
        let clock = testing::Clock::default();
        let mut manager = AckManager::new(PacketNumberSpace::ApplicationData);
        manager.on_packet_received(3, true, ECN, clock.get_time());
        assert!(manager.is_duplicate(3));
        assert!(!manager.is_duplicate(4));
    }
}
