// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::recovery::{
    time_threshold, SentPacketInfo, SentPackets, TimerPurpose, K_PACKET_THRESHOLD,
    K_PERSISTENT_CONGESTION_THRESHOLD,
};
use core::time::Duration;
use std::collections::HashSet;
use weft_quic_core::{
    frame::{Ack, AckRanges},
    packet::number::PacketNumberSpace,
    recovery::RttEstimator,
    time::Timestamp,
    transport,
};

/// What one ACK frame did to the outstanding set
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub newly_acked: Vec<SentPacketInfo>,
    pub lost: Vec<SentPacketInfo>,
    /// Raw RTT and reported delay, present only when the largest
    /// newly acked packet is the frame's largest acknowledged
    pub rtt_sample: Option<(Duration, Duration)>,
    pub largest_newly_acked: Option<u64>,
    pub newly_acked_bytes: u64,
    /// Send time of the largest newly acked packet
    pub largest_newly_acked_time: Option<Timestamp>,
    pub is_persistent_congestion: bool,
}

/// Loss recovery for one packet-number space
#[derive(Debug)]
pub struct Manager {
    space: PacketNumberSpace,
    sent_packets: SentPackets,
    largest_acked: Option<u64>,
    /// Earliest time an outstanding packet crosses the time threshold
    loss_time: Option<Timestamp>,
    /// Clone groups already resolved by one member's acknowledgment
    resolved_clone_groups: HashSet<u64>,
    time_of_last_ack_eliciting: Option<Timestamp>,
}

impl Manager {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            sent_packets: SentPackets::new(),
            largest_acked: None,
            loss_time: None,
            resolved_clone_groups: HashSet::new(),
            time_of_last_ack_eliciting: None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn largest_acked(&self) -> Option<u64> {
        self.largest_acked
    }

    #[inline]
    pub fn sent_packets(&self) -> &SentPackets {
        &self.sent_packets
    }

    #[inline]
    pub fn has_ack_eliciting_in_flight(&self) -> bool {
        self.sent_packets.has_ack_eliciting()
    }

    pub fn on_packet_sent(&mut self, info: SentPacketInfo) {
        if info.is_ack_eliciting() {
            self.time_of_last_ack_eliciting = Some(info.time_sent);
        }
        self.sent_packets.insert(info);
    }

    /// Processes one ACK frame against the outstanding set.
    ///
    /// The caller has already verified the frame does not acknowledge
    /// anything beyond `largest_sent` or a skipped packet number.
    pub fn on_ack_frame<A: AckRanges>(
        &mut self,
        frame: &Ack<A>,
        ack_delay: Duration,
        now: Timestamp,
        rtt: &RttEstimator,
    ) -> Result<AckOutcome, transport::Error> {
        let mut outcome = AckOutcome::default();

        let frame_largest = frame.largest_acknowledged();
        self.largest_acked = Some(self.largest_acked.map_or(frame_largest, |largest| {
            largest.max(frame_largest)
        }));

        // collect the acked ranges once; the decoder pre-validated them
        let ranges: Vec<_> = frame.ack_ranges.ack_ranges().collect();
        let mut newly_acked = self.sent_packets.remove_matching(|info| {
            ranges
                .iter()
                .any(|range| range.contains(&info.packet_number))
        });
        newly_acked.sort_by_key(|info| info.packet_number);

        if newly_acked.is_empty() {
            // a pure duplicate still re-arms loss detection below
            outcome.lost = self.detect_losses(now, rtt);
            return Ok(outcome);
        }

        // resolving one clone resolves the group; the surviving
        // members leave the outstanding set without frame effects
        for info in &newly_acked {
            if let Some(group) = info.cloned_packet_identifier {
                self.resolved_clone_groups.insert(group);
            }
        }
        let resolved = &self.resolved_clone_groups;
        // surviving members leave without frame effects or loss reports
        let _implicitly_acked = self.sent_packets.remove_matching(|info| {
            info.cloned_packet_identifier
                .map_or(false, |group| resolved.contains(&group))
        });

        let largest_newly_acked = newly_acked
            .last()
            .map(|info| (info.packet_number, info.time_sent));

        if let Some((largest_pn, largest_time)) = largest_newly_acked {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
            //# An endpoint generates an RTT sample on receiving an ACK frame that
            //# meets the following two conditions:
            //#
            //# *  the largest acknowledged packet number is newly acknowledged, and
            //#
            //# *  at least one of the newly acknowledged packets was ack-eliciting.
            if largest_pn == frame_largest
                && newly_acked.iter().any(|info| info.is_ack_eliciting())
            {
                let rtt_sample = now.saturating_duration_since(largest_time);
                outcome.rtt_sample = Some((rtt_sample, ack_delay));
            }
            outcome.largest_newly_acked = Some(largest_pn);
            outcome.largest_newly_acked_time = Some(largest_time);
        }

        outcome.newly_acked_bytes = newly_acked
            .iter()
            .map(|info| info.sent_bytes as u64)
            .sum();

        outcome.lost = self.detect_losses(now, rtt);
        outcome.is_persistent_congestion =
            self.is_persistent_congestion(&outcome.lost, rtt);
        outcome.newly_acked = newly_acked;
        Ok(outcome)
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
    //# A packet is declared lost if it meets all of the following
    //# conditions:
    //#
    //# *  The packet is unacknowledged, in flight, and was sent prior to an
    //#    acknowledged packet.
    //#
    //# *  The packet was sent kPacketThreshold packets before an
    //#    acknowledged packet (Section 6.1.1), or it was sent long enough in
    //#    the past (Section 6.1.2).

    /// Declares losses and re-arms `loss_time` for the survivors
    pub fn detect_losses(&mut self, now: Timestamp, rtt: &RttEstimator) -> Vec<SentPacketInfo> {
        let Some(largest_acked) = self.largest_acked else {
            return Vec::new();
        };

        let threshold = time_threshold(rtt.smoothed_rtt().max(rtt.latest_rtt()));
        let mut next_loss_time: Option<Timestamp> = None;

        let lost = self.sent_packets.remove_matching(|info| {
            if info.packet_number >= largest_acked {
                return false;
            }
            if largest_acked - info.packet_number >= K_PACKET_THRESHOLD {
                return true;
            }
            let lost_at = info.time_sent + threshold;
            if lost_at.has_elapsed(now) {
                return true;
            }
            next_loss_time = Some(next_loss_time.map_or(lost_at, |time| time.min(lost_at)));
            false
        });

        self.loss_time = next_loss_time;

        // clone groups whose member was declared lost resolve too
        for info in &lost {
            if let Some(group) = info.cloned_packet_identifier {
                self.resolved_clone_groups.insert(group);
            }
        }

        lost
    }

    fn is_persistent_congestion(&self, lost: &[SentPacketInfo], rtt: &RttEstimator) -> bool {
        if !rtt.has_rtt_sample() {
            return false;
        }
        let (Some(first), Some(last)) = (lost.first(), lost.last()) else {
            return false;
        };
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# A sender establishes persistent congestion after the receipt of an
        //# acknowledgment if two packets that are ack-eliciting are declared
        //# lost, and:
        //# ...
        //# *  the duration between the send times of these two packets exceeds
        //#    the persistent congestion duration (Section 7.6.1)
        let span = last.time_sent.saturating_duration_since(first.time_sent);
        let duration = rtt
            .pto_period(self.space)
            .saturating_mul(K_PERSISTENT_CONGESTION_THRESHOLD);
        lost.iter().filter(|info| info.is_ack_eliciting()).count() >= 2 && span > duration
    }

    /// When and why the loss-detection timer should next fire
    pub fn timer(
        &self,
        rtt: &RttEstimator,
        pto_count: u32,
    ) -> Option<(Timestamp, TimerPurpose)> {
        if let Some(loss_time) = self.loss_time {
            return Some((loss_time, TimerPurpose::LossTime));
        }
        if !self.has_ack_eliciting_in_flight() {
            return None;
        }
        let base = self.time_of_last_ack_eliciting?;
        let expiration = base + rtt.pto_period_backoff(self.space, pto_count);
        Some((expiration, TimerPurpose::Pto))
    }

    /// Packets a PTO probe should clone, newest first
    pub fn probe_candidates(&self, count: usize) -> Vec<u64> {
        let mut candidates: Vec<_> = self
            .sent_packets
            .iter()
            .filter(|info| info.is_ack_eliciting())
            .map(|info| info.packet_number)
            .collect();
        candidates.reverse();
        candidates.truncate(count);
        candidates
    }

    /// Frames of an outstanding packet, for probe cloning
    pub fn frames_of(&self, packet_number: u64) -> Option<&[crate::transmission::WriteFrame]> {
        self.sent_packets
            .iter()
            .find(|info| info.packet_number == packet_number)
            .map(|info| info.frames.as_slice())
    }

    /// Marks an outstanding packet as a clone-group member
    pub fn assign_clone_group(&mut self, packet_number: u64, group: u64) {
        if let Some(info) = self.sent_packets.get_mut(packet_number) {
            info.cloned_packet_identifier = Some(group);
        }
    }

    /// Abandons every outstanding packet, e.g. on key discard
    pub fn discard(&mut self) -> Vec<SentPacketInfo> {
        self.loss_time = None;
        self.sent_packets.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmission::WriteFrame;
    use weft_quic_core::{
        frame::Ack,
        interval_set::IntervalSet,
        time::{testing, Clock, Timestamp},
        varint::VarInt,
    };

    fn info(packet_number: u64, time_sent: Timestamp) -> SentPacketInfo {
        SentPacketInfo {
            packet_number,
            frames: vec![WriteFrame::Ping],
            time_sent,
            sent_bytes: 1200,
            body_bytes: 1100,
            ack_elicitation: weft_quic_core::frame::AckElicitation::Eliciting,
            cloned_packet_identifier: None,
            is_app_limited: false,
            total_bytes_sent_snapshot: 0,
            ttl_mark: None,
        }
    }

    fn ack(ranges: &[core::ops::RangeInclusive<u64>]) -> Ack<IntervalSet> {
        let mut set = IntervalSet::new();
        for range in ranges {
            set.insert(range.clone());
        }
        Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: set,
            ecn_counts: None,
            receive_timestamps: None,
        }
    }

    fn manager_with_packets(clock: &testing::Clock, count: u64) -> Manager {
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        for packet_number in 0..count {
            manager.on_packet_sent(info(packet_number, clock.get_time()));
        }
        manager
    }

    #[test]
    fn newly_acked_leave_the_outstanding_set() {
        let clock = testing::Clock::default();
        let mut manager = manager_with_packets(&clock, 3);
        let rtt = RttEstimator::default();

        let outcome = manager
            .on_ack_frame(&ack(&[0..=1]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert_eq!(
            outcome
                .newly_acked
                .iter()
                .map(|info| info.packet_number)
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(manager.sent_packets().len(), 1);

        // a pure duplicate changes nothing
        let outcome = manager
            .on_ack_frame(&ack(&[0..=1]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert!(outcome.newly_acked.is_empty());
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
    //= type=test
    //# An endpoint generates an RTT sample on receiving an ACK frame that
    //# meets the following two conditions
    #[test]
    fn rtt_sample_requires_largest_newly_acked() {
        let clock = testing::Clock::default();
        let mut manager = manager_with_packets(&clock, 3);
        let rtt = RttEstimator::default();
        clock.inc_by(Duration::from_millis(30));

        // largest acknowledged (2) is newly acked: sample taken
        let outcome = manager
            .on_ack_frame(&ack(&[1..=2]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        let (sample, _) = outcome.rtt_sample.unwrap();
        assert_eq!(sample, Duration::from_millis(30));

        // packet 0 is newly acked but 2 is not: no sample
        let outcome = manager
            .on_ack_frame(&ack(&[0..=2]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert!(outcome.rtt_sample.is_none());
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
    //= type=test
    //# The RECOMMENDED value for kPacketThreshold is 3
    #[test]
    fn reorder_threshold_declares_losses() {
        let clock = testing::Clock::default();
        let mut manager = manager_with_packets(&clock, 5);
        let rtt = RttEstimator::default();

        let outcome = manager
            .on_ack_frame(&ack(&[4..=4]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert_eq!(
            outcome
                .lost
                .iter()
                .map(|info| info.packet_number)
                .collect::<Vec<_>>(),
            vec![0, 1],
            "packets three or more below the largest acked are lost"
        );
        // 2 and 3 wait on the time threshold
        assert_eq!(manager.sent_packets().len(), 2);
        assert!(manager
            .timer(&rtt, 0)
            .map_or(false, |(_, purpose)| purpose == TimerPurpose::LossTime));
    }

    #[test]
    fn time_threshold_fires_on_timer() {
        let clock = testing::Clock::default();
        let mut manager = manager_with_packets(&clock, 2);
        let rtt = RttEstimator::default();

        let outcome = manager
            .on_ack_frame(&ack(&[1..=1]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert!(outcome.lost.is_empty());

        // well past 9/8 of the rtt estimate
        clock.inc_by(Duration::from_secs(2));
        let lost = manager.detect_losses(clock.get_time(), &rtt);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].packet_number, 0);
    }

    #[test]
    fn resolving_one_clone_resolves_the_group() {
        let clock = testing::Clock::default();
        let mut manager = Manager::new(PacketNumberSpace::ApplicationData);
        let mut original = info(0, clock.get_time());
        original.cloned_packet_identifier = Some(7);
        let mut probe = info(1, clock.get_time());
        probe.cloned_packet_identifier = Some(7);
        manager.on_packet_sent(original);
        manager.on_packet_sent(probe);

        let rtt = RttEstimator::default();
        let outcome = manager
            .on_ack_frame(&ack(&[1..=1]), Duration::ZERO, clock.get_time(), &rtt)
            .unwrap();
        assert_eq!(outcome.newly_acked.len(), 1);
        // the original leaves silently with its group
        assert!(manager.sent_packets().is_empty());
    }

    #[test]
    fn pto_timer_arms_from_last_ack_eliciting() {
        let clock = testing::Clock::default();
        let manager = manager_with_packets(&clock, 1);
        let rtt = RttEstimator::default();

        let (deadline, purpose) = manager.timer(&rtt, 0).unwrap();
        assert_eq!(purpose, TimerPurpose::Pto);
        assert_eq!(
            deadline,
            clock.get_time() + rtt.pto_period(PacketNumberSpace::ApplicationData)
        );
        // backoff doubles the period
        let (backed_off, _) = manager.timer(&rtt, 1).unwrap();
        assert_eq!(
            backed_off,
            clock.get_time() + rtt.pto_period(PacketNumberSpace::ApplicationData) * 2
        );
    }
}
