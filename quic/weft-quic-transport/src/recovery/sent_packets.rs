// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::transmission::WriteFrame;
use std::collections::VecDeque;
use weft_quic_core::{frame::AckElicitation, time::Timestamp};

/// The durable record of a sent, possibly-still-inflight packet
#[derive(Clone, Debug)]
pub struct SentPacketInfo {
    pub packet_number: u64,
    pub frames: Vec<WriteFrame>,
    pub time_sent: Timestamp,
    /// Encoded size on the wire, header and tag included
    pub sent_bytes: usize,
    /// Payload bytes only
    pub body_bytes: usize,
    pub ack_elicitation: AckElicitation,
    /// Shared by a PTO probe and its original; resolving any member
    /// resolves the whole group
    pub cloned_packet_identifier: Option<u64>,
    pub is_app_limited: bool,
    /// Bytes sent over the connection lifetime when this packet left
    pub total_bytes_sent_snapshot: u64,
    /// IP TTL observed by the packet processor, when marking is on
    pub ttl_mark: Option<u8>,
}

impl SentPacketInfo {
    #[inline]
    pub fn is_ack_eliciting(&self) -> bool {
        self.ack_elicitation.is_ack_eliciting()
    }
}

/// Outstanding packets of one space, ordered by packet number.
///
/// Entries leave only through acknowledgment, loss declaration, or
/// connection teardown.
#[derive(Debug, Default)]
pub struct SentPackets {
    packets: VecDeque<SentPacketInfo>,
}

impl SentPackets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a packet; packet numbers must arrive in increasing order
    pub fn insert(&mut self, info: SentPacketInfo) {
        debug_assert!(
            self.packets
                .back()
                .map_or(true, |last| last.packet_number < info.packet_number),
            "sent packets must be recorded in packet-number order"
        );
        self.packets.push_back(info);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &SentPacketInfo> {
        self.packets.iter()
    }

    #[inline]
    pub fn earliest_ack_eliciting_time(&self) -> Option<Timestamp> {
        self.packets
            .iter()
            .find(|info| info.is_ack_eliciting())
            .map(|info| info.time_sent)
    }

    #[inline]
    pub fn has_ack_eliciting(&self) -> bool {
        self.packets.iter().any(|info| info.is_ack_eliciting())
    }

    #[inline]
    pub fn get_mut(&mut self, packet_number: u64) -> Option<&mut SentPacketInfo> {
        self.packets
            .iter_mut()
            .find(|info| info.packet_number == packet_number)
    }

    /// Removes and returns every packet whose number satisfies `predicate`
    pub fn remove_matching(
        &mut self,
        mut predicate: impl FnMut(&SentPacketInfo) -> bool,
    ) -> Vec<SentPacketInfo> {
        let mut removed = Vec::new();
        let mut index = 0;
        while index < self.packets.len() {
            if predicate(&self.packets[index]) {
                if let Some(info) = self.packets.remove(index) {
                    removed.push(info);
                }
            } else {
                index += 1;
            }
        }
        removed
    }

    /// Drains everything, e.g. when keys for a space are discarded
    pub fn drain(&mut self) -> Vec<SentPacketInfo> {
        self.packets.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::time::{Clock, NoopClock};

    fn info(packet_number: u64) -> SentPacketInfo {
        SentPacketInfo {
            packet_number,
            frames: Vec::new(),
            time_sent: NoopClock.get_time(),
            sent_bytes: 1200,
            body_bytes: 1100,
            ack_elicitation: AckElicitation::Eliciting,
            cloned_packet_identifier: None,
            is_app_limited: false,
            total_bytes_sent_snapshot: 0,
            ttl_mark: None,
        }
    }

    #[test]
    fn ordered_insert_and_removal() {
        let mut packets = SentPackets::new();
        for packet_number in [1, 2, 5, 9] {
            packets.insert(info(packet_number));
        }
        let removed = packets.remove_matching(|info| info.packet_number % 2 == 1);
        assert_eq!(
            removed.iter().map(|info| info.packet_number).collect::<Vec<_>>(),
            vec![1, 5, 9]
        );
        assert_eq!(packets.len(), 1);
    }
}
