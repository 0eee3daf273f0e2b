// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use weft_quic_core::{packet::number::PacketNumberSpace, random};

/// Allocates outgoing packet numbers for one space.
///
/// With a skip period configured, a number is occasionally left
/// unused; a peer acknowledging that number proves it acknowledged a
/// packet it never received.
#[derive(Debug)]
pub struct TxPacketNumbers {
    space: PacketNumberSpace,
    next: u64,
    largest_sent: Option<u64>,
    skipped: Option<u64>,
    /// Packets remaining until the next skip; `None` disables skipping
    skip_countdown: Option<u64>,
}

impl TxPacketNumbers {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            next: 0,
            largest_sent: None,
            skipped: None,
            skip_countdown: None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn largest_sent(&self) -> Option<u64> {
        self.largest_sent
    }

    #[inline]
    pub fn skipped(&self) -> Option<u64> {
        self.skipped
    }

    #[inline]
    pub fn next_value(&self) -> u64 {
        self.next
    }

    /// Enables skipping with the given average period
    pub fn enable_skipping(&mut self, period: u64, random: &mut dyn random::Generator) {
        if period == 0 {
            self.skip_countdown = None;
            return;
        }
        self.skip_countdown = Some(Self::draw_countdown(period, random));
    }

    fn draw_countdown(period: u64, random: &mut dyn random::Generator) -> u64 {
        // jitter to [period/2, 3*period/2) so the peer cannot predict
        let base = period / 2;
        base + random.gen_range(period.max(1))
    }

    /// Allocates the number for the next packet, possibly skipping one
    pub fn allocate(
        &mut self,
        period: u64,
        random: &mut dyn random::Generator,
    ) -> u64 {
        if let Some(countdown) = self.skip_countdown.as_mut() {
            if *countdown == 0 {
                // leave this number unused; anyone acking it lies
                self.skipped = Some(self.next);
                self.next += 1;
                *countdown = Self::draw_countdown(period, random);
            } else {
                *countdown -= 1;
            }
        }
        let packet_number = self.next;
        debug_assert_ne!(Some(packet_number), self.skipped);
        self.next += 1;
        packet_number
    }

    pub fn on_packet_sent(&mut self, packet_number: u64) {
        self.largest_sent = Some(
            self.largest_sent
                .map_or(packet_number, |largest| largest.max(packet_number)),
        );
    }

    /// True when an ACK covering `packet_number` proves misbehavior
    #[inline]
    pub fn is_skipped(&self, packet_number: u64) -> bool {
        self.skipped == Some(packet_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::random::{testing::Seeded, Generator};

    #[test]
    fn monotonic_without_skipping() {
        let mut tx = TxPacketNumbers::new(PacketNumberSpace::ApplicationData);
        let mut random = Seeded::default();
        let mut previous = None;
        for _ in 0..100 {
            let pn = tx.allocate(0, &mut random);
            tx.on_packet_sent(pn);
            if let Some(previous) = previous {
                assert!(pn > previous);
            }
            previous = Some(pn);
        }
        assert_eq!(tx.skipped(), None);
    }

    #[test]
    fn skipping_leaves_gaps() {
        let mut tx = TxPacketNumbers::new(PacketNumberSpace::ApplicationData);
        let mut random = Seeded::default();
        tx.enable_skipping(4, &mut random);

        let mut allocated = Vec::new();
        for _ in 0..32 {
            allocated.push(tx.allocate(4, &mut random));
        }
        let skipped = tx.skipped().expect("a number must have been skipped");
        assert!(!allocated.contains(&skipped));
        assert!(tx.is_skipped(skipped));
        // numbers stay strictly increasing around the gap
        for pair in allocated.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn countdown_jitter_stays_in_band() {
        let mut random = Seeded::new(7);
        for _ in 0..100 {
            let countdown = TxPacketNumbers::draw_countdown(10, &mut random);
            assert!((5..15).contains(&countdown));
        }
        // degenerate period of zero is handled by enable_skipping
        let _ = random.gen_u64();
    }
}
