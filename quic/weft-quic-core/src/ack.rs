// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Acknowledgment policy knobs shared by both endpoints.

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
//# A receiver SHOULD send an ACK frame after receiving at least two
//# ack-eliciting packets.
pub const DEFAULT_ACK_ELICITING_THRESHOLD: u64 = 2;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED value for kPacketThreshold is 3, based on TCP loss
//# recovery
pub const DEFAULT_REORDERING_THRESHOLD: u64 = 3;

/// Acknowledgment behavior for one connection, updated at runtime by
/// ACK_FREQUENCY frames when negotiated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Longest we may sit on an ack-eliciting packet
    pub max_ack_delay: Duration,

    /// Two to this power scales the ACK frame's delay field
    pub ack_delay_exponent: u8,

    /// Ack-eliciting packets received before an immediate ACK
    pub ack_eliciting_threshold: u64,

    /// Out-of-order distance which forces an immediate ACK
    pub reordering_threshold: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_ack_delay: Duration::from_millis(25),
            ack_delay_exponent: 3,
            ack_eliciting_threshold: DEFAULT_ACK_ELICITING_THRESHOLD,
            reordering_threshold: DEFAULT_REORDERING_THRESHOLD,
        }
    }
}

impl Settings {
    /// Scales a wire ack-delay value into a duration
    #[inline]
    pub fn scale_ack_delay(&self, wire_value: u64) -> Duration {
        Duration::from_micros(wire_value << self.ack_delay_exponent)
    }

    /// Scales a duration into the wire ack-delay value
    #[inline]
    pub fn unscale_ack_delay(&self, delay: Duration) -> u64 {
        (delay.as_micros() as u64) >> self.ack_delay_exponent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_scaling_round_trips() {
        let settings = Settings::default();
        let delay = Duration::from_micros(12_800);
        let wire = settings.unscale_ack_delay(delay);
        assert_eq!(wire, 1600);
        assert_eq!(settings.scale_ack_delay(wire), delay);
    }
}
