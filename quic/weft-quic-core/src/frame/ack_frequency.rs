// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.ietf.org/archive/id/draft-ietf-quic-ack-frequency-07.txt#4
//# An endpoint sends an ACK_FREQUENCY frame (type=0xaf) to request that
//# the peer alter its acknowledgement behavior.

//= https://www.ietf.org/archive/id/draft-ietf-quic-ack-frequency-07.txt#5
//# An endpoint can request the receipt of an acknowledgement by sending
//# an IMMEDIATE_ACK frame (type=0x1f).

pub const IMMEDIATE_ACK_TAG: Tag = 0x1f;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckFrequency {
    /// Increases with each frame so stale requests are ignorable
    pub sequence_number: VarInt,

    /// Receive this many ack-eliciting packets before acknowledging
    pub ack_eliciting_threshold: VarInt,

    /// New max_ack_delay in microseconds
    pub request_max_ack_delay: VarInt,

    /// Tolerated reordering before an immediate acknowledgment; zero
    /// disables reorder-triggered ACKs
    pub reordering_threshold: VarInt,
}

decoder_value!(
    impl<'a> AckFrequency {
        fn decode(buffer: Buffer) -> Result<AckFrequency> {
            let (sequence_number, buffer) = buffer.decode()?;
            let (ack_eliciting_threshold, buffer) = buffer.decode()?;
            let (request_max_ack_delay, buffer) = buffer.decode()?;
            let (reordering_threshold, buffer) = buffer.decode()?;
            let frame = AckFrequency {
                sequence_number,
                ack_eliciting_threshold,
                request_max_ack_delay,
                reordering_threshold,
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for AckFrequency {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&VarInt::new(crate::frame::ext_tag::ACK_FREQUENCY).unwrap_or(VarInt::MAX));
        encoder.encode(&self.sequence_number);
        encoder.encode(&self.ack_eliciting_threshold);
        encoder.encode(&self.request_max_ack_delay);
        encoder.encode(&self.reordering_threshold);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImmediateAck;

impl EncoderValue for ImmediateAck {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&IMMEDIATE_ACK_TAG);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn multi_byte_tag_round_trip() {
        let frame = AckFrequency {
            sequence_number: VarInt::from_u8(1),
            ack_eliciting_threshold: VarInt::from_u8(2),
            request_max_ack_delay: VarInt::from_u16(25_000),
            reordering_threshold: VarInt::from_u8(3),
        };
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();
        // 0xaf needs the two-byte varint form
        assert_eq!(&storage[..2], &[0x40, 0xaf]);
        let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert_eq!(decoded, Frame::AckFrequency(frame));
    }
}
