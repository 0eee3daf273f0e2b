// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate alloc;

use crate::{frame::Tag, interval_set::IntervalSet, varint::VarInt};
use alloc::vec::Vec;
use core::{convert::TryFrom, fmt, ops::RangeInclusive};
use weft_codec::{
    decoder_value, DecoderBuffer, DecoderBufferResult, DecoderError,
    DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.  If
//# the frame type is 0x03, ACK frames also contain the cumulative count
//# of QUIC packets with associated ECN marks received on the connection
//# up until this point.

pub const TAG: Tag = 0x02;
pub const TAG_W_ECN: Tag = 0x03;
/// Pseudo-tag the extended-ack wire form decodes under; the real wire
/// tag is the multi-byte `ext_tag::ACK_EXTENDED`
pub const EXTENDED_TAG: Tag = 0xb1;

/// Feature bits carried in the extended ACK form
pub mod extended_features {
    pub const ECN_COUNTS: u64 = 0x01;
    pub const RECEIVE_TIMESTAMPS: u64 = 0x02;
}

/// Bound on timestamp ranges a single frame may carry; beyond this a
/// peer is either broken or hostile
const MAX_TIMESTAMP_RANGES: u64 = 64;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Frame {
//#   Type (i) = 0x02..0x03,
//#   Largest Acknowledged (i),
//#   ACK Delay (i),
//#   ACK Range Count (i),
//#   First ACK Range (i),
//#   ACK Range (..) ...,
//#   [ECN Counts (..)],
//# }

#[derive(Clone, PartialEq, Eq)]
pub struct Ack<AckRanges> {
    /// The acknowledgment delay, already scaled by the sender's
    /// ack_delay_exponent
    pub ack_delay: VarInt,

    /// Acknowledged packet numbers, in descending range order
    pub ack_ranges: AckRanges,

    pub ecn_counts: Option<EcnCounts>,

    /// Per-packet receive timestamps, present only on the extended
    /// wire form when negotiated
    pub receive_timestamps: Option<ReceiveTimestamps>,
}

impl<A: AckRanges> Ack<A> {
    #[inline]
    pub fn largest_acknowledged(&self) -> u64 {
        self.ack_ranges
            .ack_ranges()
            .next()
            .map_or(0, |range| *range.end())
    }

    /// True when the frame must use the extended wire form
    #[inline]
    pub fn is_extended(&self) -> bool {
        self.receive_timestamps.is_some()
    }
}

impl<A: AckRanges> fmt::Debug for Ack<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ack")
            .field("ack_delay", &self.ack_delay)
            .field("largest_acknowledged", &self.largest_acknowledged())
            .field("ecn_counts", &self.ecn_counts)
            .finish_non_exhaustive()
    }
}

/// A source of acknowledged packet-number ranges, iterated from the
/// largest range down
pub trait AckRanges {
    type Iter<'a>: Iterator<Item = RangeInclusive<u64>>
    where
        Self: 'a;

    fn ack_ranges(&self) -> Self::Iter<'_>;
}

impl AckRanges for IntervalSet {
    type Iter<'a> = alloc::vec::IntoIter<RangeInclusive<u64>>;

    fn ack_ranges(&self) -> Self::Iter<'_> {
        self.intervals_descending().collect::<Vec<_>>().into_iter()
    }
}

/// Validated, zero-copy view over a received ACK frame's ranges
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRangesDecoder<'a> {
    largest_acknowledged: u64,
    first_range_len: u64,
    range_count: u64,
    /// The raw (gap, len) pairs after the first range
    ranges: DecoderBuffer<'a>,
}

impl AckRangesDecoder<'_> {
    #[inline]
    pub fn largest_acknowledged(&self) -> u64 {
        self.largest_acknowledged
    }
}

pub struct AckRangesIter<'a> {
    largest: u64,
    first_range_len: u64,
    remaining: u64,
    ranges: DecoderBuffer<'a>,
    exhausted: bool,
}

impl Iterator for AckRangesIter<'_> {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let smallest = self.largest - self.first_range_len;
        let range = smallest..=self.largest;

        if self.remaining == 0 {
            self.exhausted = true;
        } else {
            self.remaining -= 1;
            // pairs were validated during frame decode
            let (gap, rest) = self.ranges.decode::<VarInt>().ok()?;
            let (len, rest) = rest.decode::<VarInt>().ok()?;
            self.ranges = rest;
            self.largest = smallest - gap.as_u64() - 2;
            self.first_range_len = len.as_u64();
        }

        Some(range)
    }
}

impl<'a> AckRanges for AckRangesDecoder<'a> {
    type Iter<'i> = AckRangesIter<'a> where Self: 'i;

    fn ack_ranges(&self) -> Self::Iter<'_> {
        AckRangesIter {
            largest: self.largest_acknowledged,
            first_range_len: self.first_range_len,
            remaining: self.range_count,
            ranges: self.ranges,
            exhausted: false,
        }
    }
}

impl<'a> DecoderParameterizedValue<'a> for Ack<AckRangesDecoder<'a>> {
    type Parameter = Tag;

    fn decode_parameterized(
        tag: Tag,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self> {
        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (range_count, buffer) = buffer.decode::<VarInt>()?;
        let (first_range_len, buffer) = buffer.decode::<VarInt>()?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# If any computed packet number is negative, an endpoint MUST
        //# generate a connection error of type FRAME_ENCODING_ERROR.
        let mut smallest = largest_acknowledged
            .as_u64()
            .checked_sub(first_range_len.as_u64())
            .ok_or(DecoderError::InvariantViolation("ack range underflow"))?;

        // walk the pairs once to find their extent and prove no underflow
        let mut cursor = buffer;
        let start_len = cursor.len();
        for _ in 0..range_count.as_u64() {
            let (gap, next) = cursor.decode::<VarInt>()?;
            let (len, next) = next.decode::<VarInt>()?;
            let largest = smallest
                .checked_sub(gap.as_u64())
                .and_then(|value| value.checked_sub(2))
                .ok_or(DecoderError::InvariantViolation("ack range underflow"))?;
            smallest = largest
                .checked_sub(len.as_u64())
                .ok_or(DecoderError::InvariantViolation("ack range underflow"))?;
            cursor = next;
        }
        let consumed = start_len - cursor.len();
        let (ranges, buffer) = buffer.decode_slice(consumed)?;

        let ack_ranges = AckRangesDecoder {
            largest_acknowledged: largest_acknowledged.as_u64(),
            first_range_len: first_range_len.as_u64(),
            range_count: range_count.as_u64(),
            ranges,
        };

        let (features, buffer) = if tag == EXTENDED_TAG {
            let (features, buffer) = buffer.decode::<VarInt>()?;
            (features.as_u64(), buffer)
        } else if tag == TAG_W_ECN {
            (extended_features::ECN_COUNTS, buffer)
        } else {
            (0, buffer)
        };

        let (ecn_counts, buffer) = if features & extended_features::ECN_COUNTS != 0 {
            let (counts, buffer) = buffer.decode::<EcnCounts>()?;
            (Some(counts), buffer)
        } else {
            (None, buffer)
        };

        let (receive_timestamps, buffer) = if features & extended_features::RECEIVE_TIMESTAMPS != 0
        {
            let (timestamps, buffer) = buffer.decode::<ReceiveTimestamps>()?;
            (Some(timestamps), buffer)
        } else {
            (None, buffer)
        };

        let frame = Ack {
            ack_delay,
            ack_ranges,
            ecn_counts,
            receive_timestamps,
        };
        Ok((frame, buffer))
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
//# ECN Counts {
//#   ECT0 Count (i),
//#   ECT1 Count (i),
//#   ECN-CE Count (i),
//# }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect_0_count: VarInt,
    pub ect_1_count: VarInt,
    pub ce_count: VarInt,
}

decoder_value!(
    impl<'a> EcnCounts {
        fn decode(buffer: Buffer) -> Result<EcnCounts> {
            let (ect_0_count, buffer) = buffer.decode()?;
            let (ect_1_count, buffer) = buffer.decode()?;
            let (ce_count, buffer) = buffer.decode()?;
            let counts = EcnCounts {
                ect_0_count,
                ect_1_count,
                ce_count,
            };
            Ok((counts, buffer))
        }
    }
);

impl EncoderValue for EcnCounts {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.ect_0_count);
        encoder.encode(&self.ect_1_count);
        encoder.encode(&self.ce_count);
    }
}

/// Receive-timestamp ranges from the extended ACK form.
///
/// Deltas are exponent-scaled microseconds, most recent packet first
/// within each range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiveTimestamps {
    pub ranges: Vec<TimestampRange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimestampRange {
    /// Packet-number gap from the previous range's smallest
    pub gap: VarInt,
    pub deltas: Vec<VarInt>,
}

decoder_value!(
    impl<'a> ReceiveTimestamps {
        fn decode(buffer: Buffer) -> Result<ReceiveTimestamps> {
            let (count, buffer) = buffer.decode::<VarInt>()?;
            if count.as_u64() > MAX_TIMESTAMP_RANGES {
                return Err(weft_codec::DecoderError::InvariantViolation(
                    "too many timestamp ranges",
                ));
            }
            let mut ranges = Vec::with_capacity(count.as_u64() as usize);
            let mut buffer = buffer;
            for _ in 0..count.as_u64() {
                let (gap, rest) = buffer.decode::<VarInt>()?;
                let (delta_count, rest) = rest.decode::<VarInt>()?;
                if delta_count.as_u64() > MAX_TIMESTAMP_RANGES {
                    return Err(weft_codec::DecoderError::InvariantViolation(
                        "too many timestamp deltas",
                    ));
                }
                let mut deltas = Vec::with_capacity(delta_count.as_u64() as usize);
                let mut rest = rest;
                for _ in 0..delta_count.as_u64() {
                    let (delta, next) = rest.decode::<VarInt>()?;
                    deltas.push(delta);
                    rest = next;
                }
                ranges.push(TimestampRange { gap, deltas });
                buffer = rest;
            }
            Ok((ReceiveTimestamps { ranges }, buffer))
        }
    }
);

impl EncoderValue for ReceiveTimestamps {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&VarInt::try_from(self.ranges.len()).unwrap_or(VarInt::MAX));
        for range in &self.ranges {
            encoder.encode(&range.gap);
            encoder.encode(&VarInt::try_from(range.deltas.len()).unwrap_or(VarInt::MAX));
            for delta in &range.deltas {
                encoder.encode(delta);
            }
        }
    }
}

impl<A: AckRanges> EncoderValue for Ack<A> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let extended = self.is_extended();
        if extended {
            // multi-byte frame type
            encoder.encode(&VarInt::new(crate::frame::ext_tag::ACK_EXTENDED).unwrap_or(VarInt::MAX));
        } else if self.ecn_counts.is_some() {
            encoder.encode(&TAG_W_ECN);
        } else {
            encoder.encode(&TAG);
        }

        let mut iter = self.ack_ranges.ack_ranges();
        let first = iter.next();
        debug_assert!(first.is_some(), "ack frame requires at least one range");
        let first = first.unwrap_or(0..=0);
        let largest = *first.end();
        let first_len = first.end() - first.start();

        encoder.encode(&VarInt::new(largest).unwrap_or(VarInt::MAX));
        encoder.encode(&self.ack_delay);

        let mut pairs = Vec::new();
        let mut previous_smallest = *first.start();
        for range in iter {
            let gap = previous_smallest - range.end() - 2;
            let len = range.end() - range.start();
            previous_smallest = *range.start();
            pairs.push((gap, len));
        }

        encoder.encode(&VarInt::new(pairs.len() as u64).unwrap_or(VarInt::MAX));
        encoder.encode(&VarInt::new(first_len).unwrap_or(VarInt::MAX));
        for (gap, len) in &pairs {
            encoder.encode(&VarInt::new(*gap).unwrap_or(VarInt::MAX));
            encoder.encode(&VarInt::new(*len).unwrap_or(VarInt::MAX));
        }

        if extended {
            let mut features = 0u64;
            if self.ecn_counts.is_some() {
                features |= extended_features::ECN_COUNTS;
            }
            if self.receive_timestamps.is_some() {
                features |= extended_features::RECEIVE_TIMESTAMPS;
            }
            encoder.encode(&VarInt::new(features).unwrap_or(VarInt::MAX));
        }

        if let Some(counts) = &self.ecn_counts {
            encoder.encode(counts);
        }
        if let Some(timestamps) = &self.receive_timestamps {
            encoder.encode(timestamps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::EncoderBuffer;

    fn ack_from_intervals(ranges: &[RangeInclusive<u64>]) -> Ack<IntervalSet> {
        let mut set = IntervalSet::new();
        for range in ranges {
            set.insert(range.clone());
        }
        Ack {
            ack_delay: VarInt::from_u8(0),
            ack_ranges: set,
            ecn_counts: None,
            receive_timestamps: None,
        }
    }

    fn round_trip(ack: &Ack<IntervalSet>) -> Vec<RangeInclusive<u64>> {
        let mut storage = [0u8; 1024];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(ack);
        let len = encoder.len();
        let (frame, remaining) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert!(remaining.is_empty());
        match frame {
            Frame::Ack(decoded) => decoded.ack_ranges.ack_ranges().collect(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn single_range() {
        let ack = ack_from_intervals(&[3..=7]);
        assert_eq!(round_trip(&ack), vec![3..=7]);
    }

    #[test]
    fn multiple_ranges_descending() {
        let ack = ack_from_intervals(&[0..=1, 5..=9, 20..=20]);
        assert_eq!(round_trip(&ack), vec![20..=20, 5..=9, 0..=1]);
    }

    #[test]
    fn ecn_counts_round_trip() {
        let mut ack = ack_from_intervals(&[1..=2]);
        ack.ecn_counts = Some(EcnCounts {
            ect_0_count: VarInt::from_u8(1),
            ect_1_count: VarInt::from_u8(2),
            ce_count: VarInt::from_u8(3),
        });

        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&ack);
        let len = encoder.len();
        assert_eq!(storage[0], TAG_W_ECN);
        let (frame, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        match frame {
            Frame::Ack(decoded) => assert_eq!(decoded.ecn_counts, ack.ecn_counts),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn extended_form_with_timestamps() {
        let mut ack = ack_from_intervals(&[4..=6]);
        ack.receive_timestamps = Some(ReceiveTimestamps {
            ranges: vec![TimestampRange {
                gap: VarInt::from_u8(0),
                deltas: vec![VarInt::from_u8(10), VarInt::from_u8(3)],
            }],
        });

        let mut storage = [0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&ack);
        let len = encoder.len();
        let (frame, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        match frame {
            Frame::Ack(decoded) => {
                assert_eq!(decoded.receive_timestamps, ack.receive_timestamps);
                assert_eq!(decoded.ack_ranges.ack_ranges().collect::<Vec<_>>(), vec![4..=6]);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn underflowing_ranges_rejected() {
        // largest=1, delay=0, range_count=1, first_range=1 -> smallest=0,
        // then gap=0 forces the next largest below zero
        let bytes = [TAG, 1, 0, 1, 1, 0, 0];
        assert!(decode(DecoderBuffer::new(&bytes)).is_err());
    }

    #[test]
    fn check_range_round_trip() {
        bolero::check!()
            .with_type::<Vec<(u16, u8)>>()
            .for_each(|seed| {
                let mut set = IntervalSet::new();
                for (start, len) in seed {
                    let start = *start as u64;
                    set.insert(start..=start + *len as u64);
                }
                if set.is_empty() {
                    return;
                }
                let ack = Ack {
                    ack_delay: VarInt::from_u8(0),
                    ack_ranges: set.clone(),
                    ecn_counts: None,
                    receive_timestamps: None,
                };
                let decoded = round_trip(&ack);
                assert_eq!(decoded, set.intervals_descending().collect::<Vec<_>>());
            });
    }
}
