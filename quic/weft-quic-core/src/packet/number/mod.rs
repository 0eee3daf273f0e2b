// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet numbers, their spaces, and the truncated wire encoding.

use crate::varint::VarInt;
use core::fmt;
use weft_codec::{DecoderBufferMut, DecoderBufferMutResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# Packet numbers are divided into three spaces in QUIC:
//#
//# Initial space:  All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# Handshake space:  All Handshake packets (Section 17.2.4) are in this
//#    space.
//#
//# Application data space:  All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) packets are in this space.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    #[inline]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Initial)
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Handshake)
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }

    /// Tags a `VarInt` as a packet number in this space
    #[inline]
    pub fn new_packet_number(self, value: VarInt) -> PacketNumber {
        PacketNumber { space: self, value }
    }

    pub fn all() -> [Self; 3] {
        [Self::Initial, Self::Handshake, Self::ApplicationData]
    }

    #[inline]
    pub(crate) fn assert_eq(self, other: Self) {
        debug_assert_eq!(self, other, "packet numbers from different spaces compared");
    }
}

impl fmt::Display for PacketNumberSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Handshake => write!(f, "handshake"),
            Self::ApplicationData => write!(f, "application data"),
        }
    }
}

/// A full 62-bit packet number bound to its space.
///
/// Packet numbers from different spaces are incomparable; mixing
/// them is a logic error caught by debug assertions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketNumber {
    space: PacketNumberSpace,
    value: VarInt,
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PacketNumber({:?}, {})", self.space, self.value)
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl PacketNumber {
    #[inline]
    pub const fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.value.as_u64()
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.value
    }

    /// The packet number following this one, or `None` at the top of
    /// the space
    #[inline]
    pub fn next(self) -> Option<Self> {
        Some(Self {
            space: self.space,
            value: self.value.checked_add(VarInt::from_u8(1))?,
        })
    }

    #[inline]
    pub fn checked_distance(self, other: Self) -> Option<u64> {
        self.space.assert_eq(other.space);
        self.as_u64().checked_sub(other.as_u64())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# the sender MUST use a packet number size able to represent more than
    //# twice as large a range as the difference between the largest
    //# acknowledged packet and the packet number being sent.

    /// Truncates for the wire relative to the largest packet number
    /// the peer has acknowledged
    pub fn truncate(self, largest_acknowledged: Self) -> Option<TruncatedPacketNumber> {
        self.space.assert_eq(largest_acknowledged.space);
        let distance = self
            .as_u64()
            .checked_sub(largest_acknowledged.as_u64())?
            .checked_mul(2)?;
        let len = PacketNumberLen::for_range(distance)?;
        Some(TruncatedPacketNumber {
            space: self.space,
            len,
            value: (self.as_u64() & len.max_value()) as u32,
        })
    }
}

/// The 1–4 byte length of a truncated packet number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PacketNumberLen {
    U8,
    U16,
    U24,
    U32,
}

/// The packet-number-length bits in the protected first byte
pub const PACKET_NUMBER_LEN_MASK: u8 = 0b11;

impl PacketNumberLen {
    #[inline]
    pub fn bytesize(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U24 => 3,
            Self::U32 => 4,
        }
    }

    /// Largest value representable at this length
    #[inline]
    pub fn max_value(self) -> u64 {
        match self {
            Self::U8 => 0xff,
            Self::U16 => 0xffff,
            Self::U24 => 0xff_ffff,
            Self::U32 => 0xffff_ffff,
        }
    }

    /// Smallest length able to represent `range`
    #[inline]
    pub fn for_range(range: u64) -> Option<Self> {
        match range {
            0..=0xff => Some(Self::U8),
            0x100..=0xffff => Some(Self::U16),
            0x1_0000..=0xff_ffff => Some(Self::U24),
            0x100_0000..=0xffff_ffff => Some(Self::U32),
            _ => None,
        }
    }

    /// Recovers the length from the packet-number-length header bits
    #[inline]
    pub fn from_packet_tag(tag: u8) -> Self {
        match tag & PACKET_NUMBER_LEN_MASK {
            0b00 => Self::U8,
            0b01 => Self::U16,
            0b10 => Self::U24,
            _ => Self::U32,
        }
    }

    /// The bits contributed to the unprotected first byte
    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        match self {
            Self::U8 => 0b00,
            Self::U16 => 0b01,
            Self::U24 => 0b10,
            Self::U32 => 0b11,
        }
    }
}

/// A wire-form packet number: the low `len` bytes of the full value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    space: PacketNumberSpace,
    len: PacketNumberLen,
    value: u32,
}

impl TruncatedPacketNumber {
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn len(self) -> PacketNumberLen {
        self.len
    }

    #[inline]
    pub fn bytesize(self) -> usize {
        self.len.bytesize()
    }

    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        self.len.into_packet_tag_mask()
    }

    /// Decodes a truncated number of the given length from the buffer
    pub fn decode_mut<'a>(
        space: PacketNumberSpace,
        len: PacketNumberLen,
        buffer: DecoderBufferMut<'a>,
    ) -> DecoderBufferMutResult<'a, Self> {
        let (value, buffer) = match len {
            PacketNumberLen::U8 => {
                let (value, buffer) = buffer.decode::<u8>()?;
                (value as u32, buffer)
            }
            PacketNumberLen::U16 => {
                let (value, buffer) = buffer.decode::<u16>()?;
                (value as u32, buffer)
            }
            PacketNumberLen::U24 => {
                let (bytes, buffer) = buffer.decode::<[u8; 3]>()?;
                (
                    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32,
                    buffer,
                )
            }
            PacketNumberLen::U32 => buffer.decode::<u32>()?,
        };
        Ok((Self { space, len, value }, buffer))
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //# DecodePacketNumber(largest_pn, truncated_pn, pn_nbits):
    //#   expected_pn  = largest_pn + 1
    //#   pn_win       = 1 << pn_nbits
    //#   pn_hwin      = pn_win / 2
    //#   pn_mask      = pn_win - 1

    /// Reconstructs the full packet number relative to the largest
    /// received in this space
    pub fn expand(self, largest: Option<PacketNumber>) -> Result<PacketNumber, DecoderError> {
        if let Some(largest) = largest {
            self.space.assert_eq(largest.space());
        }
        let expected = largest.map_or(0, |largest| largest.as_u64() + 1);
        let win = self.len.max_value() + 1;
        let hwin = win / 2;
        let mask = win - 1;

        let candidate = (expected & !mask) | self.value as u64;
        let value = if candidate
            .checked_add(hwin)
            .map_or(false, |v| v <= expected)
            && candidate < (1u64 << 62) - win
        {
            candidate + win
        } else if candidate > expected + hwin && candidate >= win {
            candidate - win
        } else {
            candidate
        };

        let value = VarInt::new(value)
            .map_err(|_| DecoderError::InvariantViolation("packet number out of range"))?;
        Ok(self.space.new_packet_number(value))
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self.len {
            PacketNumberLen::U8 => encoder.encode(&(self.value as u8)),
            PacketNumberLen::U16 => encoder.encode(&(self.value as u16)),
            PacketNumberLen::U24 => {
                let bytes = self.value.to_be_bytes();
                encoder.write_slice(&bytes[1..]);
            }
            PacketNumberLen::U32 => encoder.encode(&self.value),
        }
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len.bytesize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pn(value: u64) -> PacketNumber {
        PacketNumberSpace::ApplicationData.new_packet_number(VarInt::new(value).unwrap())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //= type=test
    //# For example, if an endpoint has received an acknowledgment for packet
    //# 0xabe8bc, sending a packet with a number of 0xac5c02 requires a
    //# packet number encoding with 16 bits or more; whereas the 24-bit
    //# packet number encoding is needed to send a packet with a number of
    //# 0xace8fe.
    #[test]
    fn rfc_truncation_example() {
        let largest_acked = pn(0x00ab_e8bc);
        assert_eq!(
            pn(0x00ac_5c02).truncate(largest_acked).unwrap().bytesize(),
            2
        );
        assert_eq!(
            pn(0x00ac_e8fe).truncate(largest_acked).unwrap().bytesize(),
            3
        );
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //= type=test
    //# For example, if the highest successfully authenticated packet had a
    //# packet number of 0xa82f30ea, then a packet containing a 16-bit value
    //# of 0x9b32 will be decoded as 0xa82f9b32.
    #[test]
    fn rfc_expansion_example() {
        let largest = pn(0xa82f_30ea);
        let truncated = TruncatedPacketNumber {
            space: PacketNumberSpace::ApplicationData,
            len: PacketNumberLen::U16,
            value: 0x9b32,
        };
        assert_eq!(truncated.expand(Some(largest)).unwrap(), pn(0xa82f_9b32));
    }

    #[test]
    fn truncate_expand_round_trip() {
        bolero::check!()
            .with_type::<(u32, u16)>()
            .for_each(|(largest, delta)| {
                let largest = pn(*largest as u64);
                let next = pn(largest.as_u64() + *delta as u64 + 1);
                let truncated = next.truncate(largest).unwrap();
                // the receiver tracks `largest` as its largest received
                assert_eq!(truncated.expand(Some(largest)).unwrap(), next);
            });
    }

    #[test]
    fn first_packet_expands_without_largest() {
        let truncated = TruncatedPacketNumber {
            space: PacketNumberSpace::Initial,
            len: PacketNumberLen::U8,
            value: 0,
        };
        assert_eq!(
            truncated.expand(None).unwrap(),
            PacketNumberSpace::Initial.new_packet_number(VarInt::ZERO)
        );
    }
}
