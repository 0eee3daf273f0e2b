// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{
    convert::{TryFrom, TryInto},
    fmt,
    ops::Deref,
};
use weft_codec::{
    decoder_value, DecoderError, Encoder, EncoderValue,
};

#[cfg(any(test, feature = "generator"))]
use bolero_generator::prelude::*;

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# QUIC packets and frames commonly use a variable-length encoding for
//# non-negative integer values.  This encoding ensures that smaller
//# integer values need fewer bytes to encode.

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# This means that integers are encoded on 1, 2, 4, or 8 bytes and can
//# encode 6-, 14-, 30-, or 62-bit values, respectively.

pub const MAX_VARINT_VALUE: u64 = 4_611_686_018_427_387_903;

#[derive(Debug)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VarIntError {}

impl From<VarIntError> for DecoderError {
    fn from(_: VarIntError) -> Self {
        DecoderError::InvariantViolation("varint range exceeded")
    }
}

/// A 62-bit unsigned integer with the QUIC variable-length wire form
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
pub struct VarInt(#[cfg_attr(any(feature = "generator", test), generator(0..=MAX_VARINT_VALUE))] u64);

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);

    pub const ZERO: Self = Self(0);

    pub fn new(v: u64) -> Result<Self, VarIntError> {
        if v > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(v))
    }

    /// Returns a `VarInt` without validating the value is less than VarInt::MAX
    ///
    /// # Safety
    ///
    /// Callers need to ensure the value is less than or equal to VarInt::MAX
    pub const unsafe fn new_unchecked(value: u64) -> Self {
        Self(value)
    }

    pub const fn from_u8(v: u8) -> Self {
        Self(v as u64)
    }

    pub const fn from_u16(v: u16) -> Self {
        Self(v as u64)
    }

    pub const fn from_u32(v: u32) -> Self {
        Self(v as u64)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_add(value.0)?).ok()
    }

    #[inline]
    pub fn checked_add_usize(self, value: usize) -> Option<Self> {
        let value: Self = value.try_into().ok()?;
        self.checked_add(value)
    }

    #[inline]
    #[must_use]
    pub fn saturating_add(self, value: Self) -> Self {
        Self::new(self.0.saturating_add(value.0)).unwrap_or(Self::MAX)
    }

    #[inline]
    pub fn checked_sub(self, value: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(value.0)?))
    }

    #[inline]
    #[must_use]
    pub fn saturating_sub(self, value: Self) -> Self {
        Self(self.0.saturating_sub(value.0))
    }

    #[inline]
    pub fn checked_mul(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_mul(value.0)?).ok()
    }

    /// Returns the number of bytes the wire form occupies
    #[inline]
    pub fn encoding_len(self) -> usize {
        match self.0 {
            0..=63 => 1,
            64..=16_383 => 2,
            16_384..=1_073_741_823 => 4,
            _ => 8,
        }
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl From<u32> for VarInt {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<VarInt> for u64 {
    #[inline]
    fn from(value: VarInt) -> Self {
        value.0
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = core::num::TryFromIntError;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into()
    }
}

impl TryFrom<VarInt> for u32 {
    type Error = core::num::TryFromIntError;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.

decoder_value!(
    impl<'a> VarInt {
        fn decode(buffer: Buffer) -> Result<VarInt> {
            let (first, buffer) = buffer.decode::<u8>()?;
            match first >> 6 {
                0b00 => Ok((VarInt(first as u64), buffer)),
                0b01 => {
                    let (second, buffer) = buffer.decode::<u8>()?;
                    let value = (((first & 0b0011_1111) as u64) << 8) | second as u64;
                    Ok((VarInt(value), buffer))
                }
                0b10 => {
                    let (rest, buffer) = buffer.decode::<[u8; 3]>()?;
                    let value = (((first & 0b0011_1111) as u64) << 24)
                        | ((rest[0] as u64) << 16)
                        | ((rest[1] as u64) << 8)
                        | rest[2] as u64;
                    Ok((VarInt(value), buffer))
                }
                _ => {
                    let (rest, buffer) = buffer.decode::<[u8; 7]>()?;
                    let mut value = ((first & 0b0011_1111) as u64) << 56;
                    let mut shift = 48u32;
                    for byte in rest.iter() {
                        value |= (*byte as u64) << shift;
                        shift = shift.wrapping_sub(8);
                    }
                    Ok((VarInt(value), buffer))
                }
            }
        }
    }
);

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.0;
        match self.encoding_len() {
            1 => encoder.encode(&(value as u8)),
            2 => encoder.encode(&((value as u16) | (0b01 << 14))),
            4 => encoder.encode(&((value as u32) | (0b10 << 30))),
            _ => encoder.encode(&(value | (0b11 << 62))),
        }
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.encoding_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(value: VarInt) -> VarInt {
        let mut bytes = [0u8; 8];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        encoder.encode(&value);
        let len = encoder.len();
        assert_eq!(len, value.encoding_len());

        let (decoded, remaining) = DecoderBuffer::new(&bytes[..len]).decode::<VarInt>().unwrap();
        assert!(remaining.is_empty());
        decoded
    }

    #[test]
    fn rfc_examples() {
        // https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
        for (bytes, expected) in [
            (&[0x25u8][..], 37u64),
            (&[0x40, 0x25][..], 37),
            (&[0x7b, 0xbd][..], 15293),
            (&[0x9d, 0x7f, 0x3e, 0x7d][..], 494_878_333),
            (
                &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c][..],
                151_288_809_941_952_652,
            ),
        ] {
            let (value, _) = DecoderBuffer::new(bytes).decode::<VarInt>().unwrap();
            assert_eq!(value.as_u64(), expected);
        }
    }

    #[test]
    fn round_trip_bounds() {
        for value in [0, 63, 64, 16_383, 16_384, 1_073_741_823, 1_073_741_824] {
            let value = VarInt::new(value).unwrap();
            assert_eq!(round_trip(value), value);
        }
        assert_eq!(round_trip(VarInt::MAX), VarInt::MAX);
    }

    #[test]
    fn check_round_trip() {
        bolero::check!().with_type::<u64>().for_each(|value| {
            if let Ok(value) = VarInt::new(*value) {
                assert_eq!(round_trip(value), value);
            }
        });
    }

    #[test]
    fn out_of_range() {
        assert!(VarInt::new(MAX_VARINT_VALUE).is_ok());
        assert!(VarInt::new(MAX_VARINT_VALUE + 1).is_err());
    }
}
