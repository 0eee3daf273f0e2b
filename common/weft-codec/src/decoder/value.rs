// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::{DecoderBuffer, DecoderBufferMut, DecoderBufferMutResult, DecoderBufferResult};
use byteorder::{ByteOrder, NetworkEndian};

/// A value which can be decoded from a shared buffer
pub trait DecoderValue<'a>: Sized {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self>;
}

/// A value which can be decoded from an exclusive buffer
pub trait DecoderValueMut<'a>: Sized {
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self>;
}

/// A value whose decoding depends on out-of-band information,
/// e.g. a frame tag or a packet-number length
pub trait DecoderParameterizedValue<'a>: Sized {
    type Parameter;

    fn decode_parameterized(
        parameter: Self::Parameter,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, Self>;
}

pub trait DecoderParameterizedValueMut<'a>: Sized {
    type Parameter;

    fn decode_parameterized_mut(
        parameter: Self::Parameter,
        buffer: DecoderBufferMut<'a>,
    ) -> DecoderBufferMutResult<'a, Self>;
}

macro_rules! decoder_int {
    ($ty:ident, $size:expr, $read:expr) => {
        impl<'a> DecoderValue<'a> for $ty {
            #[inline]
            fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice($size)?;
                let value = ($read)(slice.into_less_safe_slice());
                Ok((value, buffer))
            }
        }

        impl<'a> DecoderValueMut<'a> for $ty {
            #[inline]
            fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self> {
                let (slice, buffer) = buffer.decode_slice($size)?;
                let value = ($read)(slice.as_less_safe_slice());
                Ok((value, buffer))
            }
        }
    };
}

decoder_int!(u8, 1, |slice: &[u8]| slice[0]);
decoder_int!(u16, 2, NetworkEndian::read_u16);
decoder_int!(u32, 4, NetworkEndian::read_u32);
decoder_int!(u64, 8, NetworkEndian::read_u64);

impl<'a, const LEN: usize> DecoderValue<'a> for [u8; LEN] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(LEN)?;
        let mut value = [0u8; LEN];
        value.copy_from_slice(slice.into_less_safe_slice());
        Ok((value, buffer))
    }
}

impl<'a, const LEN: usize> DecoderValueMut<'a> for [u8; LEN] {
    #[inline]
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self> {
        let (slice, buffer) = buffer.decode_slice(LEN)?;
        let mut value = [0u8; LEN];
        value.copy_from_slice(slice.as_less_safe_slice());
        Ok((value, buffer))
    }
}

impl<'a> DecoderValue<'a> for &'a [u8] {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        let (slice, buffer) = buffer.decode_slice(len)?;
        Ok((slice.into_less_safe_slice(), buffer))
    }
}

impl<'a> DecoderValue<'a> for DecoderBuffer<'a> {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let len = buffer.len();
        buffer.decode_slice(len)
    }
}

impl<'a> DecoderValueMut<'a> for DecoderBufferMut<'a> {
    #[inline]
    fn decode_mut(buffer: DecoderBufferMut<'a>) -> DecoderBufferMutResult<'a, Self> {
        let len = buffer.len();
        buffer.decode_slice(len)
    }
}

#[cfg(feature = "bytes")]
impl<'a> DecoderValue<'a> for bytes::Bytes {
    #[inline]
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (slice, buffer) = <&[u8]>::decode(buffer)?;
        Ok((bytes::Bytes::copy_from_slice(slice), buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_order_integers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let buffer = DecoderBuffer::new(&data);
        let (value, _) = buffer.decode::<u64>().unwrap();
        assert_eq!(value, 0x0102_0304_0506_0708);

        let (value, _) = DecoderBuffer::new(&data).decode::<u16>().unwrap();
        assert_eq!(value, 0x0102);
    }
}
