// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::encoder::{Encoder, EncoderLenEstimator};
use byteorder::{ByteOrder, NetworkEndian};
use core::convert::TryFrom;

/// A value which can be encoded into any `Encoder`
pub trait EncoderValue: Sized {
    /// Encodes the value into the encoder
    fn encode<E: Encoder>(&self, encoder: &mut E);

    /// Returns the number of bytes `encode` would write
    #[inline]
    fn encoding_size(&self) -> usize {
        let mut estimator = EncoderLenEstimator::new(usize::MAX);
        self.encode(&mut estimator);
        estimator.len()
    }

    /// Encodes the value prefixed with its length as a `Len`
    #[inline]
    fn encode_with_len_prefix<Len: TryFrom<usize> + EncoderValue, E: Encoder>(
        &self,
        encoder: &mut E,
    ) where
        Len::Error: core::fmt::Debug,
    {
        let len = Len::try_from(self.encoding_size()).expect("length prefix out of range");
        encoder.encode(&len);
        encoder.encode(self);
    }
}

macro_rules! encoder_int {
    ($ty:ident, $size:expr, $write:expr) => {
        impl EncoderValue for $ty {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.write_sized($size, |bytes| ($write)(bytes, *self));
            }

            #[inline]
            fn encoding_size(&self) -> usize {
                $size
            }
        }
    };
}

encoder_int!(u8, 1, |bytes: &mut [u8], value| bytes[0] = value);
encoder_int!(u16, 2, NetworkEndian::write_u16);
encoder_int!(u32, 4, NetworkEndian::write_u32);
encoder_int!(u64, 8, NetworkEndian::write_u64);

impl EncoderValue for &[u8] {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self)
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len()
    }
}

impl<T: EncoderValue> EncoderValue for &T {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        (**self).encode(encoder)
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        (**self).encoding_size()
    }
}

impl<T: EncoderValue> EncoderValue for Option<T> {
    /// `None` encodes to nothing, so optional trailing fields compose
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        if let Some(value) = self {
            value.encode(encoder)
        }
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.as_ref().map_or(0, |value| value.encoding_size())
    }
}

#[cfg(feature = "bytes")]
impl EncoderValue for bytes::Bytes {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(self)
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderBuffer;

    #[test]
    fn encoding_size_matches_encode() {
        let mut bytes = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        let value = 0xabcdu16;
        encoder.encode(&value);
        assert_eq!(value.encoding_size(), encoder.len());
    }

    #[test]
    fn len_prefix_round_trip() {
        let mut bytes = [0u8; 16];
        let mut encoder = EncoderBuffer::new(&mut bytes);
        let payload: &[u8] = &[1, 2, 3];
        encoder.encode_with_len_prefix::<u8, _>(&payload);
        assert_eq!(&bytes[..4], &[3, 1, 2, 3]);
    }
}
