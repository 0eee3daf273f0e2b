// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::{
    impl_buffer, DecoderBufferResult, DecoderError, DecoderParameterizedValue, DecoderValue,
};

/// A checked cursor over a shared byte slice.
///
/// Every operation consumes the buffer and returns the remaining
/// suffix, so a decoded prefix can never be observed twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecoderBuffer<'a> {
    bytes: &'a [u8],
}

impl<'a> DecoderBuffer<'a> {
    #[inline]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Borrows the remaining bytes without consuming the buffer.
    ///
    /// "Less safe" because the caller loses the consume-once
    /// discipline the buffer otherwise enforces.
    #[inline]
    pub fn as_less_safe_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// Consumes the buffer, returning the remaining bytes
    #[inline]
    pub fn into_less_safe_slice(self) -> &'a [u8] {
        self.bytes
    }
}

impl_buffer!(
    DecoderBuffer,
    DecoderBufferResult,
    DecoderValue,
    decode,
    DecoderParameterizedValue,
    decode_parameterized,
    split_at
);

impl<'a> From<&'a [u8]> for DecoderBuffer<'a> {
    #[inline]
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_prefix() {
        let data = [0u8, 1, 2, 3, 4];
        let buffer = DecoderBuffer::new(&data);

        let (value, buffer) = buffer.decode::<u8>().unwrap();
        assert_eq!(value, 0);

        let (value, buffer) = buffer.decode::<u16>().unwrap();
        assert_eq!(value, 258);

        let (slice, buffer) = buffer.decode_slice(2).unwrap();
        assert_eq!(slice.as_less_safe_slice(), &[3, 4]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn eof_reports_missing_len() {
        let data = [0u8; 2];
        let buffer = DecoderBuffer::new(&data);
        assert_eq!(
            buffer.decode::<u32>().unwrap_err(),
            DecoderError::UnexpectedEof(2)
        );
    }

    #[test]
    fn len_prefix() {
        let data = [3u8, 10, 11, 12, 99];
        let buffer = DecoderBuffer::new(&data);
        let (slice, buffer) = buffer.decode_slice_with_len_prefix::<u8>().unwrap();
        assert_eq!(slice.as_less_safe_slice(), &[10, 11, 12]);
        assert_eq!(buffer.len(), 1);
    }
}
