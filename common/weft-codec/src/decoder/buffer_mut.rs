// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::{
    impl_buffer, DecoderBuffer, DecoderBufferMutResult, DecoderError,
    DecoderParameterizedValueMut, DecoderValueMut,
};

/// A checked cursor over an exclusive byte slice.
///
/// Used on the packet receive path, where header protection removal
/// and AEAD decryption rewrite the bytes in place while decoding.
#[derive(Debug, PartialEq, Eq)]
pub struct DecoderBufferMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> DecoderBufferMut<'a> {
    #[inline]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Converts the buffer into a shared buffer over the same bytes
    #[inline]
    pub fn freeze(self) -> DecoderBuffer<'a> {
        DecoderBuffer::new(self.bytes)
    }

    #[inline]
    pub fn as_less_safe_slice(&self) -> &[u8] {
        self.bytes
    }

    #[inline]
    pub fn as_less_safe_slice_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    #[inline]
    pub fn into_less_safe_slice(self) -> &'a mut [u8] {
        self.bytes
    }
}

impl_buffer!(
    DecoderBufferMut,
    DecoderBufferMutResult,
    DecoderValueMut,
    decode_mut,
    DecoderParameterizedValueMut,
    decode_parameterized_mut,
    split_at_mut
);

impl<'a> From<&'a mut [u8]> for DecoderBufferMut<'a> {
    #[inline]
    fn from(bytes: &'a mut [u8]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_is_visible_after_freeze() {
        let mut data = [1u8, 2, 3];
        let mut buffer = DecoderBufferMut::new(&mut data);
        buffer.as_less_safe_slice_mut()[0] = 9;

        let (value, _) = buffer.freeze().decode::<u8>().unwrap();
        assert_eq!(value, 9);
    }
}
