// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

mod buffer;
mod buffer_mut;
mod value;

pub use buffer::*;
pub use buffer_mut::*;
pub use value::*;

use core::fmt;

/// Failure modes shared by all decoder buffers.
///
/// Errors carry no positional state; the buffer that produced them is
/// consumed by the failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderError {
    /// The buffer did not contain `usize` more bytes
    UnexpectedEof(usize),
    /// The buffer contained `usize` more bytes than expected
    UnexpectedBytes(usize),
    /// A length prefix pointed beyond the end of the buffer
    LengthPrefixOutOfBounds,
    /// The decoded value violated an invariant of its type
    InvariantViolation(&'static str),
}

impl fmt::Display for DecoderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof(len) => write!(f, "unexpected eof: {len}"),
            Self::UnexpectedBytes(len) => write!(f, "unexpected bytes: {len}"),
            Self::LengthPrefixOutOfBounds => write!(f, "length prefix out of bounds"),
            Self::InvariantViolation(message) => write!(f, "{message}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecoderError {}

pub type DecoderBufferResult<'a, T> = Result<(T, DecoderBuffer<'a>), DecoderError>;
pub type DecoderBufferMutResult<'a, T> = Result<(T, DecoderBufferMut<'a>), DecoderError>;

macro_rules! impl_buffer {
    ($name:ident, $result:ident, $value:ident, $value_call:ident, $parameterized:ident, $parameterized_call:ident, $split:ident) => {
        impl<'a> $name<'a> {
            /// Returns the number of bytes remaining in the buffer
            #[inline]
            pub fn len(&self) -> usize {
                self.bytes.len()
            }

            /// Returns `true` if no bytes remain
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.bytes.is_empty()
            }

            /// Ensures at least `len` bytes remain
            #[inline]
            pub fn ensure_len(&self, len: usize) -> Result<(), DecoderError> {
                if let Some(missing) = len.checked_sub(self.len()) {
                    if missing > 0 {
                        return Err(DecoderError::UnexpectedEof(missing));
                    }
                }
                Ok(())
            }

            /// Ensures the buffer has been fully consumed
            #[inline]
            pub fn ensure_empty(&self) -> Result<(), DecoderError> {
                if self.is_empty() {
                    Ok(())
                } else {
                    Err(DecoderError::UnexpectedBytes(self.len()))
                }
            }

            /// Reads the byte at `index` without consuming anything
            #[inline]
            pub fn peek_byte(&self, index: usize) -> Result<u8, DecoderError> {
                self.ensure_len(index + 1)?;
                Ok(self.bytes[index])
            }

            /// Decodes a value of type `T`, splitting it from the buffer
            #[inline]
            pub fn decode<T: $value<'a>>(self) -> $result<'a, T> {
                T::$value_call(self)
            }

            /// Decodes a value of type `T` with the given `parameter`
            #[inline]
            pub fn decode_parameterized<T: $parameterized<'a>>(
                self,
                parameter: T::Parameter,
            ) -> $result<'a, T> {
                T::$parameterized_call(parameter, self)
            }

            /// Splits off a child buffer of `count` bytes
            #[inline]
            pub fn decode_slice(self, count: usize) -> $result<'a, $name<'a>> {
                self.ensure_len(count)?;
                let (slice, remaining) = self.bytes.$split(count);
                Ok((Self::new(slice), Self::new(remaining)))
            }

            /// Splits off a child buffer prefixed by a length of type `Len`
            #[inline]
            pub fn decode_slice_with_len_prefix<Len: $value<'a> + TryInto<usize>>(
                self,
            ) -> $result<'a, $name<'a>> {
                let (len, buffer) = self.decode::<Len>()?;
                let len = len
                    .try_into()
                    .map_err(|_| DecoderError::LengthPrefixOutOfBounds)?;
                buffer.decode_slice(len)
            }

            /// Decodes a value of type `T` from a length-prefixed region,
            /// requiring the value to consume the entire region
            #[inline]
            pub fn decode_with_len_prefix<Len: $value<'a> + TryInto<usize>, T: $value<'a>>(
                self,
            ) -> $result<'a, T> {
                let (slice, buffer) = self.decode_slice_with_len_prefix::<Len>()?;
                let (value, slice) = slice.decode::<T>()?;
                slice.ensure_empty()?;
                Ok((value, buffer))
            }

            /// Skips `count` bytes
            #[inline]
            pub fn skip(self, count: usize) -> Result<$name<'a>, DecoderError> {
                let (_, remaining) = self.decode_slice(count)?;
                Ok(remaining)
            }
        }
    };
}

pub(crate) use impl_buffer;

/// Implements `DecoderValue` and `DecoderValueMut` from a single body.
///
/// The body is written once against a generic buffer; the macro
/// instantiates it for both the shared and mutable buffer types.
#[macro_export]
macro_rules! decoder_value {
    (impl<$lt:lifetime $(, $generics:ident)*> $ty:ty { fn decode($buffer:ident: Buffer) -> Result<$ret:ty> $body:block }) => {
        impl<$lt $(, $generics: $crate::DecoderValue<$lt>)*> $crate::DecoderValue<$lt> for $ty {
            #[inline]
            fn decode($buffer: $crate::DecoderBuffer<$lt>) -> $crate::DecoderBufferResult<$lt, $ret> $body
        }

        impl<$lt $(, $generics: $crate::DecoderValueMut<$lt>)*> $crate::DecoderValueMut<$lt> for $ty {
            #[inline]
            fn decode_mut($buffer: $crate::DecoderBufferMut<$lt>) -> $crate::DecoderBufferMutResult<$lt, $ret> $body
        }
    };
}

/// Implements the parameterized decoder traits from a single body.
#[macro_export]
macro_rules! decoder_parameterized_value {
    (impl<$lt:lifetime $(, $generics:ident)*> $ty:ty { fn decode($param:ident: $param_ty:ty, $buffer:ident: Buffer) -> Result<$ret:ty> $body:block }) => {
        impl<$lt $(, $generics: $crate::DecoderValue<$lt>)*> $crate::DecoderParameterizedValue<$lt> for $ty {
            type Parameter = $param_ty;

            #[inline]
            fn decode_parameterized(
                $param: Self::Parameter,
                $buffer: $crate::DecoderBuffer<$lt>,
            ) -> $crate::DecoderBufferResult<$lt, $ret> $body
        }

        impl<$lt $(, $generics: $crate::DecoderValueMut<$lt>)*> $crate::DecoderParameterizedValueMut<$lt> for $ty {
            type Parameter = $param_ty;

            #[inline]
            fn decode_parameterized_mut(
                $param: Self::Parameter,
                $buffer: $crate::DecoderBufferMut<$lt>,
            ) -> $crate::DecoderBufferMutResult<$lt, $ret> $body
        }
    };
}
