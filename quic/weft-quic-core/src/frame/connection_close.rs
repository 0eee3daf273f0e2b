// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use core::fmt;
use weft_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.  The
//# CONNECTION_CLOSE frame with a type of 0x1c is used to signal errors
//# at only the QUIC layer, or the absence of errors (with the NO_ERROR
//# code).  The CONNECTION_CLOSE frame with a type of 0x1d is used to
//# signal an error with the application that uses QUIC.

pub const TRANSPORT_TAG: Tag = 0x1c;
pub const APPLICATION_TAG: Tag = 0x1d;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    pub error_code: VarInt,

    /// The frame type which triggered the error; absent on the
    /// application variant
    pub frame_type: Option<VarInt>,

    /// Human-readable diagnostic, not necessarily UTF-8 on the wire
    pub reason: Option<&'a [u8]>,
}

impl ConnectionClose<'_> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TRANSPORT_TAG
        } else {
            APPLICATION_TAG
        }
    }

    #[inline]
    pub fn is_application_close(&self) -> bool {
        self.frame_type.is_none()
    }
}

impl fmt::Debug for ConnectionClose<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionClose")
            .field("error_code", &self.error_code)
            .field("frame_type", &self.frame_type)
            .field(
                "reason",
                &self.reason.map(alloc::string::String::from_utf8_lossy),
            )
            .finish()
    }
}

extern crate alloc;

impl<'a> DecoderParameterizedValue<'a> for ConnectionClose<'a> {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (error_code, buffer) = buffer.decode()?;
        let (frame_type, buffer) = if tag == TRANSPORT_TAG {
            let (frame_type, buffer) = buffer.decode()?;
            (Some(frame_type), buffer)
        } else {
            (None, buffer)
        };
        let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
        let reason = reason.into_less_safe_slice();
        let reason = if reason.is_empty() {
            None
        } else {
            Some(reason)
        };
        let frame = ConnectionClose {
            error_code,
            frame_type,
            reason,
        };
        Ok((frame, buffer))
    }
}

impl EncoderValue for ConnectionClose<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.tag());
        encoder.encode(&self.error_code);
        if let Some(frame_type) = &self.frame_type {
            encoder.encode(frame_type);
        }
        let reason = self.reason.unwrap_or(&[]);
        encoder.encode(&VarInt::try_from(reason.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::EncoderBuffer;

    #[test]
    fn variants_round_trip() {
        for frame_type in [Some(VarInt::from_u8(0x08)), None] {
            let frame = ConnectionClose {
                error_code: VarInt::from_u8(0x0a),
                frame_type,
                reason: Some(b"went away"),
            };
            let mut storage = [0u8; 64];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(&frame);
            let len = encoder.len();
            let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
            assert_eq!(decoded, Frame::ConnectionClose(frame));
        }
    }
}
