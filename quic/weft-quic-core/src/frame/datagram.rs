// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9221#section-4
//# DATAGRAM frames are used to transmit application data in an
//# unreliable manner.  The Type field in the DATAGRAM frame takes the
//# form 0b0011000X (or the values 0x30 and 0x31).

pub const TAG: Tag = 0x30;
pub const TAG_W_LEN: Tag = 0x31;

const LEN_BIT: Tag = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Datagram<Data> {
    /// When set, the data extends to the end of the packet and no
    /// length field is encoded
    pub is_last_frame: bool,
    pub data: Data,
}

impl<'a> DecoderParameterizedValue<'a> for Datagram<&'a [u8]> {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let is_last_frame = tag & LEN_BIT == 0;
        let (data, buffer) = if is_last_frame {
            let len = buffer.len();
            buffer.decode_slice(len)?
        } else {
            buffer.decode_slice_with_len_prefix::<VarInt>()?
        };
        let frame = Datagram {
            is_last_frame,
            data: data.into_less_safe_slice(),
        };
        Ok((frame, buffer))
    }
}

impl<Data: AsRef<[u8]>> EncoderValue for Datagram<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let data = self.data.as_ref();
        if self.is_last_frame {
            encoder.encode(&TAG);
        } else {
            encoder.encode(&TAG_W_LEN);
            encoder.encode(&VarInt::try_from(data.len()).unwrap_or(VarInt::MAX));
        }
        encoder.write_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::EncoderBuffer;

    #[test]
    fn round_trip() {
        for is_last_frame in [true, false] {
            let frame = Datagram {
                is_last_frame,
                data: &b"unreliable"[..],
            };
            let mut storage = [0u8; 32];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(&frame);
            let len = encoder.len();
            let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
            assert_eq!(decoded, Frame::Datagram(frame));
        }
    }
}
