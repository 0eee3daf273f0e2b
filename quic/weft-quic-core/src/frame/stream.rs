// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
//# STREAM frames implicitly create a stream and carry stream data.  The
//# Type field in the STREAM frame takes the form 0b00001XXX (or the set
//# of values from 0x08 to 0x0f).  The three low-order bits of the frame
//# type determine the fields that are present in the frame:

pub const TAG_RANGE_START: Tag = 0x08;
pub const TAG_RANGE_END: Tag = 0x0f;

/// Stream frames carrying a group id, negotiated through the
/// stream-groups transport parameter; flag bits match STREAM
pub const GROUP_TAG_RANGE_START: Tag = 0x32;
pub const GROUP_TAG_RANGE_END: Tag = 0x39;

const OFF_BIT: Tag = 0x04;
const LEN_BIT: Tag = 0x02;
const FIN_BIT: Tag = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stream<Data> {
    pub stream_id: VarInt,

    /// Present only on the group wire form
    pub group_id: Option<VarInt>,

    pub offset: VarInt,

    /// When set, the data extends to the end of the packet and no
    /// length field is encoded
    pub is_last_frame: bool,

    pub is_fin: bool,

    pub data: Data,
}

impl<Data> Stream<Data> {
    #[inline]
    pub fn tag(&self) -> Tag {
        let mut tag = if self.group_id.is_some() {
            GROUP_TAG_RANGE_START
        } else {
            TAG_RANGE_START
        };
        if self.offset.as_u64() != 0 {
            tag |= OFF_BIT;
        }
        if !self.is_last_frame {
            tag |= LEN_BIT;
        }
        if self.is_fin {
            tag |= FIN_BIT;
        }
        tag
    }
}

impl<'a> DecoderParameterizedValue<'a> for Stream<&'a [u8]> {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let is_group = (GROUP_TAG_RANGE_START..=GROUP_TAG_RANGE_END).contains(&tag);
        let (stream_id, buffer) = buffer.decode::<VarInt>()?;

        let (group_id, buffer) = if is_group {
            let (group_id, buffer) = buffer.decode::<VarInt>()?;
            (Some(group_id), buffer)
        } else {
            (None, buffer)
        };

        let (offset, buffer) = if tag & OFF_BIT != 0 {
            buffer.decode::<VarInt>()?
        } else {
            (VarInt::ZERO, buffer)
        };

        let is_last_frame = tag & LEN_BIT == 0;
        let (data, buffer) = if is_last_frame {
            let len = buffer.len();
            buffer.decode_slice(len)?
        } else {
            buffer.decode_slice_with_len_prefix::<VarInt>()?
        };

        let frame = Stream {
            stream_id,
            group_id,
            offset,
            is_last_frame,
            is_fin: tag & FIN_BIT != 0,
            data: data.into_less_safe_slice(),
        };
        Ok((frame, buffer))
    }
}

impl<Data: AsRef<[u8]>> EncoderValue for Stream<Data> {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let data = self.data.as_ref();
        encoder.encode(&self.tag());
        encoder.encode(&self.stream_id);
        if let Some(group_id) = &self.group_id {
            encoder.encode(group_id);
        }
        if self.offset.as_u64() != 0 {
            encoder.encode(&self.offset);
        }
        if !self.is_last_frame {
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

    fn round_trip(frame: Stream<&[u8]>) {
        let mut storage = [0u8; 128];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();
        let (decoded, remaining) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, Frame::Stream(frame));
    }

    #[test]
    fn field_combinations() {
        for offset in [0u32, 77] {
            for is_last_frame in [false, true] {
                for is_fin in [false, true] {
                    for group_id in [None, Some(VarInt::from_u8(3))] {
                        round_trip(Stream {
                            stream_id: VarInt::from_u8(4),
                            group_id,
                            offset: VarInt::from_u32(offset),
                            is_last_frame,
                            is_fin,
                            data: b"stream data",
                        });
                    }
                }
            }
        }
    }

    #[test]
    fn zero_length_fin() {
        round_trip(Stream {
            stream_id: VarInt::from_u8(0),
            group_id: None,
            offset: VarInt::from_u32(1000),
            is_last_frame: false,
            is_fin: true,
            data: b"",
        });
    }
}
