// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Window-update and blocked signaling frames.
//!
//! These six frames are field-wise trivial; their semantics live in
//! the flow controllers.

use crate::{frame::Tag, stream::StreamType, varint::VarInt};
use weft_codec::{
    decoder_value, DecoderBuffer, DecoderBufferResult, DecoderParameterizedValue, Encoder,
    EncoderValue,
};

pub const MAX_DATA_TAG: Tag = 0x10;
pub const MAX_STREAM_DATA_TAG: Tag = 0x11;
pub const MAX_STREAMS_BIDI_TAG: Tag = 0x12;
pub const MAX_STREAMS_UNI_TAG: Tag = 0x13;
pub const DATA_BLOCKED_TAG: Tag = 0x14;
pub const STREAM_DATA_BLOCKED_TAG: Tag = 0x15;
pub const STREAMS_BLOCKED_BIDI_TAG: Tag = 0x16;
pub const STREAMS_BLOCKED_UNI_TAG: Tag = 0x17;

macro_rules! simple_frame {
    ($(#[$doc:meta])* $name:ident, $tag:expr, $($field:ident),+) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: VarInt,)+
        }

        decoder_value!(
            impl<'a> $name {
                fn decode(buffer: Buffer) -> Result<$name> {
                    $(let ($field, buffer) = buffer.decode()?;)+
                    Ok(($name { $($field),+ }, buffer))
                }
            }
        );

        impl EncoderValue for $name {
            #[inline]
            fn encode<E: Encoder>(&self, encoder: &mut E) {
                encoder.encode(&$tag);
                $(encoder.encode(&self.$field);)+
            }
        }
    };
}

simple_frame!(
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.9
    //# A MAX_DATA frame (type=0x10) is used in flow control to inform the
    //# peer of the maximum amount of data that can be sent on the
    //# connection as a whole.
    MaxData,
    MAX_DATA_TAG,
    maximum_data
);

simple_frame!(
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
    //# A MAX_STREAM_DATA frame (type=0x11) is used in flow control to
    //# inform a peer of the maximum amount of data that can be sent on a
    //# stream.
    MaxStreamData,
    MAX_STREAM_DATA_TAG,
    stream_id,
    maximum_stream_data
);

simple_frame!(
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
    //# A sender SHOULD send a DATA_BLOCKED frame (type=0x14) when it wishes
    //# to send data but is unable to do so due to connection-level flow
    //# control.
    DataBlocked,
    DATA_BLOCKED_TAG,
    data_limit
);

simple_frame!(
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
    //# A sender SHOULD send a STREAM_DATA_BLOCKED frame (type=0x15) when it
    //# wishes to send data but is unable to do so due to stream-level flow
    //# control.
    StreamDataBlocked,
    STREAM_DATA_BLOCKED_TAG,
    stream_id,
    stream_data_limit
);

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.11
//# A MAX_STREAMS frame (type=0x12 or 0x13) informs the peer of the
//# cumulative number of streams of a given type it is permitted to open.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxStreams {
    pub stream_type: StreamType,
    pub maximum_streams: VarInt,
}

impl<'a> DecoderParameterizedValue<'a> for MaxStreams {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (maximum_streams, buffer) = buffer.decode()?;
        let stream_type = if tag == MAX_STREAMS_BIDI_TAG {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        Ok((
            MaxStreams {
                stream_type,
                maximum_streams,
            },
            buffer,
        ))
    }
}

impl EncoderValue for MaxStreams {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let tag = match self.stream_type {
            StreamType::Bidirectional => MAX_STREAMS_BIDI_TAG,
            StreamType::Unidirectional => MAX_STREAMS_UNI_TAG,
        };
        encoder.encode(&tag);
        encoder.encode(&self.maximum_streams);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.14
//# A sender SHOULD send a STREAMS_BLOCKED frame (type=0x16 or 0x17) when
//# it wishes to open a stream but is unable to do so due to the maximum
//# stream limit set by its peer.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamsBlocked {
    pub stream_type: StreamType,
    pub stream_limit: VarInt,
}

impl<'a> DecoderParameterizedValue<'a> for StreamsBlocked {
    type Parameter = Tag;

    fn decode_parameterized(tag: Tag, buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let (stream_limit, buffer) = buffer.decode()?;
        let stream_type = if tag == STREAMS_BLOCKED_BIDI_TAG {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        };
        Ok((
            StreamsBlocked {
                stream_type,
                stream_limit,
            },
            buffer,
        ))
    }
}

impl EncoderValue for StreamsBlocked {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let tag = match self.stream_type {
            StreamType::Bidirectional => STREAMS_BLOCKED_BIDI_TAG,
            StreamType::Unidirectional => STREAMS_BLOCKED_UNI_TAG,
        };
        encoder.encode(&tag);
        encoder.encode(&self.stream_limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::EncoderBuffer;

    #[test]
    fn max_streams_tags() {
        for (stream_type, expected_tag) in [
            (StreamType::Bidirectional, MAX_STREAMS_BIDI_TAG),
            (StreamType::Unidirectional, MAX_STREAMS_UNI_TAG),
        ] {
            let frame = MaxStreams {
                stream_type,
                maximum_streams: VarInt::from_u8(99),
            };
            let mut storage = [0u8; 16];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encoder.encode(&frame);
            let len = encoder.len();
            assert_eq!(storage[0], expected_tag);
            let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
            assert_eq!(decoded, Frame::MaxStreams(frame));
        }
    }
}
