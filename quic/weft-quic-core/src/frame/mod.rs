// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The QUIC frame set.
//!
//! Frames decode from the cleartext payload of a packet and encode
//! through `EncoderValue`. Each frame type lives in its own module;
//! the `Frame` enum is the parse-side sum over all of them, so frame
//! dispatch is an exhaustive match.

use crate::varint::VarInt;
use weft_codec::{DecoderBuffer, DecoderBufferResult, DecoderError};

pub mod ack;
pub mod ack_frequency;
pub mod connection_close;
pub mod connection_id;
pub mod crypto;
pub mod datagram;
pub mod flow_control;
pub mod knob;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod ping;
pub mod reset_stream;
pub mod stop_sending;
pub mod stream;

pub use ack::{Ack, AckRanges, AckRangesDecoder, EcnCounts, ReceiveTimestamps};
pub use ack_frequency::{AckFrequency, ImmediateAck};
pub use connection_close::ConnectionClose;
pub use connection_id::{NewConnectionId, RetireConnectionId};
pub use crypto::Crypto;
pub use datagram::Datagram;
pub use flow_control::{
    DataBlocked, MaxData, MaxStreamData, MaxStreams, StreamDataBlocked, StreamsBlocked,
};
pub use knob::Knob;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::{PathChallenge, PathResponse};
pub use ping::{HandshakeDone, Ping};
pub use reset_stream::{ResetStream, ResetStreamAt};
pub use stop_sending::StopSending;
pub use stream::Stream;

/// Single-byte frame type; extension frames carry their full varint tag
pub type Tag = u8;

/// Whether receipt of a frame obligates the receiver to acknowledge
//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
//# a receiver sends an ACK frame in response to receiving an ack-
//# eliciting packet.  Packets containing only ACK, PADDING, or
//# CONNECTION_CLOSE frames are not ack-eliciting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckElicitation {
    #[default]
    NonEliciting,
    Eliciting,
}

impl AckElicitation {
    #[inline]
    pub fn is_ack_eliciting(self) -> bool {
        matches!(self, Self::Eliciting)
    }

    #[inline]
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Extension frame types above the single-byte range
pub mod ext_tag {
    //= https://www.ietf.org/archive/id/draft-ietf-quic-ack-frequency-07.txt#4
    //# ACK_FREQUENCY frames are identified by the frame type 0xaf
    pub const ACK_FREQUENCY: u64 = 0xaf;
    /// ACK with optional ECN counts and receive timestamps, gated on
    /// the extended-ack transport parameter
    pub const ACK_EXTENDED: u64 = 0xb1;
    /// Opaque per-connection tuning knobs, gated on the knob
    /// transport parameter
    pub const KNOB: u64 = 0x1550;
}

/// One parsed frame borrowing the packet's cleartext payload
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack<AckRangesDecoder<'a>>),
    ResetStream(ResetStream),
    ResetStreamAt(ResetStreamAt),
    StopSending(StopSending),
    Crypto(Crypto<&'a [u8]>),
    NewToken(NewToken<&'a [u8]>),
    Stream(Stream<&'a [u8]>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId<'a>),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
    Datagram(Datagram<&'a [u8]>),
    AckFrequency(AckFrequency),
    ImmediateAck(ImmediateAck),
    Knob(Knob<&'a [u8]>),
}

impl Frame<'_> {
    pub fn ack_elicitation(&self) -> AckElicitation {
        use AckElicitation::*;
        match self {
            Frame::Padding(_) | Frame::Ack(_) | Frame::ConnectionClose(_) => NonEliciting,
            _ => Eliciting,
        }
    }

    /// True for frames which only probe a path and may arrive on a
    /// path that has not been validated
    pub fn is_probing(&self) -> bool {
        matches!(
            self,
            Frame::Padding(_)
                | Frame::PathChallenge(_)
                | Frame::PathResponse(_)
                | Frame::NewConnectionId(_)
        )
    }
}

/// Splits one frame off the front of `buffer`.
///
/// Unknown frame types are a connection error; QUIC has no skippable
/// frames.
pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Frame> {
    let tag = buffer.peek_byte(0)?;
    match tag {
        padding::TAG => {
            let (frame, buffer) = buffer.decode::<Padding>()?;
            Ok((Frame::Padding(frame), buffer))
        }
        ping::TAG => {
            let buffer = buffer.skip(1)?;
            Ok((Frame::Ping(Ping), buffer))
        }
        ack::TAG..=ack::TAG_W_ECN => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Ack<AckRangesDecoder>>(tag)?;
            Ok((Frame::Ack(frame), buffer))
        }
        reset_stream::TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<ResetStream>()?;
            Ok((Frame::ResetStream(frame), buffer))
        }
        stop_sending::TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<StopSending>()?;
            Ok((Frame::StopSending(frame), buffer))
        }
        crypto::TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<Crypto<&[u8]>>()?;
            Ok((Frame::Crypto(frame), buffer))
        }
        new_token::TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<NewToken<&[u8]>>()?;
            Ok((Frame::NewToken(frame), buffer))
        }
        stream::TAG_RANGE_START..=stream::TAG_RANGE_END => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Stream<&[u8]>>(tag)?;
            Ok((Frame::Stream(frame), buffer))
        }
        stream::GROUP_TAG_RANGE_START..=stream::GROUP_TAG_RANGE_END => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Stream<&[u8]>>(tag)?;
            Ok((Frame::Stream(frame), buffer))
        }
        flow_control::MAX_DATA_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<MaxData>()?;
            Ok((Frame::MaxData(frame), buffer))
        }
        flow_control::MAX_STREAM_DATA_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<MaxStreamData>()?;
            Ok((Frame::MaxStreamData(frame), buffer))
        }
        flow_control::MAX_STREAMS_BIDI_TAG..=flow_control::MAX_STREAMS_UNI_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<MaxStreams>(tag)?;
            Ok((Frame::MaxStreams(frame), buffer))
        }
        flow_control::DATA_BLOCKED_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<DataBlocked>()?;
            Ok((Frame::DataBlocked(frame), buffer))
        }
        flow_control::STREAM_DATA_BLOCKED_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<StreamDataBlocked>()?;
            Ok((Frame::StreamDataBlocked(frame), buffer))
        }
        flow_control::STREAMS_BLOCKED_BIDI_TAG..=flow_control::STREAMS_BLOCKED_UNI_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<StreamsBlocked>(tag)?;
            Ok((Frame::StreamsBlocked(frame), buffer))
        }
        connection_id::NEW_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<NewConnectionId>()?;
            Ok((Frame::NewConnectionId(frame), buffer))
        }
        connection_id::RETIRE_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<RetireConnectionId>()?;
            Ok((Frame::RetireConnectionId(frame), buffer))
        }
        path_challenge::CHALLENGE_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<PathChallenge>()?;
            Ok((Frame::PathChallenge(frame), buffer))
        }
        path_challenge::RESPONSE_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<PathResponse>()?;
            Ok((Frame::PathResponse(frame), buffer))
        }
        connection_close::TRANSPORT_TAG..=connection_close::APPLICATION_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<ConnectionClose>(tag)?;
            Ok((Frame::ConnectionClose(frame), buffer))
        }
        ping::HANDSHAKE_DONE_TAG => {
            let buffer = buffer.skip(1)?;
            Ok((Frame::HandshakeDone(HandshakeDone), buffer))
        }
        ack_frequency::IMMEDIATE_ACK_TAG => {
            let buffer = buffer.skip(1)?;
            Ok((Frame::ImmediateAck(ImmediateAck), buffer))
        }
        reset_stream::AT_TAG => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode::<ResetStreamAt>()?;
            Ok((Frame::ResetStreamAt(frame), buffer))
        }
        datagram::TAG..=datagram::TAG_W_LEN => {
            let buffer = buffer.skip(1)?;
            let (frame, buffer) = buffer.decode_parameterized::<Datagram<&[u8]>>(tag)?;
            Ok((Frame::Datagram(frame), buffer))
        }
        // multi-byte frame types
        0b0100_0000..=0xff => {
            let (tag, inner) = buffer.decode::<VarInt>()?;
            match tag.as_u64() {
                ext_tag::ACK_FREQUENCY => {
                    let (frame, inner) = inner.decode::<AckFrequency>()?;
                    Ok((Frame::AckFrequency(frame), inner))
                }
                ext_tag::ACK_EXTENDED => {
                    let (frame, inner) =
                        inner.decode_parameterized::<Ack<AckRangesDecoder>>(ack::EXTENDED_TAG)?;
                    Ok((Frame::Ack(frame), inner))
                }
                ext_tag::KNOB => {
                    let (frame, inner) = inner.decode::<Knob<&[u8]>>()?;
                    Ok((Frame::Knob(frame), inner))
                }
                _ => Err(DecoderError::InvariantViolation("unknown frame type")),
            }
        }
        _ => Err(DecoderError::InvariantViolation("unknown frame type")),
    }
}

/// Iterates the frames in a cleartext payload
pub struct FrameIter<'a> {
    buffer: DecoderBuffer<'a>,
}

impl<'a> FrameIter<'a> {
    #[inline]
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            buffer: DecoderBuffer::new(payload),
        }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            return None;
        }
        match decode(self.buffer) {
            Ok((frame, remaining)) => {
                self.buffer = remaining;
                Some(Ok(frame))
            }
            Err(error) => {
                self.buffer = DecoderBuffer::new(&[]);
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_codec::{Encoder, EncoderBuffer, EncoderValue};

    fn round_trip<'a, T: EncoderValue>(value: &T, storage: &'a mut [u8]) -> Frame<'a> {
        let mut encoder = EncoderBuffer::new(storage);
        encoder.encode(value);
        let len = encoder.len();
        let (frame, remaining) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert!(remaining.is_empty());
        frame
    }

    #[test]
    fn ping_round_trip() {
        let mut storage = [0u8; 8];
        assert!(matches!(round_trip(&Ping, &mut storage), Frame::Ping(_)));
    }

    #[test]
    fn unknown_frame_is_rejected() {
        // 0x21 is unassigned in QUIC v1
        let bytes = [0x21u8];
        assert!(decode(DecoderBuffer::new(&bytes)).is_err());
    }

    #[test]
    fn ack_elicitation_classes() {
        assert!(!Frame::Padding(Padding { length: 1 })
            .ack_elicitation()
            .is_ack_eliciting());
        assert!(Frame::Ping(Ping).ack_elicitation().is_ack_eliciting());
    }
}
