// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outgoing frame records and packet assembly.
//!
//! Sent packets keep a `WriteFrame` list so acknowledgment and loss
//! can be replayed frame-by-frame without retaining payload bytes;
//! stream and crypto data stay in their owning buffers, referenced by
//! offset and length.

pub mod scheduler;

pub use scheduler::{LongForm, NoWriteReason, PacketBuilder, WriteContext};

use bytes::Bytes;
use weft_quic_core::{
    crypto::EncryptionLevel,
    frame::AckElicitation,
    packet::number::PacketNumberSpace,
    stream::{StreamId, StreamType},
    varint::VarInt,
};

/// The durable record of one frame placed into a sent packet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteFrame {
    Padding {
        length: usize,
    },
    Ping,
    Ack {
        space: PacketNumberSpace,
        largest_acknowledged: u64,
    },
    Crypto {
        level: EncryptionLevel,
        offset: u64,
        len: u64,
    },
    Stream {
        stream_id: StreamId,
        offset: u64,
        len: u64,
        is_fin: bool,
        group_id: Option<VarInt>,
    },
    ResetStream {
        stream_id: StreamId,
        application_error_code: VarInt,
        final_size: u64,
    },
    ResetStreamAt {
        stream_id: StreamId,
        application_error_code: VarInt,
        final_size: u64,
        reliable_size: u64,
    },
    StopSending {
        stream_id: StreamId,
        application_error_code: VarInt,
    },
    MaxData {
        maximum_data: u64,
    },
    MaxStreamData {
        stream_id: StreamId,
        maximum_stream_data: u64,
    },
    MaxStreams {
        stream_type: StreamType,
        maximum_streams: u64,
    },
    DataBlocked {
        data_limit: u64,
    },
    StreamDataBlocked {
        stream_id: StreamId,
        stream_data_limit: u64,
    },
    StreamsBlocked {
        stream_type: StreamType,
        stream_limit: u64,
    },
    NewToken {
        token: Bytes,
    },
    NewConnectionId {
        sequence_number: VarInt,
    },
    RetireConnectionId {
        sequence_number: VarInt,
    },
    PathChallenge {
        data: [u8; 8],
    },
    PathResponse {
        data: [u8; 8],
    },
    HandshakeDone,
    Datagram {
        len: u64,
    },
    ImmediateAck,
    AckFrequency {
        sequence_number: VarInt,
    },
    Knob {
        knob_space: VarInt,
        id: VarInt,
    },
    ConnectionClose,
}

impl WriteFrame {
    pub fn ack_elicitation(&self) -> AckElicitation {
        match self {
            Self::Padding { .. } | Self::Ack { .. } | Self::ConnectionClose => {
                AckElicitation::NonEliciting
            }
            _ => AckElicitation::Eliciting,
        }
    }

    /// Frames which create no retransmittable state; a packet made
    /// only of these is never recorded as outstanding
    pub fn is_retransmittable(&self) -> bool {
        !matches!(
            self,
            Self::Padding { .. } | Self::Ack { .. } | Self::Datagram { .. } | Self::ConnectionClose
        )
    }
}
