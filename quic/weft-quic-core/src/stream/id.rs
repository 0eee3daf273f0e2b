// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{endpoint, stream::StreamType, varint::VarInt};
#[cfg(any(test, feature = "generator"))]
use bolero_generator::prelude::*;

/// The ID of a stream.
///
/// A stream ID is a 62-bit integer that is unique for all streams on
/// a connection. The two least significant bits encode the initiator
/// and the directionality.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
pub struct StreamId(VarInt);

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl From<StreamId> for u64 {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0.as_u64()
    }
}

impl StreamId {
    /// Creates a Stream ID from a [`VarInt`].
    ///
    /// This is always a safe conversion, since Stream IDs and
    /// [`VarInt`]s share the same range.
    #[inline]
    pub const fn from_varint(id: VarInt) -> StreamId {
        StreamId(id)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
    //# The two least significant bits from a stream ID therefore identify a
    //# stream as one of four types, as summarized in Table 1.

    /// Returns the initial Stream ID for a given stream type.
    ///
    /// E.g. the initial Stream ID for a server initiated
    /// unidirectional Stream is Stream ID `3`.
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> StreamId {
        match (stream_type, initiator) {
            (StreamType::Bidirectional, endpoint::Type::Client) => StreamId(VarInt::from_u8(0)),
            (StreamType::Bidirectional, endpoint::Type::Server) => StreamId(VarInt::from_u8(1)),
            (StreamType::Unidirectional, endpoint::Type::Client) => StreamId(VarInt::from_u8(2)),
            (StreamType::Unidirectional, endpoint::Type::Server) => StreamId(VarInt::from_u8(3)),
        }
    }

    /// Returns the n-th `StreamId` for a certain type of stream.
    ///
    /// The 0th `StreamId` is the one returned by [`Self::initial`];
    /// stream IDs of a given type are spaced apart by 4.
    ///
    /// Returns `None` if the resulting `StreamId` would not be valid.
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<StreamId> {
        let initial = Self::initial(initiator, stream_type);
        let id = VarInt::new(n.checked_mul(4)?.checked_add(initial.into())?).ok()?;
        Some(StreamId(id))
    }

    /// Returns which ordinal this ID is within its type, the inverse
    /// of [`Self::nth`]
    #[inline]
    pub fn ordinal(self) -> u64 {
        self.0.as_u64() >> 2
    }

    /// Returns the next [`StreamId`] of the same type, or `None` on
    /// overflow
    #[inline]
    pub fn next_of_type(self) -> Option<StreamId> {
        self.0
            .checked_add(VarInt::from_u8(4))
            .map(StreamId::from_varint)
    }

    /// Returns whether the client or server initiated the Stream
    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The least significant bit (0x1) of the stream ID identifies the
        //# initiator of the stream.
        if self.0.as_u64() & 0x01 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    /// Returns whether the Stream is unidirectional or bidirectional
    #[inline]
    pub fn stream_type(self) -> StreamType {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The second least significant bit (0x2) of the stream ID
        //# distinguishes between bidirectional streams (with the bit set
        //# to 0) and unidirectional streams (with the bit set to 1).
        if self.0.as_u64() & 0x02 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    /// True when `peer` may deliver data to us on this stream
    #[inline]
    pub fn is_readable(self, local: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() != local
    }

    /// True when we may send data on this stream
    #[inline]
    pub fn is_writable(self, local: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() == local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_stream_ids() {
        for stream_type in [StreamType::Bidirectional, StreamType::Unidirectional] {
            for initiator in [endpoint::Type::Client, endpoint::Type::Server] {
                let id = StreamId::initial(initiator, stream_type);
                assert_eq!(stream_type, id.stream_type());
                assert_eq!(initiator, id.initiator());
                assert_eq!(id.ordinal(), 0);
            }
        }
    }

    #[test]
    fn nth_round_trips_ordinal() {
        for n in [0u64, 1, 2, 1000] {
            let id = StreamId::nth(endpoint::Type::Server, StreamType::Unidirectional, n).unwrap();
            assert_eq!(id.ordinal(), n);
        }
    }

    #[test]
    fn stream_id_overflow() {
        let max =
            StreamId::from_varint(crate::varint::VarInt::new((1 << 62) - 1).unwrap());
        assert!(max.next_of_type().is_none());
        assert!(StreamId::nth(endpoint::Type::Client, StreamType::Bidirectional, 1 << 62).is_none());
    }

    #[test]
    fn directionality() {
        let id = StreamId::initial(endpoint::Type::Client, StreamType::Unidirectional);
        assert!(id.is_writable(endpoint::Type::Client));
        assert!(!id.is_readable(endpoint::Type::Client));
        assert!(id.is_readable(endpoint::Type::Server));
        assert!(!id.is_writable(endpoint::Type::Server));
    }
}
