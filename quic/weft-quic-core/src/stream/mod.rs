// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Types and utilities around the QUIC Stream identifier

mod id;

pub use id::StreamId;

#[cfg(any(test, feature = "generator"))]
use bolero_generator::prelude::*;

/// The directionality of a stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(any(feature = "generator", test), derive(TypeGenerator))]
pub enum StreamType {
    Bidirectional,
    Unidirectional,
}

impl StreamType {
    #[inline]
    pub fn is_bidirectional(self) -> bool {
        matches!(self, Self::Bidirectional)
    }

    #[inline]
    pub fn is_unidirectional(self) -> bool {
        matches!(self, Self::Unidirectional)
    }
}

/// An identifier for a group of streams sharing scheduling state.
///
/// Groups only exist when the peer advertised support through the
/// stream-groups transport parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamGroupId(pub crate::varint::VarInt);
