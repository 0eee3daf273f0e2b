// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use weft_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.2
//# Endpoints can use PING frames (type=0x01) to verify that their peers
//# are still alive or to check reachability to the peer.

pub const TAG: Tag = 0x01;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
//# The server uses a HANDSHAKE_DONE frame (type=0x1e) to signal
//# confirmation of the handshake to the client.

pub const HANDSHAKE_DONE_TAG: Tag = 0x1e;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ping;

impl EncoderValue for Ping {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeDone;

impl EncoderValue for HandshakeDone {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&HANDSHAKE_DONE_TAG);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        1
    }
}
