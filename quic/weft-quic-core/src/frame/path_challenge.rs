// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.17
//# Endpoints can use PATH_CHALLENGE frames (type=0x1a) to check
//# reachability to the peer and for path validation during connection
//# migration.

pub const CHALLENGE_TAG: Tag = 0x1a;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.18
//# A PATH_RESPONSE frame (type=0x1b) is sent in response to a
//# PATH_CHALLENGE frame.

pub const RESPONSE_TAG: Tag = 0x1b;

pub const DATA_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathChallenge {
    pub data: [u8; DATA_LEN],
}

decoder_value!(
    impl<'a> PathChallenge {
        fn decode(buffer: Buffer) -> Result<PathChallenge> {
            let (data, buffer) = buffer.decode::<[u8; DATA_LEN]>()?;
            Ok((PathChallenge { data }, buffer))
        }
    }
);

impl EncoderValue for PathChallenge {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&CHALLENGE_TAG);
        encoder.write_slice(&self.data);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathResponse {
    /// Echoes the data of the challenge being answered
    pub data: [u8; DATA_LEN],
}

decoder_value!(
    impl<'a> PathResponse {
        fn decode(buffer: Buffer) -> Result<PathResponse> {
            let (data, buffer) = buffer.decode::<[u8; DATA_LEN]>()?;
            Ok((PathResponse { data }, buffer))
        }
    }
);

impl EncoderValue for PathResponse {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&RESPONSE_TAG);
        encoder.write_slice(&self.data);
    }
}
