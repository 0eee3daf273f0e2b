// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# An endpoint uses a STOP_SENDING frame (type=0x05) to communicate that
//# incoming data is being discarded on receipt per application request.

pub const TAG: Tag = 0x05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopSending {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
}

decoder_value!(
    impl<'a> StopSending {
        fn decode(buffer: Buffer) -> Result<StopSending> {
            let (stream_id, buffer) = buffer.decode()?;
            let (application_error_code, buffer) = buffer.decode()?;
            let frame = StopSending {
                stream_id,
                application_error_code,
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for StopSending {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode(&self.stream_id);
        encoder.encode(&self.application_error_code);
    }
}
