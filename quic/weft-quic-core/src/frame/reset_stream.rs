// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

pub const TAG: Tag = 0x04;

/// RESET_STREAM_AT from the reliable-reset extension: a reset which
/// still promises delivery of the prefix below `reliable_size`
pub const AT_TAG: Tag = 0x24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStream {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
    /// Final size of the stream as committed by the sender
    pub final_size: VarInt,
}

decoder_value!(
    impl<'a> ResetStream {
        fn decode(buffer: Buffer) -> Result<ResetStream> {
            let (stream_id, buffer) = buffer.decode()?;
            let (application_error_code, buffer) = buffer.decode()?;
            let (final_size, buffer) = buffer.decode()?;
            let frame = ResetStream {
                stream_id,
                application_error_code,
                final_size,
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for ResetStream {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&TAG);
        encoder.encode(&self.stream_id);
        encoder.encode(&self.application_error_code);
        encoder.encode(&self.final_size);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetStreamAt {
    pub stream_id: VarInt,
    pub application_error_code: VarInt,
    pub final_size: VarInt,
    /// Data below this offset is still delivered reliably
    pub reliable_size: VarInt,
}

decoder_value!(
    impl<'a> ResetStreamAt {
        fn decode(buffer: Buffer) -> Result<ResetStreamAt> {
            let (stream_id, buffer) = buffer.decode()?;
            let (application_error_code, buffer) = buffer.decode()?;
            let (final_size, buffer) = buffer.decode()?;
            let (reliable_size, buffer) = buffer.decode()?;
            let frame = ResetStreamAt {
                stream_id,
                application_error_code,
                final_size,
                reliable_size,
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for ResetStreamAt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&AT_TAG);
        encoder.encode(&self.stream_id);
        encoder.encode(&self.application_error_code);
        encoder.encode(&self.final_size);
        encoder.encode(&self.reliable_size);
    }
}
