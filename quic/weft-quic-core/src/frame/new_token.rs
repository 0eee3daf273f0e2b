// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
//# A server sends a NEW_TOKEN frame (type=0x07) to provide the client
//# with a token to send in the header of an Initial packet for a future
//# connection.

pub const TAG: Tag = 0x07;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewToken<Data> {
    pub token: Data,
}

decoder_value!(
    impl<'a> NewToken<&'a [u8]> {
        fn decode(buffer: Buffer) -> Result<NewToken<&'a [u8]>> {
            let (token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let token = token.into_less_safe_slice();
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
            //# A client MUST treat receipt of a NEW_TOKEN frame with an empty
            //# Token field as a connection error of type FRAME_ENCODING_ERROR.
            if token.is_empty() {
                return Err(DecoderError::InvariantViolation("empty token"));
            }
            Ok((NewToken { token }, buffer))
        }
    }
);

impl<Data: AsRef<[u8]>> EncoderValue for NewToken<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let token = self.token.as_ref();
        encoder.encode(&TAG);
        encoder.encode(&VarInt::try_from(token.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(token);
    }
}
