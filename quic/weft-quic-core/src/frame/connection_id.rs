// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::id, frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

pub const NEW_TAG: Tag = 0x18;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
//# An endpoint sends a RETIRE_CONNECTION_ID frame (type=0x19) to
//# indicate that it will no longer use a connection ID that was issued
//# by its peer.

pub const RETIRE_TAG: Tag = 0x19;

pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewConnectionId<'a> {
    pub sequence_number: VarInt,
    /// Connection ids with sequence numbers below this are retired
    pub retire_prior_to: VarInt,
    pub connection_id: &'a [u8],
    pub stateless_reset_token: &'a [u8; STATELESS_RESET_TOKEN_LEN],
}

decoder_value!(
    impl<'a> NewConnectionId<'a> {
        fn decode(buffer: Buffer) -> Result<NewConnectionId<'a>> {
            let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
            let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# The value in the Retire Prior To field MUST be less than or equal
            //# to the value in the Sequence Number field.
            if retire_prior_to > sequence_number {
                return Err(DecoderError::InvariantViolation(
                    "retire_prior_to exceeds sequence_number",
                ));
            }

            let (connection_id, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
            let connection_id = connection_id.into_less_safe_slice();
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# Values less than 1 and greater than 20 are invalid and MUST be
            //# treated as a connection error of type FRAME_ENCODING_ERROR.
            if connection_id.is_empty() || connection_id.len() > id::MAX_LEN {
                return Err(DecoderError::InvariantViolation(
                    "invalid connection id length",
                ));
            }

            let (token_slice, buffer) = buffer.decode_slice(STATELESS_RESET_TOKEN_LEN)?;
            // bind through a shared slice so both buffer flavors decode
            let token_slice: &[u8] = token_slice.into_less_safe_slice();
            let stateless_reset_token = token_slice
                .try_into()
                .map_err(|_| DecoderError::UnexpectedEof(STATELESS_RESET_TOKEN_LEN))?;

            let frame = NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            };
            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for NewConnectionId<'_> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&NEW_TAG);
        encoder.encode(&self.sequence_number);
        encoder.encode(&self.retire_prior_to);
        encoder.encode(&(self.connection_id.len() as u8));
        encoder.write_slice(self.connection_id);
        encoder.write_slice(self.stateless_reset_token);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetireConnectionId {
    pub sequence_number: VarInt,
}

decoder_value!(
    impl<'a> RetireConnectionId {
        fn decode(buffer: Buffer) -> Result<RetireConnectionId> {
            let (sequence_number, buffer) = buffer.decode()?;
            Ok((RetireConnectionId { sequence_number }, buffer))
        }
    }
);

impl EncoderValue for RetireConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&RETIRE_TAG);
        encoder.encode(&self.sequence_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn new_connection_id_round_trip() {
        let token = [7u8; STATELESS_RESET_TOKEN_LEN];
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(5),
            retire_prior_to: VarInt::from_u8(2),
            connection_id: &[1, 2, 3, 4, 5, 6, 7, 8],
            stateless_reset_token: &token,
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();
        let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert_eq!(decoded, Frame::NewConnectionId(frame));
    }

    #[test]
    fn retire_prior_to_validation() {
        let token = [0u8; STATELESS_RESET_TOKEN_LEN];
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(1),
            retire_prior_to: VarInt::from_u8(1),
            connection_id: &[1; 8],
            stateless_reset_token: &token,
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        // bump retire_prior_to above sequence_number on the wire
        storage[2] = 2;
        assert!(decode(DecoderBuffer::new(&storage[..encoder_len(&frame)])).is_err());
    }

    fn encoder_len(frame: &NewConnectionId) -> usize {
        frame.encoding_size()
    }
}
