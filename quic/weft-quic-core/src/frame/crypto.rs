// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# A CRYPTO frame (type=0x06) is used to transmit cryptographic
//# handshake messages.  It can be sent in all packet types except 0-RTT.

pub const TAG: Tag = 0x06;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.6
//# CRYPTO Frame {
//#   Type (i) = 0x06,
//#   Offset (i),
//#   Length (i),
//#   Crypto Data (..),
//# }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Crypto<Data> {
    /// Byte offset within the handshake stream of this level
    pub offset: VarInt,
    pub data: Data,
}

decoder_value!(
    impl<'a> Crypto<&'a [u8]> {
        fn decode(buffer: Buffer) -> Result<Crypto<&'a [u8]>> {
            let (offset, buffer) = buffer.decode()?;
            let (data, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let frame: Crypto<&'a [u8]> = Crypto {
                offset,
                data: data.into_less_safe_slice(),
            };
            Ok((frame, buffer))
        }
    }
);

impl<Data: AsRef<[u8]>> EncoderValue for Crypto<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let data = self.data.as_ref();
        encoder.encode(&TAG);
        encoder.encode(&self.offset);
        encoder.encode(&VarInt::try_from(data.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip() {
        let frame = Crypto {
            offset: VarInt::from_u16(300),
            data: &b"client hello"[..],
        };
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();
        let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert_eq!(decoded, Frame::Crypto(frame));
    }
}
