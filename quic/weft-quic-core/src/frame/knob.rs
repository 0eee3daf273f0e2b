// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use weft_codec::{decoder_value, Encoder, EncoderValue};

/// Opt-in frame carrying an opaque (space, id, value) tuning knob.
///
/// Only legal once the peer advertised knob support in its transport
/// parameters; otherwise receipt is a protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Knob<Data> {
    pub knob_space: VarInt,
    pub id: VarInt,
    pub value: Data,
}

decoder_value!(
    impl<'a> Knob<&'a [u8]> {
        fn decode(buffer: Buffer) -> Result<Knob<&'a [u8]>> {
            let (knob_space, buffer) = buffer.decode()?;
            let (id, buffer) = buffer.decode()?;
            let (value, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let frame: Knob<&'a [u8]> = Knob {
                knob_space,
                id,
                value: value.into_less_safe_slice(),
            };
            Ok((frame, buffer))
        }
    }
);

impl<Data: AsRef<[u8]>> EncoderValue for Knob<Data> {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let value = self.value.as_ref();
        encoder.encode(&VarInt::new(crate::frame::ext_tag::KNOB).unwrap_or(VarInt::MAX));
        encoder.encode(&self.knob_space);
        encoder.encode(&self.id);
        encoder.encode(&VarInt::try_from(value.len()).unwrap_or(VarInt::MAX));
        encoder.write_slice(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip() {
        let frame = Knob {
            knob_space: VarInt::from_u16(0xb00c),
            id: VarInt::from_u8(7),
            value: &b"\x01"[..],
        };
        let mut storage = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&frame);
        let len = encoder.len();
        let (decoded, _) = decode(DecoderBuffer::new(&storage[..len])).unwrap();
        assert_eq!(decoded, Frame::Knob(frame));
    }
}
