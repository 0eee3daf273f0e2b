// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use weft_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.  PADDING frames
//# can be used to increase the size of a packet.

pub const TAG: Tag = 0x00;

/// A run of consecutive padding bytes, collapsed into one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Padding {
    pub length: usize,
}

decoder_value!(
    impl<'a> Padding {
        fn decode(buffer: Buffer) -> Result<Padding> {
            let mut length = 0;
            // consume the whole run so a padded packet decodes to one frame
            while buffer.peek_byte(length).map_or(false, |byte| byte == TAG) {
                length += 1;
            }
            let buffer = buffer.skip(length)?;
            Ok((Padding { length }, buffer))
        }
    }
);

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_repeated(self.length, TAG);
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{decode, Frame};
    use weft_codec::DecoderBuffer;

    #[test]
    fn run_collapses_to_one_frame() {
        let bytes = [0u8, 0, 0, 0, 1];
        let (frame, remaining) = decode(DecoderBuffer::new(&bytes)).unwrap();
        assert_eq!(frame, Frame::Padding(Padding { length: 4 }));
        assert_eq!(remaining.len(), 1);
    }
}
