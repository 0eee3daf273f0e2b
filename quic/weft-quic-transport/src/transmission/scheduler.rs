// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet assembly: header emission, frame packing against the
//! remaining budget, encryption, and header protection.

use crate::transmission::WriteFrame;
use weft_quic_core::{
    connection::id::ConnectionId,
    crypto::LevelKeys,
    frame::AckElicitation,
    packet::{
        key_phase::KeyPhase,
        number::TruncatedPacketNumber,
        protection, FIXED_BIT, LONG_HEADER_BIT,
    },
    transport,
    varint::VarInt,
};
use weft_codec::{Encoder, EncoderBuffer, EncoderValue};

/// Why a write pass stopped before filling its packet budget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoWriteReason {
    /// No component had anything to schedule
    EmptyScheduler,
    /// A packet was opened but no frame fit
    NoFrame,
    /// Frames were scheduled but produced an empty body
    NoBody,
    AmplificationLimited,
    CongestionLimited,
    PacingLimited,
    PacketLimitReached,
    FlowControlLimited,
    /// The per-pass wall-clock budget elapsed
    TimeBudgetExhausted,
}

/// Long-header packet forms the builder can open
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LongForm {
    Initial,
    ZeroRtt,
    Handshake,
}

impl LongForm {
    fn type_bits(self) -> u8 {
        match self {
            Self::Initial => 0b00,
            Self::ZeroRtt => 0b01,
            Self::Handshake => 0b10,
        }
    }
}

/// Limits one packet's assembly must respect
#[derive(Clone, Copy, Debug)]
pub struct WriteContext {
    /// Bytes the congestion controller still allows
    pub congestion_allowance: u64,
    /// Bytes connection-level flow control still allows for stream data
    pub flow_allowance: u64,
    /// Bytes the anti-amplification cap still allows; `u64::MAX` once
    /// the peer's address is validated
    pub amplification_allowance: u64,
}

/// One packet under construction in the tail of a datagram buffer
pub struct PacketBuilder<'a> {
    encoder: EncoderBuffer<'a>,
    header_len: usize,
    pn_offset: usize,
    pn_len: usize,
    /// Long headers backfill the length field after the body is known
    length_field_offset: Option<usize>,
    tag_len: usize,
    packet_number: u64,
    frames: Vec<WriteFrame>,
    ack_elicitation: AckElicitation,
}

impl<'a> PacketBuilder<'a> {
    pub fn long(
        buffer: &'a mut [u8],
        form: LongForm,
        version: u32,
        destination_cid: &ConnectionId,
        source_cid: &ConnectionId,
        token: Option<&[u8]>,
        packet_number: u64,
        truncated: TruncatedPacketNumber,
        tag_len: usize,
    ) -> Self {
        let mut encoder = EncoderBuffer::new(buffer);
        let pn_len = truncated.bytesize();
        let first = LONG_HEADER_BIT
            | FIXED_BIT
            | (form.type_bits() << 4)
            | truncated.into_packet_tag_mask();
        encoder.encode(&first);
        encoder.encode(&version);
        encoder.encode(&(destination_cid.len() as u8));
        encoder.write_slice(destination_cid.as_slice());
        encoder.encode(&(source_cid.len() as u8));
        encoder.write_slice(source_cid.as_slice());
        if matches!(form, LongForm::Initial) {
            let token = token.unwrap_or(&[]);
            encoder.encode(&VarInt::try_from(token.len()).unwrap_or(VarInt::MAX));
            encoder.write_slice(token);
        }
        // two-byte length varint, backfilled in finish()
        let length_field_offset = Some(encoder.len());
        encoder.encode(&0u16);
        let pn_offset = encoder.len();
        encoder.encode(&truncated);
        let header_len = encoder.len();

        Self {
            encoder,
            header_len,
            pn_offset,
            pn_len,
            length_field_offset,
            tag_len,
            packet_number,
            frames: Vec::new(),
            ack_elicitation: AckElicitation::NonEliciting,
        }
    }

    pub fn short(
        buffer: &'a mut [u8],
        destination_cid: &ConnectionId,
        key_phase: KeyPhase,
        packet_number: u64,
        truncated: TruncatedPacketNumber,
        tag_len: usize,
    ) -> Self {
        let mut encoder = EncoderBuffer::new(buffer);
        let pn_len = truncated.bytesize();
        let first = FIXED_BIT | key_phase.into_tag_mask() | truncated.into_packet_tag_mask();
        encoder.encode(&first);
        encoder.write_slice(destination_cid.as_slice());
        let pn_offset = encoder.len();
        encoder.encode(&truncated);
        let header_len = encoder.len();

        Self {
            encoder,
            header_len,
            pn_offset,
            pn_len,
            length_field_offset: None,
            tag_len,
            packet_number,
            frames: Vec::new(),
            ack_elicitation: AckElicitation::NonEliciting,
        }
    }

    /// Frame bytes still available
    #[inline]
    pub fn remaining(&self) -> usize {
        self.encoder.remaining_capacity().saturating_sub(self.tag_len)
    }

    #[inline]
    pub fn payload_len(&self) -> usize {
        self.encoder.len() - self.header_len
    }

    #[inline]
    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    #[inline]
    pub fn packet_number(&self) -> u64 {
        self.packet_number
    }

    #[inline]
    pub fn frames(&self) -> &[WriteFrame] {
        &self.frames
    }

    /// Encodes a frame when it fits, recording its bookkeeping entry
    pub fn push_frame<T: EncoderValue>(&mut self, frame: &T, record: WriteFrame) -> bool {
        let size = frame.encoding_size();
        if size > self.remaining() {
            return false;
        }
        self.encoder.encode(frame);
        self.ack_elicitation = self.ack_elicitation.merge(record.ack_elicitation());
        self.frames.push(record);
        true
    }

    /// Pads the packet so the datagram reaches `target_datagram_len`
    pub fn pad_datagram_to(&mut self, target_datagram_len: usize, datagram_len_so_far: usize) {
        let total = datagram_len_so_far + self.encoder.len() + self.tag_len;
        if total >= target_datagram_len {
            return;
        }
        let needed = (target_datagram_len - total).min(self.remaining());
        if needed > 0 {
            self.encoder.write_repeated(needed, 0);
            self.frames.push(WriteFrame::Padding { length: needed });
        }
    }

    /// The sample-based header protection needs four bytes of packet
    /// number plus a full sample of ciphertext behind it
    fn pad_for_sample(&mut self) {
        let minimum_body = 4 - self.pn_len.min(4) + 16usize.saturating_sub(self.tag_len);
        while self.payload_len() < minimum_body && self.remaining() > 0 {
            self.encoder.write_repeated(1, 0);
            match self.frames.last_mut() {
                Some(WriteFrame::Padding { length }) => *length += 1,
                _ => self.frames.push(WriteFrame::Padding { length: 1 }),
            }
        }
    }

    /// Seals and protects the packet, returning its encoded length,
    /// frame records, and ack-elicitation class
    pub fn finish(
        mut self,
        keys: &LevelKeys,
    ) -> Result<(usize, Vec<WriteFrame>, AckElicitation), transport::Error> {
        if self.frames.is_empty() {
            return Err(transport::Error::INTERNAL_ERROR.with_reason("no frames scheduled"));
        }
        self.pad_for_sample();

        let payload_len = self.payload_len();
        let pn_offset = self.pn_offset;
        let pn_len = self.pn_len;
        let tag_len = self.tag_len;
        let packet_number = self.packet_number;

        // reserve tag space
        self.encoder.write_repeated(tag_len, 0);
        let encoded_len = self.encoder.len();

        if let Some(offset) = self.length_field_offset {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
            //# Length:  The length of the remainder of the packet (that is,
            //# the Packet Number and Payload fields) in bytes
            let length = (pn_len + payload_len + tag_len) as u16;
            let bytes = self.encoder.as_mut_slice();
            bytes[offset] = 0x40 | (length >> 8) as u8;
            bytes[offset + 1] = length as u8;
        }

        let bytes = self.encoder.as_mut_slice();
        let (header, body) = bytes.split_at_mut(pn_offset + pn_len);
        keys.key
            .seal(packet_number, header, body, payload_len)
            .map_err(transport::Error::from)?;
        protection::apply(keys.header_key.as_ref(), bytes, pn_offset, pn_len)
            .map_err(transport::Error::from)?;

        Ok((encoded_len, self.frames, self.ack_elicitation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::{
        crypto::testing as crypto_testing,
        frame::Ping,
        packet::number::PacketNumberSpace,
        varint::VarInt,
    };

    fn truncated(pn: u64) -> (u64, TruncatedPacketNumber) {
        let space = PacketNumberSpace::ApplicationData;
        let packet_number = space.new_packet_number(VarInt::new(pn).unwrap());
        let zero = space.new_packet_number(VarInt::ZERO);
        (pn, packet_number.truncate(zero).unwrap())
    }

    #[test]
    fn short_packet_builds_and_decodes() {
        let mut buffer = vec![0u8; 1500];
        let dcid = ConnectionId::try_from_slice(&[7; 8]).unwrap();
        let (pn, tpn) = truncated(3);
        let mut builder = PacketBuilder::short(
            &mut buffer,
            &dcid,
            KeyPhase::Zero,
            pn,
            tpn,
            crypto_testing::TAG_LEN,
        );
        assert!(builder.push_frame(&Ping, WriteFrame::Ping));
        let (len, frames, elicitation) = builder.finish(&crypto_testing::null_level_keys()).unwrap();
        assert!(len > 0);
        assert_eq!(frames, vec![WriteFrame::Ping]);
        assert!(elicitation.is_ack_eliciting());

        // decode through the packet codec
        let (packet, _) = weft_quic_core::packet::decoding::decode_packet(
            weft_codec::DecoderBufferMut::new(&mut buffer[..len]),
            8,
        )
        .unwrap();
        let cleartext = packet
            .unprotect_and_decrypt(&crypto_testing::null_level_keys(), None)
            .unwrap();
        assert_eq!(cleartext.packet_number.as_u64(), 3);
    }

    #[test]
    fn long_packet_length_field_backfilled() {
        let mut buffer = vec![0u8; 1500];
        let dcid = ConnectionId::try_from_slice(&[1; 8]).unwrap();
        let scid = ConnectionId::try_from_slice(&[2; 8]).unwrap();
        let (pn, tpn) = truncated(0);
        let mut builder = PacketBuilder::long(
            &mut buffer,
            LongForm::Initial,
            weft_quic_core::packet::QUIC_VERSION_1,
            &dcid,
            &scid,
            None,
            pn,
            tpn,
            crypto_testing::TAG_LEN,
        );
        assert!(builder.push_frame(&Ping, WriteFrame::Ping));
        let (len, _, _) = builder.finish(&crypto_testing::null_level_keys()).unwrap();

        let (packet, remaining) = weft_quic_core::packet::decoding::decode_packet(
            weft_codec::DecoderBufferMut::new(&mut buffer[..len]),
            0,
        )
        .unwrap();
        assert!(remaining.is_empty());
        assert_eq!(
            packet.packet_type(),
            weft_quic_core::packet::decoding::PacketType::Initial
        );
    }

    #[test]
    fn frame_that_does_not_fit_is_refused() {
        let mut buffer = vec![0u8; 48];
        let dcid = ConnectionId::try_from_slice(&[7; 8]).unwrap();
        let (pn, tpn) = truncated(0);
        let mut builder = PacketBuilder::short(
            &mut buffer,
            &dcid,
            KeyPhase::Zero,
            pn,
            tpn,
            crypto_testing::TAG_LEN,
        );
        let huge = weft_quic_core::frame::Crypto {
            offset: VarInt::ZERO,
            data: &[0u8; 100][..],
        };
        assert!(!builder.push_frame(
            &huge,
            WriteFrame::Crypto {
                level: weft_quic_core::crypto::EncryptionLevel::OneRtt,
                offset: 0,
                len: 100,
            }
        ));
        assert!(builder.push_frame(&Ping, WriteFrame::Ping));
    }

    #[test]
    fn padding_reaches_datagram_floor() {
        let mut buffer = vec![0u8; 1500];
        let dcid = ConnectionId::try_from_slice(&[1; 8]).unwrap();
        let scid = ConnectionId::try_from_slice(&[2; 8]).unwrap();
        let (pn, tpn) = truncated(0);
        let mut builder = PacketBuilder::long(
            &mut buffer,
            LongForm::Initial,
            weft_quic_core::packet::QUIC_VERSION_1,
            &dcid,
            &scid,
            None,
            pn,
            tpn,
            crypto_testing::TAG_LEN,
        );
        builder.push_frame(&Ping, WriteFrame::Ping);
        builder.pad_datagram_to(1200, 0);
        let (len, _, _) = builder.finish(&crypto_testing::null_level_keys()).unwrap();
        assert!(len >= 1200);
    }
}
