// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::id::{self, ConnectionId},
    crypto::{EncryptionLevel, LevelKeys},
    packet::{
        key_phase::KeyPhase,
        number::{PacketNumber, PacketNumberLen, TruncatedPacketNumber},
        protection, FIXED_BIT, LONG_HEADER_BIT,
    },
    transport,
    varint::VarInt,
};
use bytes::Bytes;
use weft_codec::{DecoderBuffer, DecoderBufferMut, DecoderError};

pub const RETRY_INTEGRITY_TAG_LEN: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    VersionNegotiation,
    Short,
}

impl PacketType {
    /// The encryption level packets of this type decrypt under, when
    /// they decrypt at all
    #[inline]
    pub fn encryption_level(self) -> Option<EncryptionLevel> {
        match self {
            Self::Initial => Some(EncryptionLevel::Initial),
            Self::ZeroRtt => Some(EncryptionLevel::ZeroRtt),
            Self::Handshake => Some(EncryptionLevel::Handshake),
            Self::Short => Some(EncryptionLevel::OneRtt),
            Self::Retry | Self::VersionNegotiation => None,
        }
    }

    #[inline]
    pub fn is_long(self) -> bool {
        !matches!(self, Self::Short)
    }
}

/// Header fields readable before any protection is removed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub version: Option<u32>,
    pub destination_connection_id: ConnectionId,
    pub source_connection_id: Option<ConnectionId>,
    /// Initial token, or a Retry packet's token
    pub token: Option<Bytes>,
    /// Retry only
    pub integrity_tag: Option<[u8; RETRY_INTEGRITY_TAG_LEN]>,
    /// Version Negotiation only
    pub supported_versions: Vec<u32>,
    /// Offset of the protected packet number within the packet bytes;
    /// zero for forms that carry none
    pn_offset: usize,
}

/// One coalesced packet split out of a datagram, protection intact
#[derive(Debug)]
pub struct ProtectedPacket<'a> {
    bytes: &'a mut [u8],
    header: PacketHeader,
}

/// A fully decrypted packet ready for frame dispatch
#[derive(Debug)]
pub struct CleartextPacket<'a> {
    pub packet_number: PacketNumber,
    /// Present on short-header packets only
    pub key_phase: Option<KeyPhase>,
    pub payload: &'a [u8],
    pub header: PacketHeader,
}

/// Splits the next coalesced packet off the front of `datagram`.
///
/// `local_cid_len` tells the parser how many destination-id bytes a
/// short header carries, since the short form has no length field.
pub fn decode_packet(
    datagram: DecoderBufferMut<'_>,
    local_cid_len: usize,
) -> Result<(ProtectedPacket<'_>, DecoderBufferMut<'_>), DecoderError> {
    let (header, packet_len) = parse_header(datagram.as_less_safe_slice(), local_cid_len)?;
    let (packet, remaining) = datagram.decode_slice(packet_len)?;
    Ok((
        ProtectedPacket {
            bytes: packet.into_less_safe_slice(),
            header,
        },
        remaining,
    ))
}

fn parse_header(
    slice: &[u8],
    local_cid_len: usize,
) -> Result<(PacketHeader, usize), DecoderError> {
    let buffer = DecoderBuffer::new(slice);
    let (first, buffer) = buffer.decode::<u8>()?;

    if first & LONG_HEADER_BIT == 0 {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3
        //# Packets that do not match known connection IDs or with the fixed
        //# bit set to 0 are more likely to be garbage
        if first & FIXED_BIT == 0 {
            return Err(DecoderError::InvariantViolation("fixed bit zero"));
        }
        let (dcid, _buffer) = buffer.decode_slice(local_cid_len)?;
        let destination_connection_id = ConnectionId::try_from_slice(dcid.into_less_safe_slice())
            .ok_or(DecoderError::InvariantViolation("oversized connection id"))?;

        let header = PacketHeader {
            packet_type: PacketType::Short,
            version: None,
            destination_connection_id,
            source_connection_id: None,
            token: None,
            integrity_tag: None,
            supported_versions: Vec::new(),
            pn_offset: 1 + local_cid_len,
        };
        // a short header extends to the end of the datagram
        return Ok((header, slice.len()));
    }

    let (version, buffer) = buffer.decode::<u32>()?;
    let (dcid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let dcid = dcid.into_less_safe_slice();
    if dcid.len() > id::MAX_LEN {
        return Err(DecoderError::InvariantViolation("oversized connection id"));
    }
    let destination_connection_id = ConnectionId::try_from_slice(dcid)
        .ok_or(DecoderError::InvariantViolation("oversized connection id"))?;

    let (scid, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
    let scid = scid.into_less_safe_slice();
    if scid.len() > id::MAX_LEN {
        return Err(DecoderError::InvariantViolation("oversized connection id"));
    }
    let source_connection_id = ConnectionId::try_from_slice(scid);

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
    //# A Version Negotiation packet is inherently not version specific.
    //# It will be identified as a Version Negotiation packet based on the
    //# Version field having a value of 0.
    if version == 0 {
        let mut supported_versions = Vec::new();
        let mut cursor = buffer;
        while !cursor.is_empty() {
            let (version, rest) = cursor.decode::<u32>()?;
            supported_versions.push(version);
            cursor = rest;
        }
        if supported_versions.is_empty() {
            return Err(DecoderError::InvariantViolation("empty version list"));
        }
        let header = PacketHeader {
            packet_type: PacketType::VersionNegotiation,
            version: Some(0),
            destination_connection_id,
            source_connection_id,
            token: None,
            integrity_tag: None,
            supported_versions,
            pn_offset: 0,
        };
        return Ok((header, slice.len()));
    }

    if first & FIXED_BIT == 0 {
        return Err(DecoderError::InvariantViolation("fixed bit zero"));
    }

    let packet_type = match (first & 0x30) >> 4 {
        0b00 => PacketType::Initial,
        0b01 => PacketType::ZeroRtt,
        0b10 => PacketType::Handshake,
        _ => PacketType::Retry,
    };

    let (token, buffer) = match packet_type {
        PacketType::Initial => {
            let (token, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            (
                Some(Bytes::copy_from_slice(token.into_less_safe_slice())),
                buffer,
            )
        }
        PacketType::Retry => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
            //# A Retry packet carries a token and an integrity tag covering
            //# the rest of the datagram.
            let rest = buffer.into_less_safe_slice();
            let token_len = rest
                .len()
                .checked_sub(RETRY_INTEGRITY_TAG_LEN)
                .ok_or(DecoderError::UnexpectedEof(RETRY_INTEGRITY_TAG_LEN))?;
            let token = Bytes::copy_from_slice(&rest[..token_len]);
            let mut integrity_tag = [0u8; RETRY_INTEGRITY_TAG_LEN];
            integrity_tag.copy_from_slice(&rest[token_len..]);

            let header = PacketHeader {
                packet_type,
                version: Some(version),
                destination_connection_id,
                source_connection_id,
                token: Some(token),
                integrity_tag: Some(integrity_tag),
                supported_versions: Vec::new(),
                pn_offset: 0,
            };
            return Ok((header, slice.len()));
        }
        _ => (None, buffer),
    };

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Length:  The length of the remainder of the packet (that is, the
    //# Packet Number and Payload fields) in bytes, encoded as a
    //# variable-length integer (Section 16).
    let (length, buffer) = buffer.decode::<VarInt>()?;
    let pn_offset = slice.len() - buffer.len();
    let payload_len: usize = length
        .try_into()
        .map_err(|_| DecoderError::InvariantViolation("invalid length field"))?;
    let packet_len = pn_offset
        .checked_add(payload_len)
        .filter(|len| *len <= slice.len())
        .ok_or(DecoderError::UnexpectedEof(payload_len))?;

    let header = PacketHeader {
        packet_type,
        version: Some(version),
        destination_connection_id,
        source_connection_id,
        token,
        integrity_tag: None,
        supported_versions: Vec::new(),
        pn_offset,
    };
    Ok((header, packet_len))
}

impl<'a> ProtectedPacket<'a> {
    #[inline]
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    #[inline]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    #[inline]
    pub fn destination_connection_id(&self) -> &ConnectionId {
        &self.header.destination_connection_id
    }

    #[inline]
    pub fn encryption_level(&self) -> Option<EncryptionLevel> {
        self.header.packet_type.encryption_level()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The still-protected packet bytes, e.g. for buffering until the
    /// reader cipher arrives
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Removes header protection, revealing the packet number and key
    /// phase; decryption follows as a separate step so the caller can
    /// pick an AEAD by phase.
    ///
    /// `largest_received` is the largest packet number seen in this
    /// packet's space, used to reconstruct the full packet number.
    pub fn unprotect(
        self,
        header_key: &dyn crate::crypto::HeaderKey,
        largest_received: Option<PacketNumber>,
    ) -> Result<UnprotectedPacket<'a>, transport::Error> {
        let space = self
            .encryption_level()
            .ok_or(transport::Error::INTERNAL_ERROR.with_reason("packet form carries no payload"))?
            .packet_number_space();
        let pn_offset = self.header.pn_offset;
        let bytes = self.bytes;

        let pn_len = protection::remove(header_key, bytes, pn_offset)?;
        let pn_len = match pn_len {
            1 => PacketNumberLen::U8,
            2 => PacketNumberLen::U16,
            3 => PacketNumberLen::U24,
            _ => PacketNumberLen::U32,
        };

        let is_short = self.header.packet_type == PacketType::Short;
        let key_phase = if is_short {
            Some(KeyPhase::from_tag(bytes[0]))
        } else {
            None
        };

        let header_len = pn_offset + pn_len.bytesize();
        let (truncated, _) = TruncatedPacketNumber::decode_mut(
            space,
            pn_len,
            DecoderBufferMut::new(&mut bytes[pn_offset..header_len]),
        )
        .map_err(transport::Error::from)?;
        let packet_number = truncated.expand(largest_received)?;

        Ok(UnprotectedPacket {
            bytes,
            header: self.header,
            packet_number,
            key_phase,
            header_len,
        })
    }

    /// Convenience for the common single-phase case
    pub fn unprotect_and_decrypt(
        self,
        keys: &LevelKeys,
        largest_received: Option<PacketNumber>,
    ) -> Result<CleartextPacket<'a>, transport::Error> {
        self.unprotect(keys.header_key.as_ref(), largest_received)?
            .decrypt(keys.key.as_ref())
    }
}

/// A packet whose header protection is removed but whose payload is
/// still encrypted
#[derive(Debug)]
pub struct UnprotectedPacket<'a> {
    bytes: &'a mut [u8],
    header: PacketHeader,
    packet_number: PacketNumber,
    key_phase: Option<KeyPhase>,
    header_len: usize,
}

impl<'a> UnprotectedPacket<'a> {
    #[inline]
    pub fn packet_number(&self) -> PacketNumber {
        self.packet_number
    }

    #[inline]
    pub fn key_phase(&self) -> Option<KeyPhase> {
        self.key_phase
    }

    /// Authenticates and decrypts the payload in place
    pub fn decrypt(
        self,
        key: &dyn crate::crypto::Key,
    ) -> Result<CleartextPacket<'a>, transport::Error> {
        let (header_bytes, payload) = self.bytes.split_at_mut(self.header_len);
        let plaintext_len = key.open(self.packet_number.as_u64(), header_bytes, payload)?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
        //# An endpoint MUST treat receipt of a packet containing no frames as
        //# a connection error of type PROTOCOL_VIOLATION.
        if plaintext_len == 0 {
            return Err(transport::Error::PROTOCOL_VIOLATION.with_reason("empty packet payload"));
        }

        Ok(CleartextPacket {
            packet_number: self.packet_number,
            key_phase: self.key_phase,
            payload: &payload[..plaintext_len],
            header: self.header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::testing as crypto_testing, varint::VarInt};
    use weft_codec::{Encoder, EncoderBuffer, EncoderValue};

    fn build_initial(dcid: &[u8], scid: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut storage = vec![0u8; 1500];
        let pn: u32 = 7;
        let mut encoder = EncoderBuffer::new(&mut storage);
        // pn_len bits encode 1 byte
        encoder.encode(&(LONG_HEADER_BIT | FIXED_BIT));
        encoder.encode(&crate::packet::QUIC_VERSION_1);
        encoder.encode(&(dcid.len() as u8));
        encoder.write_slice(dcid);
        encoder.encode(&(scid.len() as u8));
        encoder.write_slice(scid);
        // empty token
        encoder.encode(&VarInt::ZERO);
        let body_len = 1 + payload.len() + crypto_testing::TAG_LEN;
        encoder.encode(&VarInt::try_from(body_len).unwrap());
        encoder.encode(&(pn as u8));
        encoder.write_slice(payload);
        encoder.write_repeated(crypto_testing::TAG_LEN, 0xaa);
        let len = encoder.len();
        storage.truncate(len);
        storage
    }

    #[test]
    fn initial_parse_and_decrypt() {
        let payload = [0x01u8, 0x01, 0x01];
        let mut datagram = build_initial(&[1; 8], &[2; 4], &payload);
        let (packet, remaining) =
            decode_packet(DecoderBufferMut::new(&mut datagram), 0).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(packet.packet_type(), PacketType::Initial);
        assert_eq!(packet.destination_connection_id().as_slice(), &[1; 8]);

        let cleartext = packet
            .unprotect_and_decrypt(&crypto_testing::null_level_keys(), None)
            .unwrap();
        assert_eq!(cleartext.packet_number.as_u64(), 7);
        assert_eq!(cleartext.payload, &payload);
        assert_eq!(cleartext.key_phase, None);
    }

    #[test]
    fn coalesced_packets_split() {
        let mut datagram = build_initial(&[1; 8], &[2; 4], &[0x01]);
        let second = build_initial(&[1; 8], &[2; 4], &[0x01, 0x01]);
        let first_len = datagram.len();
        datagram.extend_from_slice(&second);

        let (packet, remaining) =
            decode_packet(DecoderBufferMut::new(&mut datagram), 0).unwrap();
        assert_eq!(packet.len(), first_len);
        assert_eq!(remaining.len(), second.len());

        let (second_packet, remaining) = decode_packet(remaining, 0).unwrap();
        assert_eq!(second_packet.len(), second.len());
        assert!(remaining.is_empty());
    }

    #[test]
    fn version_negotiation_form() {
        let mut datagram = vec![LONG_HEADER_BIT];
        datagram.extend_from_slice(&0u32.to_be_bytes());
        datagram.push(1);
        datagram.push(0xcc);
        datagram.push(0);
        datagram.extend_from_slice(&1u32.to_be_bytes());
        datagram.extend_from_slice(&0x5123_4321u32.to_be_bytes());

        let (packet, remaining) =
            decode_packet(DecoderBufferMut::new(&mut datagram), 0).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(packet.packet_type(), PacketType::VersionNegotiation);
        assert_eq!(packet.header().supported_versions, vec![1, 0x5123_4321]);
    }

    #[test]
    fn empty_payload_is_protocol_violation() {
        let mut datagram = build_initial(&[1; 8], &[2; 4], &[]);
        let (packet, _) = decode_packet(DecoderBufferMut::new(&mut datagram), 0).unwrap();
        let error = packet
            .unprotect_and_decrypt(&crypto_testing::null_level_keys(), None)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::PROTOCOL_VIOLATION.code);
    }

    #[test]
    fn short_header_uses_local_cid_len() {
        let mut datagram = vec![FIXED_BIT | 0b01, 9, 9, 9, 9, 9];
        // pn (2 bytes) + payload + tag
        datagram.extend_from_slice(&[0, 3]);
        datagram.push(0x01);
        datagram.extend_from_slice(&[0xaa; crypto_testing::TAG_LEN]);

        let (packet, _) = decode_packet(DecoderBufferMut::new(&mut datagram), 5).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Short);
        assert_eq!(packet.destination_connection_id().as_slice(), &[9; 5]);

        let cleartext = packet
            .unprotect_and_decrypt(&crypto_testing::null_level_keys(), None)
            .unwrap();
        assert_eq!(cleartext.packet_number.as_u64(), 3);
        assert_eq!(cleartext.key_phase, Some(KeyPhase::Zero));
        assert_eq!(cleartext.payload, &[0x01]);
    }
}
