// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport parameters carried in the TLS handshake extension.
//!
//! Parameters are a sequence of (id, length, value) entries. Unknown
//! ids are skipped; duplicates and out-of-range values terminate the
//! handshake.

use crate::{
    connection::id::ConnectionId,
    endpoint,
    transport::Error,
    varint::VarInt,
};
use core::time::Duration;
use weft_codec::{DecoderBuffer, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# Those transport parameters that are identified as integers use a
//# variable-length integer encoding; see Section 16.

pub mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const PREFERRED_ADDRESS: u64 = 0x0d;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;

    //= https://www.rfc-editor.org/rfc/rfc9221#section-3
    //# max_datagram_frame_size (0x20)
    pub const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;

    //= https://www.ietf.org/archive/id/draft-ietf-quic-ack-frequency-07.txt#3
    //# min_ack_delay (0xff04de1b)
    pub const MIN_ACK_DELAY: u64 = 0xff04_de1b;

    //= https://www.ietf.org/archive/id/draft-ietf-quic-reliable-stream-reset-03.txt#3
    //# reliable_stream_reset (0x17f7586d2cb571)
    pub const RELIABLE_STREAM_RESET: u64 = 0x17_f758_6d2c_b571;

    // vendor extension range
    pub const ACK_RECEIVE_TIMESTAMPS_ENABLED: u64 = 0xff0_a001;
    pub const MAX_RECEIVE_TIMESTAMPS_PER_ACK: u64 = 0xff0_a002;
    pub const RECEIVE_TIMESTAMPS_EXPONENT: u64 = 0xff0_a003;
    pub const EXTENDED_ACK_FEATURES: u64 = 0xff0_a004;
    pub const STREAM_GROUPS_ENABLED: u64 = 0xff0_b001;
    pub const KNOB_FRAMES_SUPPORTED: u64 = 0xff0_c001;
    pub const CWND_HINT_BYTES: u64 = 0xff0_c002;
    pub const CLIENT_DIRECT_ENCAP: u64 = 0xff0_c003;
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# The default for this parameter is the maximum permitted UDP payload
//# of 65527.
pub const DEFAULT_MAX_UDP_PAYLOAD_SIZE: u64 = 65527;
pub const MIN_MAX_UDP_PAYLOAD_SIZE: u64 = 1200;

/// Frame and header overhead below which a datagram frame size makes
/// no sense
pub const MAX_DATAGRAM_PACKET_OVERHEAD: u64 = 64;

/// The preferred_address value a server may offer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreferredAddress {
    pub ipv4_address: [u8; 4],
    pub ipv4_port: u16,
    pub ipv6_address: [u8; 16],
    pub ipv6_port: u16,
    pub connection_id: ConnectionId,
    pub stateless_reset_token: [u8; 16],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    /// Milliseconds; zero disables the idle timeout
    pub max_idle_timeout: VarInt,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    /// Milliseconds
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    pub preferred_address: Option<PreferredAddress>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    /// Zero means datagram frames are not accepted
    pub max_datagram_frame_size: VarInt,
    /// Microseconds; presence advertises ACK_FREQUENCY support
    pub min_ack_delay: Option<VarInt>,
    /// Maximum stream group count; presence enables stream groups
    pub stream_groups_enabled: Option<VarInt>,
    pub ack_receive_timestamps_enabled: bool,
    pub max_receive_timestamps_per_ack: Option<VarInt>,
    pub receive_timestamps_exponent: Option<VarInt>,
    pub extended_ack_features: VarInt,
    pub knob_frames_supported: bool,
    pub reliable_stream_reset: bool,
    pub cwnd_hint_bytes: Option<VarInt>,
    pub client_direct_encap: bool,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: VarInt::ZERO,
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::new(DEFAULT_MAX_UDP_PAYLOAD_SIZE)
                .unwrap_or(VarInt::MAX),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: 3,
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            preferred_address: None,
            active_connection_id_limit: VarInt::from_u8(2),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: VarInt::ZERO,
            min_ack_delay: None,
            stream_groups_enabled: None,
            ack_receive_timestamps_enabled: false,
            max_receive_timestamps_per_ack: None,
            receive_timestamps_exponent: None,
            extended_ack_features: VarInt::ZERO,
            knob_frames_supported: false,
            reliable_stream_reset: false,
            cwnd_hint_bytes: None,
            client_direct_encap: false,
        }
    }
}

impl TransportParameters {
    #[inline]
    pub fn max_idle_timeout(&self) -> Option<Duration> {
        if self.max_idle_timeout == VarInt::ZERO {
            None
        } else {
            Some(Duration::from_millis(self.max_idle_timeout.as_u64()))
        }
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        Duration::from_millis(self.max_ack_delay.as_u64())
    }

    #[inline]
    pub fn min_ack_delay(&self) -> Option<Duration> {
        self.min_ack_delay
            .map(|value| Duration::from_micros(value.as_u64()))
    }

    /// Validates invariants which hold regardless of sender
    fn validate(&self) -> Result<(), Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values above 20 are invalid.
        if self.ack_delay_exponent > 20 {
            return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("ack_delay_exponent above 20"));
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values of 2^14 or greater are invalid.
        if self.max_ack_delay.as_u64() >= 1 << 14 {
            return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("max_ack_delay too large"));
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values below 1200 are invalid.
        if self.max_udp_payload_size.as_u64() < MIN_MAX_UDP_PAYLOAD_SIZE {
            return Err(
                Error::TRANSPORT_PARAMETER_ERROR.with_reason("max_udp_payload_size below 1200")
            );
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# The value of the active_connection_id_limit parameter MUST be at
        //# least 2.
        if self.active_connection_id_limit.as_u64() < 2 {
            return Err(
                Error::TRANSPORT_PARAMETER_ERROR.with_reason("active_connection_id_limit below 2")
            );
        }
        let datagram_size = self.max_datagram_frame_size.as_u64();
        if datagram_size != 0 && datagram_size <= MAX_DATAGRAM_PACKET_OVERHEAD {
            return Err(
                Error::TRANSPORT_PARAMETER_ERROR.with_reason("max_datagram_frame_size too small")
            );
        }
        if self.ack_receive_timestamps_enabled && self.max_receive_timestamps_per_ack.is_none() {
            return Err(Error::TRANSPORT_PARAMETER_ERROR
                .with_reason("receive timestamps enabled without a per-ack limit"));
        }
        Ok(())
    }

    /// Validates restrictions on which side may send which parameters
    fn validate_sender(&self, sender: endpoint::Type) -> Result<(), Error> {
        if sender.is_client() {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# A client MUST NOT include any server-only transport parameter:
            //# original_destination_connection_id, preferred_address,
            //# retry_source_connection_id, or stateless_reset_token.
            if self.original_destination_connection_id.is_some()
                || self.preferred_address.is_some()
                || self.retry_source_connection_id.is_some()
                || self.stateless_reset_token.is_some()
            {
                return Err(Error::TRANSPORT_PARAMETER_ERROR
                    .with_reason("server-only parameter sent by client"));
            }
        }
        Ok(())
    }

    pub fn decode(buffer: DecoderBuffer, sender: endpoint::Type) -> Result<Self, Error> {
        let mut params = Self::default();
        let mut seen: Vec<u64> = Vec::new();
        let mut buffer = buffer;

        while !buffer.is_empty() {
            let (param_id, rest) = buffer.decode::<VarInt>().map_err(map_decode_error)?;
            let (value, rest) = rest
                .decode_slice_with_len_prefix::<VarInt>()
                .map_err(map_decode_error)?;
            buffer = rest;

            let param_id = param_id.as_u64();
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
            //# An endpoint MUST NOT send a parameter more than once in a given
            //# transport parameters extension.
            if seen.contains(&param_id) {
                return Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason("duplicate parameter"));
            }
            seen.push(param_id);

            params.apply(param_id, value)?;
        }

        params.validate()?;
        params.validate_sender(sender)?;
        Ok(params)
    }

    fn apply(&mut self, param_id: u64, value: DecoderBuffer) -> Result<(), Error> {
        match param_id {
            id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                self.original_destination_connection_id = Some(decode_cid(value)?);
            }
            id::MAX_IDLE_TIMEOUT => self.max_idle_timeout = decode_varint(value)?,
            id::STATELESS_RESET_TOKEN => {
                let (token, rest) = value.decode::<[u8; 16]>().map_err(map_decode_error)?;
                ensure_empty(rest)?;
                self.stateless_reset_token = Some(token);
            }
            id::MAX_UDP_PAYLOAD_SIZE => self.max_udp_payload_size = decode_varint(value)?,
            id::INITIAL_MAX_DATA => self.initial_max_data = decode_varint(value)?,
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                self.initial_max_stream_data_bidi_local = decode_varint(value)?;
            }
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                self.initial_max_stream_data_bidi_remote = decode_varint(value)?;
            }
            id::INITIAL_MAX_STREAM_DATA_UNI => {
                self.initial_max_stream_data_uni = decode_varint(value)?;
            }
            id::INITIAL_MAX_STREAMS_BIDI => self.initial_max_streams_bidi = decode_varint(value)?,
            id::INITIAL_MAX_STREAMS_UNI => self.initial_max_streams_uni = decode_varint(value)?,
            id::ACK_DELAY_EXPONENT => {
                let exponent = decode_varint(value)?;
                self.ack_delay_exponent = exponent
                    .as_u64()
                    .try_into()
                    .map_err(|_| {
                        Error::TRANSPORT_PARAMETER_ERROR.with_reason("ack_delay_exponent above 20")
                    })?;
            }
            id::MAX_ACK_DELAY => self.max_ack_delay = decode_varint(value)?,
            id::DISABLE_ACTIVE_MIGRATION => {
                ensure_empty(value)?;
                self.disable_active_migration = true;
            }
            id::PREFERRED_ADDRESS => {
                self.preferred_address = Some(decode_preferred_address(value)?);
            }
            id::ACTIVE_CONNECTION_ID_LIMIT => {
                self.active_connection_id_limit = decode_varint(value)?;
            }
            id::INITIAL_SOURCE_CONNECTION_ID => {
                self.initial_source_connection_id = Some(decode_cid(value)?);
            }
            id::RETRY_SOURCE_CONNECTION_ID => {
                self.retry_source_connection_id = Some(decode_cid(value)?);
            }
            id::MAX_DATAGRAM_FRAME_SIZE => self.max_datagram_frame_size = decode_varint(value)?,
            id::MIN_ACK_DELAY => self.min_ack_delay = Some(decode_varint(value)?),
            id::STREAM_GROUPS_ENABLED => self.stream_groups_enabled = Some(decode_varint(value)?),
            id::ACK_RECEIVE_TIMESTAMPS_ENABLED => {
                ensure_empty(value)?;
                self.ack_receive_timestamps_enabled = true;
            }
            id::MAX_RECEIVE_TIMESTAMPS_PER_ACK => {
                self.max_receive_timestamps_per_ack = Some(decode_varint(value)?);
            }
            id::RECEIVE_TIMESTAMPS_EXPONENT => {
                self.receive_timestamps_exponent = Some(decode_varint(value)?);
            }
            id::EXTENDED_ACK_FEATURES => self.extended_ack_features = decode_varint(value)?,
            id::KNOB_FRAMES_SUPPORTED => {
                ensure_empty(value)?;
                self.knob_frames_supported = true;
            }
            id::RELIABLE_STREAM_RESET => {
                ensure_empty(value)?;
                self.reliable_stream_reset = true;
            }
            id::CWND_HINT_BYTES => self.cwnd_hint_bytes = Some(decode_varint(value)?),
            id::CLIENT_DIRECT_ENCAP => {
                ensure_empty(value)?;
                self.client_direct_encap = true;
            }
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.2
            //# An endpoint MUST ignore transport parameters that it does not
            //# support.
            _ => {}
        }
        Ok(())
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        if let Some(cid) = &self.original_destination_connection_id {
            encode_entry(encoder, id::ORIGINAL_DESTINATION_CONNECTION_ID, |e| {
                e.write_slice(cid.as_slice())
            });
        }
        if self.max_idle_timeout != VarInt::ZERO {
            encode_varint_entry(encoder, id::MAX_IDLE_TIMEOUT, self.max_idle_timeout);
        }
        if let Some(token) = &self.stateless_reset_token {
            encode_entry(encoder, id::STATELESS_RESET_TOKEN, |e| e.write_slice(token));
        }
        encode_varint_entry(encoder, id::MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        encode_varint_entry(encoder, id::INITIAL_MAX_DATA, self.initial_max_data);
        encode_varint_entry(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        encode_varint_entry(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        encode_varint_entry(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        encode_varint_entry(
            encoder,
            id::INITIAL_MAX_STREAMS_BIDI,
            self.initial_max_streams_bidi,
        );
        encode_varint_entry(
            encoder,
            id::INITIAL_MAX_STREAMS_UNI,
            self.initial_max_streams_uni,
        );
        encode_varint_entry(
            encoder,
            id::ACK_DELAY_EXPONENT,
            VarInt::from_u8(self.ack_delay_exponent),
        );
        encode_varint_entry(encoder, id::MAX_ACK_DELAY, self.max_ack_delay);
        if self.disable_active_migration {
            encode_entry(encoder, id::DISABLE_ACTIVE_MIGRATION, |_| {});
        }
        if let Some(preferred) = &self.preferred_address {
            encode_entry(encoder, id::PREFERRED_ADDRESS, |e| {
                e.write_slice(&preferred.ipv4_address);
                e.encode(&preferred.ipv4_port);
                e.write_slice(&preferred.ipv6_address);
                e.encode(&preferred.ipv6_port);
                e.encode(&(preferred.connection_id.len() as u8));
                e.write_slice(preferred.connection_id.as_slice());
                e.write_slice(&preferred.stateless_reset_token);
            });
        }
        encode_varint_entry(
            encoder,
            id::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        if let Some(cid) = &self.initial_source_connection_id {
            encode_entry(encoder, id::INITIAL_SOURCE_CONNECTION_ID, |e| {
                e.write_slice(cid.as_slice())
            });
        }
        if let Some(cid) = &self.retry_source_connection_id {
            encode_entry(encoder, id::RETRY_SOURCE_CONNECTION_ID, |e| {
                e.write_slice(cid.as_slice())
            });
        }
        if self.max_datagram_frame_size != VarInt::ZERO {
            encode_varint_entry(
                encoder,
                id::MAX_DATAGRAM_FRAME_SIZE,
                self.max_datagram_frame_size,
            );
        }
        if let Some(delay) = self.min_ack_delay {
            encode_varint_entry(encoder, id::MIN_ACK_DELAY, delay);
        }
        if let Some(groups) = self.stream_groups_enabled {
            encode_varint_entry(encoder, id::STREAM_GROUPS_ENABLED, groups);
        }
        if self.ack_receive_timestamps_enabled {
            encode_entry(encoder, id::ACK_RECEIVE_TIMESTAMPS_ENABLED, |_| {});
        }
        if let Some(limit) = self.max_receive_timestamps_per_ack {
            encode_varint_entry(encoder, id::MAX_RECEIVE_TIMESTAMPS_PER_ACK, limit);
        }
        if let Some(exponent) = self.receive_timestamps_exponent {
            encode_varint_entry(encoder, id::RECEIVE_TIMESTAMPS_EXPONENT, exponent);
        }
        if self.extended_ack_features != VarInt::ZERO {
            encode_varint_entry(encoder, id::EXTENDED_ACK_FEATURES, self.extended_ack_features);
        }
        if self.knob_frames_supported {
            encode_entry(encoder, id::KNOB_FRAMES_SUPPORTED, |_| {});
        }
        if self.reliable_stream_reset {
            encode_entry(encoder, id::RELIABLE_STREAM_RESET, |_| {});
        }
        if let Some(hint) = self.cwnd_hint_bytes {
            encode_varint_entry(encoder, id::CWND_HINT_BYTES, hint);
        }
        if self.client_direct_encap {
            encode_entry(encoder, id::CLIENT_DIRECT_ENCAP, |_| {});
        }
    }

    /// True when `self` (newly received) is no weaker than `cached`
    /// for every limit that gates 0-RTT resumption
    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.1
    //# A server MUST NOT reduce limits when accepting 0-RTT; reduced
    //# limits are a connection error of type PROTOCOL_VIOLATION.
    pub fn is_compatible_with_cached(&self, cached: &Self) -> bool {
        self.initial_max_data >= cached.initial_max_data
            && self.initial_max_stream_data_bidi_local >= cached.initial_max_stream_data_bidi_local
            && self.initial_max_stream_data_bidi_remote
                >= cached.initial_max_stream_data_bidi_remote
            && self.initial_max_stream_data_uni >= cached.initial_max_stream_data_uni
            && self.initial_max_streams_bidi >= cached.initial_max_streams_bidi
            && self.initial_max_streams_uni >= cached.initial_max_streams_uni
            && self.max_datagram_frame_size >= cached.max_datagram_frame_size
    }
}

fn map_decode_error(_: weft_codec::DecoderError) -> Error {
    Error::TRANSPORT_PARAMETER_ERROR.with_reason("malformed transport parameters")
}

fn ensure_empty(buffer: DecoderBuffer) -> Result<(), Error> {
    buffer.ensure_empty().map_err(map_decode_error)
}

fn decode_varint(buffer: DecoderBuffer) -> Result<VarInt, Error> {
    let (value, rest) = buffer.decode::<VarInt>().map_err(map_decode_error)?;
    ensure_empty(rest)?;
    Ok(value)
}

fn decode_cid(buffer: DecoderBuffer) -> Result<ConnectionId, Error> {
    ConnectionId::try_from_slice(buffer.as_less_safe_slice())
        .ok_or(Error::TRANSPORT_PARAMETER_ERROR.with_reason("oversized connection id"))
}

fn decode_preferred_address(buffer: DecoderBuffer) -> Result<PreferredAddress, Error> {
    let (ipv4_address, buffer) = buffer.decode::<[u8; 4]>().map_err(map_decode_error)?;
    let (ipv4_port, buffer) = buffer.decode::<u16>().map_err(map_decode_error)?;
    let (ipv6_address, buffer) = buffer.decode::<[u8; 16]>().map_err(map_decode_error)?;
    let (ipv6_port, buffer) = buffer.decode::<u16>().map_err(map_decode_error)?;
    let (cid, buffer) = buffer
        .decode_slice_with_len_prefix::<u8>()
        .map_err(map_decode_error)?;
    let connection_id = ConnectionId::try_from_slice(cid.into_less_safe_slice())
        .ok_or(Error::TRANSPORT_PARAMETER_ERROR.with_reason("oversized connection id"))?;
    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
    //# A server that chooses a zero-length connection ID MUST NOT provide
    //# a preferred address.
    if connection_id.is_empty() {
        return Err(Error::TRANSPORT_PARAMETER_ERROR
            .with_reason("preferred address with empty connection id"));
    }
    let (stateless_reset_token, buffer) =
        buffer.decode::<[u8; 16]>().map_err(map_decode_error)?;
    ensure_empty(buffer)?;
    Ok(PreferredAddress {
        ipv4_address,
        ipv4_port,
        ipv6_address,
        ipv6_port,
        connection_id,
        stateless_reset_token,
    })
}

/// Longest parameter value: a preferred_address entry
const MAX_ENTRY_VALUE_LEN: usize = 64;

fn encode_entry<E: Encoder>(
    encoder: &mut E,
    param_id: u64,
    write: impl FnOnce(&mut weft_codec::EncoderBuffer),
) {
    // stage the value so its length prefix can be emitted first
    let mut staging = [0u8; MAX_ENTRY_VALUE_LEN];
    let mut value = weft_codec::EncoderBuffer::new(&mut staging);
    write(&mut value);
    let len = value.len();

    encoder.encode(&VarInt::new(param_id).unwrap_or(VarInt::MAX));
    encoder.encode(&VarInt::try_from(len).unwrap_or(VarInt::MAX));
    encoder.write_slice(&staging[..len]);
}

fn encode_varint_entry<E: Encoder>(encoder: &mut E, param_id: u64, value: VarInt) {
    encoder.encode(&VarInt::new(param_id).unwrap_or(VarInt::MAX));
    encoder.encode(&VarInt::try_from(value.encoding_size()).unwrap_or(VarInt::MAX));
    encoder.encode(&value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_codec::EncoderBuffer;

    fn round_trip(params: &TransportParameters, sender: endpoint::Type) -> TransportParameters {
        let mut storage = [0u8; 1024];
        let mut encoder = EncoderBuffer::new(&mut storage);
        params.encode(&mut encoder);
        let len = encoder.len();
        TransportParameters::decode(DecoderBuffer::new(&storage[..len]), sender).unwrap()
    }

    #[test]
    fn default_round_trip() {
        let params = TransportParameters::default();
        assert_eq!(round_trip(&params, endpoint::Type::Client), params);
    }

    #[test]
    fn full_server_round_trip() {
        let params = TransportParameters {
            original_destination_connection_id: ConnectionId::try_from_slice(&[1; 8]),
            max_idle_timeout: VarInt::from_u16(30_000),
            stateless_reset_token: Some([3; 16]),
            initial_max_data: VarInt::from_u32(1 << 20),
            initial_max_streams_bidi: VarInt::from_u8(100),
            min_ack_delay: Some(VarInt::from_u16(1000)),
            stream_groups_enabled: Some(VarInt::from_u8(16)),
            ack_receive_timestamps_enabled: true,
            max_receive_timestamps_per_ack: Some(VarInt::from_u8(10)),
            receive_timestamps_exponent: Some(VarInt::from_u8(3)),
            extended_ack_features: VarInt::from_u8(3),
            knob_frames_supported: true,
            reliable_stream_reset: true,
            cwnd_hint_bytes: Some(VarInt::from_u32(100_000)),
            max_datagram_frame_size: VarInt::from_u16(1400),
            preferred_address: Some(PreferredAddress {
                ipv4_address: [192, 0, 2, 1],
                ipv4_port: 443,
                ipv6_address: [0x20; 16],
                ipv6_port: 8443,
                connection_id: ConnectionId::try_from_slice(&[7; 8]).unwrap(),
                stateless_reset_token: [9; 16],
            }),
            ..Default::default()
        };
        assert_eq!(round_trip(&params, endpoint::Type::Server), params);
    }

    #[test]
    fn client_may_not_send_server_only() {
        let params = TransportParameters {
            stateless_reset_token: Some([3; 16]),
            ..Default::default()
        };
        let mut storage = [0u8; 256];
        let mut encoder = EncoderBuffer::new(&mut storage);
        params.encode(&mut encoder);
        let len = encoder.len();
        assert!(
            TransportParameters::decode(DecoderBuffer::new(&storage[..len]), endpoint::Type::Client)
                .is_err()
        );
    }

    #[test]
    fn duplicates_rejected() {
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encode_varint_entry(&mut encoder, id::INITIAL_MAX_DATA, VarInt::from_u8(1));
        encode_varint_entry(&mut encoder, id::INITIAL_MAX_DATA, VarInt::from_u8(2));
        let len = encoder.len();
        assert!(
            TransportParameters::decode(DecoderBuffer::new(&storage[..len]), endpoint::Type::Client)
                .is_err()
        );
    }

    #[test]
    fn unknown_parameters_ignored() {
        let mut storage = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut storage);
        encode_varint_entry(&mut encoder, 0x7f7f, VarInt::from_u8(1));
        encode_varint_entry(&mut encoder, id::INITIAL_MAX_DATA, VarInt::from_u8(7));
        let len = encoder.len();
        let params = TransportParameters::decode(
            DecoderBuffer::new(&storage[..len]),
            endpoint::Type::Client,
        )
        .unwrap();
        assert_eq!(params.initial_max_data, VarInt::from_u8(7));
    }

    #[test]
    fn range_validation() {
        for (param_id, value) in [
            (id::ACK_DELAY_EXPONENT, 21u64),
            (id::MAX_ACK_DELAY, 1 << 14),
            (id::MAX_UDP_PAYLOAD_SIZE, 1199),
            (id::ACTIVE_CONNECTION_ID_LIMIT, 1),
            (id::MAX_DATAGRAM_FRAME_SIZE, 10),
        ] {
            let mut storage = [0u8; 64];
            let mut encoder = EncoderBuffer::new(&mut storage);
            encode_varint_entry(&mut encoder, param_id, VarInt::new(value).unwrap());
            let len = encoder.len();
            assert!(
                TransportParameters::decode(
                    DecoderBuffer::new(&storage[..len]),
                    endpoint::Type::Client
                )
                .is_err(),
                "{param_id:#x} accepted {value}"
            );
        }
    }

    #[test]
    fn zero_rtt_compatibility() {
        let cached = TransportParameters {
            initial_max_data: VarInt::from_u32(1000),
            ..Default::default()
        };
        let weaker = TransportParameters {
            initial_max_data: VarInt::from_u32(999),
            ..Default::default()
        };
        let stronger = TransportParameters {
            initial_max_data: VarInt::from_u32(2000),
            ..Default::default()
        };
        assert!(!weaker.is_compatible_with_cached(&cached));
        assert!(stronger.is_compatible_with_cached(&cached));
    }
}
