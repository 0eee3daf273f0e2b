// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Address-validation tokens: Retry tokens and NEW_TOKEN tokens.
//!
//! Token payloads are sealed under a server-held secret by an opaque
//! AEAD; this module owns the plaintext layout and the acceptance
//! policy (age, address match), not the cryptography.

use crate::{connection::id::ConnectionId, varint::VarInt};
use std::net::{IpAddr, SocketAddr};
use weft_codec::{DecoderBuffer, DecoderError, Encoder, EncoderBuffer, EncoderValue};

/// How long a Retry token stays acceptable
pub const RETRY_TOKEN_MAX_AGE_MS: u64 = 5 * 60 * 1000;

/// How long a NEW_TOKEN token stays acceptable
pub const NEW_TOKEN_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// Seals and opens token payloads under the token secret
pub trait Cipher: 'static + Send {
    fn seal(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Returns the plaintext, or `None` when authentication fails
    fn open(&self, sealed: &[u8]) -> Option<Vec<u8>>;
}

/// Which kind of token a client presented in an Initial
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Retry,
    NewToken,
}

const RETRY_TOKEN_LABEL: u8 = 0x72;
const NEW_TOKEN_LABEL: u8 = 0x6e;

const IPV4_TAG: u8 = 4;
const IPV6_TAG: u8 = 6;

fn encode_ip<E: Encoder>(encoder: &mut E, ip: &IpAddr) {
    match ip {
        IpAddr::V4(ip) => {
            encoder.encode(&IPV4_TAG);
            encoder.write_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            encoder.encode(&IPV6_TAG);
            encoder.write_slice(&ip.octets());
        }
    }
}

fn decode_ip(buffer: DecoderBuffer) -> Result<(IpAddr, DecoderBuffer), DecoderError> {
    let (tag, buffer) = buffer.decode::<u8>()?;
    match tag {
        IPV4_TAG => {
            let (octets, buffer) = buffer.decode::<[u8; 4]>()?;
            Ok((IpAddr::from(octets), buffer))
        }
        IPV6_TAG => {
            let (octets, buffer) = buffer.decode::<[u8; 16]>()?;
            Ok((IpAddr::from(octets), buffer))
        }
        _ => Err(DecoderError::InvariantViolation("invalid address family")),
    }
}

/// Plaintext of a Retry token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryToken {
    pub original_destination_connection_id: ConnectionId,
    pub address: SocketAddr,
    pub timestamp_ms: u64,
}

impl RetryToken {
    pub fn seal(&self, cipher: &dyn Cipher) -> Vec<u8> {
        let mut staging = [0u8; 64];
        let mut encoder = EncoderBuffer::new(&mut staging);
        encoder.encode(&RETRY_TOKEN_LABEL);
        encoder.encode(&(self.original_destination_connection_id.len() as u8));
        encoder.write_slice(self.original_destination_connection_id.as_slice());
        encode_ip(&mut encoder, &self.address.ip());
        encoder.encode(&self.address.port());
        encoder.encode(&VarInt::new(self.timestamp_ms).unwrap_or(VarInt::MAX));
        let len = encoder.len();
        cipher.seal(&staging[..len])
    }

    pub fn open(cipher: &dyn Cipher, sealed: &[u8]) -> Option<Self> {
        let plaintext = cipher.open(sealed)?;
        let buffer = DecoderBuffer::new(&plaintext);
        let (label, buffer) = buffer.decode::<u8>().ok()?;
        if label != RETRY_TOKEN_LABEL {
            return None;
        }
        let (odcid, buffer) = buffer.decode_slice_with_len_prefix::<u8>().ok()?;
        let original_destination_connection_id =
            ConnectionId::try_from_slice(odcid.into_less_safe_slice())?;
        let (ip, buffer) = decode_ip(buffer).ok()?;
        let (port, buffer) = buffer.decode::<u16>().ok()?;
        let (timestamp, buffer) = buffer.decode::<VarInt>().ok()?;
        buffer.ensure_empty().ok()?;
        Some(Self {
            original_destination_connection_id,
            address: SocketAddr::new(ip, port),
            timestamp_ms: timestamp.as_u64(),
        })
    }

    /// Acceptance policy: fresh enough and presented from the same
    /// address the Retry was sent to
    pub fn is_valid_for(&self, peer: &SocketAddr, now_ms: u64) -> bool {
        let fresh = now_ms.saturating_sub(self.timestamp_ms) <= RETRY_TOKEN_MAX_AGE_MS;
        fresh && self.address == *peer
    }
}

/// Plaintext of a NEW_TOKEN token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewToken {
    pub ip: IpAddr,
    pub timestamp_ms: u64,
}

impl NewToken {
    pub fn seal(&self, cipher: &dyn Cipher) -> Vec<u8> {
        let mut staging = [0u8; 32];
        let mut encoder = EncoderBuffer::new(&mut staging);
        encoder.encode(&NEW_TOKEN_LABEL);
        encode_ip(&mut encoder, &self.ip);
        encoder.encode(&VarInt::new(self.timestamp_ms).unwrap_or(VarInt::MAX));
        let len = encoder.len();
        cipher.seal(&staging[..len])
    }

    pub fn open(cipher: &dyn Cipher, sealed: &[u8]) -> Option<Self> {
        let plaintext = cipher.open(sealed)?;
        let buffer = DecoderBuffer::new(&plaintext);
        let (label, buffer) = buffer.decode::<u8>().ok()?;
        if label != NEW_TOKEN_LABEL {
            return None;
        }
        let (ip, buffer) = decode_ip(buffer).ok()?;
        let (timestamp, buffer) = buffer.decode::<VarInt>().ok()?;
        buffer.ensure_empty().ok()?;
        Some(Self {
            ip,
            timestamp_ms: timestamp.as_u64(),
        })
    }

    /// NEW_TOKEN tokens bind to the IP only; ports churn across
    /// connections
    pub fn is_valid_for(&self, peer: &SocketAddr, now_ms: u64) -> bool {
        let fresh = now_ms.saturating_sub(self.timestamp_ms) <= NEW_TOKEN_MAX_AGE_MS;
        fresh && self.ip == peer.ip()
    }
}

/// Classifies and validates whatever token an Initial carried
pub fn validate(
    cipher: &dyn Cipher,
    sealed: &[u8],
    peer: &SocketAddr,
    now_ms: u64,
) -> Option<(Source, Option<ConnectionId>)> {
    if let Some(token) = RetryToken::open(cipher, sealed) {
        if token.is_valid_for(peer, now_ms) {
            return Some((
                Source::Retry,
                Some(token.original_destination_connection_id),
            ));
        }
        return None;
    }
    if let Some(token) = NewToken::open(cipher, sealed) {
        if token.is_valid_for(peer, now_ms) {
            return Some((Source::NewToken, None));
        }
    }
    None
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::Cipher;

    /// Prefixes a magic value instead of encrypting; tests only
    #[derive(Clone, Copy, Debug, Default)]
    pub struct Transparent;

    const MAGIC: &[u8] = b"weft-token";

    impl Cipher for Transparent {
        fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
            let mut sealed = MAGIC.to_vec();
            sealed.extend_from_slice(plaintext);
            sealed
        }

        fn open(&self, sealed: &[u8]) -> Option<Vec<u8>> {
            let payload = sealed.strip_prefix(MAGIC)?;
            Some(payload.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn retry_token_round_trip() {
        let cipher = testing::Transparent;
        let token = RetryToken {
            original_destination_connection_id: ConnectionId::try_from_slice(&[1; 8]).unwrap(),
            address: addr("192.0.2.7:4433"),
            timestamp_ms: 1_000_000,
        };
        let sealed = token.seal(&cipher);
        assert_eq!(RetryToken::open(&cipher, &sealed), Some(token.clone()));

        assert!(token.is_valid_for(&addr("192.0.2.7:4433"), 1_000_000 + 1000));
        // different port fails for retry tokens
        assert!(!token.is_valid_for(&addr("192.0.2.7:4434"), 1_000_000 + 1000));
        // stale
        assert!(!token.is_valid_for(
            &addr("192.0.2.7:4433"),
            1_000_000 + RETRY_TOKEN_MAX_AGE_MS + 1
        ));
    }

    #[test]
    fn new_token_binds_ip_only() {
        let cipher = testing::Transparent;
        let token = NewToken {
            ip: addr("[2001:db8::1]:1").ip(),
            timestamp_ms: 5_000,
        };
        let sealed = token.seal(&cipher);
        assert_eq!(NewToken::open(&cipher, &sealed), Some(token.clone()));
        assert!(token.is_valid_for(&addr("[2001:db8::1]:9999"), 10_000));
        assert!(!token.is_valid_for(&addr("[2001:db8::2]:1"), 10_000));
    }

    #[test]
    fn validate_classifies() {
        let cipher = testing::Transparent;
        let retry = RetryToken {
            original_destination_connection_id: ConnectionId::try_from_slice(&[2; 8]).unwrap(),
            address: addr("10.0.0.1:1"),
            timestamp_ms: 0,
        }
        .seal(&cipher);
        let (source, odcid) = validate(&cipher, &retry, &addr("10.0.0.1:1"), 100).unwrap();
        assert_eq!(source, Source::Retry);
        assert!(odcid.is_some());

        assert!(validate(&cipher, b"garbage", &addr("10.0.0.1:1"), 100).is_none());
    }
}
