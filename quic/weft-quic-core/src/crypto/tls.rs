// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The boundary to the TLS 1.3 handshake engine.
//!
//! The engine is opaque: the transport feeds it CRYPTO stream bytes
//! per encryption level, drains the bytes it wants transmitted, and
//! takes key material as it becomes available. Negotiated transport
//! parameters and session tickets cross this boundary as opaque blobs.

use crate::{
    crypto::{EncryptionLevel, LevelKeys},
    transport,
};
use bytes::Bytes;

/// Key material surfaced by the engine for one encryption level
#[derive(Debug)]
pub struct KeyUpdate {
    pub level: EncryptionLevel,
    pub read: Option<LevelKeys>,
    pub write: Option<LevelKeys>,
}

/// The TLS 1.3 handshake engine driven by the connection.
///
/// All methods are non-blocking; the engine buffers internally and
/// the connection polls after every ingestion pass.
pub trait Session: 'static + Send {
    /// Feeds CRYPTO frame bytes received at `level`, in stream order
    fn on_crypto_data(&mut self, level: EncryptionLevel, data: &[u8])
        -> Result<(), transport::Error>;

    /// Drains bytes the engine wants transmitted at `level`
    fn produce_crypto_data(&mut self, level: EncryptionLevel) -> Option<Bytes>;

    /// Takes the next pending key installation, if any
    fn take_key_update(&mut self) -> Option<KeyUpdate>;

    /// The peer's transport parameter extension body, once the engine
    /// has authenticated it
    fn peer_transport_parameters(&mut self) -> Option<Bytes>;

    /// True once the TLS handshake has completed
    fn is_handshake_complete(&self) -> bool;

    /// Derives the key pair for the next 1-RTT key phase.
    ///
    /// Returns `(write, read)` keys; callable repeatedly, once per
    /// key update.
    fn derive_next_one_rtt_keys(&mut self) -> Result<(LevelKeys, LevelKeys), transport::Error>;

    /// Verifies the integrity tag of a Retry packet against the
    /// original destination connection id
    fn verify_retry_integrity(
        &self,
        pseudo_packet: &[u8],
        tag: &[u8; 16],
    ) -> Result<(), transport::Error>;

    /// An opaque resumption blob (session ticket plus cached
    /// transport parameters), when the engine has produced one
    fn take_application_token(&mut self) -> Option<Bytes> {
        None
    }
}
