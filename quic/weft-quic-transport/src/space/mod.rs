// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-packet-number-space state: outgoing packet numbers, the
//! received-packet ACK state, and the handshake's crypto stream.

mod ack_manager;
mod crypto_stream;
mod tx_packet_numbers;

pub use ack_manager::AckManager;
pub use crypto_stream::{CryptoStream, MAX_BUFFERED_CRYPTO_BYTES};
pub use tx_packet_numbers::TxPacketNumbers;

use crate::recovery;
use weft_quic_core::packet::number::PacketNumberSpace;

/// Everything a packet-number space owns
#[derive(Debug)]
pub struct PacketSpace {
    pub space: PacketNumberSpace,
    pub tx: TxPacketNumbers,
    pub ack_manager: AckManager,
    pub recovery: recovery::Manager,
    pub crypto_stream: CryptoStream,
    /// Set once the space's keys are discarded; nothing further may
    /// be sent or accepted here
    pub is_discarded: bool,
    /// A PTO probe is owed; carries its clone-group identifier
    pub probe_pending: Option<u64>,
}

impl PacketSpace {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            tx: TxPacketNumbers::new(space),
            ack_manager: AckManager::new(space),
            recovery: recovery::Manager::new(space),
            crypto_stream: CryptoStream::new(),
            is_discarded: false,
            probe_pending: None,
        }
    }
}
