// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Key material per encryption level and the 1-RTT key-phase machine.

use weft_quic_core::{
    crypto::{EncryptionLevel, LevelKeys},
    packet::key_phase::KeyPhase,
};

/// Installed ciphers for every encryption level
#[derive(Debug, Default)]
pub struct CryptoState {
    initial_rx: Option<LevelKeys>,
    initial_tx: Option<LevelKeys>,
    handshake_rx: Option<LevelKeys>,
    handshake_tx: Option<LevelKeys>,
    zero_rtt_rx: Option<LevelKeys>,
    zero_rtt_tx: Option<LevelKeys>,
    one_rtt_rx: Option<LevelKeys>,
    one_rtt_tx: Option<LevelKeys>,
    pub one_rtt: OneRttPhase,
}

impl CryptoState {
    pub fn install_read(&mut self, level: EncryptionLevel, keys: LevelKeys) {
        *self.read_slot(level) = Some(keys);
    }

    pub fn install_write(&mut self, level: EncryptionLevel, keys: LevelKeys) {
        *self.write_slot(level) = Some(keys);
    }

    fn read_slot(&mut self, level: EncryptionLevel) -> &mut Option<LevelKeys> {
        match level {
            EncryptionLevel::Initial => &mut self.initial_rx,
            EncryptionLevel::Handshake => &mut self.handshake_rx,
            EncryptionLevel::ZeroRtt => &mut self.zero_rtt_rx,
            EncryptionLevel::OneRtt => &mut self.one_rtt_rx,
        }
    }

    fn write_slot(&mut self, level: EncryptionLevel) -> &mut Option<LevelKeys> {
        match level {
            EncryptionLevel::Initial => &mut self.initial_tx,
            EncryptionLevel::Handshake => &mut self.handshake_tx,
            EncryptionLevel::ZeroRtt => &mut self.zero_rtt_tx,
            EncryptionLevel::OneRtt => &mut self.one_rtt_tx,
        }
    }

    pub fn read_keys(&self, level: EncryptionLevel) -> Option<&LevelKeys> {
        match level {
            EncryptionLevel::Initial => self.initial_rx.as_ref(),
            EncryptionLevel::Handshake => self.handshake_rx.as_ref(),
            EncryptionLevel::ZeroRtt => self.zero_rtt_rx.as_ref(),
            EncryptionLevel::OneRtt => self.one_rtt_rx.as_ref(),
        }
    }

    pub fn write_keys(&self, level: EncryptionLevel) -> Option<&LevelKeys> {
        match level {
            EncryptionLevel::Initial => self.initial_tx.as_ref(),
            EncryptionLevel::Handshake => self.handshake_tx.as_ref(),
            EncryptionLevel::ZeroRtt => self.zero_rtt_tx.as_ref(),
            EncryptionLevel::OneRtt => self.one_rtt_tx.as_ref(),
        }
    }

    /// Previous-phase read keys, retained briefly across a key update
    pub fn previous_read_keys(&self) -> Option<&LevelKeys> {
        self.one_rtt.previous_read.as_ref()
    }

    /// Discards a handshake-era level entirely
    pub fn discard(&mut self, level: EncryptionLevel) {
        debug_assert!(!matches!(level, EncryptionLevel::OneRtt));
        *self.read_slot(level) = None;
        *self.write_slot(level) = None;
    }

    /// Rotates the 1-RTT keys: `write`/`read` become current, the old
    /// read keys stay available for out-of-order previous-phase packets
    pub fn rotate_one_rtt(&mut self, write: LevelKeys, read: LevelKeys) {
        self.one_rtt.previous_read = self.one_rtt_rx.take();
        self.one_rtt_rx = Some(read);
        self.one_rtt_tx = Some(write);
        self.one_rtt.write_phase = self.one_rtt.write_phase.next();
        self.one_rtt.packets_sent_in_current_phase = 0;
        self.one_rtt.pending_verification_packet_number = None;
        self.one_rtt.awaiting_first_send = true;
    }
}

/// The 1-RTT key-phase state machine
#[derive(Debug, Default)]
pub struct OneRttPhase {
    pub write_phase: KeyPhase,
    pub packets_sent_in_current_phase: u64,
    /// First packet number sent in the new phase; an ACK of it (or
    /// anything later) arriving under the previous phase is fatal
    pub pending_verification_packet_number: Option<u64>,
    /// Set between rotation and the first packet sent in the new phase
    pub awaiting_first_send: bool,
    pub previous_read: Option<LevelKeys>,
}

impl OneRttPhase {
    /// Records a 1-RTT transmission, capturing the verification anchor
    pub fn on_packet_sent(&mut self, packet_number: u64) {
        self.packets_sent_in_current_phase += 1;
        if self.awaiting_first_send {
            self.awaiting_first_send = false;
            self.pending_verification_packet_number = Some(packet_number);
        }
    }

    /// The peer acknowledged a new-phase packet under the new phase
    pub fn on_update_verified(&mut self) {
        self.pending_verification_packet_number = None;
        self.previous_read = None;
    }

    #[inline]
    pub fn is_update_pending(&self) -> bool {
        self.pending_verification_packet_number.is_some() || self.awaiting_first_send
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::crypto::testing::null_level_keys;

    #[test]
    fn rotation_alternates_phases() {
        let mut state = CryptoState::default();
        state.install_read(EncryptionLevel::OneRtt, null_level_keys());
        state.install_write(EncryptionLevel::OneRtt, null_level_keys());
        assert_eq!(state.one_rtt.write_phase, KeyPhase::Zero);

        state.rotate_one_rtt(null_level_keys(), null_level_keys());
        assert_eq!(state.one_rtt.write_phase, KeyPhase::One);
        assert!(state.previous_read_keys().is_some());
        assert_eq!(state.one_rtt.packets_sent_in_current_phase, 0);

        state.rotate_one_rtt(null_level_keys(), null_level_keys());
        assert_eq!(state.one_rtt.write_phase, KeyPhase::Zero);
    }

    #[test]
    fn verification_anchor_is_first_new_phase_packet() {
        let mut phase = OneRttPhase {
            awaiting_first_send: true,
            ..Default::default()
        };
        phase.on_packet_sent(17);
        assert_eq!(phase.pending_verification_packet_number, Some(17));
        phase.on_packet_sent(18);
        assert_eq!(phase.pending_verification_packet_number, Some(17));

        phase.on_update_verified();
        assert!(!phase.is_update_pending());
    }
}
