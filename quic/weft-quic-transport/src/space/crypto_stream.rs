// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::buffer::{Reassembler, SendBuffer, Transmission};
use bytes::Bytes;
use weft_quic_core::{transmission::Interest, transport};

//= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
//# Endpoints MUST support buffering at least 4096 bytes of data
//# received in out-of-order CRYPTO frames.
pub const MAX_BUFFERED_CRYPTO_BYTES: usize = 64 * 1024;

/// The handshake byte stream of one encryption level.
///
/// A plain stream without ids, flow control, or FIN; it exists until
/// the level's keys are discarded.
#[derive(Debug, Default)]
pub struct CryptoStream {
    tx: SendBuffer,
    rx: Reassembler,
}

impl CryptoStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues handshake bytes produced by the TLS engine
    pub fn write(&mut self, data: Bytes) {
        // the crypto stream never finishes, so writes cannot fail
        let _ = self.tx.write(data);
    }

    pub fn interest(&self) -> Interest {
        if self.tx.has_lost() {
            Interest::LostData
        } else if self.tx.has_pending() {
            Interest::NewData
        } else {
            Interest::None
        }
    }

    pub fn next_transmission(&mut self, max_len: usize) -> Option<Transmission> {
        self.tx.next_transmission(max_len)
    }

    pub fn on_frame_acked(&mut self, offset: u64, len: u64) {
        self.tx.on_ack(offset, len, false);
    }

    pub fn on_frame_lost(&mut self, offset: u64, len: u64) {
        self.tx.on_loss(offset, len, false);
    }

    /// Accepts a received CRYPTO frame
    pub fn on_crypto_frame(&mut self, offset: u64, data: &[u8]) -> Result<(), transport::Error> {
        if offset + data.len() as u64
            > self.rx.read_offset() + MAX_BUFFERED_CRYPTO_BYTES as u64
        {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
            //# If an endpoint does not expand its buffer, it MUST close the
            //# connection with a CRYPTO_BUFFER_EXCEEDED error code.
            return Err(transport::Error::CRYPTO_BUFFER_EXCEEDED);
        }
        self.rx.insert(offset, data, false)
    }

    /// Drains contiguous handshake bytes for the TLS engine
    pub fn pop_received(&mut self) -> Option<Bytes> {
        self.rx.pop()
    }

    /// On handshake confirmation the retransmission state of the
    /// discarded levels is implicitly acknowledged
    pub fn discard(&mut self) {
        self.tx.discard();
        self.rx.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_transmit_ack_cycle() {
        let mut stream = CryptoStream::new();
        stream.write(Bytes::from_static(b"client hello"));
        assert_eq!(stream.interest(), Interest::NewData);

        let transmission = stream.next_transmission(1000).unwrap();
        assert_eq!(transmission.offset, 0);
        assert_eq!(stream.interest(), Interest::None);

        stream.on_frame_lost(0, transmission.data.len() as u64);
        assert_eq!(stream.interest(), Interest::LostData);

        let repair = stream.next_transmission(1000).unwrap();
        assert!(repair.is_retransmission);
        stream.on_frame_acked(0, repair.data.len() as u64);
        assert_eq!(stream.interest(), Interest::None);
    }

    #[test]
    fn rx_buffer_bound() {
        let mut stream = CryptoStream::new();
        let error = stream
            .on_crypto_frame(MAX_BUFFERED_CRYPTO_BYTES as u64, b"x")
            .unwrap_err();
        assert_eq!(error.code, transport::Error::CRYPTO_BUFFER_EXCEEDED.code);
    }
}
