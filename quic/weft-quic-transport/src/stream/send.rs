// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::buffer::{SendBuffer, Transmission};
use bytes::Bytes;
use weft_quic_core::{
    connection::error::OperationError,
    transmission::Interest,
    transport,
    varint::VarInt,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
//# Figure 2 shows the states for the part of a stream that sends data
//# to a peer.

/// Send-side stream states; `Open` covers Ready and Send from the
/// specification's finer-grained machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Open,
    /// All data and FIN handed to packets at least once
    DataSent,
    /// Everything through FIN acknowledged; terminal
    DataAcked,
    /// RESET_STREAM queued or in flight
    ResetSent,
    /// RESET_STREAM acknowledged; terminal
    ResetAcked,
}

impl SendState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DataAcked | Self::ResetAcked)
    }
}

/// The sending half of one stream
#[derive(Debug)]
pub struct SendStream {
    state: SendState,
    buffer: SendBuffer,
    /// The peer's current flow limit for this stream
    max_data: u64,
    /// Offset at which we last announced being blocked, to avoid
    /// repeating STREAM_DATA_BLOCKED for the same limit
    blocked_sent_at: Option<u64>,
    blocked_needs_transmit: bool,
    /// Pending or in-flight reset, with its final size
    reset: Option<(VarInt, u64)>,
    reset_needs_transmit: bool,
    /// Highest offset handed to a packet, exclusive; drives TX byte
    /// events
    largest_offset_txed: u64,
    /// Reliable-reset boundary when RESET_STREAM_AT is in use
    reliable_size: Option<u64>,
}

impl SendStream {
    pub fn new(max_data: u64) -> Self {
        Self {
            state: SendState::Open,
            buffer: SendBuffer::new(),
            max_data,
            blocked_sent_at: None,
            blocked_needs_transmit: false,
            reset: None,
            reset_needs_transmit: false,
            largest_offset_txed: 0,
            reliable_size: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SendState {
        self.state
    }

    #[inline]
    pub fn write_offset(&self) -> u64 {
        self.buffer.write_offset()
    }

    #[inline]
    pub fn largest_offset_txed(&self) -> u64 {
        self.largest_offset_txed
    }

    /// Largest offset with every byte at or below it acknowledged;
    /// drives ACK byte events
    pub fn largest_deliverable_offset(&self) -> Option<u64> {
        let intervals = self.buffer.acked_intervals();
        match intervals.intervals().next() {
            Some(range) if *range.start() == 0 => Some(*range.end()),
            _ => None,
        }
    }

    #[inline]
    pub fn acked_intervals(&self) -> &weft_quic_core::interval_set::IntervalSet {
        self.buffer.acked_intervals()
    }

    pub fn write(&mut self, data: Bytes) -> Result<u64, OperationError> {
        match self.state {
            SendState::Open => {
                if self.buffer.is_finished() {
                    return Err(OperationError::StreamClosed);
                }
                let offset = self.buffer.write_offset();
                self.buffer
                    .write(data)
                    .map_err(|_| OperationError::StreamClosed)?;
                Ok(offset)
            }
            _ => Err(OperationError::StreamClosed),
        }
    }

    pub fn finish(&mut self) -> Result<(), OperationError> {
        match self.state {
            SendState::Open => {
                self.buffer.finish();
                Ok(())
            }
            _ => Err(OperationError::StreamClosed),
        }
    }

    /// Abandons transmission with an application error
    pub fn reset(&mut self, error_code: VarInt) -> Result<(u64, VarInt), OperationError> {
        match self.state {
            SendState::Open | SendState::DataSent => {
                let final_size = self.buffer.write_offset();
                self.buffer.discard();
                self.reset = Some((error_code, final_size));
                self.reset_needs_transmit = true;
                self.state = SendState::ResetSent;
                Ok((final_size, error_code))
            }
            _ => Err(OperationError::StreamClosed),
        }
    }

    /// The peer asked us to stop; respond with a reset
    pub fn on_stop_sending(&mut self, error_code: VarInt) -> Option<(u64, VarInt)> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
        //# An endpoint that receives a STOP_SENDING frame MUST send a
        //# RESET_STREAM frame if the stream is in the "Ready" or "Send"
        //# state.
        self.reset(error_code).ok()
    }

    pub fn on_max_stream_data(&mut self, maximum: u64) {
        if maximum > self.max_data {
            self.max_data = maximum;
            self.blocked_sent_at = None;
            self.blocked_needs_transmit = false;
        }
    }

    #[inline]
    pub fn reset_frame(&self) -> Option<(VarInt, u64)> {
        self.reset
    }

    /// Flow-control head room for new data
    fn writable_by_flow(&self) -> u64 {
        // retransmissions are below the limit already
        self.max_data.saturating_sub(self.buffer_transmit_offset())
    }

    fn buffer_transmit_offset(&self) -> u64 {
        // first untransmitted new-data offset
        self.buffer.write_offset() - self.buffer.pending_len()
    }

    pub fn interest(&self) -> Interest {
        match self.state {
            SendState::ResetSent if self.reset_needs_transmit => Interest::NewData,
            SendState::ResetSent | SendState::ResetAcked | SendState::DataAcked => Interest::None,
            _ => {
                if self.buffer.has_lost() {
                    Interest::LostData
                } else if self.blocked_needs_transmit {
                    Interest::NewData
                } else if self.buffer.has_pending() {
                    if self.writable_by_flow() > 0 || self.buffer.pending_len() == 0 {
                        Interest::NewData
                    } else {
                        Interest::None
                    }
                } else {
                    Interest::None
                }
            }
        }
    }

    /// True when pending data exists but the peer's limit blocks it
    pub fn is_flow_blocked(&self) -> bool {
        matches!(self.state, SendState::Open | SendState::DataSent)
            && self.buffer.pending_len() > 0
            && self.writable_by_flow() == 0
    }

    /// Notes a blocked condition, returning the limit to announce if
    /// a STREAM_DATA_BLOCKED frame is due
    pub fn blocked_frame(&mut self) -> Option<u64> {
        if !self.is_flow_blocked() {
            return None;
        }
        if self.blocked_sent_at == Some(self.max_data) {
            return None;
        }
        self.blocked_sent_at = Some(self.max_data);
        self.blocked_needs_transmit = false;
        Some(self.max_data)
    }

    /// Takes the next chunk for a packet, respecting stream flow
    /// control and `connection_allowance` for new data
    pub fn next_transmission(
        &mut self,
        max_len: usize,
        connection_allowance: u64,
    ) -> Option<Transmission> {
        if !matches!(self.state, SendState::Open | SendState::DataSent) {
            return None;
        }

        // losses replay within already-granted limits
        let limit = if self.buffer.has_lost() {
            max_len
        } else {
            let flow = self.writable_by_flow().min(connection_allowance);
            max_len.min(flow as usize)
        };
        if limit == 0 && !self.buffer.has_lost() {
            // an empty FIN still fits
            if !(self.buffer.is_finished() && self.buffer.pending_len() == 0) {
                return None;
            }
        }

        let transmission = self.buffer.next_transmission(limit.max(1).min(max_len))?;
        let end = transmission.offset + transmission.data.len() as u64;
        self.largest_offset_txed = self.largest_offset_txed.max(end);

        if self.buffer.is_finished() && !self.buffer.has_pending() {
            self.state = SendState::DataSent;
        }
        Some(transmission)
    }

    pub fn on_frame_acked(&mut self, offset: u64, len: u64, is_fin: bool) {
        self.buffer.on_ack(offset, len, is_fin);
        if matches!(self.state, SendState::Open | SendState::DataSent)
            && self.buffer.is_fully_acked()
        {
            self.state = SendState::DataAcked;
        }
    }

    pub fn on_frame_lost(&mut self, offset: u64, len: u64, is_fin: bool) {
        if matches!(self.state, SendState::ResetSent | SendState::ResetAcked) {
            return;
        }
        self.buffer.on_loss(offset, len, is_fin);
        if self.buffer.has_lost() && self.state == SendState::DataSent {
            // FIN or data must be retransmitted before DataAcked
            self.state = SendState::Open;
        }
    }

    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetAcked;
        }
    }

    pub fn on_reset_lost(&mut self) {
        if self.state == SendState::ResetSent {
            self.reset_needs_transmit = true;
        }
    }

    /// The RESET_STREAM frame was placed in a packet
    pub fn on_reset_transmitted(&mut self) {
        self.reset_needs_transmit = false;
    }

    /// Limits a reliable reset: data below `reliable_size` still
    /// retransmits, the rest is abandoned
    pub fn reset_at(
        &mut self,
        error_code: VarInt,
        reliable_size: u64,
    ) -> Result<(u64, VarInt, u64), transport::Error> {
        let final_size = self.buffer.write_offset();
        if reliable_size > final_size {
            return Err(transport::Error::FINAL_SIZE_ERROR
                .with_reason("reliable size beyond final size"));
        }
        match self.reliable_size {
            Some(current) if reliable_size > current => {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("reliable size may only decrease"));
            }
            _ => {}
        }
        self.reliable_size = Some(reliable_size);
        self.reset = Some((error_code, final_size));
        self.reset_needs_transmit = true;
        self.state = SendState::ResetSent;
        Ok((final_size, error_code, reliable_size))
    }

    #[inline]
    pub fn reliable_size(&self) -> Option<u64> {
        self.reliable_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(limit: u64) -> SendStream {
        SendStream::new(limit)
    }

    #[test]
    fn open_to_data_acked() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"payload")).unwrap();
        stream.finish().unwrap();
        assert_eq!(stream.state(), SendState::Open);

        let transmission = stream.next_transmission(100, 1000).unwrap();
        assert!(transmission.is_fin);
        assert_eq!(stream.state(), SendState::DataSent);

        stream.on_frame_acked(0, 7, true);
        assert_eq!(stream.state(), SendState::DataAcked);
        assert!(stream.state().is_terminal());
    }

    #[test]
    fn reset_discards_and_reaches_reset_acked() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"abandoned")).unwrap();
        let (final_size, code) = stream.reset(VarInt::from_u8(7)).unwrap();
        assert_eq!(final_size, 9);
        assert_eq!(code, VarInt::from_u8(7));
        assert_eq!(stream.state(), SendState::ResetSent);
        assert!(stream.next_transmission(100, 1000).is_none());

        stream.on_reset_acked();
        assert_eq!(stream.state(), SendState::ResetAcked);
        // a second reset is an error
        assert!(stream.reset(VarInt::from_u8(8)).is_err());
    }

    #[test]
    fn flow_control_blocks_new_data() {
        let mut stream = stream(5);
        stream.write(Bytes::from_static(b"0123456789")).unwrap();

        let transmission = stream.next_transmission(100, 1000).unwrap();
        assert_eq!(transmission.data.len(), 5);
        assert!(stream.is_flow_blocked());
        assert!(stream.next_transmission(100, 1000).is_none());
        assert_eq!(stream.blocked_frame(), Some(5));
        // announced once per limit
        assert_eq!(stream.blocked_frame(), None);

        stream.on_max_stream_data(10);
        assert!(!stream.is_flow_blocked());
        let transmission = stream.next_transmission(100, 1000).unwrap();
        assert_eq!(transmission.offset, 5);
    }

    #[test]
    fn connection_allowance_limits_new_data() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"0123456789")).unwrap();
        let transmission = stream.next_transmission(100, 4).unwrap();
        assert_eq!(transmission.data.len(), 4);
    }

    #[test]
    fn loss_reopens_data_sent() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"xyz")).unwrap();
        stream.finish().unwrap();
        let sent = stream.next_transmission(100, 1000).unwrap();
        assert_eq!(stream.state(), SendState::DataSent);

        stream.on_frame_lost(sent.offset, sent.data.len() as u64, sent.is_fin);
        assert_eq!(stream.state(), SendState::Open);
        assert_eq!(stream.interest(), Interest::LostData);

        let repair = stream.next_transmission(100, 0).unwrap();
        assert!(repair.is_retransmission);
        stream.on_frame_acked(0, 3, true);
        assert_eq!(stream.state(), SendState::DataAcked);
    }

    #[test]
    fn deliverable_offset_tracks_contiguous_acks() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"hello")).unwrap();
        stream.write(Bytes::from_static(b"world")).unwrap();
        let first = stream.next_transmission(5, 1000).unwrap();
        let second = stream.next_transmission(5, 1000).unwrap();

        stream.on_frame_acked(second.offset, 5, false);
        assert_eq!(stream.largest_deliverable_offset(), None);
        stream.on_frame_acked(first.offset, 5, false);
        assert_eq!(stream.largest_deliverable_offset(), Some(9));
    }

    #[test]
    fn reset_at_validations() {
        let mut stream = stream(1000);
        stream.write(Bytes::from_static(b"abcdef")).unwrap();
        assert!(stream.reset_at(VarInt::from_u8(1), 7).is_err());
        let (final_size, _, reliable) = stream.reset_at(VarInt::from_u8(1), 3).unwrap();
        assert_eq!((final_size, reliable), (6, 3));
        // may only shrink
        assert!(stream.reset_at(VarInt::from_u8(1), 4).is_err());
        assert!(stream.reset_at(VarInt::from_u8(1), 2).is_ok());
    }
}
