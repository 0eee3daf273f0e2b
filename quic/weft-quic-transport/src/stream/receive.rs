// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::buffer::Reassembler;
use bytes::Bytes;
use weft_quic_core::{time::Timestamp, transport, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
//# Figure 3 shows the states for the part of a stream that receives
//# data from a peer.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiveState {
    Open,
    /// Final size known and all data delivered to the application
    DataRecvd,
    /// Peer reset the stream; delivery of the reset to the
    /// application is still owed
    ResetRecvd,
    /// Terminal
    Closed,
}

impl ReceiveState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// The receiving half of one stream
#[derive(Debug)]
pub struct ReceiveStream {
    state: ReceiveState,
    buffer: Reassembler,
    /// Highest absolute offset we have authorized the peer to send
    max_data: u64,
    /// Window we keep open ahead of the read offset
    window: u64,
    /// A MAX_STREAM_DATA update is owed
    window_update_pending: bool,
    /// Peer reset, queued for application delivery
    reset: Option<(VarInt, u64)>,
    /// STOP_SENDING we want transmitted
    stop_sending: Option<VarInt>,
    stop_sending_needs_transmit: bool,
    /// Head-of-line blocking accounting
    hol_count: u64,
    hol_since: Option<Timestamp>,
}

impl ReceiveStream {
    pub fn new(window: u64) -> Self {
        Self {
            state: ReceiveState::Open,
            buffer: Reassembler::new(),
            max_data: window,
            window,
            window_update_pending: false,
            reset: None,
            stop_sending: None,
            stop_sending_needs_transmit: false,
            hol_count: 0,
            hol_since: None,
        }
    }

    #[inline]
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    #[inline]
    pub fn max_received(&self) -> u64 {
        self.buffer.max_received()
    }

    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.buffer.read_offset()
    }

    #[inline]
    pub fn hol_block_count(&self) -> u64 {
        self.hol_count
    }

    /// Accepts a STREAM frame, returning the number of previously
    /// unseen bytes for connection-level flow accounting
    pub fn on_stream_frame(
        &mut self,
        offset: u64,
        data: &[u8],
        is_fin: bool,
        now: Timestamp,
    ) -> Result<u64, transport::Error> {
        match self.state {
            ReceiveState::Open => {}
            // late data after a reset or completion changes nothing
            _ => return Ok(0),
        }

        let end = offset + data.len() as u64;
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
        //# A receiver MUST close the connection with an error of type
        //# FLOW_CONTROL_ERROR if the sender violates the advertised connection
        //# or stream data limits
        if end > self.max_data {
            return Err(transport::Error::FLOW_CONTROL_ERROR
                .with_reason("stream flow control limit exceeded"));
        }

        let before = self.buffer.max_received();
        let was_blocked = self.buffer.is_hol_blocked();
        self.buffer.insert(offset, data, is_fin)?;
        if !was_blocked && self.buffer.is_hol_blocked() {
            self.hol_count += 1;
            self.hol_since = Some(now);
        } else if self.buffer.is_readable() {
            self.hol_since = None;
        }

        Ok(self.buffer.max_received().saturating_sub(before))
    }

    /// Accepts RESET_STREAM, returning newly accounted bytes
    pub fn on_reset(
        &mut self,
        error_code: VarInt,
        final_size: u64,
    ) -> Result<u64, transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# An endpoint MUST treat receipt of a RESET_STREAM frame carrying a
        //# final size smaller than the largest offset of data received as a
        //# connection error of type FINAL_SIZE_ERROR
        if final_size < self.buffer.max_received() {
            return Err(transport::Error::FINAL_SIZE_ERROR
                .with_reason("reset final size below received data"));
        }
        if let Some(known) = self.buffer.final_size() {
            if known != final_size {
                return Err(transport::Error::FINAL_SIZE_ERROR
                    .with_reason("reset final size conflicts with fin"));
            }
        }
        if final_size > self.max_data {
            return Err(transport::Error::FLOW_CONTROL_ERROR
                .with_reason("reset final size exceeds stream limit"));
        }

        let newly_accounted = final_size.saturating_sub(self.buffer.max_received());

        match self.state {
            ReceiveState::Open => {
                self.reset = Some((error_code, final_size));
                self.state = ReceiveState::ResetRecvd;
                self.buffer.discard();
            }
            _ => return Ok(0),
        }
        Ok(newly_accounted)
    }

    /// A reliable reset delivers the prefix first, then resets
    pub fn on_reset_at(
        &mut self,
        error_code: VarInt,
        final_size: u64,
        reliable_size: u64,
    ) -> Result<u64, transport::Error> {
        if reliable_size > final_size {
            return Err(transport::Error::FINAL_SIZE_ERROR
                .with_reason("reliable size beyond final size"));
        }
        if reliable_size <= self.buffer.read_offset() {
            // nothing left to deliver reliably
            return self.on_reset(error_code, final_size);
        }
        // keep reading until the reliable prefix is delivered; the
        // pending reset takes over afterwards
        if final_size < self.buffer.max_received() {
            return Err(transport::Error::FINAL_SIZE_ERROR
                .with_reason("reset final size below received data"));
        }
        let newly_accounted = final_size.saturating_sub(self.buffer.max_received());
        self.reset = Some((error_code, final_size));
        Ok(newly_accounted)
    }

    /// Pops readable data for the application
    pub fn pop(&mut self) -> Option<Bytes> {
        if self.state != ReceiveState::Open && self.reset.is_none() {
            return None;
        }
        let data = self.buffer.pop();
        if data.is_some() {
            self.maybe_queue_window_update();
        }
        if self.buffer.is_finished() && self.state == ReceiveState::Open {
            self.state = ReceiveState::DataRecvd;
        }
        // a pending reliable reset fires once the prefix is consumed
        if let Some((_, _)) = self.reset {
            if self.state == ReceiveState::Open && !self.buffer.is_readable() {
                self.state = ReceiveState::ResetRecvd;
                self.buffer.discard();
            }
        }
        data
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        matches!(self.state, ReceiveState::Open) && self.buffer.is_readable()
            || matches!(self.state, ReceiveState::ResetRecvd)
    }

    /// Whether the application reached the end: `Ok(fin)` or the reset
    pub fn end_state(&self) -> Option<Result<(), (VarInt, u64)>> {
        match self.state {
            ReceiveState::DataRecvd => Some(Ok(())),
            ReceiveState::ResetRecvd => self.reset.map(Err),
            _ => None,
        }
    }

    /// The application delivered EOF or the reset; the half may close
    pub fn on_delivered(&mut self) {
        if matches!(self.state, ReceiveState::DataRecvd | ReceiveState::ResetRecvd) {
            self.state = ReceiveState::Closed;
        }
    }

    /// Application requests the peer stop transmitting
    pub fn stop_sending(&mut self, error_code: VarInt) {
        if self.state == ReceiveState::Open && self.stop_sending.is_none() {
            self.stop_sending = Some(error_code);
            self.stop_sending_needs_transmit = true;
        }
    }

    pub fn stop_sending_frame(&mut self) -> Option<VarInt> {
        if self.stop_sending_needs_transmit {
            self.stop_sending_needs_transmit = false;
            self.stop_sending
        } else {
            None
        }
    }

    pub fn on_stop_sending_lost(&mut self) {
        if self.stop_sending.is_some() {
            self.stop_sending_needs_transmit = true;
        }
    }

    fn maybe_queue_window_update(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.2
        //# A receiver can use an autotuned window or simply advertise a
        //# larger limit whenever available capacity is consumed.
        let target = self.buffer.read_offset() + self.window;
        if self.buffer.final_size().is_some() {
            return;
        }
        // re-advertise once half the window is consumed
        if target.saturating_sub(self.max_data) >= self.window / 2 {
            self.window_update_pending = true;
        }
    }

    /// Takes the MAX_STREAM_DATA value to announce, when one is due
    pub fn window_update_frame(&mut self) -> Option<u64> {
        if !self.window_update_pending || self.state != ReceiveState::Open {
            self.window_update_pending = false;
            return None;
        }
        self.window_update_pending = false;
        self.max_data = self.buffer.read_offset() + self.window;
        Some(self.max_data)
    }

    /// A sent MAX_STREAM_DATA was lost; re-announce
    pub fn on_window_update_lost(&mut self) {
        if self.state == ReceiveState::Open {
            self.window_update_pending = true;
        }
    }

    #[inline]
    pub fn has_window_update(&self) -> bool {
        self.window_update_pending && self.state == ReceiveState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::time::{Clock, NoopClock};

    fn now() -> Timestamp {
        NoopClock.get_time()
    }

    #[test]
    fn open_to_data_recvd() {
        let mut stream = ReceiveStream::new(1000);
        assert_eq!(stream.on_stream_frame(0, b"hi", true, now()).unwrap(), 2);
        assert_eq!(&stream.pop().unwrap()[..], b"hi");
        assert_eq!(stream.state(), ReceiveState::DataRecvd);
        assert_eq!(stream.end_state(), Some(Ok(())));
        stream.on_delivered();
        assert!(stream.state().is_terminal());
    }

    #[test]
    fn flow_violation_detected() {
        let mut stream = ReceiveStream::new(4);
        let error = stream
            .on_stream_frame(0, b"too big", false, now())
            .unwrap_err();
        assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR.code);
    }

    #[test]
    fn reset_supersedes_data() {
        let mut stream = ReceiveStream::new(1000);
        stream.on_stream_frame(0, b"abc", false, now()).unwrap();
        let newly = stream.on_reset(VarInt::from_u8(9), 10).unwrap();
        assert_eq!(newly, 7);
        assert_eq!(stream.state(), ReceiveState::ResetRecvd);
        assert_eq!(
            stream.end_state(),
            Some(Err((VarInt::from_u8(9), 10)))
        );
    }

    #[test]
    fn reset_final_size_rules() {
        let mut stream = ReceiveStream::new(1000);
        stream.on_stream_frame(5, b"world", false, now()).unwrap();
        // final size below max received
        assert!(stream.on_reset(VarInt::ZERO, 4).is_err());

        let mut stream = ReceiveStream::new(1000);
        stream.on_stream_frame(0, b"ab", true, now()).unwrap();
        // conflicting final size
        assert!(stream.on_reset(VarInt::ZERO, 5).is_err());
    }

    #[test]
    fn window_updates_follow_reads() {
        let mut stream = ReceiveStream::new(10);
        stream.on_stream_frame(0, b"0123456789", false, now()).unwrap();
        assert!(!stream.has_window_update());
        let _ = stream.pop().unwrap();
        assert!(stream.has_window_update());
        assert_eq!(stream.window_update_frame(), Some(20));
        assert!(!stream.has_window_update());
    }

    #[test]
    fn reliable_reset_delivers_prefix() {
        let mut stream = ReceiveStream::new(1000);
        stream.on_stream_frame(0, b"abcdef", false, now()).unwrap();
        stream.on_reset_at(VarInt::from_u8(1), 6, 3).unwrap();
        // prefix still readable
        assert_eq!(stream.state(), ReceiveState::Open);
        assert_eq!(&stream.pop().unwrap()[..], b"abcdef");
        // after consuming, the reset lands
        assert!(stream.pop().is_none());
        assert_eq!(stream.state(), ReceiveState::ResetRecvd);
    }

    #[test]
    fn hol_blocking_counted() {
        let mut stream = ReceiveStream::new(1000);
        stream.on_stream_frame(5, b"later", false, now()).unwrap();
        assert_eq!(stream.hol_block_count(), 1);
        stream.on_stream_frame(0, b"first", false, now()).unwrap();
        assert_eq!(stream.hol_block_count(), 1);
    }
}
