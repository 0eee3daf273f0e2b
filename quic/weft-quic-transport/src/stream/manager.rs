// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::{
    buffer::Transmission, ByteEvent, ByteEventKind, ReceiveState, SendState, Stream,
};
use bytes::Bytes;
use hashbrown::HashMap;
use std::collections::BTreeSet;
use weft_quic_core::{
    connection::error::OperationError,
    endpoint,
    stream::{StreamId, StreamType},
    time::Timestamp,
    transmission::Interest,
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};

/// Events the manager surfaces for the application, drained by the
/// connection into its pending-events bag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Readable(StreamId),
    /// End of stream delivered in order
    Finished(StreamId),
    /// Peer reset: (error code, final size)
    Reset(StreamId, VarInt, u64),
    /// Peer asked us to stop sending
    StopSending(StreamId, VarInt),
    ByteEvent(StreamId, ByteEvent),
    ByteEventCanceled(StreamId, ByteEvent),
    /// A previously blocked open may now succeed
    StreamsAvailable(StreamType),
}

fn type_index(stream_type: StreamType) -> usize {
    match stream_type {
        StreamType::Bidirectional => 0,
        StreamType::Unidirectional => 1,
    }
}

/// Per-direction initial flow limits from the peer's parameters
#[derive(Clone, Copy, Debug, Default)]
struct InitialLimits {
    send_bidi_local_opened: u64,
    send_bidi_peer_opened: u64,
    send_uni: u64,
    receive_window_bidi: u64,
    receive_window_uni: u64,
}

/// Owns every stream of a connection and the stream-id windows.
///
/// Streams are addressed by id everywhere; nothing outside the
/// manager holds a stream reference.
#[derive(Debug)]
pub struct StreamManager {
    local: endpoint::Type,
    streams: HashMap<StreamId, Stream>,
    /// Streams with transmission interest
    write_interest: BTreeSet<StreamId>,
    /// Streams with loss-buffer repairs due; served before new data
    loss_interest: BTreeSet<StreamId>,
    /// Next ordinal we will open, per type
    next_local_ordinal: [u64; 2],
    /// How many streams of each type the peer allows us
    peer_max_streams: [u64; 2],
    /// How many streams of each type we allow the peer
    local_max_streams: [u64; 2],
    /// Highest peer-opened ordinal, per type
    peer_highest_opened: [Option<u64>; 2],
    /// MAX_STREAMS announcements owed
    max_streams_pending: [bool; 2],
    /// STREAMS_BLOCKED announcements owed, with the blocking limit
    streams_blocked_pending: [Option<u64>; 2],
    limits: InitialLimits,
    stream_groups_enabled: bool,
    events: Vec<StreamEvent>,
}

impl StreamManager {
    pub fn new(
        local: endpoint::Type,
        local_max_streams_bidi: u64,
        local_max_streams_uni: u64,
        local_receive_window_bidi: u64,
        local_receive_window_uni: u64,
    ) -> Self {
        Self {
            local,
            streams: HashMap::new(),
            write_interest: BTreeSet::new(),
            loss_interest: BTreeSet::new(),
            next_local_ordinal: [0; 2],
            peer_max_streams: [0; 2],
            local_max_streams: [local_max_streams_bidi, local_max_streams_uni],
            peer_highest_opened: [None; 2],
            max_streams_pending: [false; 2],
            streams_blocked_pending: [None; 2],
            limits: InitialLimits {
                receive_window_bidi: local_receive_window_bidi,
                receive_window_uni: local_receive_window_uni,
                ..Default::default()
            },
            stream_groups_enabled: false,
            events: Vec::new(),
        }
    }

    /// Applies the peer's transport parameters once they arrive
    pub fn on_peer_parameters(&mut self, peer: &TransportParameters) {
        self.peer_max_streams = [
            peer.initial_max_streams_bidi.as_u64(),
            peer.initial_max_streams_uni.as_u64(),
        ];
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# initial_max_stream_data_bidi_local (0x0005):  This parameter is an
        //# integer value specifying the initial flow control limit for
        //# locally initiated bidirectional streams.
        //
        // "local" is relative to the parameter's sender, so it governs
        // our sending on streams the peer opened
        self.limits.send_bidi_peer_opened = peer.initial_max_stream_data_bidi_local.as_u64();
        self.limits.send_bidi_local_opened = peer.initial_max_stream_data_bidi_remote.as_u64();
        self.limits.send_uni = peer.initial_max_stream_data_uni.as_u64();
        self.stream_groups_enabled = peer.stream_groups_enabled.is_some();

        // limits raised retroactively for streams created before the
        // handshake finished (0-RTT)
        for (id, stream) in self.streams.iter_mut() {
            if let Some(send) = stream.send.as_mut() {
                send.on_max_stream_data(initial_send_limit(&self.limits, *id, self.local));
            }
        }
    }

    #[inline]
    pub fn stream_groups_enabled(&self) -> bool {
        self.stream_groups_enabled
    }

    #[inline]
    pub fn take_events(&mut self) -> Vec<StreamEvent> {
        core::mem::take(&mut self.events)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[inline]
    pub fn get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.streams.get_mut(&id)
    }

    /// Opens a locally-initiated stream within the peer's window
    pub fn open(
        &mut self,
        stream_type: StreamType,
        group_id: Option<VarInt>,
    ) -> Result<StreamId, OperationError> {
        if group_id.is_some() && !self.stream_groups_enabled {
            return Err(OperationError::InvalidOperation);
        }
        let index = type_index(stream_type);
        let ordinal = self.next_local_ordinal[index];
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint MUST NOT open more streams than permitted by the
        //# current stream limit set by its peer.
        if ordinal >= self.peer_max_streams[index] {
            self.streams_blocked_pending[index] = Some(self.peer_max_streams[index]);
            return Err(OperationError::StreamLimitReached);
        }
        let id = StreamId::nth(self.local, stream_type, ordinal)
            .ok_or(OperationError::InvalidOperation)?;
        self.next_local_ordinal[index] += 1;

        let send_limit = initial_send_limit(&self.limits, id, self.local);
        let receive_window = initial_receive_window(&self.limits, stream_type);
        self.streams.insert(
            id,
            Stream::new(id, self.local, send_limit, receive_window, group_id),
        );
        Ok(id)
    }

    /// Resolves a stream referenced by a received frame, creating
    /// remote streams lazily within the advertised window
    fn get_or_create(
        &mut self,
        id: StreamId,
        for_receiving: bool,
    ) -> Result<&mut Stream, transport::Error> {
        if self.streams.contains_key(&id) {
            return Ok(self.streams.get_mut(&id).expect("checked above"));
        }

        let is_local = id.initiator() == self.local;
        if is_local {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
            //# An endpoint MUST terminate the connection with error
            //# STREAM_STATE_ERROR if it receives a STREAM frame for a locally
            //# initiated stream that has not yet been created
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("frame for an unopened local stream"));
        }
        if for_receiving && !id.is_readable(self.local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("data on a send-only stream"));
        }

        let index = type_index(id.stream_type());
        let ordinal = id.ordinal();
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# Endpoints MUST NOT exceed the limit set by their peer.  An endpoint
        //# that receives a frame with a stream ID exceeding the limit it has
        //# sent MUST treat this as a connection error of type
        //# STREAM_LIMIT_ERROR
        if ordinal >= self.local_max_streams[index] {
            return Err(transport::Error::STREAM_LIMIT_ERROR);
        }

        // opening a stream opens every lower-numbered stream of its type
        let first_new = self.peer_highest_opened[index].map_or(0, |highest| highest + 1);
        for new_ordinal in first_new..=ordinal {
            let new_id = StreamId::nth(self.local.peer_type(), id.stream_type(), new_ordinal)
                .ok_or(transport::Error::STREAM_LIMIT_ERROR)?;
            let send_limit = initial_send_limit(&self.limits, new_id, self.local);
            let receive_window = initial_receive_window(&self.limits, id.stream_type());
            self.streams.insert(
                new_id,
                Stream::new(new_id, self.local, send_limit, receive_window, None),
            );
        }
        self.peer_highest_opened[index] = Some(ordinal);

        Ok(self.streams.get_mut(&id).expect("created above"))
    }

    /// Dispatches a received STREAM frame; returns newly accounted
    /// bytes for connection flow control
    pub fn on_stream_frame(
        &mut self,
        id: StreamId,
        group_id: Option<VarInt>,
        offset: u64,
        data: &[u8],
        is_fin: bool,
        now: Timestamp,
    ) -> Result<u64, transport::Error> {
        if group_id.is_some() && !self.stream_groups_enabled {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("stream groups were not negotiated"));
        }
        let stream = self.get_or_create(id, true)?;
        if stream.group_id.is_none() {
            stream.group_id = group_id;
        }
        let receive = stream
            .receive
            .as_mut()
            .ok_or(transport::Error::STREAM_STATE_ERROR)?;
        let newly = receive.on_stream_frame(offset, data, is_fin, now)?;
        if receive.is_readable() {
            self.events.push(StreamEvent::Readable(id));
        }
        Ok(newly)
    }

    pub fn on_reset_stream(
        &mut self,
        id: StreamId,
        error_code: VarInt,
        final_size: u64,
        reliable_size: Option<u64>,
    ) -> Result<u64, transport::Error> {
        let stream = self.get_or_create(id, true)?;
        let receive = stream
            .receive
            .as_mut()
            .ok_or(transport::Error::STREAM_STATE_ERROR)?;
        let newly = match reliable_size {
            Some(reliable_size) => receive.on_reset_at(error_code, final_size, reliable_size)?,
            None => receive.on_reset(error_code, final_size)?,
        };
        if receive.state() == ReceiveState::ResetRecvd {
            self.events
                .push(StreamEvent::Reset(id, error_code, final_size));
            self.cancel_byte_events(id);
        }
        Ok(newly)
    }

    pub fn on_stop_sending(
        &mut self,
        id: StreamId,
        error_code: VarInt,
    ) -> Result<Option<(u64, VarInt)>, transport::Error> {
        let local = self.local;
        let stream = self.get_or_create(id, false)?;
        if !id.is_writable(local) {
            return Err(transport::Error::STREAM_STATE_ERROR
                .with_reason("stop_sending on a receive-only stream"));
        }
        let Some(send) = stream.send.as_mut() else {
            return Ok(None);
        };
        let reset = send.on_stop_sending(error_code);
        self.events.push(StreamEvent::StopSending(id, error_code));
        if reset.is_some() {
            self.write_interest.insert(id);
        }
        Ok(reset)
    }

    pub fn on_max_stream_data(
        &mut self,
        id: StreamId,
        maximum: u64,
    ) -> Result<(), transport::Error> {
        let stream = self.get_or_create(id, false)?;
        if let Some(send) = stream.send.as_mut() {
            send.on_max_stream_data(maximum);
            if send.interest() != Interest::None {
                self.write_interest.insert(id);
            }
        }
        Ok(())
    }

    pub fn on_max_streams(&mut self, stream_type: StreamType, maximum: u64) {
        let index = type_index(stream_type);
        if maximum > self.peer_max_streams[index] {
            let was_blocked = self.next_local_ordinal[index] >= self.peer_max_streams[index];
            self.peer_max_streams[index] = maximum;
            if was_blocked {
                self.events.push(StreamEvent::StreamsAvailable(stream_type));
            }
        }
    }

    /// Application write path
    pub fn write(
        &mut self,
        id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<u64, OperationError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(OperationError::StreamNotExists)?;
        let send = stream.send.as_mut().ok_or(OperationError::InvalidOperation)?;
        let offset = send.write(data)?;
        if fin {
            send.finish()?;
        }
        self.write_interest.insert(id);
        Ok(offset)
    }

    pub fn finish(&mut self, id: StreamId) -> Result<(), OperationError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(OperationError::StreamNotExists)?;
        let send = stream.send.as_mut().ok_or(OperationError::InvalidOperation)?;
        send.finish()?;
        self.write_interest.insert(id);
        Ok(())
    }

    pub fn reset(&mut self, id: StreamId, error_code: VarInt) -> Result<(), OperationError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(OperationError::StreamNotExists)?;
        let send = stream.send.as_mut().ok_or(OperationError::InvalidOperation)?;
        send.reset(error_code)?;
        self.cancel_byte_events(id);
        self.write_interest.insert(id);
        Ok(())
    }

    pub fn stop_sending(&mut self, id: StreamId, error_code: VarInt) -> Result<(), OperationError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(OperationError::StreamNotExists)?;
        let receive = stream
            .receive
            .as_mut()
            .ok_or(OperationError::InvalidOperation)?;
        receive.stop_sending(error_code);
        self.write_interest.insert(id);
        Ok(())
    }

    /// Application read path
    pub fn read(&mut self, id: StreamId) -> Result<Option<Bytes>, OperationError> {
        let (data, end_state, has_window_update) = {
            let stream = self
                .streams
                .get_mut(&id)
                .ok_or(OperationError::StreamNotExists)?;
            let receive = stream
                .receive
                .as_mut()
                .ok_or(OperationError::InvalidOperation)?;
            let data = receive.pop();
            let end_state = if data.is_none() {
                let end_state = receive.end_state();
                if end_state.is_some() {
                    receive.on_delivered();
                }
                end_state
            } else {
                None
            };
            (data, end_state, receive.has_window_update())
        };

        match end_state {
            Some(Ok(())) => {
                self.events.push(StreamEvent::Finished(id));
                self.note_remote_closure(id);
            }
            Some(Err(_)) => self.note_remote_closure(id),
            None => {}
        }
        if has_window_update && self.streams.contains_key(&id) {
            self.write_interest.insert(id);
        }
        Ok(data)
    }

    pub fn register_byte_event(
        &mut self,
        id: StreamId,
        kind: ByteEventKind,
        offset: u64,
        token: u64,
    ) -> Result<bool, OperationError> {
        let stream = self
            .streams
            .get_mut(&id)
            .ok_or(OperationError::StreamNotExists)?;
        let send = stream.send.as_ref().ok_or(OperationError::InvalidOperation)?;

        // already satisfied: deliver on the next tick without storing
        let already_met = match kind {
            ByteEventKind::Tx => send.largest_offset_txed() > offset,
            ByteEventKind::Ack => send
                .largest_deliverable_offset()
                .map_or(false, |delivered| delivered >= offset),
        };
        if already_met {
            self.events.push(StreamEvent::ByteEvent(
                id,
                ByteEvent {
                    kind,
                    offset,
                    token,
                },
            ));
            return Ok(true);
        }
        stream.byte_events.register(kind, offset, token)?;
        Ok(false)
    }

    fn flush_byte_events(&mut self, id: StreamId) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        let Some(send) = stream.send.as_ref() else {
            return;
        };
        let tx_watermark = send.largest_offset_txed().saturating_sub(1);
        let mut ready = if send.largest_offset_txed() > 0 {
            stream.byte_events.take_ready(ByteEventKind::Tx, tx_watermark)
        } else {
            Vec::new()
        };
        if let Some(delivered) = send.largest_deliverable_offset() {
            ready.extend(stream.byte_events.take_ready(ByteEventKind::Ack, delivered));
        }
        self.events
            .extend(ready.into_iter().map(|event| StreamEvent::ByteEvent(id, event)));
    }

    fn cancel_byte_events(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            let canceled = stream.byte_events.cancel_all();
            self.events.extend(
                canceled
                    .into_iter()
                    .map(|event| StreamEvent::ByteEventCanceled(id, event)),
            );
        }
    }

    /// Serves the next stream transmission, loss repairs first
    pub fn next_transmission(
        &mut self,
        max_len: usize,
        connection_allowance: u64,
    ) -> Option<(StreamId, Option<VarInt>, Transmission)> {
        let candidates: Vec<StreamId> = self
            .loss_interest
            .iter()
            .chain(self.write_interest.iter())
            .copied()
            .collect();

        for id in candidates {
            let Some(stream) = self.streams.get_mut(&id) else {
                self.loss_interest.remove(&id);
                self.write_interest.remove(&id);
                continue;
            };
            let group_id = stream.group_id;
            if let Some(send) = stream.send.as_mut() {
                if let Some(transmission) = send.next_transmission(max_len, connection_allowance) {
                    if send.interest() == Interest::None {
                        self.write_interest.remove(&id);
                        self.loss_interest.remove(&id);
                    }
                    self.flush_byte_events(id);
                    return Some((id, group_id, transmission));
                }
            }
            // nothing to send right now
            self.loss_interest.remove(&id);
            self.write_interest.remove(&id);
        }
        None
    }

    /// Aggregate transmission interest over all streams and window
    /// machinery
    pub fn interest(&self) -> Interest {
        let mut interest = Interest::None;
        if !self.loss_interest.is_empty() {
            interest = interest.merge(Interest::LostData);
        }
        for id in &self.write_interest {
            if let Some(stream) = self.streams.get(id) {
                if let Some(send) = &stream.send {
                    interest = interest.merge(send.interest());
                }
            }
        }
        if self.max_streams_pending.iter().any(|pending| *pending)
            || self.streams_blocked_pending.iter().any(|p| p.is_some())
        {
            interest = interest.merge(Interest::NewData);
        }
        if self.has_control_frames() {
            interest = interest.merge(Interest::NewData);
        }
        interest
    }

    fn has_control_frames(&self) -> bool {
        self.streams.values().any(|stream| {
            stream
                .send
                .as_ref()
                .map_or(false, |send| send.reset_frame().is_some())
                || stream
                    .receive
                    .as_ref()
                    .map_or(false, |receive| receive.has_window_update())
        })
    }

    /// Collects control frames due: resets, stop_sending, window
    /// updates, stream-count updates
    pub fn control_frames(&mut self, limit: usize) -> Vec<ControlFrame> {
        let mut frames = Vec::new();

        for index in 0..2 {
            if frames.len() >= limit {
                return frames;
            }
            if self.max_streams_pending[index] {
                self.max_streams_pending[index] = false;
                let stream_type = if index == 0 {
                    StreamType::Bidirectional
                } else {
                    StreamType::Unidirectional
                };
                frames.push(ControlFrame::MaxStreams {
                    stream_type,
                    maximum: self.local_max_streams[index],
                });
            }
            if let Some(stream_limit) = self.streams_blocked_pending[index].take() {
                let stream_type = if index == 0 {
                    StreamType::Bidirectional
                } else {
                    StreamType::Unidirectional
                };
                frames.push(ControlFrame::StreamsBlocked {
                    stream_type,
                    stream_limit,
                });
            }
        }

        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            if frames.len() >= limit {
                break;
            }
            let Some(stream) = self.streams.get_mut(&id) else {
                continue;
            };
            if let Some(send) = stream.send.as_mut() {
                if send.state() == SendState::ResetSent {
                    if let Some((error_code, final_size)) = send.reset_frame() {
                        if send_needs_reset_transmit(send) {
                            send.on_reset_transmitted();
                            frames.push(ControlFrame::ResetStream {
                                id,
                                error_code,
                                final_size,
                                reliable_size: send.reliable_size(),
                            });
                        }
                    }
                }
                if let Some(limit_value) = send.blocked_frame() {
                    frames.push(ControlFrame::StreamDataBlocked {
                        id,
                        limit: limit_value,
                    });
                }
            }
            if let Some(receive) = stream.receive.as_mut() {
                if let Some(error_code) = receive.stop_sending_frame() {
                    frames.push(ControlFrame::StopSending { id, error_code });
                }
                if let Some(maximum) = receive.window_update_frame() {
                    frames.push(ControlFrame::MaxStreamData { id, maximum });
                }
            }
        }
        frames
    }

    /// ACK visitor for stream-carried frames
    pub fn on_frame_acked(
        &mut self,
        id: StreamId,
        offset: u64,
        len: u64,
        is_fin: bool,
    ) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if let Some(send) = stream.send.as_mut() {
            send.on_frame_acked(offset, len, is_fin);
        }
        self.flush_byte_events(id);
        self.maybe_remove(id);
    }

    pub fn on_reset_acked(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if let Some(send) = stream.send.as_mut() {
                send.on_reset_acked();
            }
            self.maybe_remove(id);
        }
    }

    /// Loss visitor for stream-carried frames
    pub fn on_frame_lost(&mut self, id: StreamId, offset: u64, len: u64, is_fin: bool) {
        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        if let Some(send) = stream.send.as_mut() {
            send.on_frame_lost(offset, len, is_fin);
            if send.interest() == Interest::LostData {
                self.loss_interest.insert(id);
            }
        }
    }

    pub fn on_reset_lost(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if let Some(send) = stream.send.as_mut() {
                send.on_reset_lost();
                self.write_interest.insert(id);
            }
        }
    }

    pub fn on_max_stream_data_lost(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if let Some(receive) = stream.receive.as_mut() {
                receive.on_window_update_lost();
                self.write_interest.insert(id);
            }
        }
    }

    pub fn on_stop_sending_lost(&mut self, id: StreamId) {
        if let Some(stream) = self.streams.get_mut(&id) {
            if let Some(receive) = stream.receive.as_mut() {
                receive.on_stop_sending_lost();
                self.write_interest.insert(id);
            }
        }
    }

    /// A fully closed remote stream frees concurrency for the peer
    fn note_remote_closure(&mut self, id: StreamId) {
        if id.initiator() != self.local {
            let index = type_index(id.stream_type());
            self.local_max_streams[index] += 1;
            self.max_streams_pending[index] = true;
        }
        self.maybe_remove(id);
    }

    /// Removes streams whose halves are terminal and whose callbacks
    /// have drained
    fn maybe_remove(&mut self, id: StreamId) {
        let closed = self
            .streams
            .get(&id)
            .map_or(false, |stream| stream.is_closed());
        if closed {
            self.streams.remove(&id);
            self.write_interest.remove(&id);
            self.loss_interest.remove(&id);
        }
    }

    /// Tears down every stream, cancelling outstanding byte events
    pub fn close_all(&mut self) {
        let ids: Vec<StreamId> = self.streams.keys().copied().collect();
        for id in ids {
            self.cancel_byte_events(id);
        }
        self.streams.clear();
        self.write_interest.clear();
        self.loss_interest.clear();
    }
}

fn send_needs_reset_transmit(send: &crate::stream::SendStream) -> bool {
    send.interest() == Interest::NewData
}

fn initial_send_limit(limits: &InitialLimits, id: StreamId, local: endpoint::Type) -> u64 {
    match (id.stream_type(), id.initiator() == local) {
        (StreamType::Bidirectional, true) => limits.send_bidi_local_opened,
        (StreamType::Bidirectional, false) => limits.send_bidi_peer_opened,
        (StreamType::Unidirectional, _) => limits.send_uni,
    }
}

fn initial_receive_window(limits: &InitialLimits, stream_type: StreamType) -> u64 {
    match stream_type {
        StreamType::Bidirectional => limits.receive_window_bidi,
        StreamType::Unidirectional => limits.receive_window_uni,
    }
}

/// Control frames the manager wants transmitted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlFrame {
    ResetStream {
        id: StreamId,
        error_code: VarInt,
        final_size: u64,
        reliable_size: Option<u64>,
    },
    StopSending {
        id: StreamId,
        error_code: VarInt,
    },
    MaxStreamData {
        id: StreamId,
        maximum: u64,
    },
    MaxStreams {
        stream_type: StreamType,
        maximum: u64,
    },
    StreamDataBlocked {
        id: StreamId,
        limit: u64,
    },
    StreamsBlocked {
        stream_type: StreamType,
        stream_limit: u64,
    },
}
