// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream state machines and their manager.

pub mod buffer;
mod byte_events;
mod manager;
mod receive;
mod send;

pub use byte_events::{ByteEvent, ByteEventKind, ByteEvents};
pub use manager::{ControlFrame, StreamEvent, StreamManager};
pub use receive::{ReceiveState, ReceiveStream};
pub use send::{SendState, SendStream};

use weft_quic_core::{endpoint, stream::StreamId, varint::VarInt};

/// One stream: the send half, the receive half, and registered byte
/// events. Halves are absent for the undirected side of a
/// unidirectional stream.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    pub group_id: Option<VarInt>,
    pub send: Option<SendStream>,
    pub receive: Option<ReceiveStream>,
    pub byte_events: ByteEvents,
}

impl Stream {
    pub fn new(
        id: StreamId,
        local: endpoint::Type,
        send_limit: u64,
        receive_window: u64,
        group_id: Option<VarInt>,
    ) -> Self {
        let send = id.is_writable(local).then(|| SendStream::new(send_limit));
        let receive = id.is_readable(local).then(|| ReceiveStream::new(receive_window));
        Self {
            id,
            group_id,
            send,
            receive,
            byte_events: ByteEvents::default(),
        }
    }

    /// A stream closes when both halves are terminal (or absent) and
    /// no byte-event registrations remain undelivered
    pub fn is_closed(&self) -> bool {
        let send_done = self
            .send
            .as_ref()
            .map_or(true, |send| send.state().is_terminal());
        let receive_done = self
            .receive
            .as_ref()
            .map_or(true, |receive| receive.state().is_terminal());
        send_done && receive_done && self.byte_events.is_empty()
    }
}
