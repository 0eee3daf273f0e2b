// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Offset-watermark notifications on a stream.
//!
//! The application registers (kind, offset, token); the connection
//! surfaces an event once the stream's transmit or delivery watermark
//! reaches the offset. Tokens are opaque to the transport and let the
//! application route the event without the transport holding
//! callbacks.

use std::collections::BTreeMap;
use weft_quic_core::connection::error::OperationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteEventKind {
    /// Fires when the byte at `offset` has been handed to a packet
    Tx,
    /// Fires when every byte through `offset` has been acknowledged
    Ack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteEvent {
    pub kind: ByteEventKind,
    pub offset: u64,
    pub token: u64,
}

/// Registered byte events of one stream, sorted by offset so
/// draining is a front-pop
#[derive(Debug, Default)]
pub struct ByteEvents {
    tx: BTreeMap<u64, Vec<u64>>,
    ack: BTreeMap<u64, Vec<u64>>,
}

impl ByteEvents {
    fn map_mut(&mut self, kind: ByteEventKind) -> &mut BTreeMap<u64, Vec<u64>> {
        match kind {
            ByteEventKind::Tx => &mut self.tx,
            ByteEventKind::Ack => &mut self.ack,
        }
    }

    /// Registers a notification; an identical registration is an error
    pub fn register(
        &mut self,
        kind: ByteEventKind,
        offset: u64,
        token: u64,
    ) -> Result<(), OperationError> {
        let tokens = self.map_mut(kind).entry(offset).or_default();
        if tokens.contains(&token) {
            return Err(OperationError::InvalidOperation);
        }
        tokens.push(token);
        Ok(())
    }

    /// Pops every registration at or below `watermark`, in offset order
    pub fn take_ready(&mut self, kind: ByteEventKind, watermark: u64) -> Vec<ByteEvent> {
        let map = self.map_mut(kind);
        let mut ready = Vec::new();
        while let Some((&offset, _)) = map.first_key_value() {
            if offset > watermark {
                break;
            }
            let (offset, tokens) = map.pop_first().expect("key just observed");
            ready.extend(tokens.into_iter().map(|token| ByteEvent {
                kind,
                offset,
                token,
            }));
        }
        ready
    }

    /// Drains everything, for cancellation on stream or connection close
    pub fn cancel_all(&mut self) -> Vec<ByteEvent> {
        let mut canceled = Vec::new();
        for (kind, map) in [
            (ByteEventKind::Tx, &mut self.tx),
            (ByteEventKind::Ack, &mut self.ack),
        ] {
            while let Some((offset, tokens)) = map.pop_first() {
                canceled.extend(tokens.into_iter().map(|token| ByteEvent {
                    kind,
                    offset,
                    token,
                }));
            }
        }
        canceled
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty() && self.ack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_in_offset_order() {
        let mut events = ByteEvents::default();
        events.register(ByteEventKind::Ack, 10, 1).unwrap();
        events.register(ByteEventKind::Ack, 3, 2).unwrap();
        events.register(ByteEventKind::Ack, 7, 3).unwrap();

        let ready = events.take_ready(ByteEventKind::Ack, 8);
        assert_eq!(
            ready.iter().map(|event| event.offset).collect::<Vec<_>>(),
            vec![3, 7]
        );
        assert!(!events.is_empty());

        let ready = events.take_ready(ByteEventKind::Ack, 100);
        assert_eq!(ready.len(), 1);
        assert!(events.is_empty());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut events = ByteEvents::default();
        events.register(ByteEventKind::Tx, 5, 9).unwrap();
        assert_eq!(
            events.register(ByteEventKind::Tx, 5, 9),
            Err(OperationError::InvalidOperation)
        );
        // same offset with a different token is fine
        events.register(ByteEventKind::Tx, 5, 10).unwrap();
    }

    #[test]
    fn kinds_are_independent() {
        let mut events = ByteEvents::default();
        events.register(ByteEventKind::Tx, 5, 1).unwrap();
        events.register(ByteEventKind::Ack, 5, 1).unwrap();
        assert_eq!(events.take_ready(ByteEventKind::Tx, 5).len(), 1);
        assert_eq!(events.take_ready(ByteEventKind::Ack, 5).len(), 1);
    }
}
