// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Byte-level buffers backing the send and receive halves of a
//! stream. The crypto stream reuses both.

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use weft_quic_core::{interval_set::IntervalSet, transport};

/// One contiguous chunk handed to the packet builder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transmission {
    pub offset: u64,
    pub data: Bytes,
    pub is_fin: bool,
    /// True when this retransmits declared-lost data
    pub is_retransmission: bool,
}

/// The send half: application bytes on their way to acknowledgment.
///
/// Data moves pending -> inflight -> (acked | lost -> inflight ...).
/// Chunks keep their identity from transmission to acknowledgment, so
/// ACK and loss lookups are exact-offset matches.
#[derive(Debug, Default)]
pub struct SendBuffer {
    /// Not yet transmitted, contiguous from `pending_base`
    pending: VecDeque<Bytes>,
    /// Offset of the first pending byte
    pending_base: u64,
    /// Transmitted, unacknowledged chunks keyed by start offset
    inflight: BTreeMap<u64, (Bytes, bool)>,
    /// Declared lost, awaiting retransmission, keyed by start offset
    lost: BTreeMap<u64, (Bytes, bool)>,
    acked: IntervalSet,
    /// Total length once FIN is queued
    final_offset: Option<u64>,
    fin_acked: bool,
    /// FIN has been handed to a packet at least once
    fin_transmitted: bool,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset one past the last byte queued so far
    #[inline]
    pub fn write_offset(&self) -> u64 {
        self.pending_base + self.pending.iter().map(|chunk| chunk.len() as u64).sum::<u64>()
    }

    #[inline]
    pub fn final_offset(&self) -> Option<u64> {
        self.final_offset
    }

    #[inline]
    pub fn acked_intervals(&self) -> &IntervalSet {
        &self.acked
    }

    /// Queues application data; not legal after FIN
    pub fn write(&mut self, data: Bytes) -> Result<(), transport::Error> {
        if self.final_offset.is_some() {
            return Err(transport::Error::INTERNAL_ERROR.with_reason("write after fin"));
        }
        if !data.is_empty() {
            self.pending.push_back(data);
        }
        Ok(())
    }

    /// Marks the end of the stream at the current write offset
    pub fn finish(&mut self) {
        if self.final_offset.is_none() {
            self.final_offset = Some(self.write_offset());
        }
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.final_offset.is_some()
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.pending_fin()
    }

    /// FIN still needs to ride in some frame
    fn pending_fin(&self) -> bool {
        self.final_offset.is_some() && !self.fin_transmitted && self.pending.is_empty()
    }

    #[inline]
    pub fn has_lost(&self) -> bool {
        !self.lost.is_empty()
    }

    /// Everything sent and acknowledged, including FIN
    pub fn is_fully_acked(&self) -> bool {
        let Some(final_offset) = self.final_offset else {
            return false;
        };
        if !self.fin_acked {
            return false;
        }
        if final_offset == 0 {
            return true;
        }
        self.acked.intervals().next() == Some(0..=final_offset - 1)
            && self.acked.interval_len() == 1
    }

    /// Bytes awaiting first transmission
    pub fn pending_len(&self) -> u64 {
        self.pending.iter().map(|chunk| chunk.len() as u64).sum()
    }

    /// Takes the next chunk to put on the wire, lost data first
    pub fn next_transmission(&mut self, max_len: usize) -> Option<Transmission> {
        if max_len == 0 {
            return None;
        }

        // loss repair beats new data
        if let Some((&offset, _)) = self.lost.iter().next() {
            let (mut data, is_fin) = self.lost.remove(&offset).expect("key just observed");
            let mut fin = is_fin;
            if data.len() > max_len {
                let remainder = data.split_off(max_len);
                self.lost.insert(offset + max_len as u64, (remainder, is_fin));
                fin = false;
            }
            self.inflight.insert(offset, (data.clone(), fin));
            return Some(Transmission {
                offset,
                data,
                is_fin: fin,
                is_retransmission: true,
            });
        }

        if let Some(mut data) = self.pending.pop_front() {
            let offset = self.pending_base;
            if data.len() > max_len {
                let remainder = data.split_off(max_len);
                self.pending.push_front(remainder);
            }
            self.pending_base += data.len() as u64;
            let is_fin = self.final_offset == Some(self.pending_base) && self.pending.is_empty();
            if is_fin {
                self.fin_transmitted = true;
            }
            self.inflight.insert(offset, (data.clone(), is_fin));
            return Some(Transmission {
                offset,
                data,
                is_fin,
                is_retransmission: false,
            });
        }

        if self.pending_fin() {
            let offset = self.pending_base;
            self.fin_transmitted = true;
            self.inflight.insert(offset, (Bytes::new(), true));
            return Some(Transmission {
                offset,
                data: Bytes::new(),
                is_fin: true,
                is_retransmission: false,
            });
        }

        None
    }

    /// An inflight chunk was acknowledged
    pub fn on_ack(&mut self, offset: u64, len: u64, is_fin: bool) {
        if len > 0 {
            self.acked.insert(offset..=offset + len - 1);
        }
        if is_fin {
            self.fin_acked = true;
        }
        if let Some((data, _)) = self.inflight.get(&offset) {
            if data.len() as u64 == len {
                self.inflight.remove(&offset);
            }
        }
        // a retransmission may have covered it; drop stale loss state
        if let Some((data, _)) = self.lost.get(&offset) {
            if data.len() as u64 == len {
                self.lost.remove(&offset);
            }
        }
    }

    /// An inflight chunk was declared lost
    pub fn on_loss(&mut self, offset: u64, len: u64, is_fin: bool) {
        let Some((data, fin)) = self.inflight.remove(&offset) else {
            // already acked through another transmission
            return;
        };
        debug_assert_eq!(data.len() as u64, len);
        debug_assert_eq!(fin, is_fin);
        // skip ranges a competing transmission already delivered
        if len > 0 && self.acked.intervals().any(|range| range == (offset..=offset + len - 1)) {
            if is_fin && !self.fin_acked {
                self.lost.insert(offset, (Bytes::new(), true));
            }
            return;
        }
        self.lost.insert(offset, (data, fin));
    }

    /// Abandons all state, e.g. on RESET_STREAM
    pub fn discard(&mut self) {
        self.pending.clear();
        self.inflight.clear();
        self.lost.clear();
    }
}

/// The receive half: out-of-order segments held until contiguous.
#[derive(Debug, Default)]
pub struct Reassembler {
    /// Non-overlapping segments keyed by start offset
    segments: BTreeMap<u64, Bytes>,
    read_offset: u64,
    final_size: Option<u64>,
    /// One past the highest byte seen; drives flow-control accounting
    max_received: u64,
    buffered_bytes: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    #[inline]
    pub fn max_received(&self) -> u64 {
        self.max_received
    }

    #[inline]
    pub fn final_size(&self) -> Option<u64> {
        self.final_size
    }

    #[inline]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// True once every byte through the final size was delivered
    pub fn is_finished(&self) -> bool {
        self.final_size == Some(self.read_offset)
    }

    /// Data available to pop right now
    pub fn is_readable(&self) -> bool {
        self.segments
            .first_key_value()
            .map_or(false, |(&offset, _)| offset <= self.read_offset)
            || self.is_finished()
    }

    /// Accepts one STREAM/CRYPTO frame's worth of data
    pub fn insert(
        &mut self,
        offset: u64,
        data: &[u8],
        is_fin: bool,
    ) -> Result<(), transport::Error> {
        let end = offset + data.len() as u64;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# Once a final size for a stream is known, it cannot change.  If a
        //# RESET_STREAM or STREAM frame is received indicating a change in the
        //# final size for the stream, an endpoint MUST respond with an error
        //# of type FINAL_SIZE_ERROR
        if let Some(final_size) = self.final_size {
            if end > final_size || (is_fin && end != final_size) {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        if is_fin {
            if self.max_received > end {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
            self.final_size = Some(end);
        }

        self.max_received = self.max_received.max(end);

        // trim to the unread, un-buffered middle
        let mut start = offset.max(self.read_offset);
        if start >= end {
            return Ok(());
        }
        let mut data = data;
        data = &data[(start - offset) as usize..];

        // clip against existing segments
        while !data.is_empty() {
            // find a segment covering or following `start`
            let covering = self
                .segments
                .range(..=start)
                .next_back()
                .filter(|(&seg_start, seg)| seg_start + seg.len() as u64 > start)
                .map(|(&seg_start, seg)| seg_start + seg.len() as u64);
            if let Some(covered_end) = covering {
                if covered_end >= end {
                    return Ok(());
                }
                data = &data[(covered_end - start) as usize..];
                start = covered_end;
                continue;
            }

            let next_start = self
                .segments
                .range(start..)
                .next()
                .map(|(&seg_start, _)| seg_start)
                .unwrap_or(u64::MAX);
            let take = ((next_start.min(end)) - start) as usize;
            let segment = Bytes::copy_from_slice(&data[..take]);
            self.buffered_bytes += segment.len();
            self.segments.insert(start, segment);
            data = &data[take..];
            start += take as u64;
        }

        Ok(())
    }

    /// Pops the next contiguous chunk, if any
    pub fn pop(&mut self) -> Option<Bytes> {
        let (&offset, _) = self.segments.first_key_value()?;
        if offset > self.read_offset {
            return None;
        }
        let (offset, data) = self.segments.pop_first()?;
        // overlap with read_offset was trimmed on insert
        debug_assert!(offset == self.read_offset);
        self.buffered_bytes -= data.len();
        self.read_offset += data.len() as u64;
        Some(data)
    }

    /// True when data past the read offset is parked behind a gap
    pub fn is_hol_blocked(&self) -> bool {
        self.segments
            .first_key_value()
            .map_or(false, |(&offset, _)| offset > self.read_offset)
    }

    pub fn discard(&mut self) {
        self.segments.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_buffer_lifecycle() {
        let mut buffer = SendBuffer::new();
        buffer.write(Bytes::from_static(b"hello")).unwrap();
        buffer.write(Bytes::from_static(b"world")).unwrap();
        buffer.finish();
        assert_eq!(buffer.final_offset(), Some(10));

        let first = buffer.next_transmission(5).unwrap();
        assert_eq!((first.offset, first.is_fin), (0, false));
        let second = buffer.next_transmission(100).unwrap();
        assert_eq!((second.offset, second.is_fin), (5, true));
        assert!(buffer.next_transmission(100).is_none());

        buffer.on_ack(0, 5, false);
        assert!(!buffer.is_fully_acked());
        buffer.on_ack(5, 5, true);
        assert!(buffer.is_fully_acked());
    }

    #[test]
    fn acked_intervals_under_reordering() {
        let mut buffer = SendBuffer::new();
        buffer.write(Bytes::from_static(b"hello")).unwrap();
        buffer.write(Bytes::from_static(b"world")).unwrap();
        buffer.finish();
        let first = buffer.next_transmission(5).unwrap();
        let second = buffer.next_transmission(5).unwrap();

        // "world" acked first
        buffer.on_ack(second.offset, 5, true);
        assert_eq!(
            buffer.acked_intervals().intervals().collect::<Vec<_>>(),
            vec![5..=9]
        );
        buffer.on_ack(first.offset, 5, false);
        assert_eq!(
            buffer.acked_intervals().intervals().collect::<Vec<_>>(),
            vec![0..=9]
        );
        assert!(buffer.is_fully_acked());
    }

    #[test]
    fn loss_retransmits_before_new_data() {
        let mut buffer = SendBuffer::new();
        buffer.write(Bytes::from_static(b"abcde")).unwrap();
        let first = buffer.next_transmission(5).unwrap();
        buffer.write(Bytes::from_static(b"fgh")).unwrap();
        buffer.on_loss(first.offset, 5, false);

        let repair = buffer.next_transmission(100).unwrap();
        assert!(repair.is_retransmission);
        assert_eq!(repair.offset, 0);
        assert_eq!(&repair.data[..], b"abcde");

        let fresh = buffer.next_transmission(100).unwrap();
        assert!(!fresh.is_retransmission);
        assert_eq!(fresh.offset, 5);
    }

    #[test]
    fn lost_chunk_splits_to_fit() {
        let mut buffer = SendBuffer::new();
        buffer.write(Bytes::from_static(b"0123456789")).unwrap();
        let sent = buffer.next_transmission(10).unwrap();
        buffer.on_loss(sent.offset, 10, false);

        let first = buffer.next_transmission(4).unwrap();
        assert_eq!((first.offset, &first.data[..]), (0, &b"0123"[..]));
        let second = buffer.next_transmission(100).unwrap();
        assert_eq!((second.offset, &second.data[..]), (4, &b"456789"[..]));
    }

    #[test]
    fn empty_fin_transmission() {
        let mut buffer = SendBuffer::new();
        buffer.finish();
        let fin = buffer.next_transmission(100).unwrap();
        assert_eq!((fin.offset, fin.is_fin, fin.data.len()), (0, true, 0));
        buffer.on_ack(0, 0, true);
        assert!(buffer.is_fully_acked());
    }

    #[test]
    fn reassembler_in_order_and_gaps() {
        let mut buffer = Reassembler::new();
        buffer.insert(5, b"world", true).unwrap();
        assert!(buffer.pop().is_none());
        assert!(buffer.is_hol_blocked());

        buffer.insert(0, b"hello", false).unwrap();
        assert_eq!(&buffer.pop().unwrap()[..], b"hello");
        assert_eq!(&buffer.pop().unwrap()[..], b"world");
        assert!(buffer.is_finished());
    }

    #[test]
    fn reassembler_overlap_trimming() {
        let mut buffer = Reassembler::new();
        buffer.insert(0, b"hel", false).unwrap();
        buffer.insert(2, b"llo!", false).unwrap();
        assert_eq!(&buffer.pop().unwrap()[..], b"hel");
        assert_eq!(&buffer.pop().unwrap()[..], b"lo!");
        assert_eq!(buffer.read_offset(), 6);
    }

    #[test]
    fn final_size_violations() {
        let mut buffer = Reassembler::new();
        buffer.insert(0, b"abc", true).unwrap();
        assert!(buffer.insert(3, b"d", false).is_err());

        let mut buffer = Reassembler::new();
        buffer.insert(0, b"abcdef", false).unwrap();
        // fin below already-received data
        assert!(buffer.insert(0, b"abc", true).is_err());
    }

    #[test]
    fn duplicate_segments_ignored() {
        let mut buffer = Reassembler::new();
        buffer.insert(0, b"abc", false).unwrap();
        buffer.insert(0, b"abc", false).unwrap();
        assert_eq!(buffer.buffered_bytes(), 3);
        assert_eq!(&buffer.pop().unwrap()[..], b"abc");
        assert!(buffer.pop().is_none());
    }
}
