// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The read path: datagram ingestion, packet decryption, frame
//! dispatch, ACK processing, and handshake driving.

use crate::{
    connection::{CloseState, Connection, Event, MAX_PACKETS_TO_BUFFER},
    recovery::AckOutcome,
    transmission::WriteFrame,
};
use bytes::Bytes;
use weft_quic_core::{
    connection::{error::Initiator, id::PeerId, Error},
    crypto::EncryptionLevel,
    event::builder::{self, DropReason},
    frame::{self, AckRanges, Frame},
    inet::DatagramInfo,
    packet::{
        self,
        decoding::{decode_packet, CleartextPacket, PacketType, ProtectedPacket},
        key_phase::KeyPhase,
        number::PacketNumberSpace,
        stateless_reset,
    },
    time::Timestamp,
    transport,
    varint::VarInt,
};
use weft_codec::DecoderBufferMut;

impl Connection {
    /// Feeds one received UDP datagram into the connection
    pub fn on_datagram_received(
        &mut self,
        info: &DatagramInfo,
        payload: &mut [u8],
        now: Timestamp,
    ) {
        match &mut self.close_state {
            CloseState::Drained => return,
            CloseState::Closing { resend_close, .. } => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.1
                //# An endpoint that receives additional packets in the closing
                //# state MAY respond by sending a further CONNECTION_CLOSE
                *resend_close = true;
                return;
            }
            CloseState::Open => {}
        }

        self.loss.total_bytes_recvd += payload.len() as u64;
        if let Some(path) = self
            .paths
            .path_by_addresses(&info.local_address, &info.remote_address)
        {
            path.bytes_received += payload.len() as u64;
        }

        if let Err(error) = self.on_datagram_inner(info, payload, now) {
            self.close_with(error.into(), now);
            return;
        }

        if let Err(error) = self.drive_handshake(now) {
            self.close_with(error.into(), now);
            return;
        }
        self.flush_undecryptable(info, now);
        self.restart_write_pass();
    }

    fn on_datagram_inner(
        &mut self,
        info: &DatagramInfo,
        payload: &mut [u8],
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let datagram_len = payload.len();
        // captured before parsing: an undecryptable short packet may
        // turn out to be a stateless reset
        let reset_candidate = stateless_reset::candidate_token(payload).copied();
        let mut remaining = DecoderBufferMut::new(payload);
        let mut packets = 0;
        let mut any_processed = false;

        while !remaining.is_empty() && packets < packet::MAX_COALESCED_PACKETS {
            packets += 1;
            let local_cid_len = self.local_connection_ids[0].id.len();
            let (packet, rest) = match decode_packet(remaining, local_cid_len) {
                Ok(split) => split,
                Err(_) => {
                    // garbage after a valid packet may be a stateless reset
                    self.stats_drop(now, datagram_len, DropReason::ParseError);
                    break;
                }
            };
            remaining = rest;

            match self.process_packet(packet, info, reset_candidate, now) {
                Ok(processed) => any_processed |= processed,
                Err(error) => return Err(error),
            }
            if !matches!(self.close_state, CloseState::Open) {
                return Ok(());
            }
        }

        if any_processed {
            self.refresh_idle_timer(now);
        }
        self.arm_ack_timer();
        Ok(())
    }

    /// Returns `Ok(true)` when the packet advanced connection state
    fn process_packet(
        &mut self,
        packet: ProtectedPacket,
        info: &DatagramInfo,
        reset_candidate: Option<[u8; stateless_reset::TOKEN_LEN]>,
        now: Timestamp,
    ) -> Result<bool, transport::Error> {
        match packet.packet_type() {
            PacketType::VersionNegotiation => {
                self.on_version_negotiation(packet, now);
                return Ok(false);
            }
            PacketType::Retry => {
                return self.on_retry(packet, now).map(|()| true);
            }
            _ => {}
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
        //# Upon first receiving an Initial or Retry packet from the server, the
        //# client uses the Source Connection ID supplied by the server as the
        //# Destination Connection ID for subsequent packets
        if packet.packet_type() == PacketType::Initial {
            if self.role.is_server()
                && !self.address_validated
                && self.spaces.initial.ack_manager.largest_received().is_none()
                && packet.destination_connection_id().len()
                    < weft_quic_core::connection::id::MIN_INITIAL_DESTINATION_LEN
            {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
                //# clients MUST ensure that the Destination Connection ID field of
                //# the first Initial packet they send is at least 8 bytes in length
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("initial destination connection id too short"));
            }
            if let Some(scid) = packet.header().source_connection_id {
                if self.role.is_client() {
                    self.peer_connection_ids[0].id = scid;
                }
            }
        }

        let Some(level) = packet.encryption_level() else {
            return Ok(false);
        };
        let space_id = level.packet_number_space();

        if self.spaces.get(space_id).is_discarded {
            self.stats_drop(now, packet.len(), DropReason::CipherUnavailable);
            return Ok(false);
        }

        let Some(read_keys) = self.keys.read_keys(level) else {
            return Ok(self.buffer_undecryptable(packet, level, now));
        };

        let packet_len = packet.len();
        let largest = self
            .spaces
            .get(space_id)
            .ack_manager
            .largest_received()
            .map(|pn| space_id.new_packet_number(VarInt::new(pn).unwrap_or(VarInt::MAX)));

        let is_short = packet.packet_type() == PacketType::Short;
        let unprotected = match packet.unprotect(read_keys.header_key.as_ref(), largest) {
            Ok(unprotected) => unprotected,
            Err(_) => {
                return Ok(self.on_undecryptable(is_short, reset_candidate, packet_len, now));
            }
        };

        // pick the AEAD by key phase for short packets
        let phase = unprotected.key_phase();
        let packet_number = unprotected.packet_number().as_u64();
        let decrypt_result = match phase {
            Some(phase) if phase != self.keys.one_rtt.write_phase => {
                self.decrypt_other_phase(unprotected, phase, packet_number, largest.map(|pn| pn.as_u64()))
            }
            _ => {
                let keys = self
                    .keys
                    .read_keys(level)
                    .expect("read keys checked above");
                unprotected.decrypt(keys.key.as_ref()).map(|packet| (packet, false))
            }
        };

        let (cleartext, used_previous_phase) = match decrypt_result {
            Ok(result) => result,
            Err(_) => {
                return Ok(self.on_undecryptable(is_short, reset_candidate, packet_len, now));
            }
        };

        if self
            .spaces
            .get(space_id)
            .ack_manager
            .is_duplicate(cleartext.packet_number.as_u64())
        {
            self.stats_drop(now, packet_len, DropReason::ParseError);
            return Ok(false);
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
        //# a server MUST discard Initial keys when it first successfully
        //# processes a Handshake packet
        if self.role.is_server() && level == EncryptionLevel::Handshake {
            self.address_validated = true;
        }

        self.dispatch_cleartext(cleartext, level, used_previous_phase, info, packet_len, now)
    }

    fn decrypt_other_phase<'a>(
        &mut self,
        unprotected: weft_quic_core::packet::UnprotectedPacket<'a>,
        _phase: KeyPhase,
        packet_number: u64,
        largest: Option<u64>,
    ) -> Result<(CleartextPacket<'a>, bool), transport::Error> {
        let is_old_phase = largest.map_or(false, |largest| packet_number < largest);
        if is_old_phase {
            //= https://www.rfc-editor.org/rfc/rfc9001#section-6.3
            //# An endpoint SHOULD retain old read keys for no more than three
            //# times the PTO after having received a packet protected using the
            //# new keys.
            let keys = self
                .keys
                .previous_read_keys()
                .ok_or(transport::Error::KEY_UPDATE_ERROR.with_reason("previous keys discarded"))?;
            return unprotected.decrypt(keys.key.as_ref()).map(|p| (p, true));
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.2
        //# An endpoint detects a key update when processing a packet with a key
        //# phase that differs from the value used to protect the last packet it
        //# sent.
        let (write, read) = self.tls.derive_next_one_rtt_keys()?;
        let cleartext = {
            let result = unprotected.decrypt(read.key.as_ref());
            result?
        };
        self.keys.rotate_one_rtt(write, read);
        Ok((cleartext, false))
    }

    fn dispatch_cleartext(
        &mut self,
        cleartext: CleartextPacket,
        level: EncryptionLevel,
        used_previous_phase: bool,
        info: &DatagramInfo,
        packet_len: usize,
        now: Timestamp,
    ) -> Result<bool, transport::Error> {
        let space_id = level.packet_number_space();
        let packet_number = cleartext.packet_number.as_u64();
        let receive_time = info.receive_time.unwrap_or(now);

        let mut ack_eliciting = false;
        let mut all_probing = true;

        for frame in frame::FrameIter::new(cleartext.payload) {
            let frame = frame.map_err(transport::Error::from)?;
            ack_eliciting |= frame.ack_elicitation().is_ack_eliciting();
            all_probing &= frame.is_probing();
            self.on_frame(frame, level, used_previous_phase, now)?;
            if !matches!(self.close_state, CloseState::Open) {
                return Ok(true);
            }
        }

        // a non-probing packet from a new peer address migrates
        if level == EncryptionLevel::OneRtt
            && !all_probing
            && self
                .paths
                .path_by_addresses(&info.local_address, &info.remote_address)
                .is_none()
        {
            self.on_peer_migration(info, now)?;
        }

        self.spaces.get_mut(space_id).ack_manager.on_packet_received(
            packet_number,
            ack_eliciting,
            info.ecn,
            receive_time,
        );

        self.publish(now, |subscriber, now| {
            subscriber.on_packet_received(
                now,
                &builder::PacketReceived {
                    packet_number,
                    space: space_id,
                    bytes: packet_len,
                },
            )
        });
        Ok(true)
    }

    fn on_frame(
        &mut self,
        frame: Frame,
        level: EncryptionLevel,
        used_previous_phase: bool,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let space_id = level.packet_number_space();
        match frame {
            Frame::Padding(_) | Frame::Ping(_) => {}

            Frame::Ack(ack) => {
                self.on_ack_frame(&ack, space_id, used_previous_phase, now)?;
            }

            Frame::Crypto(crypto) => {
                //= https://www.rfc-editor.org/rfc/rfc9001#section-8.4
                //# A server MUST NOT process 0-RTT CRYPTO frames
                if level == EncryptionLevel::ZeroRtt {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("crypto frame in 0-rtt"));
                }
                self.spaces
                    .get_mut(space_id)
                    .crypto_stream
                    .on_crypto_frame(crypto.offset.as_u64(), crypto.data)?;
            }

            Frame::Stream(stream) => {
                if level == EncryptionLevel::Initial || level == EncryptionLevel::Handshake {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("stream frame outside application space"));
                }
                let id = weft_quic_core::stream::StreamId::from_varint(stream.stream_id);
                let newly = self.streams.on_stream_frame(
                    id,
                    stream.group_id,
                    stream.offset.as_u64(),
                    stream.data,
                    stream.is_fin,
                    now,
                )?;
                self.account_rx_flow(newly)?;
            }

            Frame::ResetStream(reset) => {
                let id = weft_quic_core::stream::StreamId::from_varint(reset.stream_id);
                let newly = self.streams.on_reset_stream(
                    id,
                    reset.application_error_code,
                    reset.final_size.as_u64(),
                    None,
                )?;
                self.account_rx_flow(newly)?;
            }

            Frame::ResetStreamAt(reset) => {
                //= https://www.ietf.org/archive/id/draft-ietf-quic-reliable-stream-reset-03.txt#4
                //# An endpoint that receives a RESET_STREAM_AT frame without
                //# having advertised support MUST treat this as a connection
                //# error of type FRAME_ENCODING_ERROR.
                if !self.limits.reliable_stream_reset {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("reliable reset was not negotiated"));
                }
                let id = weft_quic_core::stream::StreamId::from_varint(reset.stream_id);
                let newly = self.streams.on_reset_stream(
                    id,
                    reset.application_error_code,
                    reset.final_size.as_u64(),
                    Some(reset.reliable_size.as_u64()),
                )?;
                self.account_rx_flow(newly)?;
            }

            Frame::StopSending(stop) => {
                let id = weft_quic_core::stream::StreamId::from_varint(stop.stream_id);
                self.streams
                    .on_stop_sending(id, stop.application_error_code)?;
            }

            Frame::MaxData(frame) => {
                let maximum = frame.maximum_data.as_u64();
                if maximum > self.flow.tx_max {
                    self.flow.tx_max = maximum;
                    self.flow.blocked_sent_at = None;
                }
            }

            Frame::MaxStreamData(frame) => {
                let id = weft_quic_core::stream::StreamId::from_varint(frame.stream_id);
                self.streams
                    .on_max_stream_data(id, frame.maximum_stream_data.as_u64())?;
            }

            Frame::MaxStreams(frame) => {
                self.streams
                    .on_max_streams(frame.stream_type, frame.maximum_streams.as_u64());
            }

            Frame::DataBlocked(_) | Frame::StreamDataBlocked(_) | Frame::StreamsBlocked(_) => {
                // informational; our own limits drive window updates
            }

            Frame::NewConnectionId(frame) => {
                self.on_new_connection_id(&frame)?;
            }

            Frame::RetireConnectionId(frame) => {
                let sequence = frame.sequence_number;
                let exists = self
                    .local_connection_ids
                    .iter_mut()
                    .find(|id| id.sequence_number == sequence);
                match exists {
                    Some(id) => id.retired = true,
                    None => {
                        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
                        //# Receipt of a RETIRE_CONNECTION_ID frame containing a
                        //# sequence number greater than any previously sent to the
                        //# peer MUST be treated as a connection error of type
                        //# PROTOCOL_VIOLATION.
                        return Err(transport::Error::PROTOCOL_VIOLATION
                            .with_reason("retired an unissued connection id"));
                    }
                }
            }

            Frame::PathChallenge(challenge) => {
                self.pending_path_responses.push(challenge.data);
            }

            Frame::PathResponse(response) => {
                if let Some(path_id) = self.paths.on_path_response(&response.data) {
                    if self.role.is_client() {
                        let smoothed = self.rtt.smoothed_rtt();
                        self.paths.promote(path_id, now, smoothed);
                    }
                    let peer_address = self.paths.active_path().peer_address;
                    self.publish(now, |subscriber, now| {
                        subscriber.on_path_validated(now, &builder::PathValidated { peer_address })
                    });
                }
                self.arm_path_timer();
            }

            Frame::ConnectionClose(close) => {
                let error = if close.is_application_close() {
                    Error::Application {
                        error: close.error_code,
                        initiator: Initiator::Remote,
                    }
                } else if close.error_code == VarInt::ZERO {
                    Error::Closed {
                        initiator: Initiator::Remote,
                    }
                } else {
                    Error::Transport {
                        error: transport::Error::new(close.error_code),
                        initiator: Initiator::Remote,
                    }
                };
                self.close_with(error, now);
            }

            Frame::HandshakeDone(_) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
                //# A server MUST treat receipt of a HANDSHAKE_DONE frame as a
                //# connection error of type PROTOCOL_VIOLATION.
                if self.role.is_server() {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("client sent handshake_done"));
                }
                self.on_handshake_confirmed(now);
            }

            Frame::Datagram(datagram) => {
                if self.limits.max_datagram_frame_size == VarInt::ZERO {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("datagram frames were not negotiated"));
                }
                if self.datagram_rx.len() >= 64 {
                    self.datagram_rx.pop_front();
                }
                self.datagram_rx.push_back(Bytes::copy_from_slice(datagram.data));
                self.emit_event(Event::DatagramReceived);
            }

            Frame::AckFrequency(frame) => {
                //= https://www.ietf.org/archive/id/draft-ietf-quic-ack-frequency-07.txt#3
                //# An endpoint that receives an ACK_FREQUENCY frame without having
                //# advertised the min_ack_delay transport parameter MUST treat this
                //# as a connection error of type PROTOCOL_VIOLATION.
                let Some(min_ack_delay) = self.limits.min_ack_delay else {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("ack_frequency without min_ack_delay"));
                };
                if (frame.request_max_ack_delay.as_u64()) < min_ack_delay.as_micros() as u64 {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("requested ack delay below min_ack_delay"));
                }
                self.spaces
                    .application
                    .ack_manager
                    .on_ack_frequency(&frame);
            }

            Frame::ImmediateAck(_) => {
                self.spaces.application.ack_manager.on_immediate_ack(now);
            }

            Frame::NewToken(frame) => {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
                //# A server MUST treat receipt of a NEW_TOKEN frame as a connection
                //# error of type PROTOCOL_VIOLATION.
                if self.role.is_server() {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("client sent new_token"));
                }
                self.emit_event(Event::NewTokenReceived(Bytes::copy_from_slice(frame.token)));
            }

            Frame::Knob(knob) => {
                if !self.limits.knob_frames_supported {
                    return Err(transport::Error::PROTOCOL_VIOLATION
                        .with_reason("knob frames were not negotiated"));
                }
                self.emit_event(Event::KnobReceived {
                    knob_space: knob.knob_space,
                    id: knob.id,
                    value: Bytes::copy_from_slice(knob.value),
                });
            }
        }
        Ok(())
    }

    fn account_rx_flow(&mut self, newly_received: u64) -> Result<(), transport::Error> {
        self.flow.rx_accounted += newly_received;
        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
        //# A receiver MUST close the connection with an error of type
        //# FLOW_CONTROL_ERROR if the sender violates the advertised connection
        //# or stream data limits
        if self.flow.rx_accounted > self.flow.rx_max {
            return Err(transport::Error::FLOW_CONTROL_ERROR
                .with_reason("connection flow control limit exceeded"));
        }
        Ok(())
    }

    pub(crate) fn on_ack_frame<A: AckRanges>(
        &mut self,
        ack: &frame::Ack<A>,
        space_id: PacketNumberSpace,
        used_previous_phase: bool,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let largest_acked = ack.largest_acknowledged();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
        //# An endpoint SHOULD treat receipt of an acknowledgment for a packet it
        //# did not send as a connection error of type PROTOCOL_VIOLATION
        let largest_sent = self.spaces.get(space_id).tx.largest_sent();
        if largest_sent.map_or(true, |largest_sent| largest_acked > largest_sent) {
            return Err(transport::Error::PROTOCOL_VIOLATION
                .with_reason("ack of a packet that was never sent"));
        }

        // acknowledging a deliberately skipped number proves the peer
        // acknowledges packets it never received
        if let Some(skipped) = self.spaces.get(space_id).tx.skipped() {
            if ack
                .ack_ranges
                .ack_ranges()
                .any(|range| range.contains(&skipped))
            {
                return Err(transport::Error::PROTOCOL_VIOLATION
                    .with_reason("ack of a skipped packet number"));
            }
        }

        // an ACK of new-phase packets arriving under the old phase
        // proves the peer mishandled the key update
        if used_previous_phase && space_id.is_application_data() {
            if let Some(pending) = self.keys.one_rtt.pending_verification_packet_number {
                if largest_acked >= pending {
                    return Err(transport::Error::crypto_error(
                        weft_quic_core::crypto::CryptoError::KEY_UPDATE_ERROR.code,
                    )
                    .with_reason("Packet with key update was acked in the wrong phase"));
                }
            }
        } else if space_id.is_application_data() {
            if let Some(pending) = self.keys.one_rtt.pending_verification_packet_number {
                if largest_acked >= pending {
                    // the update round-tripped under the new phase
                    self.keys.one_rtt.on_update_verified();
                    let phase = self.keys.one_rtt.write_phase;
                    self.publish(now, |subscriber, now| {
                        subscriber.on_key_updated(
                            now,
                            &builder::KeyUpdated {
                                phase: phase as u8,
                                initiated_locally: true,
                            },
                        )
                    });
                }
            }
        }

        let ack_delay = self
            .spaces
            .get(space_id)
            .ack_manager
            .settings()
            .scale_ack_delay(ack.ack_delay.as_u64());

        let outcome = {
            let rtt = &self.rtt;
            self.spaces
                .get_mut(space_id)
                .recovery
                .on_ack_frame(ack, ack_delay, now, rtt)?
        };
        self.on_ack_outcome(outcome, space_id, now);

        if let Some(counts) = &ack.ecn_counts {
            if counts.ce_count > self.peer_reported_ecn_ce {
                self.peer_reported_ecn_ce = counts.ce_count;
                self.congestion.on_congestion_event(now);
            }
        }
        Ok(())
    }

    pub(crate) fn on_ack_outcome(
        &mut self,
        outcome: AckOutcome,
        space_id: PacketNumberSpace,
        now: Timestamp,
    ) {
        if let Some((rtt_sample, ack_delay)) = outcome.rtt_sample {
            self.rtt.update_rtt(
                ack_delay,
                rtt_sample,
                now,
                self.handshake_confirmed,
                space_id,
            );
            let (latest, smoothed, minimum) = (
                self.rtt.latest_rtt(),
                self.rtt.smoothed_rtt(),
                self.rtt.min_rtt(),
            );
            self.publish(now, |subscriber, now| {
                subscriber.on_rtt_updated(
                    now,
                    &builder::RttUpdated {
                        latest_rtt: latest,
                        smoothed_rtt: smoothed,
                        min_rtt: minimum,
                        ack_delay,
                    },
                )
            });
            self.pacer
                .on_rate_update(self.congestion.congestion_window(), smoothed);
        }

        if !outcome.newly_acked.is_empty() {
            self.loss.pto_count = 0;
            self.loss.total_bytes_acked += outcome.newly_acked_bytes;
            if let Some(time_sent) = outcome.largest_newly_acked_time {
                self.congestion
                    .on_ack(outcome.newly_acked_bytes, time_sent, now);
            }
        }

        for info in &outcome.newly_acked {
            for frame in &info.frames {
                self.on_write_frame_acked(frame, now);
            }
        }

        let persistent = outcome.is_persistent_congestion;
        for info in &outcome.lost {
            self.loss.total_packets_lost += 1;
            let (packet_number, bytes) = (info.packet_number, info.sent_bytes);
            self.publish(now, |subscriber, now| {
                subscriber.on_packet_lost(
                    now,
                    &builder::PacketLost {
                        packet_number,
                        space: space_id,
                        bytes,
                        is_time_threshold: false,
                    },
                )
            });
            self.congestion
                .on_packet_lost(info.sent_bytes as u64, persistent, now);
            for frame in info.frames.clone() {
                self.on_write_frame_lost(&frame, now);
            }
            self.loss.total_bytes_retransmitted += info.body_bytes as u64;
        }

        self.arm_loss_timer();
    }

    fn on_write_frame_acked(&mut self, frame: &WriteFrame, now: Timestamp) {
        match frame {
            WriteFrame::Stream {
                stream_id,
                offset,
                len,
                is_fin,
                ..
            } => {
                self.streams.on_frame_acked(*stream_id, *offset, *len, *is_fin);
            }
            WriteFrame::Crypto { level, offset, len } => {
                let space_id = level.packet_number_space();
                self.spaces
                    .get_mut(space_id)
                    .crypto_stream
                    .on_frame_acked(*offset, *len);
            }
            WriteFrame::ResetStream { stream_id, .. }
            | WriteFrame::ResetStreamAt { stream_id, .. } => {
                self.streams.on_reset_acked(*stream_id);
            }
            WriteFrame::Ack {
                space,
                largest_acknowledged,
            } => {
                self.spaces
                    .get_mut(*space)
                    .ack_manager
                    .on_ack_frame_acked(*largest_acknowledged);
            }
            WriteFrame::Ping => {
                if self.timers.ping.is_armed() {
                    self.timers.ping.cancel();
                    self.emit_event(Event::PingAcknowledged);
                }
            }
            WriteFrame::MaxData { .. } | WriteFrame::MaxStreamData { .. } => {
                // the advertised limit is now confirmed delivered
            }
            WriteFrame::HandshakeDone => {
                // the client saw confirmation; nothing further owed
                let _ = now;
            }
            _ => {}
        }
    }

    fn on_write_frame_lost(&mut self, frame: &WriteFrame, _now: Timestamp) {
        match frame {
            WriteFrame::Stream {
                stream_id,
                offset,
                len,
                is_fin,
                ..
            } => {
                self.streams.on_frame_lost(*stream_id, *offset, *len, *is_fin);
            }
            WriteFrame::Crypto { level, offset, len } => {
                let space_id = level.packet_number_space();
                self.spaces
                    .get_mut(space_id)
                    .crypto_stream
                    .on_frame_lost(*offset, *len);
            }
            WriteFrame::ResetStream { stream_id, .. }
            | WriteFrame::ResetStreamAt { stream_id, .. } => {
                self.streams.on_reset_lost(*stream_id);
            }
            WriteFrame::StopSending { stream_id, .. } => {
                self.streams.on_stop_sending_lost(*stream_id);
            }
            WriteFrame::MaxStreamData { stream_id, .. } => {
                self.streams.on_max_stream_data_lost(*stream_id);
            }
            WriteFrame::MaxData { .. } => {
                self.flow.rx_update_pending = true;
            }
            WriteFrame::PathChallenge { data } => {
                self.paths.on_challenge_lost(data);
            }
            WriteFrame::PathResponse { data } => {
                self.pending_path_responses.push(*data);
            }
            WriteFrame::HandshakeDone => {
                self.handshake_done_pending = true;
            }
            WriteFrame::NewToken { token } => {
                self.new_token_pending = Some(token.clone());
            }
            _ => {}
        }
    }

    // === special packet forms ===

    fn on_version_negotiation(&mut self, packet: ProtectedPacket, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
        //# A client MUST discard a Version Negotiation packet if it has
        //# received and successfully processed any other packet
        if self.role.is_server() || self.any_packet_processed() {
            self.stats_drop(now, packet.len(), DropReason::VersionMismatch);
            return;
        }
        let versions = &packet.header().supported_versions;
        if versions.contains(&self.version) {
            // the peer speaks our version after all; ignore
            return;
        }
        let selected = versions.first().copied().unwrap_or(0);
        self.close_with(Error::NewVersionNegotiated { version: selected }, now);
    }

    fn on_retry(&mut self, packet: ProtectedPacket, now: Timestamp) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
        //# A client MUST accept and process at most one Retry packet for each
        //# connection attempt.
        if self.role.is_server() || self.retry_received || self.any_packet_processed() {
            self.stats_drop(now, packet.len(), DropReason::ParseError);
            return Ok(());
        }
        let header = packet.header();
        let (Some(token), Some(tag), Some(scid)) = (
            header.token.clone(),
            header.integrity_tag,
            header.source_connection_id,
        ) else {
            return Ok(());
        };
        if token.is_empty() {
            return Ok(());
        }

        // integrity covers the original destination id and the packet
        let pseudo = self.retry_pseudo_packet(&packet);
        self.tls.verify_retry_integrity(&pseudo, &tag)?;

        self.retry_received = true;
        self.token = Some(token);
        self.peer_connection_ids[0].id = scid;
        self.restart_write_pass();
        Ok(())
    }

    fn retry_pseudo_packet(&self, packet: &ProtectedPacket) -> Vec<u8> {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
        //# The Retry Pseudo-Packet is computed by taking the transmitted Retry
        //# packet, removing the Retry Integrity Tag, and prepending the two
        //# following fields: ODCID Length, Original Destination Connection ID
        let odcid = &self.original_destination_connection_id;
        let body = packet.as_bytes();
        let body = &body[..body.len().saturating_sub(packet::decoding::RETRY_INTEGRITY_TAG_LEN)];
        let mut pseudo = Vec::with_capacity(1 + odcid.len() + body.len());
        pseudo.push(odcid.len() as u8);
        pseudo.extend_from_slice(odcid.as_slice());
        pseudo.extend_from_slice(body);
        pseudo
    }

    fn any_packet_processed(&self) -> bool {
        self.spaces.initial.ack_manager.has_received_packets()
            || self.spaces.handshake.ack_manager.has_received_packets()
            || self.spaces.application.ack_manager.has_received_packets()
    }

    fn on_new_connection_id(
        &mut self,
        frame: &frame::NewConnectionId,
    ) -> Result<(), transport::Error> {
        let limit = self.limits.active_connection_id_limit.as_u64();
        let active = self
            .peer_connection_ids
            .iter()
            .filter(|id| !id.retired)
            .count() as u64;
        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# After processing a NEW_CONNECTION_ID frame and adding and retiring
        //# active connection IDs, if the number of active connection IDs
        //# exceeds the value advertised in its active_connection_id_limit
        //# transport parameter, an endpoint MUST close the connection with an
        //# error of type CONNECTION_ID_LIMIT_ERROR.
        if active >= limit {
            return Err(transport::Error::CONNECTION_ID_LIMIT_ERROR);
        }
        let id = weft_quic_core::connection::id::ConnectionId::try_from_slice(frame.connection_id)
            .ok_or(transport::Error::PROTOCOL_VIOLATION)?;
        if self
            .peer_connection_ids
            .iter()
            .any(|existing| existing.sequence_number == frame.sequence_number)
        {
            return Ok(());
        }
        self.peer_connection_ids.push(PeerId {
            id,
            sequence_number: frame.sequence_number,
            stateless_reset_token: Some(*frame.stateless_reset_token),
            retired: false,
            bound_path: None,
        });
        for peer_id in self.peer_connection_ids.iter_mut() {
            if peer_id.sequence_number < frame.retire_prior_to {
                peer_id.retired = true;
            }
        }
        Ok(())
    }

    fn on_peer_migration(
        &mut self,
        info: &DatagramInfo,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        if self.role.is_client() {
            // our own socket rebinds are driven explicitly
            return Ok(());
        }
        //= https://www.rfc-editor.org/rfc/rfc9000#section-9
        //# An endpoint MUST NOT initiate connection migration before the
        //# handshake is confirmed
        if !self.handshake_confirmed && self.limits.close_if_migration_during_handshake {
            return Err(transport::Error::INVALID_MIGRATION
                .with_reason("migration during handshake"));
        }
        if self
            .peer_parameters
            .as_ref()
            .map_or(false, |parameters| parameters.disable_active_migration)
        {
            self.stats_drop(now, 0, DropReason::MigrationDisabled);
            return Ok(());
        }

        let old_peer = self.paths.active_path().peer_address;
        let challenge_timeout = self
            .rtt
            .pto_period_backoff(PacketNumberSpace::ApplicationData, 1);
        let outcome = self.paths.on_peer_address_change(
            info.local_address,
            info.remote_address,
            now,
            self.random.as_mut(),
            &mut self.congestion,
            &mut self.rtt,
            &mut self.congestion_factory,
            challenge_timeout,
        );
        match outcome {
            Some(crate::path::MigrationOutcome::Refused) => {
                self.stats_drop(now, 0, DropReason::MigrationLimitExceeded);
                Err(transport::Error::INVALID_MIGRATION.with_reason("too many migrations"))
            }
            Some(result) => {
                let is_nat_rebind = result == crate::path::MigrationOutcome::NatRebind;
                let new_peer = info.remote_address;
                self.publish(now, |subscriber, now| {
                    subscriber.on_migration_attempted(
                        now,
                        &builder::MigrationAttempted {
                            old_peer_address: old_peer,
                            new_peer_address: new_peer,
                            is_nat_rebind,
                        },
                    )
                });
                self.arm_path_timer();
                Ok(())
            }
            None => Ok(()),
        }
    }

    // === undecryptable handling ===

    fn buffer_undecryptable(
        &mut self,
        packet: ProtectedPacket,
        level: EncryptionLevel,
        now: Timestamp,
    ) -> bool {
        let buffer = match level {
            EncryptionLevel::ZeroRtt => &mut self.undecryptable_zero_rtt,
            EncryptionLevel::OneRtt => &mut self.undecryptable_one_rtt,
            _ => {
                self.stats_drop(now, packet.len(), DropReason::CipherUnavailable);
                return false;
            }
        };
        if buffer.len() >= MAX_PACKETS_TO_BUFFER {
            self.stats_drop(now, packet.len(), DropReason::BufferOverflow);
            return false;
        }
        buffer.push(packet.as_bytes().to_vec());
        false
    }

    /// Retries parked packets once their reader cipher lands
    pub(crate) fn flush_undecryptable(&mut self, info: &DatagramInfo, now: Timestamp) {
        for level in [EncryptionLevel::ZeroRtt, EncryptionLevel::OneRtt] {
            if self.keys.read_keys(level).is_none() {
                continue;
            }
            let parked = match level {
                EncryptionLevel::ZeroRtt => core::mem::take(&mut self.undecryptable_zero_rtt),
                _ => core::mem::take(&mut self.undecryptable_one_rtt),
            };
            for mut bytes in parked {
                if let Err(error) = self.on_datagram_inner(info, &mut bytes, now) {
                    self.close_with(error.into(), now);
                    return;
                }
            }
        }
    }

    /// A packet failed decryption; a short one may be a stateless reset
    fn on_undecryptable(
        &mut self,
        is_short: bool,
        reset_candidate: Option<[u8; stateless_reset::TOKEN_LEN]>,
        packet_len: usize,
        now: Timestamp,
    ) -> bool {
        if is_short {
            if let Some(candidate) = reset_candidate {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.3.1
                //# An endpoint detects a potential stateless reset using the
                //# trailing 16 bytes of the UDP datagram.
                let matched = self.peer_connection_ids.iter().any(|peer| {
                    peer.stateless_reset_token.map_or(false, |token| {
                        stateless_reset::token_matches(&candidate, &token)
                    })
                });
                if matched {
                    self.close_with(Error::StatelessReset, now);
                    return true;
                }
            }
        }
        self.stats_drop(now, packet_len, DropReason::DecryptionFailed);
        false
    }

    pub(crate) fn stats_drop(&mut self, now: Timestamp, bytes: usize, reason: DropReason) {
        self.publish(now, |subscriber, now| {
            subscriber.on_packet_dropped(now, &builder::PacketDropped { bytes, reason })
        });
    }

    pub(crate) fn arm_ack_timer(&mut self) {
        let deadline = [
            self.spaces.initial.ack_manager.ack_timer(),
            self.spaces.handshake.ack_manager.ack_timer(),
            self.spaces.application.ack_manager.ack_timer(),
        ]
        .into_iter()
        .flatten()
        .min();
        match deadline {
            Some(deadline) => self.timers.ack_delay.set(deadline),
            None => self.timers.ack_delay.cancel(),
        }
    }

}
