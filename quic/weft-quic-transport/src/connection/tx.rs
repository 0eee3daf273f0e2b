// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The write path: handshake driving, frame scheduling, packet
//! emission, probes, and the loss-detection alarm.

use crate::{
    connection::{CloseState, Connection, Event},
    recovery::{SentPacketInfo, TimerPurpose},
    stream::ControlFrame,
    transmission::{LongForm, NoWriteReason, PacketBuilder, WriteFrame},
};
use weft_quic_core::{
    crypto::EncryptionLevel,
    event::builder,
    frame::{
        self, ConnectionClose, Crypto, DataBlocked, Datagram, HandshakeDone, ImmediateAck, Knob,
        MaxData, MaxStreamData, MaxStreams, NewToken, PathChallenge, PathResponse, Ping,
        ResetStream, ResetStreamAt, StopSending, Stream as StreamFrame, StreamDataBlocked,
        StreamsBlocked,
    },
    packet::{self, number::PacketNumberSpace},
    time::Timestamp,
    transmission::{Constraint, Interest},
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};

impl Connection {
    // === handshake driving ===

    /// Feeds buffered crypto bytes into the TLS engine and applies
    /// whatever it produced: keys, parameters, handshake completion
    pub(crate) fn drive_handshake(&mut self, now: Timestamp) -> Result<(), transport::Error> {
        for level in [EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::OneRtt]
        {
            let space_id = level.packet_number_space();
            loop {
                let Some(data) = self.spaces.get_mut(space_id).crypto_stream.pop_received()
                else {
                    break;
                };
                self.tls.on_crypto_data(level, &data)?;
            }
        }

        while let Some(update) = self.tls.take_key_update() {
            let level = update.level;
            if let Some(read) = update.read {
                self.keys.install_read(level, read);
            }
            if let Some(write) = update.write {
                let first_one_rtt =
                    level == EncryptionLevel::OneRtt && self.keys.write_keys(level).is_none();
                self.keys.install_write(level, write);
                if first_one_rtt {
                    self.on_one_rtt_keys_ready(now)?;
                }
            }
        }

        for level in [EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::OneRtt]
        {
            let space_id = level.packet_number_space();
            while let Some(data) = self.tls.produce_crypto_data(level) {
                self.spaces.get_mut(space_id).crypto_stream.write(data);
            }
        }

        if self.tls.is_handshake_complete() && !self.handshake_complete {
            self.handshake_complete = true;
            self.emit_event(Event::HandshakeComplete);
            if self.role.is_server() {
                //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
                //# the TLS handshake is considered confirmed at the server when
                //# the handshake completes
                self.handshake_done_pending = true;
                self.address_validated = true;
                self.on_handshake_confirmed(now);
            }
        }
        Ok(())
    }

    /// First 1-RTT write keys: process the peer's transport parameters
    fn on_one_rtt_keys_ready(&mut self, now: Timestamp) -> Result<(), transport::Error> {
        let Some(raw) = self.tls.peer_transport_parameters() else {
            return Ok(());
        };
        let parameters = TransportParameters::decode(
            weft_codec::DecoderBuffer::new(&raw),
            self.role.peer_type(),
        )?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
        //# An endpoint MUST treat the absence of the
        //# initial_source_connection_id transport parameter from either
        //# endpoint ... as a connection error of type
        //# TRANSPORT_PARAMETER_ERROR.
        if parameters.initial_source_connection_id.is_none() {
            return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                .with_reason("missing initial_source_connection_id"));
        }
        if self.role.is_client() {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
            //# an endpoint MUST treat the following as a connection error of type
            //# TRANSPORT_PARAMETER_ERROR or PROTOCOL_VIOLATION: a mismatch
            //# between values received from a peer in these transport parameters
            //# and the value sent in the corresponding Destination or Source
            //# Connection ID fields of Initial packets.
            match &parameters.original_destination_connection_id {
                Some(odcid) if *odcid == self.original_destination_connection_id => {}
                _ => {
                    return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("original_destination_connection_id mismatch"));
                }
            }
            if let Some(cached) = &self.cached_zero_rtt_parameters {
                if !parameters.is_compatible_with_cached(cached) {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.1
                    //# A server MUST NOT reduce limits when accepting 0-RTT
                    self.emit_event(Event::ZeroRttRejected);
                    return Err(transport::Error::TRANSPORT_PARAMETER_ERROR
                        .with_reason("0-rtt limits were reduced"));
                }
            }
        }

        self.flow.tx_max = parameters.initial_max_data.as_u64();
        self.rtt.on_max_ack_delay(parameters.max_ack_delay());
        self.streams.on_peer_parameters(&parameters);
        self.spaces
            .application
            .ack_manager
            .set_record_timestamps(parameters.ack_receive_timestamps_enabled);
        self.paths
            .set_max_migrations(self.limits.max_migrations_allowed);
        if let Some(token) = parameters.stateless_reset_token {
            self.peer_connection_ids[0].stateless_reset_token = Some(token);
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# Each endpoint advertises a max_idle_timeout, but the effective
        //# value at an endpoint is computed as the minimum of the two
        //# advertised values
        let local = self.limits.max_idle_timeout;
        self.idle_timeout = match parameters.max_idle_timeout() {
            Some(peer) => Some(local.min(peer)),
            None => Some(local),
        };
        self.refresh_idle_timer(now);

        // skipped packet numbers only make sense once 1-RTT traffic flows
        let period = self.limits.skip_packet_number_period;
        if period > 0 {
            self.spaces
                .application
                .tx
                .enable_skipping(period, self.random.as_mut());
        }

        self.peer_parameters = Some(parameters);
        Ok(())
    }

    pub(crate) fn on_handshake_confirmed(&mut self, now: Timestamp) {
        if self.handshake_confirmed {
            return;
        }
        self.handshake_confirmed = true;

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
        //# An endpoint MUST discard its Handshake keys when the TLS handshake
        //# is confirmed
        self.discard_space(PacketNumberSpace::Initial, now);
        self.discard_space(PacketNumberSpace::Handshake, now);
        self.paths.on_handshake_confirmed();

        self.emit_event(Event::HandshakeConfirmed);
        self.publish(now, |subscriber, now| {
            subscriber.on_handshake_confirmed(now, &builder::HandshakeConfirmed)
        });
    }

    /// Discards a space's keys and releases its retransmission state;
    /// the crypto stream is implicitly acknowledged
    fn discard_space(&mut self, space_id: PacketNumberSpace, _now: Timestamp) {
        let level = match space_id {
            PacketNumberSpace::Initial => EncryptionLevel::Initial,
            PacketNumberSpace::Handshake => EncryptionLevel::Handshake,
            PacketNumberSpace::ApplicationData => return,
        };
        self.keys.discard(level);
        let space = self.spaces.get_mut(space_id);
        space.is_discarded = true;
        space.crypto_stream.discard();
        let _ = space.recovery.discard();
        self.arm_loss_timer();
    }

    /// The server hands out a fresh address-validation token once the
    /// handshake settles
    pub fn issue_new_token(&mut self, token: bytes::Bytes) {
        debug_assert!(self.role.is_server());
        self.new_token_pending = Some(token);
        self.restart_write_pass();
    }

    /// The client supplies parameters cached with a 0-RTT ticket
    pub fn set_cached_zero_rtt_parameters(&mut self, parameters: TransportParameters) {
        self.cached_zero_rtt_parameters = Some(parameters);
    }

    // === loss timer ===

    pub(crate) fn arm_loss_timer(&mut self) {
        let deadline = [
            &self.spaces.initial,
            &self.spaces.handshake,
            &self.spaces.application,
        ]
        .into_iter()
        .filter(|space| !space.is_discarded)
        .filter_map(|space| space.recovery.timer(&self.rtt, self.loss.pto_count))
        .map(|(deadline, _)| deadline)
        .min();
        match deadline {
            Some(deadline) => self.timers.loss.set(deadline),
            None => self.timers.loss.cancel(),
        }
    }

    pub(crate) fn on_loss_timeout(&mut self, now: Timestamp) {
        let mut fired_pto = false;
        for space_id in PacketNumberSpace::all() {
            if self.spaces.get(space_id).is_discarded {
                continue;
            }
            let purpose = self
                .spaces
                .get(space_id)
                .recovery
                .timer(&self.rtt, self.loss.pto_count)
                .filter(|(deadline, _)| deadline.has_elapsed(now))
                .map(|(_, purpose)| purpose);

            match purpose {
                Some(TimerPurpose::LossTime) => {
                    let lost = {
                        let rtt = &self.rtt;
                        self.spaces
                            .get_mut(space_id)
                            .recovery
                            .detect_losses(now, rtt)
                    };
                    let outcome = crate::recovery::AckOutcome {
                        lost,
                        ..Default::default()
                    };
                    self.on_ack_outcome(outcome, space_id, now);
                }
                Some(TimerPurpose::Pto) => {
                    fired_pto = true;
                    self.queue_probe(space_id);
                }
                None => {}
            }
        }

        if fired_pto {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
            //# A sender computes its PTO timer every time an ack-eliciting
            //# packet is sent ... exponentially increasing the PTO period
            self.loss.pto_count += 1;
            self.loss.total_pto_count += 1;
        }
        self.arm_loss_timer();
        self.restart_write_pass();
    }

    /// Marks a probe owed in `space_id`; the next write pass emits it
    /// regardless of congestion limits
    fn queue_probe(&mut self, space_id: PacketNumberSpace) {
        let group = self.next_clone_group;
        self.next_clone_group += 1;

        // the probe clones the newest outstanding ack-eliciting
        // packet; acknowledging either resolves both
        let candidates = self.spaces.get(space_id).recovery.probe_candidates(1);
        for packet_number in candidates {
            self.spaces
                .get_mut(space_id)
                .recovery
                .assign_clone_group(packet_number, group);
        }
        self.spaces.get_mut(space_id).probe_pending = Some(group);
    }

    // === the write loop ===

    /// Fills `buffer` with the next outgoing datagram.
    ///
    /// Returns `None` when nothing may be sent right now; the reason
    /// is retained in `no_write_reason`.
    pub fn poll_transmit(&mut self, now: Timestamp, buffer: &mut [u8]) -> Option<usize> {
        let close_action = match &mut self.close_state {
            CloseState::Drained => return None,
            CloseState::Closing {
                error,
                close_frame_sent,
                resend_close,
                ..
            } => {
                if *close_frame_sent && !*resend_close {
                    return None;
                }
                let spec = close_frame_spec(error);
                *close_frame_sent = true;
                *resend_close = false;
                Some(spec)
            }
            CloseState::Open => None,
        };
        if let Some(spec) = close_action {
            let spec = spec?;
            return self.transmit_close(spec, now, buffer);
        }

        if self.write_pass_budget == 0 {
            self.no_write_reason = Some(NoWriteReason::PacketLimitReached);
            return None;
        }

        // wall-clock budget: one pass may hold the loop for at most a
        // fraction of the smoothed RTT
        let started = *self.write_pass_started.get_or_insert(now);
        let budget = self.rtt.smoothed_rtt() / self.limits.write_limit_rtt_fraction;
        if now.saturating_duration_since(started) > budget {
            self.no_write_reason = Some(NoWriteReason::TimeBudgetExhausted);
            self.timers.excess_write.set(now);
            return None;
        }

        let amplification = self.amplification_allowance();
        if amplification == 0 {
            self.no_write_reason = Some(NoWriteReason::AmplificationLimited);
            return None;
        }
        let max_datagram = packet::DEFAULT_MAX_UDP_PAYLOAD
            .min(buffer.len())
            .min(amplification as usize);

        let mut datagram_len = 0;
        let mut contains_ack_eliciting_initial = false;

        // coalesce: Initial, then Handshake, then 1-RTT
        for level in [EncryptionLevel::Initial, EncryptionLevel::Handshake, EncryptionLevel::OneRtt]
        {
            if datagram_len >= max_datagram {
                break;
            }
            let _ = self.write_packet(
                level,
                now,
                &mut buffer[..max_datagram],
                &mut datagram_len,
                &mut contains_ack_eliciting_initial,
            );
        }

        if datagram_len == 0 {
            if self.no_write_reason.is_none() {
                self.no_write_reason = Some(NoWriteReason::EmptyScheduler);
            }
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
        //# A client MUST expand the payload of all UDP datagrams carrying
        //# Initial packets to at least the smallest allowed maximum datagram
        //# size of 1200 bytes
        debug_assert!(
            !(self.role.is_client() && contains_ack_eliciting_initial)
                || datagram_len >= packet::MIN_INITIAL_DATAGRAM_LEN
                || max_datagram < packet::MIN_INITIAL_DATAGRAM_LEN
        );

        self.write_pass_budget -= 1;
        self.paths.active_path_mut().bytes_sent += datagram_len as u64;
        Some(datagram_len)
    }

    /// Appends one packet of `level` to the datagram under assembly
    fn write_packet(
        &mut self,
        level: EncryptionLevel,
        now: Timestamp,
        buffer: &mut [u8],
        datagram_len: &mut usize,
        contains_ack_eliciting_initial: &mut bool,
    ) -> Option<usize> {
        let space_id = level.packet_number_space();
        if self.spaces.get(space_id).is_discarded || self.keys.write_keys(level).is_none() {
            return None;
        }
        if level == EncryptionLevel::ZeroRtt {
            return None;
        }

        let probe = self.spaces.get(space_id).probe_pending;
        let interest = self.transmission_interest(space_id, now, probe.is_some());
        if interest.is_none() && probe.is_none() {
            return None;
        }

        // congestion gating: probes and loss repairs bypass the window
        let window = self.congestion.congestion_window();
        let in_flight = self.congestion.bytes_in_flight();
        let constraint = if self.congestion.is_congestion_limited() {
            Constraint::CongestionLimited
        } else {
            Constraint::None
        };
        let forced_interest = if probe.is_some() {
            Interest::Forced
        } else {
            interest
        };
        if !constraint.can_transmit(forced_interest) {
            self.no_write_reason = Some(NoWriteReason::CongestionLimited);
            return None;
        }
        let congestion_allowance = if probe.is_some() || interest == Interest::LostData {
            u64::MAX
        } else {
            window.saturating_sub(in_flight)
        };

        // pacing applies to application data only
        if level == EncryptionLevel::OneRtt && probe.is_none() {
            if let Some(next) = self.pacer.next_send_time(1200, now) {
                if next > now {
                    self.no_write_reason = Some(NoWriteReason::PacingLimited);
                    self.timers.excess_write.set(next);
                    return None;
                }
            }
        }

        // local key update once enough packets used the current phase
        if level == EncryptionLevel::OneRtt {
            self.maybe_initiate_key_update(now);
        }

        let remaining = &mut buffer[*datagram_len..];
        if remaining.len() < 64 {
            return None;
        }

        let packet_number = {
            let period = self.limits.skip_packet_number_period;
            let space = self.spaces.get_mut(space_id);
            space.tx.allocate(period, self.random.as_mut())
        };
        let largest_acked = self.spaces.get(space_id).recovery.largest_acked().unwrap_or(0);
        let pn = space_id.new_packet_number(VarInt::new(packet_number).unwrap_or(VarInt::MAX));
        let reference =
            space_id.new_packet_number(VarInt::new(largest_acked).unwrap_or(VarInt::MAX));
        let truncated = pn.truncate(reference)?;

        let tag_len = self.keys.write_keys(level).map(|keys| keys.key.tag_len())?;
        let destination = self.peer_connection_ids[0].id;
        let source = self.local_connection_ids[0].id;

        let mut builder = match level {
            EncryptionLevel::Initial => PacketBuilder::long(
                remaining,
                LongForm::Initial,
                self.version,
                &destination,
                &source,
                self.token.as_deref(),
                packet_number,
                truncated,
                tag_len,
            ),
            EncryptionLevel::Handshake => PacketBuilder::long(
                remaining,
                LongForm::Handshake,
                self.version,
                &destination,
                &source,
                None,
                packet_number,
                truncated,
                tag_len,
            ),
            _ => PacketBuilder::short(
                remaining,
                &destination,
                self.keys.one_rtt.write_phase,
                packet_number,
                truncated,
                tag_len,
            ),
        };

        let congestion_budget = congestion_allowance.min(builder.remaining() as u64);
        self.schedule_frames(&mut builder, level, space_id, congestion_budget, now);

        if !builder.has_frames() {
            self.no_write_reason = Some(NoWriteReason::NoFrame);
            return None;
        }

        // client Initials carrying ack-eliciting frames pad the
        // datagram to the 1200-byte floor
        let is_initial = level == EncryptionLevel::Initial;
        let builder_eliciting = builder
            .frames()
            .iter()
            .any(|frame| frame.ack_elicitation().is_ack_eliciting());
        if is_initial && self.role.is_client() && builder_eliciting {
            builder.pad_datagram_to(packet::MIN_INITIAL_DATAGRAM_LEN, *datagram_len);
            *contains_ack_eliciting_initial = true;
        }

        let keys = self.keys.write_keys(level)?;
        let (encoded_len, frames, ack_elicitation) = builder.finish(keys).ok()?;

        self.on_packet_written(
            space_id,
            level,
            packet_number,
            encoded_len,
            frames,
            ack_elicitation,
            probe,
            now,
        );
        *datagram_len += encoded_len;
        Some(encoded_len)
    }

    /// What `space_id` wants to transmit right now
    fn transmission_interest(
        &self,
        space_id: PacketNumberSpace,
        now: Timestamp,
        probing: bool,
    ) -> Interest {
        let space = self.spaces.get(space_id);
        let mut interest = space.crypto_stream.interest();
        interest = interest.merge(space.ack_manager.interest(now));
        if probing {
            interest = interest.merge(Interest::Forced);
        }
        if space_id.is_application_data() {
            interest = interest.merge(self.streams.interest());
            if self.ping_pending
                || self.handshake_done_pending
                || self.new_token_pending.is_some()
                || !self.datagram_tx.is_empty()
                || !self.knob_tx.is_empty()
                || !self.pending_path_responses.is_empty()
                || self.flow.rx_update_pending
            {
                interest = interest.merge(Interest::NewData);
            }
        }
        interest
    }

    /// Composes frames in priority order: ACK, CRYPTO, path frames,
    /// control, stream data, PING, DATAGRAM
    fn schedule_frames(
        &mut self,
        builder: &mut PacketBuilder,
        level: EncryptionLevel,
        space_id: PacketNumberSpace,
        congestion_budget: u64,
        now: Timestamp,
    ) {
        let mut budget = congestion_budget;

        // acknowledgments first: they cost nothing against flow control
        let extended = self
            .peer_parameters
            .as_ref()
            .map_or(false, |parameters| {
                parameters.ack_receive_timestamps_enabled
                    && parameters.extended_ack_features.as_u64()
                        & frame::ack::extended_features::RECEIVE_TIMESTAMPS
                        != 0
            });
        if self.spaces.get(space_id).ack_manager.interest(now) != Interest::None {
            if let Some(ack) = self.spaces.get(space_id).ack_manager.frame(now, extended) {
                let record = WriteFrame::Ack {
                    space: space_id,
                    largest_acknowledged: ack.largest_acknowledged(),
                };
                if builder.push_frame(&ack, record) {
                    let _ = self.spaces.get_mut(space_id).ack_manager.on_ack_sent();
                    self.arm_ack_timer();
                }
            }
        }

        // handshake bytes
        loop {
            let remaining = builder.remaining();
            if remaining < 8 {
                break;
            }
            let Some(transmission) = self
                .spaces
                .get_mut(space_id)
                .crypto_stream
                .next_transmission(remaining - 8)
            else {
                break;
            };
            let frame = Crypto {
                offset: VarInt::new(transmission.offset).unwrap_or(VarInt::MAX),
                data: &transmission.data[..],
            };
            let record = WriteFrame::Crypto {
                level,
                offset: transmission.offset,
                len: transmission.data.len() as u64,
            };
            if !builder.push_frame(&frame, record) {
                break;
            }
        }

        if space_id.is_application_data() {
            self.schedule_application_frames(builder, &mut budget, now);
        }

        // a probe with nothing else to say pings
        if self.spaces.get(space_id).probe_pending.is_some() && !builder.has_frames() {
            let prefer_immediate_ack = self
                .peer_parameters
                .as_ref()
                .map_or(false, |parameters| parameters.min_ack_delay.is_some())
                && space_id.is_application_data();
            if prefer_immediate_ack {
                builder.push_frame(&ImmediateAck, WriteFrame::ImmediateAck);
            } else {
                builder.push_frame(&Ping, WriteFrame::Ping);
            }
        }
    }

    fn schedule_application_frames(
        &mut self,
        builder: &mut PacketBuilder,
        budget: &mut u64,
        _now: Timestamp,
    ) {
        // connection-level window update
        if let Some(maximum) = self.flow.window_update() {
            let frame = MaxData {
                maximum_data: VarInt::new(maximum).unwrap_or(VarInt::MAX),
            };
            builder.push_frame(&frame, WriteFrame::MaxData { maximum_data: maximum });
        }

        // handshake confirmation and token issuance
        if self.handshake_done_pending
            && builder.push_frame(&HandshakeDone, WriteFrame::HandshakeDone)
        {
            self.handshake_done_pending = false;
        }
        if let Some(token) = self.new_token_pending.take() {
            let frame = NewToken { token: &token[..] };
            if builder.push_frame(&frame, WriteFrame::NewToken { token: token.clone() }) {
                // delivered; loss handling re-queues it
            } else {
                self.new_token_pending = Some(token);
            }
        }

        // path maintenance
        while let Some(data) = self.pending_path_responses.pop() {
            let frame = PathResponse { data };
            if !builder.push_frame(&frame, WriteFrame::PathResponse { data }) {
                self.pending_path_responses.push(data);
                break;
            }
        }
        if let Some((_, data)) = self.paths.next_challenge() {
            let frame = PathChallenge { data };
            if !builder.push_frame(&frame, WriteFrame::PathChallenge { data }) {
                self.paths.on_challenge_lost(&data);
            }
        }

        // stream control frames: resets, stop_sending, windows, blocked
        for control in self.streams.control_frames(8) {
            let pushed = match control {
                ControlFrame::ResetStream {
                    id,
                    error_code,
                    final_size,
                    reliable_size,
                } => match reliable_size {
                    Some(reliable_size) => builder.push_frame(
                        &ResetStreamAt {
                            stream_id: id.as_varint(),
                            application_error_code: error_code,
                            final_size: VarInt::new(final_size).unwrap_or(VarInt::MAX),
                            reliable_size: VarInt::new(reliable_size).unwrap_or(VarInt::MAX),
                        },
                        WriteFrame::ResetStreamAt {
                            stream_id: id,
                            application_error_code: error_code,
                            final_size,
                            reliable_size,
                        },
                    ),
                    None => builder.push_frame(
                        &ResetStream {
                            stream_id: id.as_varint(),
                            application_error_code: error_code,
                            final_size: VarInt::new(final_size).unwrap_or(VarInt::MAX),
                        },
                        WriteFrame::ResetStream {
                            stream_id: id,
                            application_error_code: error_code,
                            final_size,
                        },
                    ),
                },
                ControlFrame::StopSending { id, error_code } => builder.push_frame(
                    &StopSending {
                        stream_id: id.as_varint(),
                        application_error_code: error_code,
                    },
                    WriteFrame::StopSending {
                        stream_id: id,
                        application_error_code: error_code,
                    },
                ),
                ControlFrame::MaxStreamData { id, maximum } => builder.push_frame(
                    &MaxStreamData {
                        stream_id: id.as_varint(),
                        maximum_stream_data: VarInt::new(maximum).unwrap_or(VarInt::MAX),
                    },
                    WriteFrame::MaxStreamData {
                        stream_id: id,
                        maximum_stream_data: maximum,
                    },
                ),
                ControlFrame::MaxStreams {
                    stream_type,
                    maximum,
                } => builder.push_frame(
                    &MaxStreams {
                        stream_type,
                        maximum_streams: VarInt::new(maximum).unwrap_or(VarInt::MAX),
                    },
                    WriteFrame::MaxStreams {
                        stream_type,
                        maximum_streams: maximum,
                    },
                ),
                ControlFrame::StreamDataBlocked { id, limit } => builder.push_frame(
                    &StreamDataBlocked {
                        stream_id: id.as_varint(),
                        stream_data_limit: VarInt::new(limit).unwrap_or(VarInt::MAX),
                    },
                    WriteFrame::StreamDataBlocked {
                        stream_id: id,
                        stream_data_limit: limit,
                    },
                ),
                ControlFrame::StreamsBlocked {
                    stream_type,
                    stream_limit,
                } => builder.push_frame(
                    &StreamsBlocked {
                        stream_type,
                        stream_limit: VarInt::new(stream_limit).unwrap_or(VarInt::MAX),
                    },
                    WriteFrame::StreamsBlocked {
                        stream_type,
                        stream_limit,
                    },
                ),
            };
            if !pushed {
                break;
            }
        }

        // connection-level blocked signal
        if self.flow.tx_allowance() == 0
            && self.streams.interest() != Interest::None
            && self.flow.blocked_sent_at != Some(self.flow.tx_max)
        {
            let frame = DataBlocked {
                data_limit: VarInt::new(self.flow.tx_max).unwrap_or(VarInt::MAX),
            };
            if builder.push_frame(
                &frame,
                WriteFrame::DataBlocked {
                    data_limit: self.flow.tx_max,
                },
            ) {
                self.flow.blocked_sent_at = Some(self.flow.tx_max);
            }
        }

        // knobs ahead of bulk data
        while let Some((knob_space, id, value)) = self.knob_tx.pop_front() {
            let frame = Knob {
                knob_space,
                id,
                value: &value[..],
            };
            if !builder.push_frame(&frame, WriteFrame::Knob { knob_space, id }) {
                self.knob_tx.push_front((knob_space, id, value));
                break;
            }
        }

        // stream data, loss repairs first, bounded by connection flow
        // control and the congestion budget
        loop {
            let remaining = builder.remaining();
            if remaining < 16 || *budget == 0 {
                break;
            }
            let flow_allowance = self.flow.tx_allowance();
            let max_len = (remaining - 16).min(*budget as usize);
            let Some((id, group_id, transmission)) =
                self.streams.next_transmission(max_len, flow_allowance)
            else {
                break;
            };
            let len = transmission.data.len() as u64;
            let frame = StreamFrame {
                stream_id: id.as_varint(),
                group_id,
                offset: VarInt::new(transmission.offset).unwrap_or(VarInt::MAX),
                is_last_frame: false,
                is_fin: transmission.is_fin,
                data: &transmission.data[..],
            };
            let record = WriteFrame::Stream {
                stream_id: id,
                offset: transmission.offset,
                len,
                is_fin: transmission.is_fin,
                group_id,
            };
            if !builder.push_frame(&frame, record) {
                // return the chunk; it will be retried next packet
                self.streams
                    .on_frame_lost(id, transmission.offset, len, transmission.is_fin);
                break;
            }
            if !transmission.is_retransmission {
                // each new-data byte counts once toward the peer's
                // connection limit; retransmissions are already counted
                self.flow.tx_sent += len;
                self.loss.total_stream_bytes_sent += len;
                *budget = budget.saturating_sub(len);
            }
        }

        // keepalive/application ping
        if self.ping_pending && builder.push_frame(&Ping, WriteFrame::Ping) {
            self.ping_pending = false;
        }

        // unreliable datagrams ride in the slack
        while let Some(data) = self.datagram_tx.pop_front() {
            let frame = Datagram {
                is_last_frame: false,
                data: &data[..],
            };
            if !builder.push_frame(
                &frame,
                WriteFrame::Datagram {
                    len: data.len() as u64,
                },
            ) {
                self.datagram_tx.push_front(data);
                break;
            }
        }
    }

    /// Initiates a key update after enough packets in the phase
    fn maybe_initiate_key_update(&mut self, now: Timestamp) {
        if self.keys.one_rtt.is_update_pending() || !self.handshake_confirmed {
            return;
        }
        if self.keys.one_rtt.packets_sent_in_current_phase
            < self.limits.key_update_packet_count_interval
        {
            return;
        }
        let Ok((write, read)) = self.tls.derive_next_one_rtt_keys() else {
            return;
        };
        self.keys.rotate_one_rtt(write, read);
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

    /// Bookkeeping after a packet hit the wire
    #[allow(clippy::too_many_arguments)]
    fn on_packet_written(
        &mut self,
        space_id: PacketNumberSpace,
        level: EncryptionLevel,
        packet_number: u64,
        encoded_len: usize,
        frames: Vec<WriteFrame>,
        ack_elicitation: weft_quic_core::frame::AckElicitation,
        probe: Option<u64>,
        now: Timestamp,
    ) {
        self.spaces.get_mut(space_id).tx.on_packet_sent(packet_number);
        self.loss.total_packets_sent += 1;
        self.loss.total_bytes_sent += encoded_len as u64;

        if level == EncryptionLevel::OneRtt {
            self.keys.one_rtt.on_packet_sent(packet_number);
        }

        let is_probe = probe.is_some();
        if is_probe {
            self.spaces.get_mut(space_id).probe_pending = None;
        }

        let is_app_limited = {
            let window = self.congestion.congestion_window();
            let in_flight = self.congestion.bytes_in_flight();
            let interest = self.transmission_interest(space_id, now, false);
            interest.is_none() && in_flight + (encoded_len as u64) < window
        };

        //= https://www.rfc-editor.org/rfc/rfc9002#section-2
        //# Packets that contain only ACK frames do not count toward
        //# congestion control limits
        let retransmittable = frames.iter().any(WriteFrame::is_retransmittable);
        if retransmittable {
            self.congestion.on_packet_sent(
                weft_quic_core::recovery::congestion_controller::PacketInfo {
                    sent_bytes: encoded_len,
                    is_app_limited,
                    time_sent: now,
                },
            );
            self.pacer.on_packet_sent(encoded_len, now);

            let info = SentPacketInfo {
                packet_number,
                frames: frames.clone(),
                time_sent: now,
                sent_bytes: encoded_len,
                body_bytes: encoded_len.saturating_sub(40),
                ack_elicitation,
                cloned_packet_identifier: probe,
                is_app_limited,
                total_bytes_sent_snapshot: self.loss.total_bytes_sent,
                ttl_mark: None,
            };
            self.spaces.get_mut(space_id).recovery.on_packet_sent(info);
            self.arm_loss_timer();
        }

        if ack_elicitation.is_ack_eliciting() {
            self.refresh_idle_timer(now);
        }
        if is_app_limited {
            let (in_flight, window) = (
                self.congestion.bytes_in_flight(),
                self.congestion.congestion_window(),
            );
            self.congestion.on_app_limited(now);
            self.publish(now, |subscriber, now| {
                subscriber.on_app_limited(
                    now,
                    &builder::AppLimited {
                        bytes_in_flight: in_flight,
                        congestion_window: window,
                    },
                )
            });
        }

        let is_eliciting = ack_elicitation.is_ack_eliciting();
        self.publish(now, |subscriber, now| {
            subscriber.on_packet_sent(
                now,
                &builder::PacketSent {
                    packet_number,
                    space: space_id,
                    bytes: encoded_len,
                    is_ack_eliciting: is_eliciting,
                    is_probe,
                },
            )
        });
    }

    /// Emits the final CONNECTION_CLOSE datagram
    fn transmit_close(
        &mut self,
        spec: CloseSpec,
        _now: Timestamp,
        buffer: &mut [u8],
    ) -> Option<usize> {
        // send at the highest available level
        let level = [
            EncryptionLevel::OneRtt,
            EncryptionLevel::Handshake,
            EncryptionLevel::Initial,
        ]
        .into_iter()
        .find(|level| {
            self.keys.write_keys(*level).is_some()
                && !self.spaces.get(level.packet_number_space()).is_discarded
        })?;
        let space_id = level.packet_number_space();

        let packet_number = {
            let space = self.spaces.get_mut(space_id);
            space.tx.allocate(0, self.random.as_mut())
        };
        let largest_acked = self.spaces.get(space_id).recovery.largest_acked().unwrap_or(0);
        let pn = space_id.new_packet_number(VarInt::new(packet_number).unwrap_or(VarInt::MAX));
        let reference =
            space_id.new_packet_number(VarInt::new(largest_acked).unwrap_or(VarInt::MAX));
        let truncated = pn.truncate(reference)?;
        let tag_len = self.keys.write_keys(level).map(|keys| keys.key.tag_len())?;
        let destination = self.peer_connection_ids[0].id;
        let source = self.local_connection_ids[0].id;

        let mut builder = match level {
            EncryptionLevel::Initial => PacketBuilder::long(
                buffer,
                LongForm::Initial,
                self.version,
                &destination,
                &source,
                self.token.as_deref(),
                packet_number,
                truncated,
                tag_len,
            ),
            EncryptionLevel::Handshake => PacketBuilder::long(
                buffer,
                LongForm::Handshake,
                self.version,
                &destination,
                &source,
                None,
                packet_number,
                truncated,
                tag_len,
            ),
            _ => PacketBuilder::short(
                buffer,
                &destination,
                self.keys.one_rtt.write_phase,
                packet_number,
                truncated,
                tag_len,
            ),
        };

        let reason = spec.reason.as_bytes();
        let frame = ConnectionClose {
            error_code: spec.code,
            frame_type: spec.frame_type,
            reason: if reason.is_empty() { None } else { Some(reason) },
        };
        builder.push_frame(&frame, WriteFrame::ConnectionClose);

        let keys = self.keys.write_keys(level)?;
        let (encoded_len, _, _) = builder.finish(keys).ok()?;
        self.spaces.get_mut(space_id).tx.on_packet_sent(packet_number);
        Some(encoded_len)
    }
}

/// How a local close renders on the wire; `None` when no close frame
/// is owed (remote-initiated or silent teardown)
struct CloseSpec {
    code: VarInt,
    /// `Some` selects the transport variant of CONNECTION_CLOSE
    frame_type: Option<VarInt>,
    reason: &'static str,
}

fn close_frame_spec(error: &weft_quic_core::connection::Error) -> Option<CloseSpec> {
    use weft_quic_core::connection::{error::Initiator, Error};
    match error {
        Error::Closed {
            initiator: Initiator::Local,
        } => Some(CloseSpec {
            code: transport::Error::NO_ERROR.code,
            frame_type: Some(VarInt::ZERO),
            reason: "",
        }),
        Error::Transport {
            error,
            initiator: Initiator::Local,
        } => Some(CloseSpec {
            code: error.code,
            frame_type: error.frame_type.or(Some(VarInt::ZERO)),
            reason: error.reason,
        }),
        Error::Application {
            error,
            initiator: Initiator::Local,
        } => Some(CloseSpec {
            code: *error,
            frame_type: None,
            reason: "",
        }),
        Error::InvalidMigration => Some(CloseSpec {
            code: transport::Error::INVALID_MIGRATION.code,
            frame_type: Some(VarInt::ZERO),
            reason: "invalid migration",
        }),
        // remote closes, resets, and silent teardowns owe nothing
        _ => None,
    }
}
