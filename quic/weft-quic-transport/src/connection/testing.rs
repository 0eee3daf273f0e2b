// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A deterministic harness: scripted TLS engine, null ciphers, seeded
//! randomness, and a manual clock.

use crate::{
    connection::{Config, Connection, Event},
    transmission::{PacketBuilder, WriteFrame},
};
use bytes::Bytes;
use std::collections::VecDeque;
use weft_quic_core::{
    connection::{id::ConnectionId, Limits},
    crypto::{testing as crypto_testing, tls, EncryptionLevel, LevelKeys},
    endpoint,
    frame::{Ack, EcnCounts},
    inet::{DatagramInfo, ExplicitCongestionNotification},
    interval_set::IntervalSet,
    packet::number::PacketNumberSpace,
    random,
    recovery::congestion_controller::{testing::FixedWindow, Unpaced},
    stream::StreamType,
    time::{testing as time_testing, Clock, Timestamp},
    transport::{self, parameters::TransportParameters},
    varint::VarInt,
};
use weft_codec::{Encoder, EncoderBuffer};

/// A TLS engine that follows a script instead of doing cryptography
pub struct TestTls {
    key_updates: VecDeque<tls::KeyUpdate>,
    produced: VecDeque<(EncryptionLevel, Bytes)>,
    peer_parameters: Option<Bytes>,
    complete: bool,
}

impl TestTls {
    /// Ready-to-run: all levels keyed, handshake complete, peer
    /// parameters available
    pub fn completed(peer_parameters: &TransportParameters) -> Self {
        let mut key_updates = VecDeque::new();
        for level in [
            EncryptionLevel::Initial,
            EncryptionLevel::Handshake,
            EncryptionLevel::OneRtt,
        ] {
            key_updates.push_back(tls::KeyUpdate {
                level,
                read: Some(crypto_testing::null_level_keys()),
                write: Some(crypto_testing::null_level_keys()),
            });
        }
        let mut storage = vec![0u8; 2048];
        let mut encoder = EncoderBuffer::new(&mut storage);
        peer_parameters.encode(&mut encoder);
        let len = encoder.len();
        Self {
            key_updates,
            produced: VecDeque::new(),
            peer_parameters: Some(Bytes::copy_from_slice(&storage[..len])),
            complete: true,
        }
    }
}

impl tls::Session for TestTls {
    fn on_crypto_data(
        &mut self,
        _level: EncryptionLevel,
        _data: &[u8],
    ) -> Result<(), transport::Error> {
        Ok(())
    }

    fn produce_crypto_data(&mut self, level: EncryptionLevel) -> Option<Bytes> {
        if self.produced.front()?.0 == level {
            self.produced.pop_front().map(|(_, data)| data)
        } else {
            None
        }
    }

    fn take_key_update(&mut self) -> Option<tls::KeyUpdate> {
        self.key_updates.pop_front()
    }

    fn peer_transport_parameters(&mut self) -> Option<Bytes> {
        self.peer_parameters.clone()
    }

    fn is_handshake_complete(&self) -> bool {
        self.complete
    }

    fn derive_next_one_rtt_keys(&mut self) -> Result<(LevelKeys, LevelKeys), transport::Error> {
        Ok((
            crypto_testing::null_level_keys(),
            crypto_testing::null_level_keys(),
        ))
    }

    fn verify_retry_integrity(
        &self,
        _pseudo_packet: &[u8],
        _tag: &[u8; 16],
    ) -> Result<(), transport::Error> {
        Ok(())
    }
}

pub struct Harness {
    pub connection: Connection,
    pub clock: time_testing::Clock,
    /// The peer's next packet number per space
    peer_packet_number: u64,
}

pub fn peer_parameters() -> TransportParameters {
    TransportParameters {
        initial_source_connection_id: ConnectionId::try_from_slice(&[9; 8]),
        original_destination_connection_id: ConnectionId::try_from_slice(&[1; 8]),
        initial_max_data: VarInt::from_u32(1 << 20),
        initial_max_stream_data_bidi_local: VarInt::from_u32(1 << 20),
        initial_max_stream_data_bidi_remote: VarInt::from_u32(1 << 20),
        initial_max_stream_data_uni: VarInt::from_u32(1 << 20),
        initial_max_streams_bidi: VarInt::from_u8(100),
        initial_max_streams_uni: VarInt::from_u8(100),
        max_idle_timeout: VarInt::from_u16(30_000),
        ..Default::default()
    }
}

impl Harness {
    pub fn new_client(limits: Limits, window: u64) -> Self {
        Self::new(endpoint::Type::Client, limits, window, peer_parameters())
    }

    pub fn new(
        role: endpoint::Type,
        limits: Limits,
        window: u64,
        peer_params: TransportParameters,
    ) -> Self {
        let clock = time_testing::Clock::default();
        let config = Config {
            role,
            limits,
            version: weft_quic_core::packet::QUIC_VERSION_1,
            local_address: "10.0.0.1:4433".parse().unwrap(),
            peer_address: "10.0.0.2:4433".parse().unwrap(),
            local_connection_id: ConnectionId::try_from_slice(&[7; 8]).unwrap(),
            peer_connection_id: ConnectionId::try_from_slice(&[9; 8]).unwrap(),
            original_destination_connection_id: ConnectionId::try_from_slice(&[1; 8]).unwrap(),
            token: None,
        };
        let factory = move || -> Box<dyn weft_quic_core::recovery::CongestionController> {
            Box::new(FixedWindow::new(window))
        };
        let mut connection = Connection::new(
            config,
            Box::new(TestTls::completed(&peer_params)),
            Box::new(factory),
            Box::new(Unpaced),
            Box::new(random::testing::Seeded::default()),
            Box::new(weft_quic_core::event::NoopSubscriber),
        );
        connection
            .drive_handshake(clock.get_time())
            .expect("scripted handshake never fails");
        let mut harness = Self {
            connection,
            clock,
            peer_packet_number: 0,
        };
        // surface the handshake events before tests begin asserting
        let _ = harness.connection.take_events();
        harness
    }

    pub fn now(&self) -> Timestamp {
        self.clock.get_time()
    }

    pub fn datagram_info(&self) -> DatagramInfo {
        DatagramInfo {
            remote_address: "10.0.0.2:4433".parse().unwrap(),
            local_address: "10.0.0.1:4433".parse().unwrap(),
            ecn: ExplicitCongestionNotification::NotEct,
            receive_time: None,
            ttl: None,
            payload_len: 0,
        }
    }

    /// Drains every transmittable datagram, returning their sizes
    pub fn transmit_all(&mut self) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut buffer = vec![0u8; 1500];
        while let Some(len) = self.connection.poll_transmit(self.now(), &mut buffer) {
            sizes.push(len);
        }
        sizes
    }

    /// Builds and delivers a peer 1-RTT packet carrying an ACK frame
    pub fn deliver_ack(&mut self, ranges: &[core::ops::RangeInclusive<u64>], ack_delay_wire: u64) {
        self.deliver_ack_with_ecn(ranges, ack_delay_wire, None)
    }

    pub fn deliver_ack_with_ecn(
        &mut self,
        ranges: &[core::ops::RangeInclusive<u64>],
        ack_delay_wire: u64,
        ecn_counts: Option<EcnCounts>,
    ) {
        let mut set = IntervalSet::new();
        for range in ranges {
            set.insert(range.clone());
        }
        let ack = Ack {
            ack_delay: VarInt::new(ack_delay_wire).unwrap(),
            ack_ranges: set,
            ecn_counts,
            receive_timestamps: None,
        };
        self.deliver_frames(|builder| {
            builder.push_frame(&ack, WriteFrame::Ping);
        });
    }

    /// Builds a peer short-header packet from raw frames and feeds it
    /// to the connection
    pub fn deliver_frames(&mut self, fill: impl FnOnce(&mut PacketBuilder)) {
        let mut storage = vec![0u8; 1500];
        let pn = self.peer_packet_number;
        self.peer_packet_number += 1;
        let space = PacketNumberSpace::ApplicationData;
        let packet_number = space.new_packet_number(VarInt::new(pn).unwrap());
        let reference = space.new_packet_number(VarInt::ZERO);
        let truncated = packet_number.truncate(reference).unwrap();

        // the scripted peer always answers in the connection's
        // current phase
        let phase = self.connection.keys.one_rtt.write_phase;
        let mut builder = PacketBuilder::short(
            &mut storage,
            &ConnectionId::try_from_slice(&[7; 8]).unwrap(),
            phase,
            pn,
            truncated,
            crypto_testing::TAG_LEN,
        );
        fill(&mut builder);
        let (len, _, _) = builder
            .finish(&crypto_testing::null_level_keys())
            .expect("test packet always finishes");
        storage.truncate(len);

        let info = self.datagram_info();
        let now = self.now();
        self.connection.on_datagram_received(&info, &mut storage, now);
    }

    pub fn events(&mut self) -> Vec<Event> {
        self.connection.take_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::CloseState;
    use core::time::Duration;
    use weft_quic_core::packet::key_phase::KeyPhase;

    fn default_harness() -> Harness {
        Harness::new_client(Limits::default(), 1 << 20)
    }

    fn open_and_write(harness: &mut Harness, bytes: usize) -> weft_quic_core::stream::StreamId {
        let id = harness
            .connection
            .open_stream(StreamType::Bidirectional, None)
            .unwrap();
        harness
            .connection
            .write_stream(id, Bytes::from(vec![0x42; bytes]), false)
            .unwrap();
        id
    }

    #[test]
    fn stream_data_round_trips_into_packets() {
        let mut harness = default_harness();
        let id = open_and_write(&mut harness, 100);
        harness.connection.finish_stream(id).unwrap();
        let sizes = harness.transmit_all();
        assert_eq!(sizes.len(), 1);

        // the peer acks packet 0; the stream completes
        harness.deliver_ack(&[0..=0], 0);
        assert!(harness.connection.is_open());
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
    //= type=test
    //# An endpoint generates an RTT sample on receiving an ACK frame
    //# that meets the conditions
    #[test]
    fn rtt_baseline_sample() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        assert_eq!(harness.transmit_all().len(), 1);

        harness.clock.inc_by(Duration::from_millis(31));
        // ack_delay of 5ms with the default exponent of 3: 5000us >> 3
        harness.deliver_ack(&[0..=0], 5000 >> 3);

        let rtt = harness.connection.rtt();
        assert_eq!(rtt.latest_rtt(), Duration::from_millis(31));
        assert_eq!(rtt.latest_ack_delay(), Duration::from_millis(5));
        assert_eq!(rtt.min_rtt(), Duration::from_millis(31));
        assert_eq!(rtt.min_rtt_no_ack_delay(), Some(Duration::from_millis(26)));
    }

    #[test]
    fn ack_delay_exceeding_rtt_leaves_min_unavailable() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        harness.transmit_all();

        harness.clock.inc_by(Duration::from_millis(25));
        harness.deliver_ack(&[0..=0], 26_000 >> 3);

        let rtt = harness.connection.rtt();
        assert_eq!(rtt.min_rtt(), Duration::from_millis(25));
        assert_eq!(rtt.min_rtt_no_ack_delay(), None);
    }

    #[test]
    fn zero_time_rtt_sample() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        harness.transmit_all();
        harness.deliver_ack(&[0..=0], 0);

        let rtt = harness.connection.rtt();
        assert_eq!(rtt.min_rtt(), rtt.min_rtt_no_ack_delay().unwrap());
    }

    #[test]
    fn cwnd_limited_write_then_release() {
        let mut harness = Harness::new_client(Limits::default(), 7000);
        open_and_write(&mut harness, 10_000);

        let first_burst = harness.transmit_all();
        assert_eq!(first_burst.len(), 5, "cwnd of 7000 admits five packets");
        assert!(first_burst.iter().sum::<usize>() >= 7000);

        // acking everything reopens the window
        harness.connection.restart_write_pass();
        let largest = first_burst.len() as u64 - 1;
        harness.deliver_ack(&[0..=largest], 0);

        let second_burst = harness.transmit_all();
        assert!(
            (1..=3).contains(&second_burst.len()),
            "remaining bytes go out in at most three packets, got {}",
            second_burst.len()
        );
    }

    #[test]
    fn key_update_after_configured_interval() {
        let limits = Limits::default()
            .with_key_update_packet_count_interval(1)
            .unwrap();
        let mut harness = Harness::new_client(limits, 1 << 20);
        assert_eq!(harness.connection.keys.one_rtt.write_phase, KeyPhase::Zero);

        open_and_write(&mut harness, 10);
        harness.transmit_all();
        assert_eq!(harness.connection.keys.one_rtt.write_phase, KeyPhase::Zero);

        // the second packet crosses the interval and flips the phase
        let id = harness
            .connection
            .open_stream(StreamType::Bidirectional, None)
            .unwrap();
        harness
            .connection
            .write_stream(id, Bytes::from_static(b"more"), false)
            .unwrap();
        harness.transmit_all();
        assert_eq!(harness.connection.keys.one_rtt.write_phase, KeyPhase::One);
        assert!(harness.connection.keys.one_rtt.is_update_pending());

        // an ACK under the new phase verifies the update
        let pending = harness
            .connection
            .keys
            .one_rtt
            .pending_verification_packet_number
            .unwrap();
        harness.deliver_ack(&[0..=pending], 0);
        assert!(!harness.connection.keys.one_rtt.is_update_pending());
    }

    #[test]
    fn wrong_phase_ack_is_fatal() {
        let limits = Limits::default()
            .with_key_update_packet_count_interval(1)
            .unwrap();
        let mut harness = Harness::new_client(limits, 1 << 20);
        open_and_write(&mut harness, 10);
        harness.transmit_all();
        open_and_write(&mut harness, 10);
        harness.transmit_all();
        let pending = harness
            .connection
            .keys
            .one_rtt
            .pending_verification_packet_number
            .expect("update initiated");

        // simulate the ACK arriving in a packet protected under the
        // previous phase
        let mut set = IntervalSet::new();
        set.insert(0..=pending);
        let ack = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: set,
            ecn_counts: None,
            receive_timestamps: None,
        };
        let now = harness.now();
        let result = harness.connection.on_ack_frame(
            &ack,
            PacketNumberSpace::ApplicationData,
            true,
            now,
        );
        let error = result.unwrap_err();
        assert!(error.is_crypto_error());
        assert_eq!(
            error.reason,
            "Packet with key update was acked in the wrong phase"
        );
    }

    #[test]
    fn ack_of_skipped_packet_number_is_fatal() {
        let limits = Limits::default().with_skip_packet_number_period(1).unwrap();
        let mut harness = Harness::new_client(limits, 1 << 20);

        // force enough packets that a skip must occur
        for _ in 0..8 {
            open_and_write(&mut harness, 10);
            harness.transmit_all();
        }
        let skipped = harness
            .connection
            .spaces
            .application
            .tx
            .skipped()
            .expect("a packet number was skipped");

        harness.deliver_ack(&[skipped..=skipped], 0);
        assert!(!harness.connection.is_open());
    }

    #[test]
    fn ack_of_unsent_packet_is_fatal() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        harness.transmit_all();
        harness.deliver_ack(&[0..=99], 0);
        assert!(!harness.connection.is_open());
    }

    #[test]
    fn close_is_idempotent() {
        let mut harness = default_harness();
        let now = harness.now();
        harness.connection.close(None, now);
        let first_events = harness.events();
        assert!(first_events.contains(&Event::ConnectionEnd(None)));

        harness.connection.close(Some(VarInt::from_u8(7)), now);
        let second_events = harness.events();
        assert!(
            !second_events
                .iter()
                .any(|event| matches!(event, Event::ConnectionEnd(_))),
            "a second close must not re-fire the end callback"
        );

        // exactly one CONNECTION_CLOSE datagram leaves
        let mut buffer = vec![0u8; 1500];
        assert!(harness.connection.poll_transmit(now, &mut buffer).is_some());
        assert!(harness.connection.poll_transmit(now, &mut buffer).is_none());
    }

    #[test]
    fn idle_timeout_closes() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        harness.transmit_all();

        let deadline = harness.connection.timers.idle.expiration().unwrap();
        harness.clock.inc_by(deadline - harness.now() + Duration::from_millis(1));
        let now = harness.now();
        harness.connection.on_timeout(now);

        assert!(matches!(
            harness.connection.close_state,
            CloseState::Closing { .. }
        ));
        let events = harness.events();
        assert!(events.contains(&Event::ConnectionEnd(Some(
            weft_quic_core::connection::Error::IdleTimerExpired
        ))));
    }

    #[test]
    fn pto_fires_probe_after_silence() {
        let mut harness = default_harness();
        open_and_write(&mut harness, 5);
        assert_eq!(harness.transmit_all().len(), 1);

        let deadline = harness
            .connection
            .timers
            .loss
            .expiration()
            .expect("loss timer armed after an ack-eliciting packet");
        harness.clock.inc_by(deadline - harness.now() + Duration::from_millis(1));
        let now = harness.now();
        harness.connection.on_timeout(now);
        assert_eq!(harness.connection.loss_state().pto_count, 1);

        // the probe goes out despite no new application data
        let sizes = harness.transmit_all();
        assert!(!sizes.is_empty(), "PTO must emit a probe");
    }

    #[test]
    fn datagram_frames_round_trip() {
        let mut peer_params = peer_parameters();
        peer_params.max_datagram_frame_size = VarInt::from_u16(1200);
        let mut limits = Limits::default();
        limits.max_datagram_frame_size = VarInt::from_u16(1200);
        let mut harness = Harness::new(endpoint::Type::Client, limits, 1 << 20, peer_params);

        harness
            .connection
            .send_datagram(Bytes::from_static(b"fire and forget"))
            .unwrap();
        assert_eq!(harness.transmit_all().len(), 1);

        let datagram = weft_quic_core::frame::Datagram {
            is_last_frame: false,
            data: &b"from the peer"[..],
        };
        harness.deliver_frames(|builder| {
            builder.push_frame(
                &datagram,
                WriteFrame::Datagram {
                    len: b"from the peer".len() as u64,
                },
            );
        });
        assert_eq!(
            harness.connection.read_datagram(),
            Some(Bytes::from_static(b"from the peer"))
        );
    }

    #[test]
    fn migration_during_handshake_can_be_fatal() {
        let peer_params = peer_parameters();
        let limits = Limits::default();
        let mut harness = Harness::new(endpoint::Type::Server, limits, 1 << 20, peer_params);
        // server confirms at handshake completion in the scripted TLS,
        // so un-confirm for this scenario
        harness.connection.handshake_confirmed = false;

        let mut storage = vec![0u8; 1500];
        let pn = harness.peer_packet_number;
        harness.peer_packet_number += 1;
        let space = PacketNumberSpace::ApplicationData;
        let packet_number = space.new_packet_number(VarInt::new(pn).unwrap());
        let truncated = packet_number
            .truncate(space.new_packet_number(VarInt::ZERO))
            .unwrap();
        let mut builder = PacketBuilder::short(
            &mut storage,
            &ConnectionId::try_from_slice(&[7; 8]).unwrap(),
            KeyPhase::Zero,
            pn,
            truncated,
            crypto_testing::TAG_LEN,
        );
        builder.push_frame(&weft_quic_core::frame::Ping, WriteFrame::Ping);
        let (len, _, _) = builder.finish(&crypto_testing::null_level_keys()).unwrap();
        storage.truncate(len);

        let mut info = harness.datagram_info();
        info.remote_address = "198.51.100.9:9999".parse().unwrap();
        let now = harness.now();
        harness.connection.on_datagram_received(&info, &mut storage, now);

        assert!(!harness.connection.is_open());
        let events = harness.events();
        assert!(events
            .iter()
            .any(|event| matches!(event, Event::ConnectionEnd(Some(_)))));
    }

    #[test]
    fn acked_intervals_under_reordering() {
        let mut harness = default_harness();
        let id = harness
            .connection
            .open_stream(StreamType::Bidirectional, None)
            .unwrap();
        harness
            .connection
            .write_stream(id, Bytes::from_static(b"hello"), false)
            .unwrap();
        assert_eq!(harness.transmit_all().len(), 1);
        harness.connection.restart_write_pass();
        harness
            .connection
            .write_stream(id, Bytes::from_static(b"world"), false)
            .unwrap();
        assert_eq!(harness.transmit_all().len(), 1);

        // the packet carrying "world" is acknowledged first
        harness.deliver_ack(&[1..=1], 0);
        {
            let stream = harness.connection.streams.get(id).unwrap();
            let send = stream.send.as_ref().unwrap();
            assert_eq!(
                send.acked_intervals().intervals().collect::<Vec<_>>(),
                vec![5..=9]
            );
        }

        harness.deliver_ack(&[0..=1], 0);
        let stream = harness.connection.streams.get(id).unwrap();
        let send = stream.send.as_ref().unwrap();
        assert_eq!(
            send.acked_intervals().intervals().collect::<Vec<_>>(),
            vec![0..=9]
        );
    }
}
