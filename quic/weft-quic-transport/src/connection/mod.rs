// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection state machine.
//!
//! Ingress: `on_datagram_received`. Egress: `poll_transmit`, called
//! until it returns `None`. Time: `next_timer` / `on_timeout`.
//! Application work surfaces through `take_events`.

mod crypto_state;
mod rx;
mod timers;
mod tx;

pub use crypto_state::{CryptoState, OneRttPhase};
pub use timers::Timers;

use crate::{
    path,
    space::PacketSpace,
    stream::{ByteEventKind, StreamEvent, StreamManager},
    transmission::NoWriteReason,
};
use bytes::Bytes;
use core::time::Duration;
use std::collections::VecDeque;
use std::net::SocketAddr;
use weft_quic_core::{
    connection::{
        error::OperationError,
        id::{ConnectionId, LocalId, PeerId},
        limits::{Limits, ANTI_AMPLIFICATION_MULTIPLIER},
        Error,
    },
    crypto::tls,
    endpoint,
    event::{builder, Subscriber},
    packet::number::PacketNumberSpace,
    random,
    recovery::{congestion_controller::Pacer, CongestionController, RttEstimator},
    stream::{StreamId, StreamType},
    time::Timestamp,
    transport::parameters::TransportParameters,
    varint::VarInt,
};

use crate::recovery::LossState;

/// Packets a single write pass may emit before yielding
const WRITE_PASS_PACKET_LIMIT: u32 = 16;

/// Multiple of the PTO the close state drains for
const DRAIN_FACTOR: u32 = 3;

/// Undecryptable packets buffered per pending encryption level
const MAX_PACKETS_TO_BUFFER: usize = 10;

/// Application-visible happenings, drained with `take_events`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Stream(StreamEvent),
    DatagramReceived,
    HandshakeComplete,
    HandshakeConfirmed,
    /// Exactly one end-of-connection event is ever surfaced
    ConnectionEnd(Option<Error>),
    PingAcknowledged,
    PingTimeout,
    KnobReceived {
        knob_space: VarInt,
        id: VarInt,
        value: Bytes,
    },
    NewTokenReceived(Bytes),
    ZeroRttRejected,
}

#[derive(Debug)]
enum CloseState {
    Open,
    /// A close is owed or sent; absorbing in-flight packets
    Closing {
        error: Error,
        close_frame_sent: bool,
        /// Re-send the close (once per burst) when the peer keeps
        /// transmitting
        resend_close: bool,
        drain_until: Timestamp,
    },
    Drained,
}

pub struct Config {
    pub role: endpoint::Type,
    pub limits: Limits,
    pub version: u32,
    pub local_address: SocketAddr,
    pub peer_address: SocketAddr,
    pub local_connection_id: ConnectionId,
    pub peer_connection_id: ConnectionId,
    pub original_destination_connection_id: ConnectionId,
    /// Client: token from a previous NEW_TOKEN or Retry
    pub token: Option<Bytes>,
}

struct Spaces {
    initial: PacketSpace,
    handshake: PacketSpace,
    application: PacketSpace,
}

impl Spaces {
    fn new() -> Self {
        Self {
            initial: PacketSpace::new(PacketNumberSpace::Initial),
            handshake: PacketSpace::new(PacketNumberSpace::Handshake),
            application: PacketSpace::new(PacketNumberSpace::ApplicationData),
        }
    }

    fn get(&self, space: PacketNumberSpace) -> &PacketSpace {
        match space {
            PacketNumberSpace::Initial => &self.initial,
            PacketNumberSpace::Handshake => &self.handshake,
            PacketNumberSpace::ApplicationData => &self.application,
        }
    }

    fn get_mut(&mut self, space: PacketNumberSpace) -> &mut PacketSpace {
        match space {
            PacketNumberSpace::Initial => &mut self.initial,
            PacketNumberSpace::Handshake => &mut self.handshake,
            PacketNumberSpace::ApplicationData => &mut self.application,
        }
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut PacketSpace> {
        [
            &mut self.initial,
            &mut self.handshake,
            &mut self.application,
        ]
        .into_iter()
    }
}

/// Connection-level flow control, both directions
#[derive(Debug, Default)]
struct ConnectionFlow {
    /// The peer's limit on our aggregate stream data
    tx_max: u64,
    /// Aggregate stream bytes we have sent toward that limit
    tx_sent: u64,
    /// The limit we advertise
    rx_max: u64,
    /// The window we maintain ahead of consumption
    rx_window: u64,
    /// Aggregate received stream bytes accounted so far
    rx_accounted: u64,
    /// Aggregate bytes the application has consumed
    rx_consumed: u64,
    rx_update_pending: bool,
    /// The limit we last announced DATA_BLOCKED at
    blocked_sent_at: Option<u64>,
}

impl ConnectionFlow {
    fn tx_allowance(&self) -> u64 {
        self.tx_max.saturating_sub(self.tx_sent)
    }

    fn on_rx_consumed(&mut self, bytes: u64) {
        self.rx_consumed += bytes;
        let target = self.rx_consumed + self.rx_window;
        if target.saturating_sub(self.rx_max) >= self.rx_window / 2 {
            self.rx_update_pending = true;
        }
    }

    fn window_update(&mut self) -> Option<u64> {
        if !self.rx_update_pending {
            return None;
        }
        self.rx_update_pending = false;
        self.rx_max = self.rx_consumed + self.rx_window;
        Some(self.rx_max)
    }
}

pub struct Connection {
    role: endpoint::Type,
    limits: Limits,
    version: u32,
    original_destination_connection_id: ConnectionId,
    local_connection_ids: Vec<LocalId>,
    peer_connection_ids: Vec<PeerId>,
    token: Option<Bytes>,
    spaces: Spaces,
    keys: CryptoState,
    tls: Box<dyn tls::Session>,
    peer_parameters: Option<TransportParameters>,
    /// Parameters promised alongside a 0-RTT ticket, for the weaker-
    /// limits cross-check on the client
    cached_zero_rtt_parameters: Option<TransportParameters>,
    handshake_complete: bool,
    handshake_confirmed: bool,
    handshake_done_pending: bool,
    new_token_pending: Option<Bytes>,
    /// The peer's address is validated (server side: token or
    /// handshake completion)
    address_validated: bool,
    streams: StreamManager,
    flow: ConnectionFlow,
    rtt: RttEstimator,
    loss: LossState,
    congestion: Box<dyn CongestionController>,
    congestion_factory: Box<dyn FnMut() -> Box<dyn CongestionController> + Send>,
    pacer: Box<dyn Pacer>,
    paths: path::Manager,
    random: Box<dyn random::Generator>,
    subscriber: Box<dyn Subscriber>,
    close_state: CloseState,
    timers: Timers,
    /// Effective idle timeout: min of both endpoints' advertisements
    idle_timeout: Option<Duration>,
    datagram_rx: VecDeque<Bytes>,
    datagram_tx: VecDeque<Bytes>,
    pending_events: Vec<Event>,
    /// 0-RTT / 1-RTT packets parked until their reader cipher lands
    undecryptable_zero_rtt: Vec<Vec<u8>>,
    undecryptable_one_rtt: Vec<Vec<u8>>,
    ping_pending: bool,
    knob_tx: VecDeque<(VarInt, VarInt, Bytes)>,
    /// PATH_RESPONSE frames owed for received challenges
    pending_path_responses: Vec<[u8; 8]>,
    /// At most one Retry is honored per connection attempt
    retry_received: bool,
    /// Highest ECN-CE count the peer has reported, for edge detection
    peer_reported_ecn_ce: VarInt,
    next_clone_group: u64,
    /// Packets remaining in the current write pass
    write_pass_budget: u32,
    /// Anchor of the current write pass for the sRTT-fraction budget
    write_pass_started: Option<Timestamp>,
    /// Sticky record of why the last write pass stopped
    no_write_reason: Option<NoWriteReason>,
    end_event_delivered: bool,
}

impl Connection {
    pub fn new(
        config: Config,
        tls: Box<dyn tls::Session>,
        mut congestion_factory: Box<dyn FnMut() -> Box<dyn CongestionController> + Send>,
        pacer: Box<dyn Pacer>,
        random: Box<dyn random::Generator>,
        subscriber: Box<dyn Subscriber>,
    ) -> Self {
        let streams = StreamManager::new(
            config.role,
            config.limits.max_streams_bidi.as_u64(),
            config.limits.max_streams_uni.as_u64(),
            config.limits.max_stream_data_bidi_local.as_u64(),
            config.limits.max_stream_data_uni.as_u64(),
        );
        let congestion = congestion_factory();
        let mut random = random;
        let mut local_reset_token = [0u8; 16];
        random.fill(&mut local_reset_token);

        let flow = ConnectionFlow {
            rx_max: config.limits.max_data.as_u64(),
            rx_window: config.limits.max_data.as_u64(),
            ..Default::default()
        };

        Self {
            role: config.role,
            limits: config.limits,
            version: config.version,
            original_destination_connection_id: config.original_destination_connection_id,
            local_connection_ids: vec![LocalId {
                id: config.local_connection_id,
                sequence_number: VarInt::ZERO,
                stateless_reset_token: local_reset_token,
                retired: false,
            }],
            peer_connection_ids: vec![PeerId {
                id: config.peer_connection_id,
                sequence_number: VarInt::ZERO,
                stateless_reset_token: None,
                retired: false,
                bound_path: Some(0),
            }],
            token: config.token,
            spaces: Spaces::new(),
            keys: CryptoState::default(),
            tls,
            peer_parameters: None,
            cached_zero_rtt_parameters: None,
            handshake_complete: false,
            handshake_confirmed: false,
            handshake_done_pending: false,
            new_token_pending: None,
            // clients validate the server by construction
            address_validated: config.role.is_client(),
            streams,
            flow,
            rtt: RttEstimator::default(),
            loss: LossState::default(),
            congestion,
            congestion_factory,
            pacer,
            paths: path::Manager::new(config.local_address, config.peer_address),
            random,
            subscriber,
            close_state: CloseState::Open,
            timers: Timers::default(),
            idle_timeout: Some(Limits::default().max_idle_timeout),
            datagram_rx: VecDeque::new(),
            datagram_tx: VecDeque::new(),
            pending_events: Vec::new(),
            undecryptable_zero_rtt: Vec::new(),
            undecryptable_one_rtt: Vec::new(),
            ping_pending: false,
            knob_tx: VecDeque::new(),
            pending_path_responses: Vec::new(),
            retry_received: false,
            peer_reported_ecn_ce: VarInt::ZERO,
            next_clone_group: 0,
            write_pass_budget: WRITE_PASS_PACKET_LIMIT,
            write_pass_started: None,
            no_write_reason: None,
            end_event_delivered: false,
        }
    }

    #[inline]
    pub fn role(&self) -> endpoint::Type {
        self.role
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    #[inline]
    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.close_state, CloseState::Open)
    }

    #[inline]
    pub fn peer_parameters(&self) -> Option<&TransportParameters> {
        self.peer_parameters.as_ref()
    }

    #[inline]
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    #[inline]
    pub fn loss_state(&self) -> &LossState {
        &self.loss
    }

    #[inline]
    pub fn local_address(&self) -> SocketAddr {
        self.paths.active_path().local_address
    }

    #[inline]
    pub fn peer_address(&self) -> SocketAddr {
        self.paths.active_path().peer_address
    }

    #[inline]
    pub fn no_write_reason(&self) -> Option<NoWriteReason> {
        self.no_write_reason
    }

    /// Drains everything the application should see
    pub fn take_events(&mut self) -> Vec<Event> {
        let mut events = core::mem::take(&mut self.pending_events);
        events.extend(self.streams.take_events().into_iter().map(Event::Stream));
        events
    }

    // === application surface ===

    fn ensure_open(&self) -> Result<(), OperationError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(OperationError::ConnectionClosed)
        }
    }

    pub fn open_stream(
        &mut self,
        stream_type: StreamType,
        group_id: Option<VarInt>,
    ) -> Result<StreamId, OperationError> {
        self.ensure_open()?;
        self.streams.open(stream_type, group_id)
    }

    pub fn write_stream(
        &mut self,
        id: StreamId,
        data: Bytes,
        fin: bool,
    ) -> Result<u64, OperationError> {
        self.ensure_open()?;
        let offset = self.streams.write(id, data, fin)?;
        self.restart_write_pass();
        Ok(offset)
    }

    pub fn finish_stream(&mut self, id: StreamId) -> Result<(), OperationError> {
        self.ensure_open()?;
        let result = self.streams.finish(id);
        self.restart_write_pass();
        result
    }

    pub fn reset_stream(&mut self, id: StreamId, error_code: VarInt) -> Result<(), OperationError> {
        self.ensure_open()?;
        let result = self.streams.reset(id, error_code);
        self.restart_write_pass();
        result
    }

    pub fn stop_sending(&mut self, id: StreamId, error_code: VarInt) -> Result<(), OperationError> {
        self.ensure_open()?;
        let result = self.streams.stop_sending(id, error_code);
        self.restart_write_pass();
        result
    }

    pub fn read_stream(&mut self, id: StreamId) -> Result<Option<Bytes>, OperationError> {
        let data = self.streams.read(id)?;
        if let Some(data) = &data {
            self.flow.on_rx_consumed(data.len() as u64);
        }
        Ok(data)
    }

    pub fn register_byte_event(
        &mut self,
        id: StreamId,
        kind: ByteEventKind,
        offset: u64,
        token: u64,
    ) -> Result<(), OperationError> {
        self.ensure_open()?;
        self.streams.register_byte_event(id, kind, offset, token)?;
        Ok(())
    }

    /// Queues an unreliable datagram, dropping the oldest on overflow
    pub fn send_datagram(&mut self, data: Bytes) -> Result<(), OperationError> {
        self.ensure_open()?;
        let max_size = self
            .peer_parameters
            .as_ref()
            .map_or(0, |parameters| parameters.max_datagram_frame_size.as_u64());
        if max_size == 0 || data.len() as u64 > max_size {
            return Err(OperationError::InvalidOperation);
        }
        if self.datagram_tx.len() >= 64 {
            self.datagram_tx.pop_front();
        }
        self.datagram_tx.push_back(data);
        self.restart_write_pass();
        Ok(())
    }

    pub fn read_datagram(&mut self) -> Option<Bytes> {
        self.datagram_rx.pop_front()
    }

    /// Requests a PING; `PingAcknowledged` or `PingTimeout` follows
    pub fn send_ping(&mut self, timeout: Duration, now: Timestamp) -> Result<(), OperationError> {
        self.ensure_open()?;
        self.ping_pending = true;
        self.timers.ping.set(now + timeout);
        self.restart_write_pass();
        Ok(())
    }

    pub fn send_knob(
        &mut self,
        knob_space: VarInt,
        id: VarInt,
        value: Bytes,
    ) -> Result<(), OperationError> {
        self.ensure_open()?;
        let supported = self
            .peer_parameters
            .as_ref()
            .map_or(false, |parameters| parameters.knob_frames_supported);
        if !supported {
            return Err(OperationError::KnobFrameUnsupported);
        }
        self.knob_tx.push_back((knob_space, id, value));
        self.restart_write_pass();
        Ok(())
    }

    /// Application-initiated close; `error_code == None` is graceful
    pub fn close(&mut self, error_code: Option<VarInt>, now: Timestamp) {
        let error = match error_code {
            Some(code) => Error::Application {
                error: code,
                initiator: weft_quic_core::connection::error::Initiator::Local,
            },
            None => Error::Closed {
                initiator: weft_quic_core::connection::error::Initiator::Local,
            },
        };
        self.close_with(error, now);
    }

    // === close machinery ===

    /// Funnel for every connection-terminating condition
    pub(crate) fn close_with(&mut self, error: Error, now: Timestamp) {
        if !matches!(self.close_state, CloseState::Open) {
            // idempotent: a second close neither re-fires callbacks
            // nor extends the drain period
            return;
        }

        let drain = self.drain_period();
        self.close_state = CloseState::Closing {
            error,
            close_frame_sent: false,
            resend_close: false,
            drain_until: now + drain,
        };

        // everything except the drain timer dies with the connection
        self.timers.cancel_all();
        self.timers.drain.set(now + drain);

        self.streams.close_all();
        for space in self.spaces.iter_mut() {
            let _ = space.recovery.discard();
        }
        self.datagram_tx.clear();
        self.congestion.on_discard();

        self.subscriber
            .on_connection_closed(now, &builder::ConnectionClosed { error });
        if !self.end_event_delivered {
            self.end_event_delivered = true;
            let event = if error.is_graceful() {
                Event::ConnectionEnd(None)
            } else {
                Event::ConnectionEnd(Some(error))
            };
            self.pending_events.push(event);
        }
    }

    fn drain_period(&self) -> Duration {
        self.rtt
            .pto_period(PacketNumberSpace::ApplicationData)
            .saturating_mul(DRAIN_FACTOR)
    }

    // === timers ===

    /// The earliest deadline the embedding loop must honor
    pub fn next_timer(&self) -> Option<Timestamp> {
        self.timers.next_expiration()
    }

    pub fn on_timeout(&mut self, now: Timestamp) {
        if self.timers.drain.poll_expiration(now) {
            self.close_state = CloseState::Drained;
            self.timers.cancel_all();
            return;
        }
        if matches!(self.close_state, CloseState::Closing { .. } | CloseState::Drained) {
            return;
        }

        if self.timers.idle.poll_expiration(now) {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
            //# If a max_idle_timeout is specified by either endpoint in its
            //# transport parameters, the connection is silently closed and its
            //# state is discarded when it remains idle
            self.close_with(Error::IdleTimerExpired, now);
            return;
        }

        if self.timers.keepalive.poll_expiration(now) {
            self.ping_pending = true;
            self.restart_write_pass();
        }

        if self.timers.loss.poll_expiration(now) {
            self.on_loss_timeout(now);
        }

        if self.timers.ack_delay.poll_expiration(now) {
            // the pending ACK is picked up by the next write pass
            self.restart_write_pass();
        }

        if self.timers.path_validation.poll_expiration(now) {
            if self.paths.on_timeout(now) {
                self.close_with(Error::InvalidMigration, now);
                return;
            }
            self.arm_path_timer();
        }

        if self.timers.ping.poll_expiration(now) {
            self.pending_events.push(Event::PingTimeout);
        }

        if self.timers.excess_write.poll_expiration(now) {
            self.restart_write_pass();
        }
    }

    pub(crate) fn arm_path_timer(&mut self) {
        match self.paths.challenge_timer() {
            Some(deadline) => self.timers.path_validation.set(deadline),
            None => self.timers.path_validation.cancel(),
        }
    }

    /// Re-arms the idle (and keepalive) deadlines on activity
    pub(crate) fn refresh_idle_timer(&mut self, now: Timestamp) {
        let Some(idle_timeout) = self.idle_timeout else {
            return;
        };
        self.timers.idle.set(now + idle_timeout);
        if self.limits.enable_keepalive {
            self.timers.keepalive.set(now + idle_timeout / 2);
        }
    }

    /// A new burst of work resets the write-pass budget
    pub(crate) fn restart_write_pass(&mut self) {
        self.write_pass_budget = WRITE_PASS_PACKET_LIMIT;
        self.write_pass_started = None;
        self.no_write_reason = None;
    }

    pub(crate) fn amplification_allowance(&self) -> u64 {
        if self.address_validated {
            u64::MAX
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
            //# an endpoint MUST limit the amount of data it sends to the
            //# unvalidated address to three times the amount of data received
            //# from that address
            self.paths
                .active_path()
                .amplification_allowance(ANTI_AMPLIFICATION_MULTIPLIER)
        }
    }

    pub(crate) fn emit_event(&mut self, event: Event) {
        self.pending_events.push(event);
    }

    pub(crate) fn publish<F: FnOnce(&mut dyn Subscriber, Timestamp)>(
        &mut self,
        now: Timestamp,
        publish: F,
    ) {
        publish(self.subscriber.as_mut(), now);
    }
}

#[cfg(test)]
pub(crate) mod testing;
