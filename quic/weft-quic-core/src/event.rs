// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection lifecycle events fanned out to observers.
//!
//! Subscribers receive plain-old-data snapshots; nothing here feeds
//! back into transport behavior. qlog emission, statistics, and
//! application observers all hang off this one trait.

use crate::{
    connection,
    packet::number::PacketNumberSpace,
    time::Timestamp,
};
use core::time::Duration;
use std::net::SocketAddr;

pub mod builder {
    use super::*;

    #[derive(Clone, Copy, Debug)]
    pub struct PacketSent {
        pub packet_number: u64,
        pub space: PacketNumberSpace,
        pub bytes: usize,
        pub is_ack_eliciting: bool,
        pub is_probe: bool,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct PacketReceived {
        pub packet_number: u64,
        pub space: PacketNumberSpace,
        pub bytes: usize,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct PacketDropped {
        pub bytes: usize,
        pub reason: DropReason,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum DropReason {
        DecryptionFailed,
        CipherUnavailable,
        ParseError,
        UnknownConnectionId,
        InvalidDestinationConnectionId,
        BufferOverflow,
        VersionMismatch,
        MigrationDisabled,
        MigrationLimitExceeded,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct PacketLost {
        pub packet_number: u64,
        pub space: PacketNumberSpace,
        pub bytes: usize,
        pub is_time_threshold: bool,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct RttUpdated {
        pub latest_rtt: Duration,
        pub smoothed_rtt: Duration,
        pub min_rtt: Duration,
        pub ack_delay: Duration,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct KeyUpdated {
        /// Phase in use after the update
        pub phase: u8,
        pub initiated_locally: bool,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct MigrationAttempted {
        pub old_peer_address: SocketAddr,
        pub new_peer_address: SocketAddr,
        pub is_nat_rebind: bool,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct PathValidated {
        pub peer_address: SocketAddr,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct CongestionEvent {
        pub bytes_lost: u64,
        pub is_persistent: bool,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct AppLimited {
        pub bytes_in_flight: u64,
        pub congestion_window: u64,
    }

    #[derive(Clone, Copy, Debug)]
    pub struct HandshakeConfirmed;

    #[derive(Clone, Copy, Debug)]
    pub struct ConnectionClosed {
        pub error: connection::Error,
    }
}

/// A single observer of connection events.
///
/// Every method has a default empty body; implementations override
/// only what they watch.
pub trait Subscriber: 'static + Send {
    fn on_packet_sent(&mut self, _now: Timestamp, _event: &builder::PacketSent) {}

    fn on_packet_received(&mut self, _now: Timestamp, _event: &builder::PacketReceived) {}

    fn on_packet_dropped(&mut self, _now: Timestamp, _event: &builder::PacketDropped) {}

    fn on_packet_lost(&mut self, _now: Timestamp, _event: &builder::PacketLost) {}

    fn on_rtt_updated(&mut self, _now: Timestamp, _event: &builder::RttUpdated) {}

    fn on_key_updated(&mut self, _now: Timestamp, _event: &builder::KeyUpdated) {}

    fn on_migration_attempted(&mut self, _now: Timestamp, _event: &builder::MigrationAttempted) {}

    fn on_path_validated(&mut self, _now: Timestamp, _event: &builder::PathValidated) {}

    fn on_congestion_event(&mut self, _now: Timestamp, _event: &builder::CongestionEvent) {}

    fn on_app_limited(&mut self, _now: Timestamp, _event: &builder::AppLimited) {}

    fn on_handshake_confirmed(&mut self, _now: Timestamp, _event: &builder::HandshakeConfirmed) {}

    fn on_connection_closed(&mut self, _now: Timestamp, _event: &builder::ConnectionClosed) {}
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSubscriber;

impl Subscriber for NoopSubscriber {}

macro_rules! tuple_forward {
    ($method:ident, $event:ty) => {
        fn $method(&mut self, now: Timestamp, event: &$event) {
            self.0.$method(now, event);
            self.1.$method(now, event);
        }
    };
}

/// Two subscribers compose into one; nest pairs for more
impl<A: Subscriber, B: Subscriber> Subscriber for (A, B) {
    tuple_forward!(on_packet_sent, builder::PacketSent);
    tuple_forward!(on_packet_received, builder::PacketReceived);
    tuple_forward!(on_packet_dropped, builder::PacketDropped);
    tuple_forward!(on_packet_lost, builder::PacketLost);
    tuple_forward!(on_rtt_updated, builder::RttUpdated);
    tuple_forward!(on_key_updated, builder::KeyUpdated);
    tuple_forward!(on_migration_attempted, builder::MigrationAttempted);
    tuple_forward!(on_path_validated, builder::PathValidated);
    tuple_forward!(on_congestion_event, builder::CongestionEvent);
    tuple_forward!(on_app_limited, builder::AppLimited);
    tuple_forward!(on_handshake_confirmed, builder::HandshakeConfirmed);
    tuple_forward!(on_connection_closed, builder::ConnectionClosed);
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    /// Counts events per kind; shared handles keep assertions easy
    #[derive(Clone, Debug, Default)]
    pub struct Counts {
        pub packets_sent: u64,
        pub packets_received: u64,
        pub packets_dropped: u64,
        pub packets_lost: u64,
        pub rtt_updates: u64,
        pub key_updates: u64,
        pub migrations: u64,
        pub app_limited: u64,
        pub closed: u64,
    }

    #[derive(Clone, Default)]
    pub struct Recorder(pub Rc<RefCell<Counts>>);

    // Rc keeps this test-only subscriber off worker threads, which is
    // fine: connections are single-threaded by construction
    unsafe impl Send for Recorder {}

    impl Subscriber for Recorder {
        fn on_packet_sent(&mut self, _now: Timestamp, _event: &builder::PacketSent) {
            self.0.borrow_mut().packets_sent += 1;
        }

        fn on_packet_received(&mut self, _now: Timestamp, _event: &builder::PacketReceived) {
            self.0.borrow_mut().packets_received += 1;
        }

        fn on_packet_dropped(&mut self, _now: Timestamp, _event: &builder::PacketDropped) {
            self.0.borrow_mut().packets_dropped += 1;
        }

        fn on_packet_lost(&mut self, _now: Timestamp, _event: &builder::PacketLost) {
            self.0.borrow_mut().packets_lost += 1;
        }

        fn on_rtt_updated(&mut self, _now: Timestamp, _event: &builder::RttUpdated) {
            self.0.borrow_mut().rtt_updates += 1;
        }

        fn on_key_updated(&mut self, _now: Timestamp, _event: &builder::KeyUpdated) {
            self.0.borrow_mut().key_updates += 1;
        }

        fn on_migration_attempted(&mut self, _now: Timestamp, _event: &builder::MigrationAttempted) {
            self.0.borrow_mut().migrations += 1;
        }

        fn on_app_limited(&mut self, _now: Timestamp, _event: &builder::AppLimited) {
            self.0.borrow_mut().app_limited += 1;
        }

        fn on_connection_closed(&mut self, _now: Timestamp, _event: &builder::ConnectionClosed) {
            self.0.borrow_mut().closed += 1;
        }
    }
}
