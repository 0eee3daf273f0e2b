// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection's path table: the active path, probing paths, and
//! the congestion-state cache used for migration rollback.

use core::time::Duration;
use std::net::SocketAddr;
use weft_quic_core::{
    inet::is_nat_rebind,
    path::{Id, Status, CLIENT_OLD_PATH_RETENTION_RTT_MULTIPLIER, TIME_TO_RETAIN_LAST_CONGESTION_STATE},
    random,
    recovery::{CongestionController, RttEstimator},
    time::Timestamp,
};

/// An outstanding PATH_CHALLENGE on one path
#[derive(Clone, Copy, Debug)]
pub struct Challenge {
    pub data: [u8; 8],
    /// Validation fails when unanswered by this deadline
    pub deadline: Timestamp,
    pub needs_transmit: bool,
}

#[derive(Debug)]
pub struct Path {
    pub id: Id,
    pub local_address: SocketAddr,
    pub peer_address: SocketAddr,
    pub status: Status,
    pub challenge: Option<Challenge>,
    /// Bytes received from the peer on this path; bounds what an
    /// unvalidated path may send
    pub bytes_received: u64,
    pub bytes_sent: u64,
    /// Sequence number of the peer connection id bound to this path
    pub peer_cid_sequence: Option<u64>,
    /// When set, the path is kept only to absorb late arrivals
    pub retire_at: Option<Timestamp>,
}

impl Path {
    fn new(id: Id, local_address: SocketAddr, peer_address: SocketAddr, status: Status) -> Self {
        Self {
            id,
            local_address,
            peer_address,
            status,
            challenge: None,
            bytes_received: 0,
            bytes_sent: 0,
            peer_cid_sequence: None,
            retire_at: None,
        }
    }

    /// Egress budget under address-validation amplification rules
    pub fn amplification_allowance(&self, multiplier: u64) -> u64 {
        (self.bytes_received.saturating_mul(multiplier)).saturating_sub(self.bytes_sent)
    }
}

/// Congestion and RTT state parked while the connection uses a
/// different peer address
struct Snapshot {
    peer_address: SocketAddr,
    controller: Box<dyn CongestionController>,
    rtt: RttEstimator,
    taken_at: Timestamp,
}

impl core::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Snapshot")
            .field("peer_address", &self.peer_address)
            .field("taken_at", &self.taken_at)
            .finish_non_exhaustive()
    }
}

/// What a peer-address change did to the connection's congestion state
#[derive(Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Port-only rebind; congestion state carried over
    NatRebind,
    /// A parked snapshot for this address was restored
    Restored,
    /// No usable history; state was reset
    Reset,
    /// The migration budget is exhausted
    Refused,
}

#[derive(Debug)]
pub struct Manager {
    paths: Vec<Path>,
    active: usize,
    next_id: Id,
    migration_count: u32,
    max_migrations: u32,
    snapshots: Vec<Snapshot>,
}

impl Manager {
    pub fn new(local_address: SocketAddr, peer_address: SocketAddr) -> Self {
        let id = Id::default();
        Self {
            paths: vec![Path::new(id, local_address, peer_address, Status::Validating)],
            active: 0,
            next_id: id.next(),
            migration_count: 0,
            max_migrations: weft_quic_core::connection::limits::DEFAULT_MAX_MIGRATIONS,
            snapshots: Vec::new(),
        }
    }

    pub fn set_max_migrations(&mut self, max_migrations: u32) {
        self.max_migrations = max_migrations;
    }

    #[inline]
    pub fn active_path(&self) -> &Path {
        &self.paths[self.active]
    }

    #[inline]
    pub fn active_path_mut(&mut self) -> &mut Path {
        &mut self.paths[self.active]
    }

    #[inline]
    pub fn migration_count(&self) -> u32 {
        self.migration_count
    }

    pub fn path_by_addresses(
        &mut self,
        local_address: &SocketAddr,
        peer_address: &SocketAddr,
    ) -> Option<&mut Path> {
        self.paths.iter_mut().find(|path| {
            path.local_address == *local_address && path.peer_address == *peer_address
        })
    }

    /// Marks the handshake-completed path validated; address
    /// validation is implicit in a completed handshake
    pub fn on_handshake_confirmed(&mut self) {
        self.active_path_mut().status = Status::Validated;
    }

    /// Processes a non-probing packet from an unknown peer address on
    /// the server. Returns `None` when the migration budget refuses it.
    ///
    /// On success the new path becomes active and carries a fresh
    /// challenge; the previous congestion state is parked for rollback.
    #[allow(clippy::too_many_arguments)]
    pub fn on_peer_address_change(
        &mut self,
        local_address: SocketAddr,
        peer_address: SocketAddr,
        now: Timestamp,
        random: &mut dyn random::Generator,
        controller: &mut Box<dyn CongestionController>,
        rtt: &mut RttEstimator,
        fresh_controller: &mut dyn FnMut() -> Box<dyn CongestionController>,
        challenge_timeout: Duration,
    ) -> Option<MigrationOutcome> {
        if self.migration_count >= self.max_migrations {
            return Some(MigrationOutcome::Refused);
        }
        self.migration_count += 1;

        let old_peer = self.active_path().peer_address;
        let rebind = is_nat_rebind(&old_peer, &peer_address);

        let id = self.next_id;
        self.next_id = id.next();
        let mut path = Path::new(id, local_address, peer_address, Status::Validating);
        let mut challenge_data = [0u8; 8];
        random.fill(&mut challenge_data);
        path.challenge = Some(Challenge {
            data: challenge_data,
            deadline: now + challenge_timeout,
            needs_transmit: true,
        });
        self.paths.push(path);
        self.active = self.paths.len() - 1;

        if rebind {
            // path characteristics are likely unchanged
            return Some(MigrationOutcome::NatRebind);
        }

        // park the old state for a possible return to the old address
        let parked_controller = core::mem::replace(controller, fresh_controller());
        let fresh_rtt =
            rtt.for_new_path(weft_quic_core::recovery::rtt_estimator::DEFAULT_INITIAL_RTT);
        let parked_rtt = core::mem::replace(rtt, fresh_rtt);
        self.snapshots.retain(|snapshot| {
            now.saturating_duration_since(snapshot.taken_at)
                < TIME_TO_RETAIN_LAST_CONGESTION_STATE
        });
        self.snapshots.push(Snapshot {
            peer_address: old_peer,
            controller: parked_controller,
            rtt: parked_rtt,
            taken_at: now,
        });

        // returning to a recently used address restores its state
        if let Some(index) = self.snapshots.iter().position(|snapshot| {
            snapshot.peer_address == peer_address
                && now.saturating_duration_since(snapshot.taken_at)
                    < TIME_TO_RETAIN_LAST_CONGESTION_STATE
        }) {
            let snapshot = self.snapshots.swap_remove(index);
            *controller = snapshot.controller;
            *rtt = snapshot.rtt;
            return Some(MigrationOutcome::Restored);
        }

        Some(MigrationOutcome::Reset)
    }

    /// Client-side probe of a new local socket
    pub fn probe_path(
        &mut self,
        local_address: SocketAddr,
        peer_address: SocketAddr,
        now: Timestamp,
        random: &mut dyn random::Generator,
        challenge_timeout: Duration,
    ) -> Id {
        let id = self.next_id;
        self.next_id = id.next();
        let mut path = Path::new(id, local_address, peer_address, Status::Validating);
        let mut challenge_data = [0u8; 8];
        random.fill(&mut challenge_data);
        path.challenge = Some(Challenge {
            data: challenge_data,
            deadline: now + challenge_timeout,
            needs_transmit: true,
        });
        self.paths.push(path);
        id
    }

    /// Matches a PATH_RESPONSE against outstanding challenges.
    ///
    /// Returns the validated path id; promoting a probed client path
    /// to active is the caller's decision.
    pub fn on_path_response(&mut self, data: &[u8; 8]) -> Option<Id> {
        for path in self.paths.iter_mut() {
            let matches = path
                .challenge
                .as_ref()
                .map_or(false, |challenge| challenge.data == *data);
            if matches {
                path.challenge = None;
                path.status = Status::Validated;
                return Some(path.id);
            }
        }
        None
    }

    /// Promotes a validated path to active, retiring the old one
    /// after a retention window scaled by the smoothed RTT
    pub fn promote(&mut self, id: Id, now: Timestamp, smoothed_rtt: Duration) -> bool {
        let Some(index) = self.paths.iter().position(|path| path.id == id) else {
            return false;
        };
        if !self.paths[index].status.is_validated() {
            return false;
        }
        let retention = smoothed_rtt * CLIENT_OLD_PATH_RETENTION_RTT_MULTIPLIER;
        self.paths[self.active].retire_at = Some(now + retention);
        self.active = index;
        true
    }

    /// The earliest outstanding challenge deadline, for the
    /// path-validation timer
    pub fn challenge_timer(&self) -> Option<Timestamp> {
        self.paths
            .iter()
            .filter_map(|path| path.challenge.as_ref())
            .map(|challenge| challenge.deadline)
            .min()
    }

    /// Expires overdue challenges; returns `true` when the active
    /// path failed validation (a connection-fatal condition)
    pub fn on_timeout(&mut self, now: Timestamp) -> bool {
        let mut active_failed = false;
        let active = self.active;
        for (index, path) in self.paths.iter_mut().enumerate() {
            let expired = path
                .challenge
                .as_ref()
                .map_or(false, |challenge| challenge.deadline.has_elapsed(now));
            if expired {
                path.challenge = None;
                path.status = Status::Failed;
                if index == active {
                    active_failed = true;
                }
            }
        }
        // drop retired and failed non-active paths
        let active_id = self.paths[self.active].id;
        self.paths.retain(|path| {
            path.id == active_id
                || !(path.status == Status::Failed
                    || path.retire_at.map_or(false, |at| at.has_elapsed(now)))
        });
        self.active = self
            .paths
            .iter()
            .position(|path| path.id == active_id)
            .unwrap_or(0);
        active_failed
    }

    /// A challenge frame to transmit, if one is due on any path
    pub fn next_challenge(&mut self) -> Option<(Id, [u8; 8])> {
        for path in self.paths.iter_mut() {
            if let Some(challenge) = path.challenge.as_mut() {
                if challenge.needs_transmit {
                    challenge.needs_transmit = false;
                    return Some((path.id, challenge.data));
                }
            }
        }
        None
    }

    /// A lost PATH_CHALLENGE is retransmitted until the deadline
    pub fn on_challenge_lost(&mut self, data: &[u8; 8]) {
        for path in self.paths.iter_mut() {
            if let Some(challenge) = path.challenge.as_mut() {
                if challenge.data == *data {
                    challenge.needs_transmit = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_quic_core::{
        random::testing::Seeded,
        recovery::congestion_controller::testing::FixedWindow,
        time::{testing, Clock},
    };

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn fresh() -> Box<dyn CongestionController> {
        Box::new(FixedWindow::new(10_000))
    }

    #[test]
    fn nat_rebind_keeps_state() {
        let clock = testing::Clock::default();
        let mut manager = Manager::new(addr("10.0.0.1:443"), addr("10.0.0.9:1111"));
        let mut random = Seeded::default();
        let mut controller: Box<dyn CongestionController> = Box::new(FixedWindow::new(77));
        let mut rtt = RttEstimator::default();

        let outcome = manager
            .on_peer_address_change(
                addr("10.0.0.1:443"),
                addr("10.0.0.9:2222"),
                clock.get_time(),
                &mut random,
                &mut controller,
                &mut rtt,
                &mut fresh,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::NatRebind);
        assert_eq!(controller.congestion_window(), 77);
        assert_eq!(manager.active_path().peer_address, addr("10.0.0.9:2222"));
        assert!(manager.active_path().challenge.is_some());
    }

    #[test]
    fn address_change_resets_then_restores() {
        let clock = testing::Clock::default();
        let original = addr("10.0.0.9:1111");
        let elsewhere = addr("203.0.113.5:4444");
        let mut manager = Manager::new(addr("10.0.0.1:443"), original);
        let mut random = Seeded::default();
        let mut controller: Box<dyn CongestionController> = Box::new(FixedWindow::new(77));
        let mut rtt = RttEstimator::default();

        let outcome = manager
            .on_peer_address_change(
                addr("10.0.0.1:443"),
                elsewhere,
                clock.get_time(),
                &mut random,
                &mut controller,
                &mut rtt,
                &mut fresh,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Reset);
        assert_eq!(controller.congestion_window(), 10_000);

        // returning to the original address inside the retention
        // window restores the parked state
        let outcome = manager
            .on_peer_address_change(
                addr("10.0.0.1:443"),
                original,
                clock.get_time(),
                &mut random,
                &mut controller,
                &mut rtt,
                &mut fresh,
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Restored);
        assert_eq!(controller.congestion_window(), 77);
    }

    #[test]
    fn migration_budget_refuses() {
        let clock = testing::Clock::default();
        let mut manager = Manager::new(addr("10.0.0.1:443"), addr("10.0.0.9:1111"));
        manager.set_max_migrations(1);
        let mut random = Seeded::default();
        let mut controller: Box<dyn CongestionController> = fresh();
        let mut rtt = RttEstimator::default();

        for (port, expected_refused) in [(2000, false), (3000, true)] {
            let outcome = manager
                .on_peer_address_change(
                    addr("10.0.0.1:443"),
                    addr(&format!("203.0.113.5:{port}")),
                    clock.get_time(),
                    &mut random,
                    &mut controller,
                    &mut rtt,
                    &mut fresh,
                    Duration::from_secs(1),
                )
                .unwrap();
            assert_eq!(outcome == MigrationOutcome::Refused, expected_refused);
        }
    }

    #[test]
    fn challenge_response_validates() {
        let clock = testing::Clock::default();
        let mut manager = Manager::new(addr("10.0.0.1:443"), addr("10.0.0.9:1111"));
        let mut random = Seeded::default();
        let id = manager.probe_path(
            addr("10.0.0.2:500"),
            addr("10.0.0.9:1111"),
            clock.get_time(),
            &mut random,
            Duration::from_secs(1),
        );

        let (challenge_id, data) = manager.next_challenge().unwrap();
        assert_eq!(challenge_id, id);
        // no repeat until lost
        assert!(manager.next_challenge().is_none());

        assert_eq!(manager.on_path_response(&data), Some(id));
        assert!(manager.promote(id, clock.get_time(), Duration::from_millis(30)));
        assert_eq!(manager.active_path().id, id);
    }

    #[test]
    fn active_path_validation_failure() {
        let clock = testing::Clock::default();
        let mut manager = Manager::new(addr("10.0.0.1:443"), addr("10.0.0.9:1111"));
        let mut random = Seeded::default();
        let mut controller: Box<dyn CongestionController> = fresh();
        let mut rtt = RttEstimator::default();
        manager
            .on_peer_address_change(
                addr("10.0.0.1:443"),
                addr("203.0.113.5:1"),
                clock.get_time(),
                &mut random,
                &mut controller,
                &mut rtt,
                &mut fresh,
                Duration::from_millis(100),
            )
            .unwrap();

        clock.inc_by(Duration::from_millis(200));
        assert!(manager.on_timeout(clock.get_time()));
    }
}
