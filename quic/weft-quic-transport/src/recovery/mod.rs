// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-space loss recovery: the outstanding-packet set, ACK frame
//! processing, reorder/time-threshold loss detection, and the probe
//! timeout.

mod manager;
mod sent_packets;

pub use manager::{AckOutcome, Manager};
pub use sent_packets::{SentPacketInfo, SentPackets};

use core::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED value for kPacketThreshold is 3, based on TCP loss
//# recovery
pub const K_PACKET_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
//# RTT multiplier, is 9/8.
pub const K_TIME_THRESHOLD_DIVIDEND: u32 = 9;
pub const K_TIME_THRESHOLD_DIVISOR: u32 = 8;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3
pub const K_PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

/// Aggregate counters shared across all packet-number spaces
#[derive(Clone, Copy, Debug, Default)]
pub struct LossState {
    pub total_bytes_sent: u64,
    pub total_body_bytes_sent: u64,
    pub total_bytes_acked: u64,
    pub total_bytes_recvd: u64,
    pub total_stream_bytes_sent: u64,
    pub total_bytes_retransmitted: u64,
    pub total_packets_sent: u64,
    pub total_packets_lost: u64,
    pub pto_count: u32,
    /// Consecutive PTOs since the last successful ACK
    pub total_pto_count: u64,
}

/// The loss-detection timer resolves to one of these on expiry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPurpose {
    /// A time-threshold loss is pending
    LossTime,
    /// No loss pending; probe on expiry
    Pto,
}

pub(crate) fn time_threshold(rtt: Duration) -> Duration {
    let threshold = rtt * K_TIME_THRESHOLD_DIVIDEND / K_TIME_THRESHOLD_DIVISOR;
    threshold.max(weft_quic_core::recovery::rtt_estimator::K_GRANULARITY)
}
