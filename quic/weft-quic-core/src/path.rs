// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared path-level types; the per-connection path table lives in
//! the transport crate.

use core::time::Duration;

/// Monotonic identifier for a (local, peer) address pair known to a
/// connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(pub u64);

impl Id {
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// A PATH_CHALLENGE is outstanding
    Validating,
    Validated,
    /// Validation timed out or the response token mismatched
    Failed,
}

impl Status {
    #[inline]
    pub fn is_validated(self) -> bool {
        matches!(self, Self::Validated)
    }
}

/// How long congestion and RTT snapshots for an abandoned peer
/// address stay eligible for restoration
pub const TIME_TO_RETAIN_LAST_CONGESTION_STATE: Duration = Duration::from_secs(3);

/// Multiplier of sRTT the client keeps its old path alive after
/// promoting a new one, to absorb late in-flight arrivals
pub const CLIENT_OLD_PATH_RETENTION_RTT_MULTIPLIER: u32 = 2;
