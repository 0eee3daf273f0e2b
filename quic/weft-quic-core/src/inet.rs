// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Network-layer metadata attached to datagrams by the socket layer.

use crate::time::Timestamp;
use std::net::SocketAddr;

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.4
//# The capability of sending and receiving ECN marks is exposed by the
//# IP layer.

/// The two-bit ECN codepoint from the IP TOS / traffic-class field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExplicitCongestionNotification {
    #[default]
    NotEct,
    Ect1,
    Ect0,
    Ce,
}

impl ExplicitCongestionNotification {
    #[inline]
    pub fn from_tos(tos: u8) -> Self {
        match tos & 0b11 {
            0b00 => Self::NotEct,
            0b01 => Self::Ect1,
            0b10 => Self::Ect0,
            _ => Self::Ce,
        }
    }

    #[inline]
    pub fn is_ce(self) -> bool {
        matches!(self, Self::Ce)
    }

    #[inline]
    pub fn is_ect(self) -> bool {
        matches!(self, Self::Ect0 | Self::Ect1)
    }
}

/// Per-datagram metadata from the receive cmsgs
#[derive(Clone, Copy, Debug)]
pub struct DatagramInfo {
    pub remote_address: SocketAddr,
    pub local_address: SocketAddr,
    pub ecn: ExplicitCongestionNotification,
    /// Kernel receive timestamp, when SO_TIMESTAMPING delivered one
    pub receive_time: Option<Timestamp>,
    /// IP TTL / hop limit observed on receipt
    pub ttl: Option<u8>,
    pub payload_len: usize,
}

/// True when `b` is a NAT rebinding of `a`: the port moved but the
/// host did not meaningfully change
pub fn is_nat_rebind(a: &SocketAddr, b: &SocketAddr) -> bool {
    match (a, b) {
        (SocketAddr::V4(a), SocketAddr::V4(b)) => {
            // same /24 with a different port
            a.ip().octets()[..3] == b.ip().octets()[..3] && a.port() != b.port()
        }
        (SocketAddr::V6(a), SocketAddr::V6(b)) => a.ip() == b.ip() && a.port() != b.port(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn ecn_codepoints() {
        assert_eq!(
            ExplicitCongestionNotification::from_tos(0b10),
            ExplicitCongestionNotification::Ect0
        );
        assert!(ExplicitCongestionNotification::from_tos(0b11).is_ce());
        assert!(!ExplicitCongestionNotification::from_tos(0).is_ect());
    }

    #[test]
    fn nat_rebind_detection() {
        assert!(is_nat_rebind(
            &addr("10.0.0.1:1000"),
            &addr("10.0.0.7:2000")
        ));
        assert!(!is_nat_rebind(
            &addr("10.0.0.1:1000"),
            &addr("10.0.1.1:2000")
        ));
        assert!(!is_nat_rebind(
            &addr("10.0.0.1:1000"),
            &addr("10.0.0.1:1000")
        ));
        assert!(is_nat_rebind(&addr("[::1]:5"), &addr("[::1]:6")));
    }
}
