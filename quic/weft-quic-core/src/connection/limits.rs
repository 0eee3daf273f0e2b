// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Immutable-after-start local configuration for a connection.

use crate::varint::VarInt;
use core::{fmt, time::Duration};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# Values above 2^14 are invalid.
pub const MAX_ACK_DELAY_EXPONENT: u8 = 20;

pub const DEFAULT_STREAM_DATA_WINDOW: u64 = 1024 * 1024;
pub const DEFAULT_DATA_WINDOW: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_KEY_UPDATE_PACKET_COUNT_INTERVAL: u64 = 8_000_000;
pub const DEFAULT_MAX_MIGRATIONS: u32 = 6;
pub const ANTI_AMPLIFICATION_MULTIPLIER: u64 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationError(pub &'static str);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

/// Local transport settings, frozen when the connection starts.
///
/// Peer-negotiated values live on the connection itself; these are
/// what we advertise and enforce locally.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_data: VarInt,
    pub max_stream_data_bidi_local: VarInt,
    pub max_stream_data_bidi_remote: VarInt,
    pub max_stream_data_uni: VarInt,
    pub max_streams_bidi: VarInt,
    pub max_streams_uni: VarInt,
    pub max_idle_timeout: Duration,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: Duration,
    pub min_ack_delay: Option<Duration>,
    pub active_connection_id_limit: VarInt,
    pub max_datagram_frame_size: VarInt,
    pub enable_keepalive: bool,
    pub key_update_packet_count_interval: u64,
    pub max_migrations_allowed: u32,
    pub close_if_migration_during_handshake: bool,
    /// Skip one packet number roughly every N packets; 0 disables
    pub skip_packet_number_period: u64,
    /// Denominator of the sRTT fraction bounding one write pass
    pub write_limit_rtt_fraction: u32,
    pub stream_groups_enabled: bool,
    pub knob_frames_supported: bool,
    pub reliable_stream_reset: bool,
    pub ack_receive_timestamps_enabled: bool,
    pub max_receive_timestamps_per_ack: VarInt,
    pub receive_timestamps_exponent: u8,
    pub extended_ack_features: VarInt,
    /// Honor a peer-advertised payload ceiling instead of probing
    pub can_ignore_path_mtu: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_data: VarInt::from_u32(DEFAULT_DATA_WINDOW as u32),
            max_stream_data_bidi_local: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW as u32),
            max_stream_data_bidi_remote: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW as u32),
            max_stream_data_uni: VarInt::from_u32(DEFAULT_STREAM_DATA_WINDOW as u32),
            max_streams_bidi: VarInt::from_u32(100),
            max_streams_uni: VarInt::from_u32(100),
            max_idle_timeout: DEFAULT_MAX_IDLE_TIMEOUT,
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
            min_ack_delay: None,
            active_connection_id_limit: VarInt::from_u8(2),
            max_datagram_frame_size: VarInt::ZERO,
            enable_keepalive: false,
            key_update_packet_count_interval: DEFAULT_KEY_UPDATE_PACKET_COUNT_INTERVAL,
            max_migrations_allowed: DEFAULT_MAX_MIGRATIONS,
            close_if_migration_during_handshake: true,
            skip_packet_number_period: 0,
            write_limit_rtt_fraction: 4,
            stream_groups_enabled: false,
            knob_frames_supported: false,
            reliable_stream_reset: false,
            ack_receive_timestamps_enabled: false,
            max_receive_timestamps_per_ack: VarInt::from_u8(10),
            receive_timestamps_exponent: 3,
            extended_ack_features: VarInt::ZERO,
            can_ignore_path_mtu: false,
        }
    }
}

macro_rules! setter {
    ($name:ident, $field:ident, VarInt) => {
        pub fn $name(mut self, value: u64) -> Result<Self, ValidationError> {
            self.$field = VarInt::new(value)
                .map_err(|_| ValidationError(concat!(stringify!($field), " exceeds varint range")))?;
            Ok(self)
        }
    };
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Result<Self, ValidationError> {
            self.$field = value;
            Ok(self)
        }
    };
}

impl Limits {
    setter!(with_max_data, max_data, VarInt);
    setter!(with_max_stream_data_bidi_local, max_stream_data_bidi_local, VarInt);
    setter!(with_max_stream_data_bidi_remote, max_stream_data_bidi_remote, VarInt);
    setter!(with_max_stream_data_uni, max_stream_data_uni, VarInt);
    setter!(with_max_streams_bidi, max_streams_bidi, VarInt);
    setter!(with_max_streams_uni, max_streams_uni, VarInt);
    setter!(with_keepalive, enable_keepalive, bool);
    setter!(with_stream_groups, stream_groups_enabled, bool);
    setter!(with_reliable_stream_reset, reliable_stream_reset, bool);

    pub fn with_max_idle_timeout(mut self, value: Duration) -> Result<Self, ValidationError> {
        if value > Duration::from_secs(600) {
            return Err(ValidationError("max_idle_timeout exceeds 600s"));
        }
        self.max_idle_timeout = value;
        Ok(self)
    }

    pub fn with_ack_delay_exponent(mut self, value: u8) -> Result<Self, ValidationError> {
        if value > MAX_ACK_DELAY_EXPONENT {
            return Err(ValidationError("ack_delay_exponent exceeds 20"));
        }
        self.ack_delay_exponent = value;
        Ok(self)
    }

    pub fn with_max_ack_delay(mut self, value: Duration) -> Result<Self, ValidationError> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values of 2^14 or greater are invalid.
        if value.as_millis() >= 1 << 14 {
            return Err(ValidationError("max_ack_delay exceeds 2^14 ms"));
        }
        self.max_ack_delay = value;
        Ok(self)
    }

    pub fn with_key_update_packet_count_interval(
        mut self,
        value: u64,
    ) -> Result<Self, ValidationError> {
        if value == 0 {
            return Err(ValidationError("key update interval must be nonzero"));
        }
        self.key_update_packet_count_interval = value;
        Ok(self)
    }

    pub fn with_skip_packet_number_period(mut self, value: u64) -> Result<Self, ValidationError> {
        self.skip_packet_number_period = value;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validated_setters() {
        let limits = Limits::default()
            .with_max_data(1 << 20)
            .unwrap()
            .with_ack_delay_exponent(10)
            .unwrap();
        assert_eq!(limits.max_data.as_u64(), 1 << 20);
        assert!(Limits::default().with_ack_delay_exponent(21).is_err());
        assert!(Limits::default()
            .with_max_ack_delay(Duration::from_millis(1 << 14))
            .is_err());
    }
}
