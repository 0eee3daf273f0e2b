// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::{crypto::CryptoError, varint::VarInt};
use core::fmt;
use weft_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// A connection-fatal transport error, carried in the transport
/// variant of CONNECTION_CLOSE
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    pub const fn new(code: VarInt) -> Self {
        Self {
            code,
            frame_type: None,
            reason: "",
        }
    }

    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    /// True for errors in the CRYPTO_ERROR range (a carried TLS alert)
    #[inline]
    pub fn is_crypto_error(&self) -> bool {
        (0x100..=0x1ff).contains(&self.code.as_u64())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "TransportError({})", self.code)
        } else {
            f.write_str(self.reason)
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: Self = Self::new(VarInt::from_u16($code));
        }
    };
}

def_error!(
    "An endpoint uses this with CONNECTION_CLOSE to signal that the connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0x0
);
def_error!(
    "The endpoint encountered an internal error and cannot continue with the connection.",
    INTERNAL_ERROR,
    0x1
);
def_error!(
    "The server refused to accept a new connection.",
    CONNECTION_REFUSED,
    0x2
);
def_error!(
    "An endpoint received more data than it permitted in its advertised data limits.",
    FLOW_CONTROL_ERROR,
    0x3
);
def_error!(
    "An endpoint received a frame for a stream identifier that exceeded its advertised stream limit for the corresponding stream type.",
    STREAM_LIMIT_ERROR,
    0x4
);
def_error!(
    "An endpoint received a frame for a stream that was not in a state that permitted that frame.",
    STREAM_STATE_ERROR,
    0x5
);
def_error!(
    "An endpoint received a STREAM frame containing data that exceeded the previously established final size, or a RESET_STREAM frame with a final size lower than already-received data.",
    FINAL_SIZE_ERROR,
    0x6
);
def_error!(
    "An endpoint received a frame that was badly formatted.",
    FRAME_ENCODING_ERROR,
    0x7
);
def_error!(
    "An endpoint received transport parameters that were badly formatted, included an invalid value, or omitted a mandatory parameter.",
    TRANSPORT_PARAMETER_ERROR,
    0x8
);
def_error!(
    "An endpoint received more connection IDs than its advertised active_connection_id_limit.",
    CONNECTION_ID_LIMIT_ERROR,
    0x9
);
def_error!(
    "An endpoint detected an error with protocol compliance that was not covered by more specific error codes.",
    PROTOCOL_VIOLATION,
    0xA
);
def_error!(
    "A server received a client Initial that contained an invalid Token field.",
    INVALID_TOKEN,
    0xB
);
def_error!(
    "The application or application protocol caused the connection to be closed.",
    APPLICATION_ERROR,
    0xC
);
def_error!(
    "An endpoint received more data in CRYPTO frames than it can buffer.",
    CRYPTO_BUFFER_EXCEEDED,
    0xD
);
def_error!(
    "An endpoint detected errors in performing key updates.",
    KEY_UPDATE_ERROR,
    0xE
);
def_error!(
    "An endpoint has reached the confidentiality or integrity limit for the AEAD algorithm.",
    AEAD_LIMIT_REACHED,
    0xF
);
def_error!(
    "An endpoint has determined that the network path is incapable of supporting QUIC.",
    NO_VIABLE_PATH,
    0x10
);

impl Error {
    /// A peer address changed in a way the connection cannot follow
    //
    // extension code, outside the IANA transport range
    pub const INVALID_MIGRATION: Self = Self::new(VarInt::from_u16(0x1001));

    /// Builds an error in the CRYPTO_ERROR range from a TLS alert
    pub const fn crypto_error(alert: u8) -> Self {
        Self::new(VarInt::from_u16(0x100 + alert as u16))
    }
}

impl From<CryptoError> for Error {
    fn from(error: CryptoError) -> Self {
        Self::crypto_error(error.code).with_reason(error.reason)
    }
}

impl From<DecoderError> for Error {
    fn from(error: DecoderError) -> Self {
        match error {
            DecoderError::InvariantViolation(reason) => {
                Self::PROTOCOL_VIOLATION.with_reason(reason)
            }
            _ => Self::PROTOCOL_VIOLATION.with_reason("malformed packet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_error_range() {
        let error = Error::crypto_error(42);
        assert!(error.is_crypto_error());
        assert_eq!(error.code.as_u64(), 0x100 + 42);
        assert!(!Error::PROTOCOL_VIOLATION.is_crypto_error());
    }

    #[test]
    fn display_prefers_reason() {
        let error = Error::PROTOCOL_VIOLATION.with_reason("empty packet payload");
        assert_eq!(error.to_string(), "empty packet payload");
        assert_eq!(Error::FLOW_CONTROL_ERROR.to_string(), "TransportError(3)");
    }
}
