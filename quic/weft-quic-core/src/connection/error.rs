// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{transport, varint::VarInt};
use core::fmt;

/// The application-facing explanation for why a connection ended.
///
/// Exactly one of these is surfaced per connection, through either
/// the end or the error callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The connection closed without error, locally or by the peer
    Closed { initiator: Initiator },
    /// The connection closed on a transport-protocol error
    Transport {
        error: transport::Error,
        initiator: Initiator,
    },
    /// The connection closed on an application error code
    Application {
        error: VarInt,
        initiator: Initiator,
    },
    /// A stateless reset from the peer was observed
    StatelessReset,
    /// The connection sat idle past the negotiated timeout
    IdleTimerExpired,
    /// The peer address changed in a way migration rules forbid
    InvalidMigration,
    /// The local socket failed underneath the connection
    Abandoned,
    /// The endpoint is shutting down
    ShuttingDown,
    /// A version negotiation packet selected a different version
    NewVersionNegotiated { version: u32 },
}

/// Which side initiated the close
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initiator {
    Local,
    Remote,
}

impl Initiator {
    #[inline]
    pub fn is_local(self) -> bool {
        matches!(self, Self::Local)
    }

    #[inline]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Remote)
    }
}

impl Error {
    /// True when the close carried no error of any kind
    #[inline]
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// The error to echo in our own CONNECTION_CLOSE frame, when one
    /// is still owed to the peer
    #[inline]
    pub fn as_close_error(&self) -> Option<transport::Error> {
        match self {
            Self::Closed {
                initiator: Initiator::Local,
            } => Some(transport::Error::NO_ERROR),
            Self::Transport {
                error,
                initiator: Initiator::Local,
            } => Some(*error),
            Self::InvalidMigration => Some(transport::Error::INVALID_MIGRATION),
            _ => None,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(error: transport::Error) -> Self {
        Self::Transport {
            error,
            initiator: Initiator::Local,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Closed { .. } => write!(f, "connection closed without error"),
            Self::Transport { error, .. } => write!(f, "transport error: {error}"),
            Self::Application { error, .. } => write!(f, "application error: {error}"),
            Self::StatelessReset => write!(f, "stateless reset observed"),
            Self::IdleTimerExpired => write!(f, "idle timeout"),
            Self::InvalidMigration => write!(f, "invalid migration"),
            Self::Abandoned => write!(f, "socket failure"),
            Self::ShuttingDown => write!(f, "endpoint shutting down"),
            Self::NewVersionNegotiated { version } => {
                write!(f, "version negotiation selected {version:#x}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Errors returned to the application from stream and connection
/// operations; these never terminate the connection by themselves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationError {
    StreamNotExists,
    StreamClosed,
    /// The peer's stream-concurrency limit blocks opening another
    StreamLimitReached,
    ConnectionClosed,
    InvalidOperation,
    CallbackAlreadyInstalled,
    InvalidWriteCallback,
    KnobFrameUnsupported,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StreamNotExists => write!(f, "stream does not exist"),
            Self::StreamClosed => write!(f, "stream closed"),
            Self::StreamLimitReached => write!(f, "stream limit reached"),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::InvalidOperation => write!(f, "invalid operation"),
            Self::CallbackAlreadyInstalled => write!(f, "callback already installed"),
            Self::InvalidWriteCallback => write!(f, "invalid write callback"),
            Self::KnobFrameUnsupported => write!(f, "peer does not support knob frames"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OperationError {}
