//! Why a session ended.

use std::{fmt, io};

use thiserror::Error;

use super::SessionDetails;
use crate::{frame::FramingError, handler::HandlerError};

/// Faults that terminate a session.
///
/// Every variant is terminal: the session stops reading, cancels its write
/// loop and is disposed. Nothing is retried.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The inbound byte stream could not be framed or decoded.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// A handler returned an error or panicked.
    #[error("handler fault: {0}")]
    HandlerFault(#[from] HandlerError),
    /// A session loop panicked outside any handler.
    #[error("session task panicked: {0}")]
    Panicked(String),
}

/// Terminal cause recorded when a session is disposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote end closed the stream on a frame boundary.
    PeerClosed,
    /// The remote end closed the stream part-way through a frame.
    ClosedMidFrame,
    /// The session was cancelled locally.
    Cancelled,
    /// Reading from or writing to the transport failed.
    TransportError(io::ErrorKind),
    /// A [`SessionError`] ended the session.
    Faulted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ClosedMidFrame => f.write_str("peer closed mid-frame"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TransportError(kind) => write!(f, "transport error ({kind})"),
            Self::Faulted => f.write_str("faulted"),
        }
    }
}

/// Final report of a disposed session.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Identity of the session.
    pub details: SessionDetails,
    /// Why the session ended.
    pub reason: DisconnectReason,
    /// The fault, when `reason` is [`DisconnectReason::Faulted`].
    pub fault: Option<SessionError>,
}

impl SessionOutcome {
    /// `true` when the session ended without a fault.
    #[must_use]
    pub fn is_clean(&self) -> bool { self.fault.is_none() }
}
