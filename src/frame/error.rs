//! Error types for the framing layer.
//!
//! [`FramingError`] covers wire-level corruption: once raised, byte
//! alignment with the peer is lost and the session must end. [`FrameError`]
//! is the decoder's error type and additionally separates a peer that went
//! away mid-frame from genuine corruption.

use std::io;

use thiserror::Error;

/// Wire-level framing failures. All of them are fatal to the session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The header announced a payload above the configured limit.
    #[error("payload exceeds maximum size: {size} > {max}")]
    OversizedPayload {
        /// Payload size announced by the header or supplied by the sender.
        size: usize,
        /// Configured maximum payload size.
        max: usize,
    },

    /// A variable-length header claimed more bytes than allowed.
    #[error("header exceeds maximum size: {size} > {max}")]
    OversizedHeader {
        /// Header length computed by the policy.
        size: usize,
        /// Configured maximum header size.
        max: usize,
    },

    /// The header bytes do not form a valid header.
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    /// An outgoing payload length cannot be expressed by the header policy.
    #[error("payload of {size} bytes cannot be encoded in the header")]
    PayloadNotEncodable {
        /// Length of the rejected payload.
        size: usize,
    },

    /// The frame payload could not be decoded into a message.
    #[error("undecodable payload: {0}")]
    Undecodable(String),
}

/// Errors surfaced while pulling frames off a transport.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream is corrupt.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The peer closed the stream part-way through a frame.
    #[error("peer disconnected mid-frame with {buffered} bytes buffered")]
    Disconnected {
        /// Bytes of the incomplete frame received before the close.
        buffered: usize,
    },

    /// The transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for io::Error {
    fn from(value: FrameError) -> Self {
        match value {
            FrameError::Io(err) => err,
            FrameError::Disconnected { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, value.to_string())
            }
            FrameError::Framing(_) => io::Error::new(io::ErrorKind::InvalidData, value.to_string()),
        }
    }
}
