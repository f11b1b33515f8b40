//! Packet framing: splitting a byte stream into header + payload frames.
//!
//! A [`HeaderPolicy`] describes the wire header, [`PacketFramer`] applies it
//! as a `tokio_util` codec, and [`FrameReader`] turns the raw frames into
//! decoded [`IncomingMessage`](crate::envelope::IncomingMessage)s.
//!
//! Two policies ship with the crate:
//!
//! - [`LengthPrefixed`]: a fixed-width length prefix (4-byte big-endian by default).
//! - [`VarIntLength`]: a LEB128 length prefix of 1–5 bytes.

use bytes::BytesMut;

mod error;
mod framer;
mod policy;
mod reader;

pub use error::{FrameError, FramingError};
pub use framer::{PacketFramer, RawFrame};
pub use policy::{Endianness, LengthPrefixed, VarIntLength};
pub use reader::FrameReader;

/// Sizes derived from one frame header.
///
/// `packet_size` always equals the header length plus `payload_size`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    packet_size: usize,
    payload_size: usize,
}

impl PacketHeader {
    /// Build a header description from the header length and payload length.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::MalformedHeader`] if the frame size does not
    /// fit in `usize`.
    pub fn new(header_size: usize, payload_size: usize) -> Result<Self, FramingError> {
        let packet_size = header_size
            .checked_add(payload_size)
            .ok_or(FramingError::MalformedHeader("frame size overflows usize"))?;
        Ok(Self {
            packet_size,
            payload_size,
        })
    }

    /// Total bytes occupied by the frame on the wire.
    #[must_use]
    pub const fn packet_size(&self) -> usize { self.packet_size }

    /// Bytes of payload following the header.
    #[must_use]
    pub const fn payload_size(&self) -> usize { self.payload_size }

    /// Bytes occupied by the header itself.
    #[must_use]
    pub const fn header_size(&self) -> usize { self.packet_size - self.payload_size }
}

/// Describes how frame headers are laid out on the wire.
///
/// The framer only ever hands a policy the bytes buffered so far, starting at
/// the first byte of the header. Policies must not assume the whole frame is
/// present.
pub trait HeaderPolicy: Clone + Send + Sync + 'static {
    /// Smallest number of bytes any header of this policy occupies.
    fn minimum_header_size(&self) -> usize;

    /// Whether headers vary in length and need [`compute_header_size`].
    ///
    /// [`compute_header_size`]: HeaderPolicy::compute_header_size
    fn is_variable_length(&self) -> bool { false }

    /// Return `true` once `buf` holds a complete header.
    fn is_header_readable(&self, buf: &[u8]) -> bool;

    /// Compute the exact header length from a readable header.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::MalformedHeader`] if the bytes cannot form a
    /// header of this policy.
    fn compute_header_size(&self, buf: &[u8]) -> Result<usize, FramingError>;

    /// Parse exactly one header.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError`] if the header is malformed.
    fn parse(&self, header: &[u8]) -> Result<PacketHeader, FramingError>;

    /// Append the header describing a payload of `payload_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::PayloadNotEncodable`] if the size cannot be
    /// represented by this policy.
    fn write_header(&self, payload_size: usize, dst: &mut BytesMut) -> Result<(), FramingError>;
}

#[cfg(test)]
mod tests;
