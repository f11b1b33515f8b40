//! `tokio_util` codec applying a [`HeaderPolicy`] to a byte stream.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{FrameError, FramingError, HeaderPolicy, PacketHeader};
use crate::config::NetworkConnectionOptions;

/// One complete frame lifted off the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    /// Parsed header sizes.
    pub header: PacketHeader,
    /// Payload bytes following the header.
    pub payload: Bytes,
}

/// Splits a byte stream into frames and writes frames back out.
///
/// The decoder never consumes bytes until a whole frame is buffered, so a
/// frame may arrive across any number of transport reads. Once a header has
/// been parsed it is remembered until its payload completes.
#[derive(Clone, Debug)]
pub struct PacketFramer<H> {
    policy: H,
    options: NetworkConnectionOptions,
    minimum_header_size: usize,
    pending: Option<PacketHeader>,
}

impl<H: HeaderPolicy> PacketFramer<H> {
    /// Create a framer for `policy` bounded by `options`.
    ///
    /// If the configured minimum header size exceeds the smallest header the
    /// policy can produce, the policy's minimum is used instead so small
    /// frames are never stranded in the buffer.
    #[must_use]
    pub fn new(policy: H, options: NetworkConnectionOptions) -> Self {
        let policy_min = policy.minimum_header_size().max(1);
        let minimum_header_size = if options.minimum_header_size() > policy_min {
            log::warn!(
                "minimum header size exceeds header policy minimum; clamping: configured={}, \
                 policy={policy_min}",
                options.minimum_header_size()
            );
            policy_min
        } else {
            options.minimum_header_size()
        };
        Self {
            policy,
            options,
            minimum_header_size,
            pending: None,
        }
    }

    /// Limits this framer enforces.
    #[must_use]
    pub fn options(&self) -> &NetworkConnectionOptions { &self.options }

    /// Header policy in use.
    #[must_use]
    pub fn policy(&self) -> &H { &self.policy }

    fn read_header(&self, src: &BytesMut) -> Result<Option<PacketHeader>, FramingError> {
        if src.len() < self.minimum_header_size {
            return Ok(None);
        }
        let max_header = self.options.maximum_header_size();
        if !self.policy.is_header_readable(src) {
            if src.len() >= max_header {
                return Err(FramingError::MalformedHeader(
                    "header not readable within maximum header size",
                ));
            }
            return Ok(None);
        }
        let header_size = self.policy.compute_header_size(src)?;
        if header_size > max_header {
            return Err(FramingError::OversizedHeader {
                size: header_size,
                max: max_header,
            });
        }
        if src.len() < header_size {
            return Ok(None);
        }
        let header = self.policy.parse(&src[..header_size])?;
        let max_payload = self.options.maximum_payload_size();
        if header.payload_size() > max_payload {
            return Err(FramingError::OversizedPayload {
                size: header.payload_size(),
                max: max_payload,
            });
        }
        Ok(Some(header))
    }
}

impl<H: HeaderPolicy> Decoder for PacketFramer<H> {
    type Item = RawFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending {
            Some(header) => header,
            None => match self.read_header(src)? {
                Some(header) => {
                    self.pending = Some(header);
                    header
                }
                None => return Ok(None),
            },
        };

        if src.len() < header.packet_size() {
            src.reserve(header.packet_size() - src.len());
            return Ok(None);
        }

        self.pending = None;
        let mut packet = src.split_to(header.packet_size());
        let payload = packet.split_off(header.header_size()).freeze();
        Ok(Some(RawFrame { header, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                log::debug!(
                    "stream closed inside a frame: buffered={}, expected={:?}",
                    src.len(),
                    self.pending.map(|h| h.packet_size())
                );
                Err(FrameError::Disconnected {
                    buffered: src.len(),
                })
            }
        }
    }
}

impl<H: HeaderPolicy> Encoder<Bytes> for PacketFramer<H> {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let max = self.options.maximum_payload_size();
        if item.len() > max {
            return Err(FramingError::OversizedPayload {
                size: item.len(),
                max,
            }
            .into());
        }
        dst.reserve(self.options.maximum_header_size() + item.len());
        self.policy.write_header(item.len(), dst)?;
        dst.extend_from_slice(&item);
        Ok(())
    }
}
