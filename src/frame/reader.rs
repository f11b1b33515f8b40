//! Decoding frames into envelopes.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use super::{FrameError, FramingError, HeaderPolicy, PacketFramer};
use crate::{
    envelope::{Envelope, IncomingMessage, MessageParameters},
    serializer::SharedCodec,
};

/// Reads frames from a transport and decodes them with the session codec.
///
/// Codec failures are reported as [`FramingError::Undecodable`]: a payload
/// that does not decode means the peers disagree about the wire format.
pub struct FrameReader<R, H> {
    inner: FramedRead<R, PacketFramer<H>>,
    codec: SharedCodec,
    parameters: MessageParameters,
}

impl<R, H> FrameReader<R, H>
where
    R: AsyncRead + Unpin,
    H: HeaderPolicy,
{
    /// Wrap `reader`, decoding frames produced by `framer`.
    pub fn new(reader: R, framer: PacketFramer<H>, codec: SharedCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, framer),
            codec,
            parameters: MessageParameters::default(),
        }
    }

    /// Override the delivery parameters reported for every message.
    #[must_use]
    pub fn with_parameters(mut self, parameters: MessageParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Await the next message.
    ///
    /// Returns `Ok(None)` once the stream ends cleanly on a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Disconnected`] if the stream closes mid-frame,
    /// [`FrameError::Framing`] on corruption and [`FrameError::Io`] on
    /// transport failure.
    pub async fn next_message(&mut self) -> Result<Option<IncomingMessage<Envelope>>, FrameError> {
        let Some(frame) = self.inner.next().await.transpose()? else {
            return Ok(None);
        };
        crate::metrics::inc_frames(crate::metrics::Direction::Inbound);
        let payload = self
            .codec
            .decode(&frame.payload)
            .map_err(|e| FramingError::Undecodable(e.to_string()))?;
        Ok(Some(IncomingMessage {
            header: frame.header,
            payload,
            parameters: self.parameters,
        }))
    }

    /// Recover the underlying reader.
    pub fn into_inner(self) -> R { self.inner.into_inner() }
}
