//! Byte transports driven by a session.
//!
//! A [`Transport`] splits into an `AsyncRead` half, owned by the read loop,
//! and a [`TransportWriter`], owned by the write loop. Any tokio stream
//! implementing `AsyncRead + AsyncWrite` is a transport.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::envelope::OutgoingEnvelope;

/// Write half of a transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Write one complete frame.
    ///
    /// `envelope` carries the delivery parameters the frame was queued with;
    /// stream transports ignore them.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the frame could not be written. The session
    /// ends on the first error.
    async fn send(&mut self, frame: Bytes, envelope: &OutgoingEnvelope) -> io::Result<()>;

    /// Flush and close the write direction.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if shutdown fails. The session is disposed
    /// regardless.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// A connection a session can run over.
pub trait Transport: Send + 'static {
    /// Read half, consumed by the packet framer.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Write half, fed by the outgoing queue.
    type Writer: TransportWriter;

    /// Split into independently owned halves.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// [`TransportWriter`] over any tokio `AsyncWrite`.
#[derive(Debug)]
pub struct StreamWriter<W>(W);

impl<W> StreamWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self { Self(inner) }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W { self.0 }
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, frame: Bytes, _envelope: &OutgoingEnvelope) -> io::Result<()> {
        self.0.write_all(&frame).await?;
        self.0.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> { self.0.shutdown().await }
}

impl<S> Transport for S
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = ReadHalf<S>;
    type Writer = StreamWriter<WriteHalf<S>>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = tokio::io::split(self);
        (reader, StreamWriter(writer))
    }
}
