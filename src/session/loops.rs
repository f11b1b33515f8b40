//! The read and write loops of a running session.

use std::sync::Arc;

use bytes::BytesMut;
use leaky_bucket::RateLimiter;
use log::{debug, warn};
use tokio::io::AsyncRead;
use tokio_util::{codec::Encoder, sync::CancellationToken};

use super::{DisconnectReason, SessionError};
use crate::{
    dispatch::{DispatchContext, DispatchStrategy},
    frame::{FrameError, FrameReader, HeaderPolicy, PacketFramer},
    metrics::{self, Direction},
    peer::PeerRole,
    queue::OutgoingQueue,
    session::ConnectionId,
    transport::TransportWriter,
};

/// How one loop ended.
#[derive(Debug)]
pub(super) enum LoopExit {
    /// The transport closed or failed.
    Closed(DisconnectReason),
    /// The shared token fired.
    Cancelled,
    /// A fatal error.
    Fault(SessionError),
}

/// Read frames and dispatch them until EOF, a fault or cancellation.
///
/// Cancels `token` on exit, including an unwind, so the write loop stops too.
pub(super) async fn listen<Rd, H, R>(
    mut reader: FrameReader<Rd, H>,
    context: DispatchContext<R>,
    strategy: Arc<dyn DispatchStrategy<R>>,
    token: CancellationToken,
) -> (LoopExit, Rd)
where
    Rd: AsyncRead + Unpin + Send + 'static,
    H: HeaderPolicy,
    R: PeerRole,
{
    let _cancel = token.clone().drop_guard();
    let connection_id = context.peer().connection_id();
    let exit = loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => break LoopExit::Cancelled,
            next = reader.next_message() => next,
        };
        match next {
            Ok(Some(message)) => {
                if let Err(e) = strategy.dispatch(&context, message, &token).await {
                    break LoopExit::Fault(e);
                }
            }
            Ok(None) => break LoopExit::Closed(DisconnectReason::PeerClosed),
            Err(FrameError::Disconnected { buffered }) => {
                debug!("peer closed mid-frame: buffered={buffered}, connection_id={connection_id}");
                break LoopExit::Closed(DisconnectReason::ClosedMidFrame);
            }
            Err(FrameError::Io(e)) => {
                debug!("transport read failed: error={e}, connection_id={connection_id}");
                break LoopExit::Closed(DisconnectReason::TransportError(e.kind()));
            }
            Err(FrameError::Framing(e)) => break LoopExit::Fault(SessionError::Framing(e)),
        }
    };
    (exit, reader.into_inner())
}

/// Frame queued envelopes onto the transport until cancellation or a write
/// failure.
///
/// Cancels `token` on exit, including an unwind, so the read loop stops too.
pub(super) async fn write<W, H>(
    mut writer: W,
    mut queue: OutgoingQueue,
    mut framer: PacketFramer<H>,
    limiter: Option<RateLimiter>,
    token: CancellationToken,
    connection_id: ConnectionId,
) -> (LoopExit, W)
where
    W: TransportWriter,
    H: HeaderPolicy,
{
    let _cancel = token.clone().drop_guard();
    let exit = loop {
        let Some(item) = queue.dequeue(&token).await else {
            break LoopExit::Cancelled;
        };
        if let Some(limiter) = &limiter {
            tokio::select! {
                biased;
                () = token.cancelled() => break LoopExit::Cancelled,
                () = limiter.acquire(1) => {}
            }
        }
        let mut frame = BytesMut::with_capacity(
            framer.options().maximum_header_size() + item.payload.len(),
        );
        if let Err(e) = framer.encode(item.payload.clone(), &mut frame) {
            warn!("dropping unframeable envelope: error={e}, connection_id={connection_id}");
            continue;
        }
        let sent = tokio::select! {
            biased;
            () = token.cancelled() => break LoopExit::Cancelled,
            sent = writer.send(frame.freeze(), &item) => sent,
        };
        if let Err(e) = sent {
            debug!("transport write failed: error={e}, connection_id={connection_id}");
            break LoopExit::Closed(DisconnectReason::TransportError(e.kind()));
        }
        metrics::inc_frames(Direction::Outbound);
    };
    queue.close();
    (exit, writer)
}
