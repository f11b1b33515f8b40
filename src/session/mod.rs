//! Connection sessions.
//!
//! A [`Session`] owns one transport and runs two loops over it on separate
//! tasks: the read loop frames incoming bytes and dispatches messages, the
//! write loop drains the outgoing queue onto the transport. Whichever loop
//! ends first cancels the shared token, stopping its sibling. Only after
//! both loops have returned, and off-loaded handlers have drained, is the
//! transport shut down and released.
//!
//! Sessions are normally built and started by a
//! [`SessionStarter`](crate::starter::SessionStarter).

mod details;
mod error;
mod loops;
mod status;

use std::sync::Arc;

pub use details::{ConnectionId, NetworkAddressInfo, SessionDetails};
pub use error::{DisconnectReason, SessionError, SessionOutcome};
use leaky_bucket::RateLimiter;
use log::debug;
use loops::LoopExit;
pub use status::{SessionState, SessionStatus, StateCell, StatusListeners};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::{
    config::NetworkConnectionOptions,
    dispatch::{DispatchContext, DispatchStrategy},
    frame::{FrameReader, HeaderPolicy, PacketFramer},
    handler::panic_message,
    peer::PeerRole,
    queue::OutgoingQueue,
    serializer::SharedCodec,
    transport::{Transport, TransportWriter},
};

/// One connection's read and write loops, ready to run.
///
/// [`run`](Self::run) consumes the session, so a session can only ever be
/// started once.
pub struct Session<R, H> {
    context: DispatchContext<R>,
    strategy: Arc<dyn DispatchStrategy<R>>,
    queue: OutgoingQueue,
    framer: PacketFramer<H>,
    codec: SharedCodec,
    limiter: Option<RateLimiter>,
    state: StateCell,
    token: CancellationToken,
}

/// Collaborators a [`Session`] is built from.
pub(crate) struct SessionParts<R, H> {
    pub context: DispatchContext<R>,
    pub strategy: Arc<dyn DispatchStrategy<R>>,
    pub queue: OutgoingQueue,
    pub policy: H,
    pub options: NetworkConnectionOptions,
    pub codec: SharedCodec,
    pub limiter: Option<RateLimiter>,
    pub token: CancellationToken,
}

impl<R: PeerRole, H: HeaderPolicy> Session<R, H> {
    pub(crate) fn new(parts: SessionParts<R, H>) -> Self {
        let SessionParts {
            context,
            strategy,
            queue,
            policy,
            options,
            codec,
            limiter,
            token,
        } = parts;
        Self {
            context,
            strategy,
            queue,
            framer: PacketFramer::new(policy, options),
            codec,
            limiter,
            state: StateCell::default(),
            token,
        }
    }

    /// Shared view of the session's lifecycle state.
    #[must_use]
    pub fn state(&self) -> &StateCell { &self.state }

    /// Run both loops over `transport` until the session ends, then dispose
    /// of the transport.
    ///
    /// Requires a tokio runtime; the loops run on their own tasks.
    pub async fn run<T: Transport>(self, transport: T) -> SessionOutcome {
        let Self {
            context,
            strategy,
            queue,
            framer,
            codec,
            limiter,
            state,
            token,
        } = self;
        let details = *context.peer().details();
        let connection_id = details.connection_id();
        let (reader, writer) = transport.into_split();
        state.advance(SessionState::Running);

        let reader = FrameReader::new(reader, framer.clone(), codec);
        let read_task = tokio::spawn(loops::listen(
            reader,
            context.clone(),
            strategy,
            token.clone(),
        ));
        let write_task = tokio::spawn(loops::write(
            writer,
            queue,
            framer,
            limiter,
            token.clone(),
            connection_id,
        ));
        let (read, write) = tokio::join!(read_task, write_task);
        state.advance(SessionState::Disconnecting);
        token.cancel();
        context.drain().await;

        let (read_exit, reader) = split_join(read);
        let (write_exit, writer) = split_join(write);
        if let Some(mut writer) = writer
            && let Err(e) = writer.shutdown().await
        {
            debug!("transport shutdown failed: error={e}, connection_id={connection_id}");
        }
        drop(reader);
        state.advance(SessionState::Disposed);

        let offloaded = context.take_fault();
        let (reason, fault) = settle(read_exit, write_exit, offloaded);
        SessionOutcome {
            details,
            reason,
            fault,
        }
    }
}

fn split_join<T>(joined: Result<(LoopExit, T), JoinError>) -> (LoopExit, Option<T>) {
    match joined {
        Ok((exit, half)) => (exit, Some(half)),
        Err(e) if e.is_panic() => (
            LoopExit::Fault(SessionError::Panicked(panic_message(e.into_panic()))),
            None,
        ),
        Err(_) => (LoopExit::Cancelled, None),
    }
}

/// Combine both loop exits and any off-loaded fault into the final reason.
///
/// A fault always wins. Otherwise the first non-cancellation cause is
/// reported, preferring the read side.
fn settle(
    read: LoopExit,
    write: LoopExit,
    offloaded: Option<SessionError>,
) -> (DisconnectReason, Option<SessionError>) {
    let (read_reason, read_fault) = read.into_parts();
    let (write_reason, write_fault) = write.into_parts();
    if let Some(fault) = read_fault.or(offloaded).or(write_fault) {
        return (DisconnectReason::Faulted, Some(fault));
    }
    let reason = read_reason
        .or(write_reason)
        .unwrap_or(DisconnectReason::Cancelled);
    (reason, None)
}

impl LoopExit {
    fn into_parts(self) -> (Option<DisconnectReason>, Option<SessionError>) {
        match self {
            Self::Closed(reason) => (Some(reason), None),
            Self::Cancelled => (None, None),
            Self::Fault(e) => (None, Some(e)),
        }
    }
}
