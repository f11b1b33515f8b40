//! Dispatch strategies: whether handling a message blocks the next read.
//!
//! The read loop hands every decoded message to a [`DispatchStrategy`]. The
//! future returned by [`DispatchStrategy::dispatch`] resolves when the
//! session may read the next frame. [`InPlaceDispatch`] resolves after the
//! message has been handled, preserving per-connection order.
//! [`OffloadDispatch`] spawns the handling onto the session's task tracker
//! and resolves immediately.
//!
//! Both strategies run the same pipeline: role check, correlator, handler
//! chain.

use std::{
    fmt,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    catalog::MessageCatalog,
    envelope::{Envelope, IncomingMessage},
    handler::{HandleOutcome, HandlerChain, HandlerError},
    peer::{Peer, PeerRole},
    routing::Routable,
    session::SessionError,
};

/// Per-session state shared by the read loop and off-loaded handlers.
pub struct DispatchContext<R> {
    peer: Peer<R>,
    chain: Arc<HandlerChain<R>>,
    catalog: Arc<MessageCatalog>,
    tracker: TaskTracker,
    in_flight: Option<Arc<Semaphore>>,
    fault: Arc<Mutex<Option<SessionError>>>,
}

impl<R> Clone for DispatchContext<R> {
    fn clone(&self) -> Self {
        Self {
            peer: self.peer.clone(),
            chain: Arc::clone(&self.chain),
            catalog: Arc::clone(&self.catalog),
            tracker: self.tracker.clone(),
            in_flight: self.in_flight.clone(),
            fault: Arc::clone(&self.fault),
        }
    }
}

impl<R> fmt::Debug for DispatchContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("peer", &self.peer)
            .field("chain", &self.chain)
            .field("in_flight", &self.in_flight.as_ref().map(|s| s.available_permits()))
            .finish_non_exhaustive()
    }
}

impl<R: PeerRole> DispatchContext<R> {
    /// Build a context for one session.
    ///
    /// `in_flight_limit` bounds concurrently off-loaded handlers.
    #[must_use]
    pub fn new(
        peer: Peer<R>,
        chain: Arc<HandlerChain<R>>,
        catalog: Arc<MessageCatalog>,
        in_flight_limit: Option<usize>,
    ) -> Self {
        Self {
            peer,
            chain,
            catalog,
            tracker: TaskTracker::new(),
            in_flight: in_flight_limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// The session's peer handle.
    #[must_use]
    pub const fn peer(&self) -> &Peer<R> { &self.peer }

    /// Tracker holding off-loaded handler tasks.
    #[must_use]
    pub const fn tracker(&self) -> &TaskTracker { &self.tracker }

    /// Record `fault` unless an earlier one is already recorded.
    pub fn record_fault(&self, fault: SessionError) {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(fault);
        } else {
            debug!(
                "additional session fault ignored: error={fault}, connection_id={}",
                self.peer.connection_id()
            );
        }
    }

    /// Take the recorded fault, if any.
    pub fn take_fault(&self) -> Option<SessionError> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stop accepting off-loaded work and wait for running handlers.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Run one message through the role check, correlator and handler chain.
    ///
    /// Handler panics are caught and reported as
    /// [`HandlerError::Panicked`].
    ///
    /// # Errors
    ///
    /// Returns the handler error that claimed or rejected the message.
    pub async fn process(&self, message: IncomingMessage<Envelope>) -> Result<(), HandlerError> {
        let IncomingMessage {
            payload: envelope,
            parameters,
            ..
        } = message;
        let kind = envelope.kind();
        let connection_id = self.peer.connection_id();
        if !R::on_receive(kind) {
            warn!(
                "role refused inbound message: role={}, kind={kind}, name={}, connection_id={connection_id}",
                R::NAME,
                self.catalog.describe(kind)
            );
            return Ok(());
        }
        // Routed envelopes belong to someone further along the path, never to
        // this peer's own outstanding requests.
        let envelope = if envelope.is_routable() {
            envelope
        } else {
            match self.peer.correlator().try_complete(envelope) {
                Ok(()) => return Ok(()),
                Err(envelope) => envelope,
            }
        };
        let handled = AssertUnwindSafe(self.chain.handle(envelope, parameters, &self.peer))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)))?;
        if handled == HandleOutcome::Unconsumed && !self.chain.has_default() {
            warn!(
                "no handler for message: kind={kind}, name={}, connection_id={connection_id}",
                self.catalog.describe(kind)
            );
        }
        Ok(())
    }
}

/// Decides how the read loop hands messages to the handler pipeline.
#[async_trait]
pub trait DispatchStrategy<R: PeerRole>: Send + Sync + 'static {
    /// Dispatch `message`. Resolves when the session may read the next frame.
    ///
    /// # Errors
    ///
    /// Returning an error ends the session.
    async fn dispatch(
        &self,
        context: &DispatchContext<R>,
        message: IncomingMessage<Envelope>,
        token: &CancellationToken,
    ) -> Result<(), SessionError>;

    /// Maximum number of messages handled concurrently, if bounded.
    fn in_flight_limit(&self) -> Option<usize> { None }
}

/// Handle each message to completion before reading the next.
#[derive(Clone, Copy, Debug, Default)]
pub struct InPlaceDispatch;

#[async_trait]
impl<R: PeerRole> DispatchStrategy<R> for InPlaceDispatch {
    async fn dispatch(
        &self,
        context: &DispatchContext<R>,
        message: IncomingMessage<Envelope>,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            () = token.cancelled() => Ok(()),
            result = context.process(message) => result.map_err(SessionError::HandlerFault),
        }
    }
}

/// Handle messages on separate tasks so slow handlers never stall reads.
///
/// Ordering between messages is not preserved. A fault in any off-loaded
/// handler cancels the session and becomes its recorded fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct OffloadDispatch {
    max_in_flight: Option<usize>,
}

impl OffloadDispatch {
    /// Off-load without a concurrency bound.
    #[must_use]
    pub const fn new() -> Self { Self { max_in_flight: None } }

    /// Off-load at most `limit` messages at a time; further dispatches wait
    /// for a running handler to finish.
    #[must_use]
    pub const fn with_max_in_flight(limit: usize) -> Self {
        Self {
            max_in_flight: Some(limit),
        }
    }
}

#[async_trait]
impl<R: PeerRole> DispatchStrategy<R> for OffloadDispatch {
    async fn dispatch(
        &self,
        context: &DispatchContext<R>,
        message: IncomingMessage<Envelope>,
        token: &CancellationToken,
    ) -> Result<(), SessionError> {
        let permit = match &context.in_flight {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    biased;
                    () = token.cancelled() => return Ok(()),
                    permit = Arc::clone(semaphore).acquire_owned() => permit,
                };
                // The semaphore is never closed.
                let Ok(permit) = acquired else {
                    return Ok(());
                };
                Some(permit)
            }
            None => None,
        };
        let task_context = context.clone();
        let token = token.clone();
        context.tracker.spawn(async move {
            let _permit = permit;
            if let Err(e) = task_context.process(message).await {
                task_context.record_fault(SessionError::HandlerFault(e));
                token.cancel();
            }
        });
        Ok(())
    }

    fn in_flight_limit(&self) -> Option<usize> { self.max_in_flight }
}
