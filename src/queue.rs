//! Outgoing queue feeding a session's write loop.
//!
//! Any number of [`OutgoingSender`]s enqueue [`OutgoingEnvelope`]s; the single
//! [`OutgoingQueue`] owned by the write loop dequeues them in FIFO order.
//! Enqueueing never awaits, so handlers running on the read loop can send
//! without stalling it. The queue is unbounded by default; a bounded queue
//! applies a [`QueuePolicy`] when full.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::envelope::OutgoingEnvelope;

/// Behaviour when a bounded queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuePolicy {
    /// Return [`QueueError::Full`] to the caller.
    #[default]
    ReturnErrorIfFull,
    /// Silently drop the envelope.
    DropIfFull,
    /// Drop the envelope but emit a log warning.
    WarnAndDropIfFull,
}

/// Capacity and overflow behaviour of an outgoing queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued envelopes; `None` means unbounded.
    pub capacity: Option<usize>,
    /// Applied when a bounded queue is full.
    #[serde(default)]
    pub policy: QueuePolicy,
}

impl QueueConfig {
    /// An unbounded queue.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            capacity: None,
            policy: QueuePolicy::ReturnErrorIfFull,
        }
    }

    /// A queue holding at most `capacity` envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`QueueConfigError::ZeroCapacity`] if `capacity` is zero.
    pub const fn bounded(capacity: usize, policy: QueuePolicy) -> Result<Self, QueueConfigError> {
        if capacity == 0 {
            return Err(QueueConfigError::ZeroCapacity);
        }
        Ok(Self {
            capacity: Some(capacity),
            policy,
        })
    }
}

/// Errors returned when configuring a queue.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum QueueConfigError {
    /// A bounded queue needs room for at least one envelope.
    #[error("bounded queue capacity must be at least 1")]
    ZeroCapacity,
}

/// Errors returned when enqueueing.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was at capacity under [`QueuePolicy::ReturnErrorIfFull`].
    #[error("outgoing queue full")]
    Full,
    /// The write loop has gone away.
    #[error("outgoing queue closed")]
    Closed,
}

/// Result of a successful enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    /// The envelope is waiting for the write loop.
    Queued,
    /// The queue was full and the policy discarded the envelope.
    Dropped,
}

#[derive(Clone, Debug)]
enum SenderInner {
    Unbounded(mpsc::UnboundedSender<OutgoingEnvelope>),
    Bounded {
        tx: mpsc::Sender<OutgoingEnvelope>,
        policy: QueuePolicy,
    },
}

/// Cloneable producer side of an outgoing queue.
#[derive(Clone, Debug)]
pub struct OutgoingSender(SenderInner);

#[derive(Debug)]
enum ReceiverInner {
    Unbounded(mpsc::UnboundedReceiver<OutgoingEnvelope>),
    Bounded(mpsc::Receiver<OutgoingEnvelope>),
}

/// Consumer side of an outgoing queue, owned by the write loop.
#[derive(Debug)]
pub struct OutgoingQueue(ReceiverInner);

/// Create a queue according to `config`.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use peerwire::{
///     envelope::{DeliveryMethod, OutgoingEnvelope},
///     queue::{Enqueued, QueueConfig, outgoing_queue},
/// };
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (tx, mut rx) = outgoing_queue(QueueConfig::unbounded());
/// let item = OutgoingEnvelope::new(Bytes::from_static(b"hi"), DeliveryMethod::ReliableOrdered);
/// assert_eq!(tx.enqueue(item.clone()), Ok(Enqueued::Queued));
/// assert_eq!(rx.dequeue(&CancellationToken::new()).await, Some(item));
/// # }
/// ```
#[must_use]
pub fn outgoing_queue(config: QueueConfig) -> (OutgoingSender, OutgoingQueue) {
    match config.capacity {
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                OutgoingSender(SenderInner::Unbounded(tx)),
                OutgoingQueue(ReceiverInner::Unbounded(rx)),
            )
        }
        Some(capacity) => {
            // mpsc::channel panics on zero; deserialised configs bypass `bounded`.
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (
                OutgoingSender(SenderInner::Bounded {
                    tx,
                    policy: config.policy,
                }),
                OutgoingQueue(ReceiverInner::Bounded(rx)),
            )
        }
    }
}

impl OutgoingSender {
    /// Enqueue an envelope without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the write loop has stopped and
    /// [`QueueError::Full`] if a bounded queue is full under
    /// [`QueuePolicy::ReturnErrorIfFull`].
    pub fn enqueue(&self, item: OutgoingEnvelope) -> Result<Enqueued, QueueError> {
        match &self.0 {
            SenderInner::Unbounded(tx) => tx
                .send(item)
                .map(|()| Enqueued::Queued)
                .map_err(|_| QueueError::Closed),
            SenderInner::Bounded { tx, policy } => match tx.try_send(item) {
                Ok(()) => Ok(Enqueued::Queued),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
                Err(mpsc::error::TrySendError::Full(dropped)) => match policy {
                    QueuePolicy::ReturnErrorIfFull => Err(QueueError::Full),
                    QueuePolicy::DropIfFull => Ok(Enqueued::Dropped),
                    QueuePolicy::WarnAndDropIfFull => {
                        warn!(
                            bytes = dropped.payload.len(),
                            delivery = ?dropped.delivery,
                            "outgoing queue full; envelope dropped"
                        );
                        Ok(Enqueued::Dropped)
                    }
                },
            },
        }
    }

    /// `true` once the consumer has been dropped or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match &self.0 {
            SenderInner::Unbounded(tx) => tx.is_closed(),
            SenderInner::Bounded { tx, .. } => tx.is_closed(),
        }
    }
}

impl OutgoingQueue {
    /// Wait for the next envelope.
    ///
    /// Returns `None` when `token` is cancelled or every sender has been
    /// dropped and the queue is drained.
    pub async fn dequeue(&mut self, token: &CancellationToken) -> Option<OutgoingEnvelope> {
        let item = tokio::select! {
            biased;
            () = token.cancelled() => None,
            item = self.recv() => item,
        };
        if item.is_some() {
            debug!("envelope dequeued");
        }
        item
    }

    async fn recv(&mut self) -> Option<OutgoingEnvelope> {
        match &mut self.0 {
            ReceiverInner::Unbounded(rx) => rx.recv().await,
            ReceiverInner::Bounded(rx) => rx.recv().await,
        }
    }

    /// Refuse further envelopes. Already queued envelopes stay dequeueable.
    pub fn close(&mut self) {
        match &mut self.0 {
            ReceiverInner::Unbounded(rx) => rx.close(),
            ReceiverInner::Bounded(rx) => rx.close(),
        }
    }
}
