//! Per-session handles: roles, the send service and [`Peer`].
//!
//! A [`Peer`] is the cloneable face of one running session. Handlers receive
//! it with every message, the [`ConnectionRegistry`](crate::registry::ConnectionRegistry)
//! stores it, and applications use it to send messages, issue requests and
//! disconnect.

use std::{fmt, marker::PhantomData, sync::Arc, time::Duration};

use bytes::Bytes;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    correlator::{Correlator, RequestError},
    envelope::{DeliveryMethod, Envelope, MessageParameters, OutgoingEnvelope},
    message::MessageKind,
    queue::{Enqueued, OutgoingSender, QueueError},
    serializer::SharedCodec,
    session::{ConnectionId, SessionDetails},
};

/// Capabilities of one side of a connection.
///
/// Roles are zero-sized markers. The defaults allow every message kind in
/// both directions; restrict them by overriding [`can_send`](Self::can_send)
/// and [`on_receive`](Self::on_receive).
pub trait PeerRole: Send + Sync + 'static {
    /// Name used in logs.
    const NAME: &'static str;

    /// Whether this role may send messages of `kind`.
    #[must_use]
    fn can_send(kind: u32) -> bool {
        let _ = kind;
        true
    }

    /// Whether this role accepts inbound messages of `kind`.
    #[must_use]
    fn on_receive(kind: u32) -> bool {
        let _ = kind;
        true
    }
}

/// The connecting side of a client/server pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientRole;

impl PeerRole for ClientRole {
    const NAME: &'static str = "client";
}

/// The accepting side of a client/server pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct ServerRole;

impl PeerRole for ServerRole {
    const NAME: &'static str = "server";
}

/// An intermediary that forwards messages between other peers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProxyRole;

impl PeerRole for ProxyRole {
    const NAME: &'static str = "proxy";
}

/// Result of handing an envelope to a send path.
///
/// Sending never fails with an error: every outcome is a value the caller
/// can inspect or ignore.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResult {
    /// Queued for the write loop.
    Queued,
    /// Discarded by a bounded queue's drop policy.
    Dropped,
    /// Refused by the role, the payload limit, the encoder or a full queue.
    Rejected,
    /// The session's write loop has stopped.
    Closed,
    /// No next hop could be found.
    Undeliverable,
}

impl SendResult {
    /// `true` if the envelope was queued.
    #[must_use]
    pub const fn is_queued(self) -> bool { matches!(self, Self::Queued) }
}

/// Encodes envelopes and enqueues them on one session's outgoing queue.
pub struct SendService<R> {
    sender: OutgoingSender,
    codec: SharedCodec,
    maximum_payload_size: usize,
    connection_id: ConnectionId,
    _role: PhantomData<fn() -> R>,
}

impl<R> Clone for SendService<R> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            codec: Arc::clone(&self.codec),
            maximum_payload_size: self.maximum_payload_size,
            connection_id: self.connection_id,
            _role: PhantomData,
        }
    }
}

impl<R> fmt::Debug for SendService<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendService")
            .field("connection_id", &self.connection_id)
            .field("maximum_payload_size", &self.maximum_payload_size)
            .finish_non_exhaustive()
    }
}

impl<R: PeerRole> SendService<R> {
    pub(crate) fn new(
        sender: OutgoingSender,
        codec: SharedCodec,
        maximum_payload_size: usize,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            sender,
            codec,
            maximum_payload_size,
            connection_id,
            _role: PhantomData,
        }
    }

    /// Encode `envelope` and queue it with the given delivery method.
    pub fn send(&self, envelope: &Envelope, delivery: DeliveryMethod) -> SendResult {
        self.send_with(
            envelope,
            MessageParameters {
                delivery,
                ..MessageParameters::default()
            },
        )
    }

    /// Encode `envelope` and queue it with explicit delivery parameters.
    pub fn send_with(&self, envelope: &Envelope, parameters: MessageParameters) -> SendResult {
        let kind = envelope.kind();
        if !R::can_send(kind) {
            warn!(
                "role may not send message: role={}, kind={kind}, connection_id={}",
                R::NAME,
                self.connection_id
            );
            return SendResult::Rejected;
        }
        let payload = match self.codec.encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    "failed to encode envelope: kind={kind}, error={e}, connection_id={}",
                    self.connection_id
                );
                return SendResult::Rejected;
            }
        };
        if payload.len() > self.maximum_payload_size {
            warn!(
                "envelope exceeds payload limit: kind={kind}, size={}, max={}, connection_id={}",
                payload.len(),
                self.maximum_payload_size,
                self.connection_id
            );
            return SendResult::Rejected;
        }
        let item = OutgoingEnvelope::with_parameters(Bytes::from(payload), parameters);
        match self.sender.enqueue(item) {
            Ok(Enqueued::Queued) => SendResult::Queued,
            Ok(Enqueued::Dropped) => SendResult::Dropped,
            Err(QueueError::Full) => SendResult::Rejected,
            Err(QueueError::Closed) => {
                debug!(
                    "send on closed session: kind={kind}, connection_id={}",
                    self.connection_id
                );
                SendResult::Closed
            }
        }
    }

    /// `true` once the session's write loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.sender.is_closed() }
}

/// Cloneable handle to one running session.
pub struct Peer<R> {
    details: SessionDetails,
    sender: SendService<R>,
    correlator: Arc<Correlator>,
    disconnect: CancellationToken,
    request_timeout: Option<Duration>,
}

impl<R> Clone for Peer<R> {
    fn clone(&self) -> Self {
        Self {
            details: self.details,
            sender: self.sender.clone(),
            correlator: Arc::clone(&self.correlator),
            disconnect: self.disconnect.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<R> fmt::Debug for Peer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("details", &self.details)
            .field("disconnected", &self.disconnect.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<R: PeerRole> Peer<R> {
    pub(crate) fn new(
        details: SessionDetails,
        sender: SendService<R>,
        disconnect: CancellationToken,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            details,
            sender,
            correlator: Arc::new(Correlator::new()),
            disconnect,
            request_timeout,
        }
    }

    /// Identity of the session.
    #[must_use]
    pub const fn details(&self) -> &SessionDetails { &self.details }

    /// Identifier of the session's connection.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId { self.details.connection_id() }

    /// The session's send service.
    #[must_use]
    pub const fn send_service(&self) -> &SendService<R> { &self.sender }

    /// The session's request/response correlator.
    #[must_use]
    pub fn correlator(&self) -> &Arc<Correlator> { &self.correlator }

    /// Queue `envelope` for sending.
    pub fn send(&self, envelope: &Envelope, delivery: DeliveryMethod) -> SendResult {
        self.sender.send(envelope, delivery)
    }

    /// Encode `message` into a new envelope and queue it.
    pub fn send_message<M: MessageKind>(&self, message: &M, delivery: DeliveryMethod) -> SendResult {
        match Envelope::from_message(message) {
            Ok(envelope) => self.send(&envelope, delivery),
            Err(e) => {
                warn!(
                    "failed to encode message: name={}, error={e}, connection_id={}",
                    M::name(),
                    self.connection_id()
                );
                SendResult::Rejected
            }
        }
    }

    /// Answer `request` with `response`, reusing the request's correlation id,
    /// routing stack and delivery parameters.
    pub fn reply<M: MessageKind>(
        &self,
        request: &Envelope,
        parameters: MessageParameters,
        response: &M,
    ) -> SendResult {
        match Envelope::response_to(request, response) {
            Ok(envelope) => self.sender.send_with(&envelope, parameters),
            Err(e) => {
                warn!(
                    "failed to encode reply: name={}, error={e}, connection_id={}",
                    M::name(),
                    self.connection_id()
                );
                SendResult::Rejected
            }
        }
    }

    /// Send `request` and await the matching `Resp`.
    ///
    /// The waiter is registered before the request is queued. It is bounded
    /// by `token` and by the session's request timeout, if one is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns a [`RequestError`] if the request cannot be encoded or queued,
    /// if `token` fires, the timeout elapses or the session ends first, or if
    /// the response does not decode as `Resp`.
    pub async fn send_request<Req, Resp>(
        &self,
        request: &Req,
        delivery: DeliveryMethod,
        token: &CancellationToken,
    ) -> Result<Resp, RequestError>
    where
        Req: MessageKind,
        Resp: MessageKind,
    {
        let correlation_id = self.correlator.next_correlation_id();
        let envelope = Envelope::from_message(request)?.with_correlation_id(correlation_id);
        let pending = self.correlator.register(Resp::KIND, correlation_id)?;
        match self.send(&envelope, delivery) {
            SendResult::Queued => {}
            SendResult::Closed => return Err(RequestError::Disconnected),
            other => return Err(RequestError::Send(other)),
        }
        let response = pending.wait(token, self.request_timeout).await?;
        Ok(response.decode::<Resp>()?)
    }

    /// Ask the session to stop. Returns immediately; disposal happens on the
    /// session's own task.
    pub fn disconnect(&self) { self.disconnect.cancel(); }

    /// `true` once the session has been asked to stop.
    #[must_use]
    pub fn is_disconnected(&self) -> bool { self.disconnect.is_cancelled() }

    /// Resolves once the session has been asked to stop.
    pub async fn disconnected(&self) { self.disconnect.cancelled().await; }
}
