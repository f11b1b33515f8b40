//! Envelope types exchanged by sessions.
//!
//! Every frame payload decodes into an [`Envelope`]: a message kind, an
//! optional correlation identifier, the routing stack and the encoded
//! application message. Keeping the payload opaque lets the session route,
//! correlate and proxy frames without knowing the concrete message types.

use bincode::error::{DecodeError, EncodeError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    frame::PacketHeader,
    message::{Message, MessageKind},
    routing::{Routable, RoutingStack},
};

/// Wire-level wrapper around one application message.
///
/// # Examples
///
/// ```
/// use peerwire::{envelope::Envelope, message::MessageKind};
///
/// #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
/// struct Ping(u32);
///
/// impl MessageKind for Ping {
///     const KIND: u32 = 7;
/// }
///
/// let envelope = Envelope::from_message(&Ping(3)).expect("encode");
/// assert_eq!(envelope.kind(), 7);
/// assert_eq!(envelope.decode::<Ping>().expect("decode"), Ping(3));
/// ```
#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: u32,
    correlation_id: Option<u64>,
    routing: RoutingStack,
    payload: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from a kind identifier and pre-encoded payload.
    #[must_use]
    pub fn new(kind: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            correlation_id: None,
            routing: RoutingStack::new(),
            payload,
        }
    }

    /// Encode `message` into a fresh envelope.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the message cannot be serialized.
    pub fn from_message<M: MessageKind>(message: &M) -> Result<Self, EncodeError> {
        Ok(Self::new(M::KIND, message.to_bytes()?))
    }

    /// Build a response to `request`.
    ///
    /// The response inherits the request's correlation identifier and a copy
    /// of its routing stack so it can retrace the request's path.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if the message cannot be serialized.
    pub fn response_to<M: MessageKind>(request: &Envelope, message: &M) -> Result<Self, EncodeError> {
        let mut response = Self::from_message(message)?;
        response.correlation_id = request.correlation_id;
        request.export_routing_data_to(&mut response);
        Ok(response)
    }

    /// Decode the payload as `M`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the envelope carries a different kind or
    /// the payload is malformed.
    pub fn decode<M: MessageKind>(&self) -> Result<M, DecodeError> {
        if self.kind != M::KIND {
            return Err(DecodeError::Other("envelope kind does not match message type"));
        }
        M::from_bytes(&self.payload).map(|(message, _)| message)
    }

    /// Kind identifier of the carried message.
    #[must_use]
    pub const fn kind(&self) -> u32 { self.kind }

    /// Correlation identifier tying a response to its request.
    #[must_use]
    pub const fn correlation_id(&self) -> Option<u64> { self.correlation_id }

    /// Set or clear the correlation identifier.
    pub fn set_correlation_id(&mut self, correlation_id: Option<u64>) {
        self.correlation_id = correlation_id;
    }

    /// Builder-style variant of [`set_correlation_id`](Self::set_correlation_id).
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: u64) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Encoded application message.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the envelope, returning the encoded application message.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> { self.payload }
}

impl Routable for Envelope {
    fn routing(&self) -> &RoutingStack { &self.routing }

    fn routing_mut(&mut self) -> &mut RoutingStack { &mut self.routing }
}

/// Delivery guarantee requested for an outgoing envelope.
///
/// Stream transports are always reliable and ordered and ignore this value;
/// datagram transports map it onto their own channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMethod {
    /// Fire and forget.
    Unreliable,
    /// Unreliable, stale packets dropped.
    UnreliableSequenced,
    /// Reliable, any order.
    ReliableUnordered,
    /// Reliable, stale packets dropped.
    ReliableSequenced,
    /// Reliable and in order.
    #[default]
    ReliableOrdered,
}

/// Delivery properties observed for an incoming message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageParameters {
    /// Delivery method the message arrived with.
    pub delivery: DeliveryMethod,
    /// Transport channel the message arrived on.
    pub channel: u8,
    /// Whether the transport decrypted the message.
    pub encrypted: bool,
}

/// A decoded frame waiting to be dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage<T> {
    /// Header sizes of the frame the message arrived in.
    pub header: PacketHeader,
    /// Decoded payload.
    pub payload: T,
    /// Delivery properties reported by the transport.
    pub parameters: MessageParameters,
}

impl<T> IncomingMessage<T> {
    /// Consume the message, returning the decoded payload.
    #[must_use]
    pub fn into_payload(self) -> T { self.payload }
}

/// Encoded payload queued for the write loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingEnvelope {
    /// Frame payload (the encoded [`Envelope`]); the header is added on write.
    pub payload: Bytes,
    /// Requested delivery guarantee.
    pub delivery: DeliveryMethod,
    /// Whether the transport should encrypt the frame.
    pub encrypted: bool,
    /// Transport channel to send on.
    pub channel: u8,
}

impl OutgoingEnvelope {
    /// Queue `payload` with the given delivery method on channel 0, unencrypted.
    #[must_use]
    pub fn new(payload: Bytes, delivery: DeliveryMethod) -> Self {
        Self {
            payload,
            delivery,
            encrypted: false,
            channel: 0,
        }
    }

    /// Copy delivery, channel and encryption from an incoming message.
    #[must_use]
    pub fn with_parameters(payload: Bytes, parameters: MessageParameters) -> Self {
        Self {
            payload,
            delivery: parameters.delivery,
            encrypted: parameters.encrypted,
            channel: parameters.channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
    struct Lookup {
        key: String,
    }

    impl MessageKind for Lookup {
        const KIND: u32 = 11;
    }

    #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq)]
    struct Found {
        value: Option<u64>,
    }

    impl MessageKind for Found {
        const KIND: u32 = 12;
    }

    #[test]
    fn response_inherits_correlation_and_route() {
        let mut request = Envelope::from_message(&Lookup { key: "hp".into() })
            .expect("encode request")
            .with_correlation_id(9);
        request.routing_mut().push(4);
        request.routing_mut().push(8);

        let response =
            Envelope::response_to(&request, &Found { value: Some(1) }).expect("encode response");

        assert_eq!(response.kind(), Found::KIND);
        assert_eq!(response.correlation_id(), Some(9));
        assert_eq!(response.routing(), request.routing());
    }

    #[test]
    fn decode_rejects_wrong_kind() {
        let envelope = Envelope::from_message(&Lookup { key: "mp".into() }).expect("encode");
        assert!(envelope.decode::<Found>().is_err());
        assert_eq!(
            envelope.decode::<Lookup>().expect("decode"),
            Lookup { key: "mp".into() }
        );
    }
}
