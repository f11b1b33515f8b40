//! Message handlers and the ordered handler chain.
//!
//! A [`HandlerChain`] offers each incoming envelope to its
//! [`MessageHandler`]s in registration order until one claims it. Unclaimed
//! envelopes go to the optional [`DefaultHandler`]. Chains are assembled
//! once through [`HandlerChain::builder`] and are immutable afterwards.

use std::{any::Any, error::Error, fmt, future::Future, marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use bincode::error::DecodeError;
use thiserror::Error;

use crate::{
    catalog::{CatalogError, MessageCatalog},
    envelope::{Envelope, MessageParameters},
    message::MessageKind,
    peer::{Peer, PeerRole, SendResult},
};

/// Errors raised by handlers. Any of them ends the session.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not decode as the handler's message type.
    #[error("failed to decode message kind {kind}: {source}")]
    Decode {
        /// Kind carried by the envelope.
        kind: u32,
        /// Underlying decode failure.
        #[source]
        source: DecodeError,
    },
    /// Application-defined failure.
    #[error("handler failed: {0}")]
    Failed(#[source] Box<dyn Error + Send + Sync>),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wrap an application error.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Failed(error.into())
    }

    pub(crate) fn from_panic(panic: Box<dyn Any + Send>) -> Self { Self::Panicked(panic_message(panic)) }
}

/// Render a panic payload for logs and errors.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String { PanicMessage(panic).to_string() }

/// Formats a panic payload, downcasting to `String` or `&'static str` where
/// possible.
struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// A handler that may claim an incoming message.
#[async_trait]
pub trait MessageHandler<R: PeerRole>: Send + Sync + 'static {
    /// Handle `message` if it is meant for this handler.
    ///
    /// Return `Ok(true)` to claim the message and stop the chain, `Ok(false)`
    /// to pass it on.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the session.
    async fn try_handle(
        &self,
        message: &Envelope,
        parameters: MessageParameters,
        peer: &Peer<R>,
    ) -> Result<bool, HandlerError>;
}

/// Fallback for messages no [`MessageHandler`] claimed.
#[async_trait]
pub trait DefaultHandler<R: PeerRole>: Send + Sync + 'static {
    /// Receive an unclaimed message.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the session.
    async fn handle(
        &self,
        message: Envelope,
        parameters: MessageParameters,
        peer: &Peer<R>,
    ) -> Result<(), HandlerError>;
}

/// Whether a message was claimed by the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    /// A [`MessageHandler`] claimed the message.
    Consumed,
    /// No handler claimed the message. The default handler, if any, has
    /// seen it.
    Unconsumed,
}

/// A decoded message together with the envelope it arrived in.
#[derive(Debug)]
pub struct Incoming<M> {
    /// Decoded payload.
    pub message: M,
    /// The envelope, carrying correlation and routing data.
    pub envelope: Envelope,
    /// Delivery properties the message arrived with.
    pub parameters: MessageParameters,
}

impl<M> Incoming<M> {
    /// Send `response` to `peer` as the answer to this message.
    pub fn reply<R: PeerRole, Resp: MessageKind>(&self, peer: &Peer<R>, response: &Resp) -> SendResult {
        peer.reply(&self.envelope, self.parameters, response)
    }
}

/// Adapts an async closure over one concrete message type.
///
/// Claims only envelopes of kind `M::KIND`, decoding the payload before the
/// closure runs.
pub struct TypedHandler<M, F> {
    handler: F,
    _message: PhantomData<fn() -> M>,
}

impl<M, F> TypedHandler<M, F> {
    /// Wrap `handler`.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _message: PhantomData,
        }
    }
}

#[async_trait]
impl<R, M, F, Fut> MessageHandler<R> for TypedHandler<M, F>
where
    R: PeerRole,
    M: MessageKind,
    F: Fn(Incoming<M>, Peer<R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn try_handle(
        &self,
        message: &Envelope,
        parameters: MessageParameters,
        peer: &Peer<R>,
    ) -> Result<bool, HandlerError> {
        if message.kind() != M::KIND {
            return Ok(false);
        }
        let decoded = message.decode::<M>().map_err(|source| HandlerError::Decode {
            kind: M::KIND,
            source,
        })?;
        let incoming = Incoming {
            message: decoded,
            envelope: message.clone(),
            parameters,
        };
        (self.handler)(incoming, peer.clone()).await?;
        Ok(true)
    }
}

/// Ordered, immutable list of handlers plus an optional fallback.
pub struct HandlerChain<R> {
    handlers: Vec<Arc<dyn MessageHandler<R>>>,
    default: Option<Arc<dyn DefaultHandler<R>>>,
    typed_kinds: Vec<(u32, &'static str)>,
}

impl<R> fmt::Debug for HandlerChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .field("default", &self.default.is_some())
            .finish()
    }
}

impl<R: PeerRole> Default for HandlerChain<R> {
    fn default() -> Self { Self::builder().build() }
}

impl<R: PeerRole> HandlerChain<R> {
    /// Start assembling a chain.
    #[must_use]
    pub fn builder() -> HandlerChainBuilder<R> {
        HandlerChainBuilder {
            chain: Self {
                handlers: Vec::new(),
                default: None,
                typed_kinds: Vec::new(),
            },
        }
    }

    /// Offer `message` to each handler in order.
    ///
    /// # Errors
    ///
    /// Propagates the first handler error.
    pub async fn handle(
        &self,
        message: Envelope,
        parameters: MessageParameters,
        peer: &Peer<R>,
    ) -> Result<HandleOutcome, HandlerError> {
        for handler in &self.handlers {
            if handler.try_handle(&message, parameters, peer).await? {
                return Ok(HandleOutcome::Consumed);
            }
        }
        if let Some(default) = &self.default {
            default.handle(message, parameters, peer).await?;
        }
        Ok(HandleOutcome::Unconsumed)
    }

    /// Number of registered handlers, not counting the default.
    #[must_use]
    pub fn len(&self) -> usize { self.handlers.len() }

    /// `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.handlers.is_empty() }

    /// `true` if a default handler is installed.
    #[must_use]
    pub fn has_default(&self) -> bool { self.default.is_some() }
}

/// Builder for [`HandlerChain`].
pub struct HandlerChainBuilder<R> {
    chain: HandlerChain<R>,
}

impl<R: PeerRole> HandlerChainBuilder<R> {
    /// Append a handler.
    #[must_use]
    pub fn handler<H: MessageHandler<R>>(mut self, handler: H) -> Self {
        self.chain.handlers.push(Arc::new(handler));
        self
    }

    /// Append a [`TypedHandler`] for messages of type `M`.
    #[must_use]
    pub fn on<M, F, Fut>(mut self, handler: F) -> Self
    where
        M: MessageKind,
        F: Fn(Incoming<M>, Peer<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.chain.typed_kinds.push((M::KIND, M::name()));
        self.chain
            .handlers
            .push(Arc::new(TypedHandler::<M, F>::new(handler)));
        self
    }

    /// Install the fallback handler, replacing any previous one.
    #[must_use]
    pub fn default_handler<D: DefaultHandler<R>>(mut self, handler: D) -> Self {
        self.chain.default = Some(Arc::new(handler));
        self
    }

    /// Finish the chain.
    #[must_use]
    pub fn build(self) -> HandlerChain<R> { self.chain }

    /// Finish the chain, checking every typed handler's kind against
    /// `catalog`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unregistered`] for the first typed handler
    /// whose kind the catalogue does not know.
    pub fn build_checked(self, catalog: &MessageCatalog) -> Result<HandlerChain<R>, CatalogError> {
        for &(kind, name) in &self.chain.typed_kinds {
            catalog.ensure_registered(kind, name)?;
        }
        Ok(self.chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_formatted() {
        let from_str = HandlerError::from_panic(Box::new("boom"));
        let from_string = HandlerError::from_panic(Box::new(String::from("bang")));
        let opaque = HandlerError::from_panic(Box::new(5_u32));
        assert_eq!(from_str.to_string(), "handler panicked: boom");
        assert_eq!(from_string.to_string(), "handler panicked: bang");
        assert!(opaque.to_string().contains("Any"));
    }

    #[test]
    fn failed_wraps_application_errors() {
        let err = HandlerError::failed("inventory full");
        assert!(matches!(err, HandlerError::Failed(_)));
        assert_eq!(err.to_string(), "handler failed: inventory full");
    }
}
