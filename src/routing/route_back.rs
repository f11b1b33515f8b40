//! Forwarding messages along and back down a routing stack.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};

use super::Routable;
use crate::{
    envelope::{Envelope, MessageParameters},
    handler::{HandlerError, MessageHandler},
    peer::{Peer, PeerRole, SendResult},
    registry::ConnectionRegistry,
    session::ConnectionId,
};

/// Sends messages to other registered sessions, recording or retracing hops.
pub struct RouteBack<R> {
    registry: Arc<ConnectionRegistry<R>>,
}

impl<R> Clone for RouteBack<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R> fmt::Debug for RouteBack<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBack").finish_non_exhaustive()
    }
}

impl<R: PeerRole> RouteBack<R> {
    /// Route through the sessions in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry<R>>) -> Self { Self { registry } }

    /// Send `message` one hop back along its routing stack.
    ///
    /// Pops the most recent hop, looks the connection up and queues the
    /// message on it with `parameters`. Returns
    /// [`SendResult::Undeliverable`] when the stack is empty or the hop's
    /// session is gone.
    pub fn route_back(&self, mut message: Envelope, parameters: MessageParameters) -> SendResult {
        let kind = message.kind();
        let Some(hop) = message.routing_mut().pop() else {
            warn!("route back without routing data: kind={kind}");
            crate::metrics::inc_route_undeliverable();
            return SendResult::Undeliverable;
        };
        let target = ConnectionId::new(hop);
        let Some(peer) = self.registry.get(target) else {
            warn!("route back target not connected: kind={kind}, target={target}");
            crate::metrics::inc_route_undeliverable();
            return SendResult::Undeliverable;
        };
        peer.send_service().send_with(&message, parameters)
    }

    /// Forward `message` from `origin` to `target`, recording `origin` as a
    /// hop so the response can be routed back.
    ///
    /// Returns [`SendResult::Undeliverable`] when `target` is not connected.
    pub fn forward(
        &self,
        mut message: Envelope,
        origin: ConnectionId,
        target: ConnectionId,
        parameters: MessageParameters,
    ) -> SendResult {
        let Some(peer) = self.registry.get(target) else {
            warn!(
                "forward target not connected: kind={}, origin={origin}, target={target}",
                message.kind()
            );
            crate::metrics::inc_route_undeliverable();
            return SendResult::Undeliverable;
        };
        message.routing_mut().push(origin.as_hop());
        peer.send_service().send_with(&message, parameters)
    }
}

/// Handler that routes every routable message back one hop.
///
/// Messages with an empty routing stack are left for later handlers. On a
/// proxy in the middle of a chain, register handlers that forward requests
/// before this one: forwarded requests are routable too.
pub struct RouteBackHandler<R> {
    route: RouteBack<R>,
}

impl<R: PeerRole> RouteBackHandler<R> {
    /// Route back through the sessions in `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry<R>>) -> Self {
        Self {
            route: RouteBack::new(registry),
        }
    }
}

#[async_trait]
impl<R: PeerRole> MessageHandler<R> for RouteBackHandler<R> {
    async fn try_handle(
        &self,
        message: &Envelope,
        parameters: MessageParameters,
        _peer: &Peer<R>,
    ) -> Result<bool, HandlerError> {
        if !message.is_routable() {
            return Ok(false);
        }
        let target = message.routing().peek();
        match self.route.route_back(message.clone(), parameters) {
            // Undeliverable routes are logged by `route_back` itself.
            SendResult::Queued | SendResult::Undeliverable => {}
            SendResult::Dropped => debug!(
                "route back dropped by full queue: kind={}, target={target:?}",
                message.kind()
            ),
            result => warn!(
                "route back failed: kind={}, target={target:?}, result={result:?}",
                message.kind()
            ),
        }
        Ok(true)
    }
}
