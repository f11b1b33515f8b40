//! Starting sessions over transports.
//!
//! [`SessionStarter`] holds everything sessions of one kind share: framing
//! options and header policy, the codec, the handler chain, the dispatch
//! strategy, the connection registry and status listeners. Each call to
//! [`SessionStarter::start`] allocates a connection id, registers the new
//! peer and spawns the session. The returned [`SessionHandle`] resolves
//! once the session has been fully disposed and cleaned up.

use std::{fmt, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use leaky_bucket::RateLimiter;
use log::{error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    catalog::MessageCatalog,
    config::{NetworkConnectionOptions, SessionConfig},
    dispatch::{DispatchContext, DispatchStrategy, InPlaceDispatch},
    frame::{HeaderPolicy, LengthPrefixed},
    handler::{HandlerChain, panic_message},
    metrics,
    peer::{Peer, PeerRole, SendService},
    queue::outgoing_queue,
    registry::ConnectionRegistry,
    serializer::{BincodeSerializer, Serializer, SharedCodec},
    session::{
        ConnectionId,
        DisconnectReason,
        NetworkAddressInfo,
        Session,
        SessionDetails,
        SessionError,
        SessionOutcome,
        SessionParts,
        SessionState,
        SessionStatus,
        StateCell,
        StatusListeners,
    },
    transport::Transport,
};

/// Shared configuration for starting sessions of role `R` framed with `H`.
pub struct SessionStarter<R, H = LengthPrefixed> {
    options: NetworkConnectionOptions,
    policy: H,
    codec: SharedCodec,
    chain: Arc<HandlerChain<R>>,
    strategy: Arc<dyn DispatchStrategy<R>>,
    registry: Arc<ConnectionRegistry<R>>,
    catalog: Arc<MessageCatalog>,
    listeners: StatusListeners,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl<R, H: Clone> Clone for SessionStarter<R, H> {
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            policy: self.policy.clone(),
            codec: Arc::clone(&self.codec),
            chain: Arc::clone(&self.chain),
            strategy: Arc::clone(&self.strategy),
            registry: Arc::clone(&self.registry),
            catalog: Arc::clone(&self.catalog),
            listeners: self.listeners.clone(),
            config: self.config,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<R, H: fmt::Debug> fmt::Debug for SessionStarter<R, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStarter")
            .field("options", &self.options)
            .field("policy", &self.policy)
            .field("chain", &self.chain)
            .field("listeners", &self.listeners)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: PeerRole> SessionStarter<R, LengthPrefixed> {
    /// Start sessions handled by `chain`.
    ///
    /// Defaults: 4-byte big-endian length prefix, default
    /// [`NetworkConnectionOptions`], bincode, in-place dispatch, a fresh
    /// registry and an unbounded outgoing queue.
    #[must_use]
    pub fn new(chain: HandlerChain<R>) -> Self {
        Self {
            options: NetworkConnectionOptions::default(),
            policy: LengthPrefixed::default(),
            codec: Arc::new(BincodeSerializer),
            chain: Arc::new(chain),
            strategy: Arc::new(InPlaceDispatch),
            registry: Arc::new(ConnectionRegistry::new()),
            catalog: Arc::new(MessageCatalog::default()),
            listeners: StatusListeners::new(),
            config: SessionConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

impl<R: PeerRole, H: HeaderPolicy> SessionStarter<R, H> {
    /// Frame with `policy` instead.
    #[must_use]
    pub fn header_policy<H2: HeaderPolicy>(self, policy: H2) -> SessionStarter<R, H2> {
        SessionStarter {
            options: self.options,
            policy,
            codec: self.codec,
            chain: self.chain,
            strategy: self.strategy,
            registry: self.registry,
            catalog: self.catalog,
            listeners: self.listeners,
            config: self.config,
            shutdown: self.shutdown,
        }
    }

    /// Use `options` for header and payload limits.
    #[must_use]
    pub fn options(mut self, options: NetworkConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Encode envelopes with `serializer`.
    #[must_use]
    pub fn serializer<S: Serializer>(mut self, serializer: S) -> Self {
        self.codec = Arc::new(serializer);
        self
    }

    /// Dispatch incoming messages with `strategy`.
    #[must_use]
    pub fn dispatch<D: DispatchStrategy<R>>(mut self, strategy: D) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Register sessions in `registry`, typically shared with other starters.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ConnectionRegistry<R>>) -> Self {
        self.registry = registry;
        self
    }

    /// Name message kinds in logs using `catalog`.
    #[must_use]
    pub fn catalog(mut self, catalog: MessageCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Notify `listeners` of status changes.
    #[must_use]
    pub fn status_listeners(mut self, listeners: StatusListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Apply per-session settings.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Derive every session's cancellation from `token`.
    ///
    /// Cancelling `token` stops all sessions started afterwards.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// The registry sessions are added to.
    #[must_use]
    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry<R>> { &self.registry }

    /// Token every session's cancellation derives from.
    #[must_use]
    pub fn shutdown_token(&self) -> &CancellationToken { &self.shutdown }

    /// Start a session over `transport`.
    ///
    /// Must be called from within a tokio runtime. The peer is registered
    /// and [`SessionStatus::Connected`] emitted before this returns.
    pub fn start<T: Transport>(&self, transport: T, address: NetworkAddressInfo) -> SessionHandle<R> {
        let details = SessionDetails::new(ConnectionId::next(), address);
        let connection_id = details.connection_id();
        let token = self.shutdown.child_token();
        let (sender, queue) = outgoing_queue(self.config.queue);
        let send_service = SendService::new(
            sender,
            Arc::clone(&self.codec),
            self.options.maximum_payload_size(),
            connection_id,
        );
        let peer = Peer::new(details, send_service, token.clone(), self.config.request_timeout);
        let context = DispatchContext::new(
            peer.clone(),
            Arc::clone(&self.chain),
            Arc::clone(&self.catalog),
            self.strategy.in_flight_limit(),
        );
        let session = Session::new(SessionParts {
            context,
            strategy: Arc::clone(&self.strategy),
            queue,
            policy: self.policy.clone(),
            options: self.options,
            codec: Arc::clone(&self.codec),
            limiter: self.config.send_rate.map(rate_limiter),
            token,
        });
        let state = session.state().clone();

        self.registry.insert(peer.clone());
        metrics::inc_sessions();
        self.listeners.emit(&SessionStatus::Connected(details));
        info!(
            "session started: role={}, connection_id={connection_id}, address={}",
            R::NAME,
            details.address()
        );

        let registry = Arc::clone(&self.registry);
        let listeners = self.listeners.clone();
        let cleanup_peer = peer.clone();
        let join = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(session.run(transport)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => SessionOutcome {
                    details,
                    reason: DisconnectReason::Faulted,
                    fault: Some(SessionError::Panicked(panic_message(panic))),
                },
            };
            registry.remove(connection_id);
            cleanup_peer.correlator().fail_all();
            metrics::dec_sessions();
            log_outcome::<R>(&outcome);
            listeners.emit(&SessionStatus::Disconnected(details, outcome.reason));
            outcome
        });

        SessionHandle { peer, state, join }
    }
}

fn rate_limiter(per_second: usize) -> RateLimiter {
    RateLimiter::builder()
        .initial(per_second)
        .refill(per_second)
        .interval(Duration::from_secs(1))
        .max(per_second)
        .build()
}

fn log_outcome<R: PeerRole>(outcome: &SessionOutcome) {
    let connection_id = outcome.details.connection_id();
    match &outcome.fault {
        Some(fault) => {
            metrics::inc_session_faults();
            // Emit via both `log` and `tracing` for tests that capture either.
            error!(
                "session faulted: role={}, connection_id={connection_id}, error={fault}",
                R::NAME
            );
            tracing::error!(role = R::NAME, %connection_id, error = %fault, "session faulted");
        }
        None => info!(
            "session ended: role={}, connection_id={connection_id}, reason={}",
            R::NAME,
            outcome.reason
        ),
    }
}

/// Handle to a started session.
pub struct SessionHandle<R> {
    peer: Peer<R>,
    state: StateCell,
    join: JoinHandle<SessionOutcome>,
}

impl<R> fmt::Debug for SessionHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.peer)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl<R: PeerRole> SessionHandle<R> {
    /// The session's peer handle.
    #[must_use]
    pub const fn peer(&self) -> &Peer<R> { &self.peer }

    /// Identifier of the session's connection.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId { self.peer.connection_id() }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState { self.state.get() }

    /// Shared view of the lifecycle state that outlives the handle.
    #[must_use]
    pub fn state_cell(&self) -> StateCell { self.state.clone() }

    /// Ask the session to stop.
    pub fn disconnect(&self) { self.peer.disconnect(); }

    /// Wait for the session to be disposed and cleaned up.
    pub async fn join(self) -> SessionOutcome {
        let details = *self.peer.details();
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => SessionOutcome {
                details,
                reason: DisconnectReason::Faulted,
                fault: Some(SessionError::Panicked(panic_message(e.into_panic()))),
            },
            Err(_) => SessionOutcome {
                details,
                reason: DisconnectReason::Cancelled,
                fault: None,
            },
        }
    }
}
