#![doc(html_root_url = "https://docs.rs/peerwire/latest")]
//! Public API for the `peerwire` library.
//!
//! `peerwire` is a per-connection session engine for networked peer
//! applications: client/server pairs and proxies that relay messages between
//! them. It frames byte streams into messages, runs each connection's read
//! and write loops concurrently, dispatches messages through an ordered
//! handler chain, correlates requests with responses and routes responses
//! back across proxy hops.

pub mod catalog;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod envelope;
pub mod frame;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod peer;
pub mod prelude;
pub mod queue;
pub mod registry;
pub mod routing;
pub mod serializer;
pub mod server;
pub mod session;
pub mod starter;
pub mod transport;

pub use catalog::{CatalogError, MessageCatalog};
pub use config::{NetworkConnectionOptions, OptionsError, SessionConfig};
pub use correlator::{Correlator, RequestError};
pub use dispatch::{DispatchStrategy, InPlaceDispatch, OffloadDispatch};
pub use envelope::{DeliveryMethod, Envelope, IncomingMessage, MessageParameters, OutgoingEnvelope};
pub use frame::{FrameError, FramingError, HeaderPolicy, LengthPrefixed, PacketFramer, VarIntLength};
pub use handler::{HandlerChain, HandlerError, MessageHandler};
pub use message::{Message, MessageKind};
pub use metrics::{Direction, FRAMES_TOTAL, SESSIONS_ACTIVE};
pub use peer::{ClientRole, Peer, PeerRole, ProxyRole, SendResult, ServerRole};
pub use queue::{QueueConfig, QueueError, QueuePolicy};
pub use registry::ConnectionRegistry;
pub use routing::{RouteBack, RoutingStack};
pub use serializer::{BincodeSerializer, Serializer};
pub use session::{ConnectionId, DisconnectReason, SessionError, SessionOutcome};
pub use starter::{SessionHandle, SessionStarter};
