//! Optional convenience imports for common `peerwire` workflows.
//!
//! Kept to the types most applications touch. Import specialised APIs from
//! their owning modules.
//!
//! # Examples
//!
//! ```rust,no_run
//! use peerwire::prelude::*;
//!
//! fn starter() -> SessionStarter<ServerRole> { SessionStarter::new(HandlerChain::default()) }
//! ```

pub use crate::{
    envelope::{DeliveryMethod, Envelope, MessageParameters},
    handler::{HandlerChain, HandlerError, Incoming},
    message::{Message, MessageKind},
    peer::{ClientRole, Peer, PeerRole, ProxyRole, SendResult, ServerRole},
    routing::{RouteBack, RouteBackHandler, Routable},
    serializer::{BincodeSerializer, Serializer},
    session::{ConnectionId, DisconnectReason, SessionOutcome},
    starter::{SessionHandle, SessionStarter},
};
