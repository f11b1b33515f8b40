//! Multi-hop routing.
//!
//! Every [`Envelope`](crate::envelope::Envelope) carries a [`RoutingStack`]
//! of hop identifiers. A proxy forwarding a request pushes the connection it
//! arrived on; the response inherits the stack and each proxy on the way
//! back pops one hop to find the next connection. [`RouteBack`] performs
//! both directions against a [`ConnectionRegistry`](crate::registry::ConnectionRegistry).

mod route_back;
mod stack;

pub use route_back::{RouteBack, RouteBackHandler};
pub use stack::{HopId, Routable, RoutingStack};
