//! TCP acceptor and connector.
//!
//! [`accept_loop`] accepts connections from a listener and starts a session
//! for each one; [`connect`] opens an outgoing TCP connection and starts a
//! session over it. Both hand the stream to a
//! [`SessionStarter`](crate::starter::SessionStarter).

mod accept;
mod backoff;

pub use accept::{AcceptListener, accept_loop, connect};
pub use backoff::BackoffConfig;
