//! Metric helpers for `peerwire`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking running sessions.
pub const SESSIONS_ACTIVE: &str = "peerwire_sessions_active";
/// Name of the counter tracking framed packets.
pub const FRAMES_TOTAL: &str = "peerwire_frames_total";
/// Name of the counter tracking sessions that ended with a fault.
pub const SESSION_FAULTS_TOTAL: &str = "peerwire_session_faults_total";
/// Name of the counter tracking route-back attempts with no next hop.
pub const ROUTE_UNDELIVERABLE_TOTAL: &str = "peerwire_route_undeliverable_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Frames read from the transport.
    Inbound,
    /// Frames written to the transport.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active sessions gauge.
pub fn inc_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

/// Decrement the active sessions gauge.
pub fn dec_sessions() {
    #[cfg(feature = "metrics")]
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
}

/// Record a framed packet for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a session that ended with a fault.
pub fn inc_session_faults() {
    #[cfg(feature = "metrics")]
    counter!(SESSION_FAULTS_TOTAL).increment(1);
}

/// Record a message that could not be routed back.
pub fn inc_route_undeliverable() {
    #[cfg(feature = "metrics")]
    counter!(ROUTE_UNDELIVERABLE_TOTAL).increment(1);
}
