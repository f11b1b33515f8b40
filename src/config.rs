//! Configuration types shared by the framer and the session engine.
//!
//! [`NetworkConnectionOptions`] bounds what the framer accepts from the wire,
//! while [`SessionConfig`] tunes the per-session machinery (queue policy,
//! request timeouts, send-rate limiting). Both are plain values built once at
//! setup time and shared read-only by every session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueConfig;

/// Default minimum number of bytes buffered before a header is inspected.
pub const DEFAULT_MINIMUM_HEADER_SIZE: usize = 4;
/// Default upper bound for variable-length headers.
pub const DEFAULT_MAXIMUM_HEADER_SIZE: usize = 8;
/// Default largest payload accepted from a peer (1 MiB).
pub const DEFAULT_MAXIMUM_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Errors raised when [`NetworkConnectionOptions`] are inconsistent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// The minimum header size was zero.
    #[error("minimum header size must be at least 1 byte")]
    ZeroMinimumHeader,
    /// The minimum header size exceeded the maximum.
    #[error("minimum header size {min} exceeds maximum header size {max}")]
    HeaderBoundsInverted {
        /// Configured minimum header size.
        min: usize,
        /// Configured maximum header size.
        max: usize,
    },
    /// The maximum payload size was zero.
    #[error("maximum payload size must be at least 1 byte")]
    ZeroPayloadLimit,
}

/// Limits enforced by the packet framer.
///
/// # Examples
///
/// ```
/// use peerwire::config::NetworkConnectionOptions;
///
/// let options = NetworkConnectionOptions::new(1, 5, 64 * 1024).expect("valid options");
/// assert_eq!(options.maximum_header_size(), 5);
/// assert!(NetworkConnectionOptions::new(6, 5, 1).is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOptions", into = "RawOptions")]
pub struct NetworkConnectionOptions {
    minimum_header_size: usize,
    maximum_header_size: usize,
    maximum_payload_size: usize,
}

impl NetworkConnectionOptions {
    /// Validate and construct a set of framing limits.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] if the header bounds are zero or inverted, or
    /// if the payload limit is zero.
    pub fn new(
        minimum_header_size: usize,
        maximum_header_size: usize,
        maximum_payload_size: usize,
    ) -> Result<Self, OptionsError> {
        if minimum_header_size == 0 {
            return Err(OptionsError::ZeroMinimumHeader);
        }
        if minimum_header_size > maximum_header_size {
            return Err(OptionsError::HeaderBoundsInverted {
                min: minimum_header_size,
                max: maximum_header_size,
            });
        }
        if maximum_payload_size == 0 {
            return Err(OptionsError::ZeroPayloadLimit);
        }
        Ok(Self {
            minimum_header_size,
            maximum_header_size,
            maximum_payload_size,
        })
    }

    /// Bytes that must be buffered before the header policy is consulted.
    #[must_use]
    pub const fn minimum_header_size(&self) -> usize { self.minimum_header_size }

    /// Largest header a variable-length policy may claim.
    #[must_use]
    pub const fn maximum_header_size(&self) -> usize { self.maximum_header_size }

    /// Largest payload accepted in a single frame.
    #[must_use]
    pub const fn maximum_payload_size(&self) -> usize { self.maximum_payload_size }

    /// Return a copy with a different payload limit.
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError::ZeroPayloadLimit`] if `limit` is zero.
    pub fn with_maximum_payload_size(self, limit: usize) -> Result<Self, OptionsError> {
        Self::new(self.minimum_header_size, self.maximum_header_size, limit)
    }
}

impl Default for NetworkConnectionOptions {
    fn default() -> Self {
        Self {
            minimum_header_size: DEFAULT_MINIMUM_HEADER_SIZE,
            maximum_header_size: DEFAULT_MAXIMUM_HEADER_SIZE,
            maximum_payload_size: DEFAULT_MAXIMUM_PAYLOAD_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawOptions {
    minimum_header_size: usize,
    maximum_header_size: usize,
    maximum_payload_size: usize,
}

impl TryFrom<RawOptions> for NetworkConnectionOptions {
    type Error = OptionsError;

    fn try_from(raw: RawOptions) -> Result<Self, Self::Error> {
        Self::new(
            raw.minimum_header_size,
            raw.maximum_header_size,
            raw.maximum_payload_size,
        )
    }
}

impl From<NetworkConnectionOptions> for RawOptions {
    fn from(options: NetworkConnectionOptions) -> Self {
        Self {
            minimum_header_size: options.minimum_header_size,
            maximum_header_size: options.maximum_header_size,
            maximum_payload_size: options.maximum_payload_size,
        }
    }
}

/// Per-session tuning knobs.
///
/// The defaults select an unbounded outgoing queue, no request timeout and no
/// send-rate limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Outgoing queue capacity and overflow policy.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Upper bound applied to every correlated request, in addition to the
    /// caller's cancellation token.
    #[serde(default)]
    pub request_timeout: Option<Duration>,
    /// Maximum frames written per second by the write loop.
    #[serde(default)]
    pub send_rate: Option<usize>,
}

impl SessionConfig {
    /// Replace the outgoing queue configuration.
    #[must_use]
    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Bound correlated requests by `timeout`.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Limit the write loop to `rate` frames per second.
    ///
    /// A rate of zero disables limiting.
    #[must_use]
    pub fn send_rate(mut self, rate: usize) -> Self {
        self.send_rate = (rate > 0).then_some(rate);
        self
    }
}
