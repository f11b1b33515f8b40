//! Matching incoming responses to outstanding requests.
//!
//! A waiter is registered under the expected response kind and a fresh
//! correlation id *before* the request is sent, so a response that arrives
//! immediately can never slip past. Incoming envelopes are offered to the
//! correlator first; those that match no waiter continue to the handler
//! chain.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use bincode::error::{DecodeError, EncodeError};
use dashmap::DashMap;
use log::debug;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{envelope::Envelope, peer::SendResult};

type PendingKey = (u32, u64);

/// Errors reported to a caller awaiting a response.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,
    /// The session ended before a response arrived.
    #[error("session disconnected before a response arrived")]
    Disconnected,
    /// The request could not be queued.
    #[error("request not sent: {0:?}")]
    Send(SendResult),
    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] EncodeError),
    /// The response payload did not decode as the expected type.
    #[error("failed to decode response: {0}")]
    Decode(#[from] DecodeError),
}

/// Per-session table of outstanding requests.
#[derive(Debug)]
pub struct Correlator {
    next_id: AtomicU64,
    pending: DashMap<PendingKey, oneshot::Sender<Envelope>>,
    closed: AtomicBool,
}

impl Default for Correlator {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Allocate a correlation id unique within this session.
    pub fn next_correlation_id(&self) -> u64 { self.next_id.fetch_add(1, Ordering::Relaxed) }

    /// Register a waiter for a response of `kind` carrying `correlation_id`.
    ///
    /// The waiter is removed again when the returned [`PendingResponse`] is
    /// dropped, whether or not a response arrived.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Disconnected`] once the session has ended.
    pub fn register(
        self: &Arc<Self>,
        kind: u32,
        correlation_id: u64,
    ) -> Result<PendingResponse, RequestError> {
        let key = (kind, correlation_id);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(key, tx);
        // Checked after inserting so a concurrent `fail_all` either sees the
        // entry or is seen here.
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&key);
            return Err(RequestError::Disconnected);
        }
        Ok(PendingResponse {
            rx,
            key,
            correlator: Arc::clone(self),
        })
    }

    /// Deliver `envelope` to the waiter it answers.
    ///
    /// # Errors
    ///
    /// Hands the envelope back if it carries no correlation id, no waiter is
    /// registered for it, or the waiter has already given up.
    pub fn try_complete(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(correlation_id) = envelope.correlation_id() else {
            return Err(envelope);
        };
        let Some((_, tx)) = self.pending.remove(&(envelope.kind(), correlation_id)) else {
            return Err(envelope);
        };
        tx.send(envelope)
    }

    /// Fail every outstanding waiter with [`RequestError::Disconnected`] and
    /// refuse new registrations.
    pub fn fail_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let outstanding = self.pending.len();
        self.pending.clear();
        if outstanding > 0 {
            debug!("failed outstanding requests on disconnect: count={outstanding}");
        }
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn pending(&self) -> usize { self.pending.len() }

    /// `true` once [`fail_all`](Self::fail_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }
}

/// A registered waiter. Dropping it de-registers the waiter.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Envelope>,
    key: PendingKey,
    correlator: Arc<Correlator>,
}

impl PendingResponse {
    /// Correlation id the response must carry.
    #[must_use]
    pub fn correlation_id(&self) -> u64 { self.key.1 }

    /// Await the response.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Cancelled`] if `token` fires,
    /// [`RequestError::Timeout`] if `timeout` elapses first and
    /// [`RequestError::Disconnected`] if the session ends.
    pub async fn wait(
        mut self,
        token: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Envelope, RequestError> {
        let response = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, &mut self.rx)
                    .await
                    .map_err(|_| RequestError::Timeout(limit))?
                    .map_err(|_| RequestError::Disconnected),
                None => (&mut self.rx).await.map_err(|_| RequestError::Disconnected),
            }
        };
        tokio::select! {
            biased;
            () = token.cancelled() => Err(RequestError::Cancelled),
            result = response => result,
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) { self.correlator.pending.remove(&self.key); }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(kind: u32, correlation_id: u64) -> Envelope {
        Envelope::new(kind, vec![1, 2, 3]).with_correlation_id(correlation_id)
    }

    #[tokio::test]
    async fn response_completes_exactly_one_waiter() {
        let correlator = Arc::new(Correlator::new());
        let id = correlator.next_correlation_id();
        let pending = correlator.register(5, id).expect("register");

        assert!(correlator.try_complete(response(5, id)).is_ok());
        assert!(correlator.try_complete(response(5, id)).is_err());

        let envelope = pending
            .wait(&CancellationToken::new(), None)
            .await
            .expect("response");
        assert_eq!(envelope.correlation_id(), Some(id));
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn mismatched_kind_falls_through() {
        let correlator = Arc::new(Correlator::new());
        let _pending = correlator.register(5, 1).expect("register");
        let unmatched = correlator
            .try_complete(response(6, 1))
            .expect_err("kind differs");
        assert_eq!(unmatched.kind(), 6);
        assert!(
            correlator
                .try_complete(Envelope::new(5, Vec::new()))
                .is_err()
        );
        assert_eq!(correlator.pending(), 1);
    }

    #[tokio::test]
    async fn cancellation_deregisters_waiter() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(5, 1).expect("register");
        let token = CancellationToken::new();
        token.cancel();

        let err = pending.wait(&token, None).await.expect_err("cancelled");

        assert!(matches!(err, RequestError::Cancelled));
        assert_eq!(correlator.pending(), 0);
        assert!(correlator.try_complete(response(5, 1)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_deregisters_waiter() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(5, 1).expect("register");

        let err = pending
            .wait(&CancellationToken::new(), Some(Duration::from_millis(50)))
            .await
            .expect_err("timed out");

        assert!(matches!(err, RequestError::Timeout(_)));
        assert_eq!(correlator.pending(), 0);
    }

    #[tokio::test]
    async fn fail_all_disconnects_waiters_and_later_registrations() {
        let correlator = Arc::new(Correlator::new());
        let pending = correlator.register(5, 1).expect("register");

        correlator.fail_all();

        let err = pending
            .wait(&CancellationToken::new(), None)
            .await
            .expect_err("disconnected");
        assert!(matches!(err, RequestError::Disconnected));
        assert!(matches!(
            correlator.register(5, 2),
            Err(RequestError::Disconnected)
        ));
    }
}
