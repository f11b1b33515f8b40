//! Handlers that record what they see.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use peerwire::{
    Envelope,
    MessageParameters,
    handler::{DefaultHandler, HandlerError, MessageHandler},
    peer::{Peer, PeerRole},
};
use tokio::sync::Notify;

/// Shared log of handled messages, in handling order.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<(&'static str, Envelope)>>>,
    notify: Arc<Notify>,
}

impl Recorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record `envelope` as seen by `label`.
    pub fn record(&self, label: &'static str, envelope: Envelope) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((label, envelope));
        self.notify.notify_waiters();
    }

    /// Labels in handling order.
    #[must_use]
    pub fn labels(&self) -> Vec<&'static str> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(label, _)| *label)
            .collect()
    }

    /// Envelopes in handling order.
    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }

    /// Number of recorded messages.
    #[must_use]
    pub fn len(&self) -> usize { self.seen.lock().unwrap_or_else(PoisonError::into_inner).len() }

    /// `true` if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Wait until at least `count` messages have been recorded.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

/// Handler that records every message offered to it.
///
/// Claims the message when `claims` is `true` or its kind is in `kinds`.
pub struct RecordingHandler {
    label: &'static str,
    recorder: Recorder,
    claims: bool,
    kinds: Vec<u32>,
}

impl RecordingHandler {
    /// Record under `label` and claim every message.
    #[must_use]
    pub fn claiming(label: &'static str, recorder: &Recorder) -> Self {
        Self {
            label,
            recorder: recorder.clone(),
            claims: true,
            kinds: Vec::new(),
        }
    }

    /// Record under `label` but claim nothing.
    #[must_use]
    pub fn passing(label: &'static str, recorder: &Recorder) -> Self {
        Self {
            label,
            recorder: recorder.clone(),
            claims: false,
            kinds: Vec::new(),
        }
    }

    /// Record under `label` and claim only messages of `kinds`.
    #[must_use]
    pub fn claiming_kinds(label: &'static str, recorder: &Recorder, kinds: &[u32]) -> Self {
        Self {
            label,
            recorder: recorder.clone(),
            claims: false,
            kinds: kinds.to_vec(),
        }
    }
}

#[async_trait]
impl<R: PeerRole> MessageHandler<R> for RecordingHandler {
    async fn try_handle(
        &self,
        message: &Envelope,
        _parameters: MessageParameters,
        _peer: &Peer<R>,
    ) -> Result<bool, HandlerError> {
        self.recorder.record(self.label, message.clone());
        Ok(self.claims || self.kinds.contains(&message.kind()))
    }
}

/// Default handler that records every unclaimed message.
pub struct RecordingDefault {
    label: &'static str,
    recorder: Recorder,
}

impl RecordingDefault {
    /// Record under `label`.
    #[must_use]
    pub fn new(label: &'static str, recorder: &Recorder) -> Self {
        Self {
            label,
            recorder: recorder.clone(),
        }
    }
}

#[async_trait]
impl<R: PeerRole> DefaultHandler<R> for RecordingDefault {
    async fn handle(
        &self,
        message: Envelope,
        _parameters: MessageParameters,
        _peer: &Peer<R>,
    ) -> Result<(), HandlerError> {
        self.recorder.record(self.label, message);
        Ok(())
    }
}
