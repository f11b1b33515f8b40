//! Observable session lifecycle.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use super::{DisconnectReason, SessionDetails};

/// Lifecycle state of a session.
///
/// States only move forward: `Created → Running → Disconnecting → Disposed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Built but not yet started.
    Created = 0,
    /// Read and write loops are running.
    Running = 1,
    /// A loop has ended and the sibling is being stopped.
    Disconnecting = 2,
    /// The transport has been released.
    Disposed = 3,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Disconnecting,
            _ => Self::Disposed,
        }
    }
}

/// Shared, monotonic view of a session's [`SessionState`].
#[derive(Clone, Debug)]
pub struct StateCell(Arc<AtomicU8>);

impl Default for StateCell {
    fn default() -> Self { Self(Arc::new(AtomicU8::new(SessionState::Created as u8))) }
}

impl StateCell {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> SessionState { SessionState::from_u8(self.0.load(Ordering::Acquire)) }

    /// Move to `state` unless the session is already past it.
    ///
    /// Returns `true` if the state changed.
    pub fn advance(&self, state: SessionState) -> bool {
        self.0.fetch_max(state as u8, Ordering::AcqRel) < state as u8
    }
}

/// Status transition reported to [`StatusListeners`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// The session has started its loops.
    Connected(SessionDetails),
    /// The session has been disposed.
    Disconnected(SessionDetails, DisconnectReason),
}

type Listener = Arc<dyn Fn(&SessionStatus) + Send + Sync>;

/// Subscribers notified synchronously of session status changes.
///
/// Listeners run on the session's task; keep them short.
#[derive(Clone, Default)]
pub struct StatusListeners(Vec<Listener>);

impl StatusListeners {
    /// Create an empty set of listeners.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Add a listener.
    #[must_use]
    pub fn on_status<F>(mut self, listener: F) -> Self
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        self.0.push(Arc::new(listener));
        self
    }

    /// Invoke every listener with `status`.
    pub fn emit(&self, status: &SessionStatus) {
        for listener in &self.0 {
            listener(status);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// `true` if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Debug for StatusListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusListeners")
            .field("len", &self.0.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::session::{ConnectionId, NetworkAddressInfo};

    #[test]
    fn state_never_moves_backwards() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), SessionState::Created);
        assert!(cell.advance(SessionState::Disconnecting));
        assert!(!cell.advance(SessionState::Running));
        assert_eq!(cell.get(), SessionState::Disconnecting);
        assert!(cell.advance(SessionState::Disposed));
        assert!(!cell.advance(SessionState::Disposed));
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let second = Arc::clone(&seen);
        let listeners = StatusListeners::new()
            .on_status(move |_| first.lock().expect("lock").push(1))
            .on_status(move |_| second.lock().expect("lock").push(2));
        let details = SessionDetails::new(ConnectionId::new(1), NetworkAddressInfo::UNSPECIFIED);

        listeners.emit(&SessionStatus::Connected(details));

        assert_eq!(*seen.lock().expect("lock"), vec![1, 2]);
    }
}
