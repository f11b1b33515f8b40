//! End-to-end lifecycle of a single session: start, failure modes, disposal.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::BytesMut;
use peerwire::{
    DeliveryMethod,
    DisconnectReason,
    Envelope,
    FramingError,
    HandlerError,
    HeaderPolicy,
    LengthPrefixed,
    NetworkConnectionOptions,
    PacketFramer,
    SendResult,
    SessionConfig,
    SessionError,
    SessionStarter,
    frame::{Endianness, PacketHeader},
    handler::{HandlerChain, Incoming},
    peer::{Peer, ServerRole},
    session::{SessionState, SessionStatus, StatusListeners},
};
use peerwire_testing::{Chat, frame_envelope, raw_session, read_envelopes};
use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::{Instant, timeout},
};

const WAIT: Duration = Duration::from_secs(2);

/// Status events plus whether the session was still registered when each
/// event fired.
#[derive(Clone, Default)]
struct StatusLog(Arc<Mutex<Vec<(SessionStatus, bool)>>>);

impl StatusLog {
    fn events(&self) -> Vec<(SessionStatus, bool)> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Starter whose listeners capture every status change into the returned log.
fn observed(chain: HandlerChain<ServerRole>) -> (SessionStarter<ServerRole>, StatusLog) {
    let log = StatusLog::default();
    let starter = SessionStarter::new(chain);
    let registry = Arc::clone(starter.connection_registry());
    let sink = log.clone();
    let listeners = StatusListeners::new().on_status(move |status| {
        let id = match status {
            SessionStatus::Connected(details) | SessionStatus::Disconnected(details, _) => {
                details.connection_id()
            }
        };
        sink.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((*status, registry.contains(id)));
    });
    (starter.status_listeners(listeners), log)
}

fn framer() -> PacketFramer<LengthPrefixed> {
    PacketFramer::new(LengthPrefixed::default(), NetworkConnectionOptions::default())
}

fn chat(text: &str) -> Envelope {
    Envelope::from_message(&Chat { text: text.into() }).expect("encode chat")
}

async fn fail_on_chat(_incoming: Incoming<Chat>, _peer: Peer<ServerRole>) -> Result<(), HandlerError> {
    Err(HandlerError::failed("chat refused"))
}

async fn panic_on_chat(_incoming: Incoming<Chat>, _peer: Peer<ServerRole>) -> Result<(), HandlerError> {
    panic!("handler exploded");
}

#[fixture]
fn plain() -> SessionStarter<ServerRole> { SessionStarter::new(HandlerChain::default()) }

#[tokio::test]
async fn peer_close_disposes_session_and_reports_once() {
    let (starter, log) = observed(HandlerChain::default());
    let registry = Arc::clone(starter.connection_registry());
    let (handle, raw) = raw_session(&starter);
    let id = handle.connection_id();
    assert!(registry.contains(id));

    drop(raw);
    let peer = handle.peer().clone();
    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");

    assert_eq!(outcome.reason, DisconnectReason::PeerClosed);
    assert!(outcome.is_clean());
    assert!(registry.is_empty());
    assert!(peer.is_disconnected());

    let events = log.events();
    assert_eq!(events.len(), 2, "unexpected events: {events:?}");
    assert!(matches!(events[0], (SessionStatus::Connected(d), true) if d.connection_id() == id));
    assert!(matches!(
        events[1],
        (SessionStatus::Disconnected(d, DisconnectReason::PeerClosed), false) if d.connection_id() == id
    ));
}

#[rstest]
#[tokio::test]
async fn oversized_header_faults_session_and_stops_writer(plain: SessionStarter<ServerRole>) {
    let (handle, mut raw) = raw_session(&plain);
    let peer = handle.peer().clone();
    raw.write_all(&[0xff, 0xff, 0xff, 0xff]).await.expect("write");

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::Faulted);
    assert!(matches!(
        outcome.fault,
        Some(SessionError::Framing(FramingError::OversizedPayload { .. }))
    ));

    // The write half was shut down during disposal.
    let mut rest = Vec::new();
    timeout(WAIT, raw.read_to_end(&mut rest))
        .await
        .expect("writer not shut down")
        .expect("read");
    assert!(rest.is_empty());
    assert_eq!(
        peer.send_message(&Chat { text: "late".into() }, DeliveryMethod::ReliableOrdered),
        SendResult::Closed
    );
}

#[rstest]
#[tokio::test]
async fn close_inside_a_frame_is_reported(plain: SessionStarter<ServerRole>) {
    let (handle, mut raw) = raw_session(&plain);
    let wire = frame_envelope(&mut framer(), &chat("cut short"));
    raw.write_all(&wire[..wire.len() / 2]).await.expect("write");
    drop(raw);

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::ClosedMidFrame);
    assert!(outcome.is_clean());
}

#[tokio::test]
async fn handler_error_faults_session() {
    let (starter, log) = observed(HandlerChain::builder().on(fail_on_chat).build());
    let (handle, mut raw) = raw_session(&starter);
    raw.write_all(&frame_envelope(&mut framer(), &chat("hello")))
        .await
        .expect("write");

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::Faulted);
    assert!(matches!(
        outcome.fault,
        Some(SessionError::HandlerFault(HandlerError::Failed(_)))
    ));
    assert!(matches!(
        log.events().last(),
        Some((SessionStatus::Disconnected(_, DisconnectReason::Faulted), false))
    ));
}

#[tokio::test]
async fn handler_panic_is_contained() {
    let starter = SessionStarter::new(HandlerChain::<ServerRole>::builder().on(panic_on_chat).build());
    let (handle, mut raw) = raw_session(&starter);
    raw.write_all(&frame_envelope(&mut framer(), &chat("boom")))
        .await
        .expect("write");

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::Faulted);
    match outcome.fault {
        Some(SessionError::HandlerFault(HandlerError::Panicked(message))) => {
            assert!(message.contains("handler exploded"), "message: {message}");
        }
        other => panic!("unexpected fault: {other:?}"),
    }
    assert!(starter.connection_registry().is_empty());
}

#[rstest]
#[tokio::test]
async fn local_disconnect_cancels_session(plain: SessionStarter<ServerRole>) {
    let (handle, _raw) = raw_session(&plain);
    let peer = handle.peer().clone();
    handle.disconnect();

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::Cancelled);
    assert!(outcome.is_clean());
    assert!(peer.is_disconnected());
}

#[rstest]
#[tokio::test]
async fn shutdown_token_stops_every_session(plain: SessionStarter<ServerRole>) {
    let (first, _raw_first) = raw_session(&plain);
    let (second, _raw_second) = raw_session(&plain);
    assert_eq!(plain.connection_registry().len(), 2);

    plain.shutdown_token().cancel();
    let (a, b) = tokio::join!(first.join(), second.join());
    assert_eq!(a.reason, DisconnectReason::Cancelled);
    assert_eq!(b.reason, DisconnectReason::Cancelled);
    assert!(plain.connection_registry().is_empty());
}

#[rstest]
#[tokio::test]
async fn state_reaches_disposed_after_join(plain: SessionStarter<ServerRole>) {
    let (handle, raw) = raw_session(&plain);
    let state = handle.state_cell();
    assert!(state.get() < SessionState::Disposed);
    drop(raw);

    let peer = handle.peer().clone();
    let registry = Arc::clone(plain.connection_registry());
    let _ = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(state.get(), SessionState::Disposed);
    assert!(!registry.contains(peer.connection_id()));
    assert!(peer.send_service().is_closed());
}

#[rstest]
#[tokio::test]
async fn outgoing_messages_keep_queue_order(plain: SessionStarter<ServerRole>) {
    let (handle, mut raw) = raw_session(&plain);
    let texts: Vec<String> = (0..50).map(|n| format!("message {n}")).collect();
    for text in &texts {
        let result = handle
            .peer()
            .send_message(&Chat { text: text.clone() }, DeliveryMethod::ReliableOrdered);
        assert_eq!(result, SendResult::Queued);
    }

    let received = timeout(WAIT, read_envelopes(&mut raw, &mut framer(), texts.len()))
        .await
        .expect("messages not delivered");
    let got: Vec<String> = received
        .iter()
        .map(|envelope| envelope.decode::<Chat>().expect("decode").text)
        .collect();
    assert_eq!(got, texts);

    handle.disconnect();
    assert!(handle.join().await.is_clean());
}

#[tokio::test]
async fn payload_over_limit_is_rejected_before_queueing() {
    let options = NetworkConnectionOptions::new(4, 8, 16).expect("options");
    let starter = SessionStarter::new(HandlerChain::<ServerRole>::default()).options(options);
    let (handle, _raw) = raw_session(&starter);

    let result = handle.peer().send_message(
        &Chat {
            text: "far too long for a sixteen byte frame".into(),
        },
        DeliveryMethod::ReliableOrdered,
    );
    assert_eq!(result, SendResult::Rejected);

    handle.disconnect();
    assert!(handle.join().await.is_clean());
}

#[tokio::test(start_paused = true)]
async fn send_rate_paces_outgoing_frames() {
    let starter = SessionStarter::new(HandlerChain::<ServerRole>::default())
        .config(SessionConfig::default().send_rate(2));
    let (handle, mut raw) = raw_session(&starter);
    let mut framer = PacketFramer::new(LengthPrefixed::default(), NetworkConnectionOptions::default());
    let started = Instant::now();
    for n in 0..4 {
        let sent = handle
            .peer()
            .send_message(&Chat { text: n.to_string() }, DeliveryMethod::ReliableOrdered);
        assert_eq!(sent, SendResult::Queued);
    }

    let burst = read_envelopes(&mut raw, &mut framer, 2).await;
    assert_eq!(burst.len(), 2);
    assert!(started.elapsed() < Duration::from_secs(1));

    let rest = read_envelopes(&mut raw, &mut framer, 2).await;
    assert_eq!(rest.len(), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));

    handle.disconnect();
    assert!(handle.join().await.is_clean());
}

#[tokio::test]
async fn maximal_eight_byte_length_faults_session() {
    let policy = LengthPrefixed::new(8, Endianness::Big).expect("supported width");
    let options = NetworkConnectionOptions::new(1, 8, 1024).expect("valid options");
    let starter = SessionStarter::new(HandlerChain::<ServerRole>::default())
        .header_policy(policy)
        .options(options);
    let registry = Arc::clone(starter.connection_registry());
    let (handle, mut raw) = raw_session(&starter);

    raw.write_all(&[0xff; 8]).await.expect("write");
    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert_eq!(outcome.reason, DisconnectReason::Faulted);
    assert!(matches!(outcome.fault, Some(SessionError::Framing(_))));
    assert!(registry.is_empty());
}

/// Length-prefixed policy whose parser panics on a zero-length frame.
#[derive(Clone, Copy, Debug, Default)]
struct PanicOnEmpty(LengthPrefixed);

impl HeaderPolicy for PanicOnEmpty {
    fn minimum_header_size(&self) -> usize { self.0.minimum_header_size() }

    fn is_header_readable(&self, buf: &[u8]) -> bool { self.0.is_header_readable(buf) }

    fn compute_header_size(&self, buf: &[u8]) -> Result<usize, FramingError> {
        self.0.compute_header_size(buf)
    }

    fn parse(&self, header: &[u8]) -> Result<PacketHeader, FramingError> {
        let parsed = self.0.parse(header)?;
        assert!(parsed.payload_size() > 0, "empty frame");
        Ok(parsed)
    }

    fn write_header(&self, payload_size: usize, dst: &mut BytesMut) -> Result<(), FramingError> {
        self.0.write_header(payload_size, dst)
    }
}

#[tokio::test]
async fn read_loop_panic_still_disposes_session() {
    let starter =
        SessionStarter::new(HandlerChain::<ServerRole>::default()).header_policy(PanicOnEmpty::default());
    let registry = Arc::clone(starter.connection_registry());
    let (handle, mut raw) = raw_session(&starter);
    let state = handle.state_cell();

    raw.write_all(&[0, 0, 0, 0]).await.expect("write");
    let outcome = timeout(WAIT, handle.join())
        .await
        .expect("write loop kept the session alive");
    assert_eq!(outcome.reason, DisconnectReason::Faulted);
    assert!(matches!(
        outcome.fault,
        Some(SessionError::Panicked(ref message)) if message.contains("empty frame")
    ));
    assert_eq!(state.get(), SessionState::Disposed);
    assert!(registry.is_empty());

    let mut rest = Vec::new();
    raw.read_to_end(&mut rest).await.expect("read");
    assert!(rest.is_empty());
}
