//! Handler chain ordering, fallback and role gating over live sessions.

use std::time::Duration;

use peerwire::{
    CatalogError,
    DeliveryMethod,
    DisconnectReason,
    Envelope,
    HandlerError,
    LengthPrefixed,
    MessageCatalog,
    MessageKind,
    NetworkConnectionOptions,
    PacketFramer,
    PeerRole,
    SendResult,
    SessionError,
    SessionStarter,
    handler::{HandlerChain, Incoming},
    peer::{Peer, ServerRole},
};
use peerwire_testing::{
    Chat,
    LoggerHandle,
    Ping,
    Recorder,
    RecordingDefault,
    RecordingHandler,
    catalog,
    frame_envelope,
    logger,
    raw_session,
};
use rstest::rstest;
use serial_test::serial;
use tokio::{io::AsyncWriteExt, time::timeout};

const WAIT: Duration = Duration::from_secs(2);

fn framer() -> PacketFramer<LengthPrefixed> {
    PacketFramer::new(LengthPrefixed::default(), NetworkConnectionOptions::default())
}

fn wire<M: MessageKind>(message: &M) -> bytes::Bytes {
    frame_envelope(&mut framer(), &Envelope::from_message(message).expect("encode"))
}

/// Accepts only chat messages and may only send pings.
struct ChatOnly;

impl PeerRole for ChatOnly {
    const NAME: &'static str = "chat-only";

    fn can_send(kind: u32) -> bool { kind == Ping::KIND }

    fn on_receive(kind: u32) -> bool { kind == Chat::KIND }
}

async fn ignore_chat(_incoming: Incoming<Chat>, _peer: Peer<ServerRole>) -> Result<(), HandlerError> {
    Ok(())
}

#[tokio::test]
async fn first_claiming_handler_wins_and_default_catches_the_rest() {
    let recorder = Recorder::new();
    let chain = HandlerChain::<ServerRole>::builder()
        .handler(RecordingHandler::passing("observer", &recorder))
        .handler(RecordingHandler::claiming_kinds("chat", &recorder, &[Chat::KIND]))
        .handler(RecordingHandler::claiming("never", &recorder))
        .default_handler(RecordingDefault::new("fallback", &recorder))
        .build();
    let starter = SessionStarter::new(chain);
    let (handle, mut raw) = raw_session(&starter);

    raw.write_all(&wire(&Chat { text: "hi".into() })).await.expect("write");
    raw.write_all(&wire(&Ping { nonce: 1 })).await.expect("write");
    timeout(WAIT, recorder.wait_for(4)).await.expect("messages not handled");

    // "never" claims everything, so the default is unreachable behind it.
    assert_eq!(recorder.labels(), vec!["observer", "chat", "observer", "never"]);
    assert_eq!(recorder.envelopes()[1].kind(), Chat::KIND);
    assert_eq!(recorder.envelopes()[3].kind(), Ping::KIND);

    handle.disconnect();
    assert!(handle.join().await.is_clean());
}

#[tokio::test]
async fn unclaimed_messages_reach_the_default_handler() {
    let recorder = Recorder::new();
    let chain = HandlerChain::<ServerRole>::builder()
        .handler(RecordingHandler::claiming_kinds("chat", &recorder, &[Chat::KIND]))
        .default_handler(RecordingDefault::new("fallback", &recorder))
        .build();
    let (handle, mut raw) = raw_session(&SessionStarter::new(chain));

    for nonce in 0..3 {
        raw.write_all(&wire(&Ping { nonce })).await.expect("write");
    }
    raw.write_all(&wire(&Chat { text: "last".into() })).await.expect("write");
    timeout(WAIT, recorder.wait_for(7)).await.expect("messages not handled");

    assert_eq!(
        recorder.labels(),
        vec!["chat", "fallback", "chat", "fallback", "chat", "fallback", "chat"]
    );
    let nonces: Vec<u32> = recorder
        .envelopes()
        .iter()
        .filter(|e| e.kind() == Ping::KIND)
        .step_by(2)
        .map(|e| e.decode::<Ping>().expect("decode").nonce)
        .collect();
    assert_eq!(nonces, vec![0, 1, 2]);

    drop(raw);
    assert_eq!(handle.join().await.reason, DisconnectReason::PeerClosed);
}

#[rstest]
#[serial(logs)]
#[tokio::test]
async fn unhandled_message_is_logged_with_its_name(mut logger: LoggerHandle) {
    let recorder = Recorder::new();
    let chain = HandlerChain::<ServerRole>::builder()
        .handler(RecordingHandler::passing("observer", &recorder))
        .build();
    let starter = SessionStarter::new(chain).catalog(catalog());
    let (handle, mut raw) = raw_session(&starter);

    raw.write_all(&wire(&Ping { nonce: 3 })).await.expect("write");
    timeout(WAIT, recorder.wait_for(1)).await.expect("message not offered");
    drop(raw);
    assert!(handle.join().await.is_clean());

    let messages = logger.messages();
    let warning = messages
        .iter()
        .find(|m| m.starts_with("no handler for message"))
        .unwrap_or_else(|| panic!("missing warning in {messages:?}"));
    assert!(warning.contains("kind=1"), "{warning}");
    assert!(warning.contains("Ping"), "{warning}");
}

#[rstest]
#[serial(logs)]
#[tokio::test]
async fn role_filters_inbound_and_outbound_kinds(mut logger: LoggerHandle) {
    let recorder = Recorder::new();
    let chain = HandlerChain::<ChatOnly>::builder()
        .handler(RecordingHandler::claiming("all", &recorder))
        .build();
    let (handle, mut raw) = raw_session(&SessionStarter::new(chain));

    raw.write_all(&wire(&Ping { nonce: 1 })).await.expect("write");
    raw.write_all(&wire(&Chat { text: "allowed".into() })).await.expect("write");
    timeout(WAIT, recorder.wait_for(1)).await.expect("chat not handled");
    assert_eq!(recorder.len(), 1);
    assert_eq!(recorder.envelopes()[0].kind(), Chat::KIND);

    let peer = handle.peer();
    assert_eq!(
        peer.send_message(&Chat { text: "nope".into() }, DeliveryMethod::ReliableOrdered),
        SendResult::Rejected
    );
    assert_eq!(
        peer.send_message(&Ping { nonce: 2 }, DeliveryMethod::ReliableOrdered),
        SendResult::Queued
    );

    handle.disconnect();
    assert!(handle.join().await.is_clean());
    let messages = logger.messages();
    assert!(
        messages
            .iter()
            .any(|m| m.starts_with("role refused inbound message") && m.contains("role=chat-only")),
        "missing refusal in {messages:?}"
    );
}

#[tokio::test]
async fn undecodable_payload_faults_typed_handler() {
    let chain = HandlerChain::<ServerRole>::builder().on(ignore_chat).build();
    let (handle, mut raw) = raw_session(&SessionStarter::new(chain));

    let bogus = Envelope::new(Chat::KIND, vec![0xff, 0xff]);
    raw.write_all(&frame_envelope(&mut framer(), &bogus))
        .await
        .expect("write");

    let outcome = timeout(WAIT, handle.join()).await.expect("session did not end");
    assert!(matches!(
        outcome.fault,
        Some(SessionError::HandlerFault(HandlerError::Decode { kind, .. })) if kind == Chat::KIND
    ));
}

#[test]
fn checked_build_rejects_unregistered_typed_handlers() {
    let partial = MessageCatalog::builder()
        .register::<Ping>()
        .expect("register")
        .build();
    let err = HandlerChain::<ServerRole>::builder()
        .on(ignore_chat)
        .build_checked(&partial)
        .expect_err("chat is not registered");
    assert!(matches!(err, CatalogError::Unregistered { kind, .. } if kind == Chat::KIND));

    let chain = HandlerChain::<ServerRole>::builder()
        .on(ignore_chat)
        .build_checked(&catalog())
        .expect("chat is registered");
    assert_eq!(chain.len(), 1);
}
