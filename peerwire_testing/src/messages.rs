//! Message types shared by the test suites.

use peerwire::{MessageCatalog, message::MessageKind};

/// Liveness probe.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u32,
}

impl MessageKind for Ping {
    const KIND: u32 = 1;
}

/// Answer to [`Ping`].
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u32,
}

impl MessageKind for Pong {
    const KIND: u32 = 2;
}

/// Key lookup request, used for proxied request/response flows.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct Lookup {
    pub key: String,
}

impl MessageKind for Lookup {
    const KIND: u32 = 3;
}

/// Answer to [`Lookup`].
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct Found {
    pub key: String,
    pub value: Option<u64>,
}

impl MessageKind for Found {
    const KIND: u32 = 4;
}

/// Fire-and-forget text message.
#[derive(bincode::Encode, bincode::Decode, Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    pub text: String,
}

impl MessageKind for Chat {
    const KIND: u32 = 5;
}

/// Catalogue holding every test message type.
///
/// # Panics
///
/// Panics if two test messages share a kind.
#[must_use]
pub fn catalog() -> MessageCatalog {
    MessageCatalog::builder()
        .register::<Ping>()
        .and_then(|b| b.register::<Pong>())
        .and_then(|b| b.register::<Lookup>())
        .and_then(|b| b.register::<Found>())
        .and_then(|b| b.register::<Chat>())
        .expect("test message kinds are distinct")
        .build()
}
