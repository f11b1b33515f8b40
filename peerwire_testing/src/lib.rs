//! Utilities for exercising `peerwire` sessions in tests.
//!
//! Sessions run over `tokio::io::duplex` pipes. Helpers connect two starters
//! back to back, expose the raw end of a pipe for byte-level assertions and
//! provide recording handlers, shared message types and a serialised `log`
//! capture.
//!
//! ```rust
//! use peerwire::{handler::HandlerChain, peer::ServerRole, starter::SessionStarter};
//! use peerwire_testing::raw_session;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let starter = SessionStarter::new(HandlerChain::<ServerRole>::default());
//! let (handle, raw) = raw_session(&starter);
//! drop(raw);
//! assert!(handle.join().await.is_clean());
//! # }
//! ```

pub mod logging;
pub mod messages;
pub mod recording;
pub mod transport;

pub use logging::{LoggerHandle, logger};
pub use messages::{Chat, Found, Lookup, Ping, Pong, catalog};
pub use recording::{Recorder, RecordingDefault, RecordingHandler};
pub use transport::{
    DUPLEX_CAPACITY,
    connected_pair,
    decode_envelopes,
    frame_envelope,
    raw_session,
    read_envelopes,
};
