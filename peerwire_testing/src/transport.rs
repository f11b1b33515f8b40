//! In-memory transports and raw wire helpers.

use bytes::{Bytes, BytesMut};
use peerwire::{
    Envelope,
    frame::{HeaderPolicy, PacketFramer},
    peer::PeerRole,
    serializer::{BincodeSerializer, EnvelopeCodec},
    session::NetworkAddressInfo,
    starter::{SessionHandle, SessionStarter},
};
use tokio::io::{AsyncReadExt, DuplexStream, duplex};
use tokio_util::codec::{Decoder, Encoder};

/// Capacity of duplex pipes created by these helpers.
pub const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Connect two starters with an in-memory pipe and start a session on each
/// end.
pub fn connected_pair<A, B, HA, HB>(
    left: &SessionStarter<A, HA>,
    right: &SessionStarter<B, HB>,
) -> (SessionHandle<A>, SessionHandle<B>)
where
    A: PeerRole,
    B: PeerRole,
    HA: HeaderPolicy,
    HB: HeaderPolicy,
{
    let (a, b) = duplex(DUPLEX_CAPACITY);
    (
        left.start(a, NetworkAddressInfo::UNSPECIFIED),
        right.start(b, NetworkAddressInfo::UNSPECIFIED),
    )
}

/// Start a session on one end of a pipe and return the other, raw end.
pub fn raw_session<R, H>(starter: &SessionStarter<R, H>) -> (SessionHandle<R>, DuplexStream)
where
    R: PeerRole,
    H: HeaderPolicy,
{
    let (ours, theirs) = duplex(DUPLEX_CAPACITY);
    (starter.start(theirs, NetworkAddressInfo::UNSPECIFIED), ours)
}

/// Encode `envelope` with bincode and frame it with `framer`.
///
/// # Panics
///
/// Panics if the envelope cannot be encoded or framed.
#[must_use]
pub fn frame_envelope<H: HeaderPolicy>(framer: &mut PacketFramer<H>, envelope: &Envelope) -> Bytes {
    let payload = BincodeSerializer.encode(envelope).expect("encode envelope");
    let mut buf = BytesMut::new();
    framer
        .encode(Bytes::from(payload), &mut buf)
        .expect("frame envelope");
    buf.freeze()
}

/// Decode every complete frame in `bytes` into envelopes.
///
/// # Panics
///
/// Panics if the bytes are not well-formed frames of bincode envelopes.
#[must_use]
pub fn decode_envelopes<H: HeaderPolicy>(framer: &mut PacketFramer<H>, bytes: &[u8]) -> Vec<Envelope> {
    let mut buf = BytesMut::from(bytes);
    let mut out = Vec::new();
    while let Some(frame) = framer.decode(&mut buf).expect("decode frame") {
        out.push(BincodeSerializer.decode(&frame.payload).expect("decode envelope"));
    }
    out
}

/// Read from `stream` until `count` envelopes have been decoded.
///
/// # Panics
///
/// Panics if the stream ends early or carries malformed frames.
pub async fn read_envelopes<H: HeaderPolicy>(
    stream: &mut DuplexStream,
    framer: &mut PacketFramer<H>,
    count: usize,
) -> Vec<Envelope> {
    let mut buf = BytesMut::new();
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        while let Some(frame) = framer.decode(&mut buf).expect("decode frame") {
            out.push(BincodeSerializer.decode(&frame.payload).expect("decode envelope"));
        }
        if out.len() >= count {
            break;
        }
        let read = stream.read_buf(&mut buf).await.expect("read from pipe");
        assert!(read > 0, "pipe closed after {} of {count} envelopes", out.len());
    }
    out
}
