//! Unit tests for header policies and the packet framer.

use bytes::{Bytes, BytesMut};
use rstest::rstest;
use tokio_util::codec::{Decoder, Encoder};

use super::*;
use crate::config::NetworkConnectionOptions;

fn options(min: usize, max: usize, payload: usize) -> NetworkConnectionOptions {
    NetworkConnectionOptions::new(min, max, payload).expect("valid options")
}

fn encode<H: HeaderPolicy>(framer: &mut PacketFramer<H>, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    framer
        .encode(Bytes::copy_from_slice(payload), &mut buf)
        .expect("encode frame");
    buf
}

#[rstest]
#[case(LengthPrefixed::u16_be(), 0x1234, vec![0x12, 0x34])]
#[case(LengthPrefixed::u32_be(), 1, vec![0, 0, 0, 1])]
#[case(LengthPrefixed::u32_le(), 1, vec![1, 0, 0, 0])]
fn length_prefix_layout(
    #[case] policy: LengthPrefixed,
    #[case] len: usize,
    #[case] expected: Vec<u8>,
) {
    let mut buf = BytesMut::new();
    policy.write_header(len, &mut buf).expect("write header");
    assert_eq!(&buf[..], expected.as_slice());
    let header = policy.parse(&buf).expect("parse header");
    assert_eq!(header.payload_size(), len);
    assert_eq!(header.header_size(), policy.width());
}

#[test]
fn length_prefix_rejects_unrepresentable_length() {
    let mut buf = BytesMut::new();
    let err = LengthPrefixed::u16_be()
        .write_header(70_000, &mut buf)
        .expect_err("length should not fit");
    assert_eq!(err, FramingError::PayloadNotEncodable { size: 70_000 });
}

#[test]
fn length_prefix_rejects_unsupported_width() {
    assert!(LengthPrefixed::new(3, Endianness::Big).is_none());
    assert!(LengthPrefixed::new(8, Endianness::Little).is_some());
}

#[rstest]
#[case(0, vec![0x00])]
#[case(127, vec![0x7f])]
#[case(128, vec![0x80, 0x01])]
#[case(300, vec![0xac, 0x02])]
fn varint_layout(#[case] len: usize, #[case] expected: Vec<u8>) {
    let mut buf = BytesMut::new();
    VarIntLength.write_header(len, &mut buf).expect("write header");
    assert_eq!(&buf[..], expected.as_slice());
    assert_eq!(
        VarIntLength.compute_header_size(&buf).expect("size"),
        expected.len()
    );
    assert_eq!(
        VarIntLength.parse(&buf).expect("parse").payload_size(),
        len
    );
}

#[test]
fn frame_split_across_reads_is_reassembled() {
    let mut framer = PacketFramer::new(LengthPrefixed::default(), options(4, 4, 64));
    let wire = encode(&mut framer, b"hello");

    let mut buf = BytesMut::new();
    for (idx, byte) in wire.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        let decoded = framer.decode(&mut buf).expect("decode");
        if idx + 1 < wire.len() {
            assert!(decoded.is_none(), "frame completed early at byte {idx}");
        } else {
            let frame = decoded.expect("complete frame");
            assert_eq!(&frame.payload[..], b"hello");
            assert_eq!(frame.header.packet_size(), 9);
        }
    }
    assert!(buf.is_empty());
}

#[test]
fn several_frames_in_one_read_decode_in_order() {
    let mut framer = PacketFramer::new(VarIntLength, options(1, 5, 1024));
    let mut buf = encode(&mut framer, b"one");
    buf.extend_from_slice(&encode(&mut framer, b""));
    buf.extend_from_slice(&encode(&mut framer, &[7u8; 200]));

    let first = framer.decode(&mut buf).expect("decode").expect("first");
    let second = framer.decode(&mut buf).expect("decode").expect("second");
    let third = framer.decode(&mut buf).expect("decode").expect("third");
    assert_eq!(&first.payload[..], b"one");
    assert!(second.payload.is_empty());
    assert_eq!(third.payload.len(), 200);
    assert_eq!(third.header.header_size(), 2);
    assert!(framer.decode(&mut buf).expect("decode").is_none());
}

#[test]
fn oversized_payload_is_fatal() {
    let mut framer = PacketFramer::new(LengthPrefixed::default(), options(4, 4, 8));
    let mut buf = BytesMut::from(&[0u8, 0, 0, 9][..]);
    let err = framer.decode(&mut buf).expect_err("oversized payload");
    assert!(matches!(
        err,
        FrameError::Framing(FramingError::OversizedPayload { size: 9, max: 8 })
    ));
}

#[test]
fn encoder_refuses_oversized_payload() {
    let mut framer = PacketFramer::new(LengthPrefixed::default(), options(4, 4, 2));
    let mut buf = BytesMut::new();
    let err = framer
        .encode(Bytes::from_static(b"abc"), &mut buf)
        .expect_err("oversized payload");
    assert!(matches!(
        err,
        FrameError::Framing(FramingError::OversizedPayload { size: 3, max: 2 })
    ));
    assert!(buf.is_empty());
}

#[test]
fn varint_header_longer_than_limit_is_rejected() {
    let mut framer = PacketFramer::new(VarIntLength, options(1, 2, 1 << 20));
    let mut buf = BytesMut::from(&[0x80u8, 0x80, 0x01][..]);
    let err = framer.decode(&mut buf).expect_err("header too long");
    assert!(matches!(
        err,
        FrameError::Framing(FramingError::OversizedHeader { size: 3, max: 2 })
    ));
}

#[test]
fn unterminated_varint_is_malformed() {
    let mut framer = PacketFramer::new(VarIntLength, options(1, 5, 1 << 20));
    let mut buf = BytesMut::from(&[0xffu8; 5][..]);
    let err = framer.decode(&mut buf).expect_err("malformed header");
    assert!(matches!(
        err,
        FrameError::Framing(FramingError::MalformedHeader(_))
    ));
}

#[test]
fn eof_mid_frame_reports_disconnect() {
    let mut framer = PacketFramer::new(LengthPrefixed::default(), options(4, 4, 64));
    let mut buf = BytesMut::from(&[0u8, 0, 0, 4, 1, 2][..]);
    let err = framer.decode_eof(&mut buf).expect_err("truncated frame");
    assert!(matches!(err, FrameError::Disconnected { buffered: 6 }));
}

#[test]
fn eof_on_boundary_is_clean() {
    let mut framer = PacketFramer::new(LengthPrefixed::default(), options(4, 4, 64));
    let mut buf = BytesMut::new();
    assert!(framer.decode_eof(&mut buf).expect("clean eof").is_none());
}

#[test]
fn oversized_minimum_header_is_clamped_to_policy() {
    let mut framer = PacketFramer::new(VarIntLength, options(4, 5, 64));
    let mut buf = encode(&mut framer, b"x");
    assert_eq!(buf.len(), 2);
    let frame = framer.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(&frame.payload[..], b"x");
}

#[test]
fn packet_size_overflow_is_malformed() {
    assert!(matches!(
        PacketHeader::new(1, usize::MAX),
        Err(FramingError::MalformedHeader(_))
    ));
}

#[test]
fn maximal_eight_byte_prefix_is_rejected_not_panicking() {
    let policy = LengthPrefixed::new(8, Endianness::Big).expect("supported width");
    let mut framer = PacketFramer::new(policy, options(1, 8, 1024));
    let mut buf = BytesMut::from(&[0xff; 8][..]);
    let err = framer.decode(&mut buf).expect_err("header must be refused");
    assert!(matches!(
        err,
        FrameError::Framing(
            FramingError::MalformedHeader(_) | FramingError::OversizedPayload { .. }
        )
    ));
}
