//! Reference header policies.

use bytes::BytesMut;

use super::{FramingError, HeaderPolicy, PacketHeader};

/// Byte order used for fixed-width length prefixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Fixed-width payload length prefix.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use peerwire::frame::{HeaderPolicy, LengthPrefixed};
///
/// let policy = LengthPrefixed::default();
/// let mut buf = BytesMut::new();
/// policy.write_header(3, &mut buf).expect("encodable");
/// assert_eq!(&buf[..], &[0, 0, 0, 3]);
/// let header = policy.parse(&buf).expect("valid header");
/// assert_eq!(header.packet_size(), 7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthPrefixed {
    width: usize,
    endianness: Endianness,
}

impl LengthPrefixed {
    /// Construct a policy with a `width`-byte prefix.
    ///
    /// Returns `None` unless `width` is 1, 2, 4 or 8.
    #[must_use]
    pub const fn new(width: usize, endianness: Endianness) -> Option<Self> {
        match width {
            1 | 2 | 4 | 8 => Some(Self { width, endianness }),
            _ => None,
        }
    }

    /// Two-byte big-endian prefix.
    #[must_use]
    pub const fn u16_be() -> Self {
        Self {
            width: 2,
            endianness: Endianness::Big,
        }
    }

    /// Four-byte big-endian prefix.
    #[must_use]
    pub const fn u32_be() -> Self {
        Self {
            width: 4,
            endianness: Endianness::Big,
        }
    }

    /// Four-byte little-endian prefix.
    #[must_use]
    pub const fn u32_le() -> Self {
        Self {
            width: 4,
            endianness: Endianness::Little,
        }
    }

    /// Width of the prefix in bytes.
    #[must_use]
    pub const fn width(&self) -> usize { self.width }

    fn read_len(&self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self.endianness {
            Endianness::Big => {
                buf[8 - self.width..].copy_from_slice(&bytes[..self.width]);
                u64::from_be_bytes(buf)
            }
            Endianness::Little => {
                buf[..self.width].copy_from_slice(&bytes[..self.width]);
                u64::from_le_bytes(buf)
            }
        }
    }
}

impl Default for LengthPrefixed {
    fn default() -> Self { Self::u32_be() }
}

impl HeaderPolicy for LengthPrefixed {
    fn minimum_header_size(&self) -> usize { self.width }

    fn is_header_readable(&self, buf: &[u8]) -> bool { buf.len() >= self.width }

    fn compute_header_size(&self, _buf: &[u8]) -> Result<usize, FramingError> { Ok(self.width) }

    fn parse(&self, header: &[u8]) -> Result<PacketHeader, FramingError> {
        if header.len() < self.width {
            return Err(FramingError::MalformedHeader("truncated length prefix"));
        }
        let len = usize::try_from(self.read_len(header))
            .map_err(|_| FramingError::MalformedHeader("length prefix exceeds address space"))?;
        PacketHeader::new(self.width, len)
    }

    fn write_header(&self, payload_size: usize, dst: &mut BytesMut) -> Result<(), FramingError> {
        let not_encodable = FramingError::PayloadNotEncodable { size: payload_size };
        let value = u64::try_from(payload_size).map_err(|_| not_encodable.clone())?;
        if self.width < 8 && value >> (8 * self.width) != 0 {
            return Err(not_encodable);
        }
        match self.endianness {
            Endianness::Big => dst.extend_from_slice(&value.to_be_bytes()[8 - self.width..]),
            Endianness::Little => dst.extend_from_slice(&value.to_le_bytes()[..self.width]),
        }
        Ok(())
    }
}

const VARINT_MAX_BYTES: usize = 5;
const CONTINUATION: u8 = 0x80;

/// LEB128-encoded payload length, one to five bytes long.
///
/// Small frames pay a single byte of header overhead; the length is limited
/// to `u32::MAX`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarIntLength;

impl HeaderPolicy for VarIntLength {
    fn minimum_header_size(&self) -> usize { 1 }

    fn is_variable_length(&self) -> bool { true }

    fn is_header_readable(&self, buf: &[u8]) -> bool {
        buf.len() >= VARINT_MAX_BYTES
            || buf
                .iter()
                .take(VARINT_MAX_BYTES)
                .any(|b| b & CONTINUATION == 0)
    }

    fn compute_header_size(&self, buf: &[u8]) -> Result<usize, FramingError> {
        buf.iter()
            .take(VARINT_MAX_BYTES)
            .position(|b| b & CONTINUATION == 0)
            .map(|idx| idx + 1)
            .ok_or(FramingError::MalformedHeader("varint length exceeds five bytes"))
    }

    fn parse(&self, header: &[u8]) -> Result<PacketHeader, FramingError> {
        let size = self.compute_header_size(header)?;
        let mut value: u64 = 0;
        for (idx, byte) in header[..size].iter().enumerate() {
            value |= u64::from(byte & !CONTINUATION) << (7 * idx);
        }
        let len = u32::try_from(value)
            .map_err(|_| FramingError::MalformedHeader("varint length overflows u32"))?;
        PacketHeader::new(size, len as usize)
    }

    fn write_header(&self, payload_size: usize, dst: &mut BytesMut) -> Result<(), FramingError> {
        let mut value = u32::try_from(payload_size)
            .map_err(|_| FramingError::PayloadNotEncodable { size: payload_size })?;
        loop {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "value is masked to seven bits"
            )]
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                dst.extend_from_slice(&[byte]);
                return Ok(());
            }
            dst.extend_from_slice(&[byte | CONTINUATION]);
        }
    }
}
