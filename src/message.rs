//! Application message traits.
//!
//! [`Message`] is implemented for every type deriving bincode's `Encode` and
//! `Decode`. [`MessageKind`] adds the numeric kind identifier that envelopes
//! carry on the wire so handlers and the correlator can recognise a message
//! before decoding its payload.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

/// Wrapper trait for values that can be encoded with bincode.
pub trait Message: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Serialize the message into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Deserialize a message from a byte slice, returning the message and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, config::standard())
    }
}

impl<T> Message for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}

/// A message type with a stable wire identifier.
///
/// ```
/// use peerwire::message::MessageKind;
///
/// #[derive(bincode::Encode, bincode::Decode)]
/// struct Ping {
///     nonce: u32,
/// }
///
/// impl MessageKind for Ping {
///     const KIND: u32 = 1;
/// }
///
/// assert_eq!(Ping::KIND, 1);
/// assert!(Ping::name().ends_with("Ping"));
/// ```
pub trait MessageKind: Message + Send + Sync + 'static {
    /// Identifier written into every envelope carrying this message.
    const KIND: u32;

    /// Human-readable name used in logs and catalogue errors.
    #[must_use]
    fn name() -> &'static str { std::any::type_name::<Self>() }
}
