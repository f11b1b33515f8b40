//! Message serialization.
//!
//! [`Serializer`] is the codec collaborator that turns envelopes into frame
//! payloads and back. [`BincodeSerializer`] is the default. Sessions hold the
//! serializer behind the object-safe [`EnvelopeCodec`] so peers and send
//! services need not be generic over it.

use std::{error::Error, sync::Arc};

use crate::{envelope::Envelope, message::Message};

/// Boxed error returned by serializers.
pub type CodecError = Box<dyn Error + Send + Sync>;

/// Trait for serializing and deserializing messages.
///
/// Implementations must be synchronous and free of side effects.
pub trait Serializer: Send + Sync + 'static {
    /// Serialize `value` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    fn serialize<M: Message>(&self, value: &M) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a message from `bytes`, returning the message and bytes
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be parsed into a message.
    fn deserialize<M: Message>(&self, bytes: &[u8]) -> Result<(M, usize), CodecError>;
}

/// Serializer using `bincode` with its standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<M: Message>(&self, value: &M) -> Result<Vec<u8>, CodecError> {
        value.to_bytes().map_err(Into::into)
    }

    fn deserialize<M: Message>(&self, bytes: &[u8]) -> Result<(M, usize), CodecError> {
        M::from_bytes(bytes).map_err(Into::into)
    }
}

/// Object-safe view of a [`Serializer`] fixed to [`Envelope`].
pub trait EnvelopeCodec: Send + Sync + 'static {
    /// Encode an envelope into a frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be serialized.
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Decode a frame payload into an envelope.
    ///
    /// Trailing bytes after the envelope are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is malformed.
    fn decode(&self, payload: &[u8]) -> Result<Envelope, CodecError>;
}

impl<S: Serializer> EnvelopeCodec for S {
    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        self.serialize(envelope)
    }

    fn decode(&self, payload: &[u8]) -> Result<Envelope, CodecError> {
        let (envelope, consumed) = self.deserialize::<Envelope>(payload)?;
        if consumed != payload.len() {
            return Err(format!(
                "{} trailing bytes after envelope",
                payload.len() - consumed
            )
            .into());
        }
        Ok(envelope)
    }
}

/// Shared handle to the codec used by every session of a starter.
pub type SharedCodec = Arc<dyn EnvelopeCodec>;
