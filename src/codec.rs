//! MessagePack wire format.
//!
//! Structs are written as maps keyed by field name so consumers in other
//! languages can decode them without a schema.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::envelope::EventEnvelope;
use crate::error::CodecError;

pub const CONTENT_TYPE: &str = "application/x-msgpack";

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

pub fn encode_envelope(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    encode(envelope)
}

pub fn decode_envelope(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
    decode(bytes)
}
