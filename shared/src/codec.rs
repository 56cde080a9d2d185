//! Opaque value codec.
//!
//! Every value that crosses the wire (packets, payloads, handshake data,
//! snapshots) is turned into bytes here. The byte layout is bincode's and is
//! not part of the protocol contract.

use crate::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    Ok(bincode::deserialize(bytes)?)
}

/// Lenient decode used on the receive path.
///
/// Zero-length input means "no data" and malformed input is treated the same
/// way, so callers never have to handle a decode error for peer-supplied bytes.
pub fn decode_or_none<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    if bytes.is_empty() {
        return None;
    }
    bincode::deserialize(bytes).ok()
}
