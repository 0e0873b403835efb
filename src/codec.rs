//! Deterministic binary encoding for persisted values
//!
//! Every value the index persists goes through these two functions. Bincode
//! writes integers little-endian at fixed width and length-prefixes every
//! variable-width field, so the byte form of a value is stable across
//! process restarts and implementation changes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encode a value to its canonical byte form
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Decode a value from its canonical byte form
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}
