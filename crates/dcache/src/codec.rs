//! Value encoding
//!
//! Strings are stored as their raw UTF-8 bytes in every position. Any other
//! scalar value is MessagePack (struct fields by name), while map field
//! values and pub/sub payloads, which must be text, are JSON.

use std::any::{Any, TypeId};

use dcache_core::{CacheError, CacheResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

fn as_str<T: 'static>(value: &T) -> Option<&str> {
    let any = value as &dyn Any;
    if let Some(s) = any.downcast_ref::<String>() {
        return Some(s.as_str());
    }
    any.downcast_ref::<&'static str>().copied()
}

fn is_string<T: 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<String>()
}

fn from_string<T: 'static>(s: String) -> CacheResult<T> {
    let boxed: Box<dyn Any> = Box::new(s);
    boxed
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| CacheError::Serialization("string passthrough type mismatch".to_string()))
}

/// Bytes stored for a scalar value
pub fn encode_value<T: Serialize + 'static>(value: &T) -> CacheResult<Vec<u8>> {
    match as_str(value) {
        Some(s) => Ok(s.as_bytes().to_vec()),
        None => Ok(rmp_serde::to_vec_named(value)?),
    }
}

pub fn decode_value<T: DeserializeOwned + 'static>(bytes: Vec<u8>) -> CacheResult<T> {
    if is_string::<T>() {
        return from_string(String::from_utf8(bytes)?);
    }
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Text stored for a map field value or a published message
pub fn encode_text<T: Serialize + 'static>(value: &T) -> CacheResult<String> {
    match as_str(value) {
        Some(s) => Ok(s.to_string()),
        None => Ok(serde_json::to_string(value)?),
    }
}

pub fn decode_text<T: DeserializeOwned + 'static>(text: String) -> CacheResult<T> {
    if is_string::<T>() {
        return from_string(text);
    }
    Ok(serde_json::from_str(&text)?)
}
