//! # Canonical JSON
//!
//! The byte stream used as signing input. Object keys appear in the declared
//! order of each schema (struct field order, not sorted), with no
//! insignificant whitespace and only the mandatory JSON escapes. The same
//! writer produces the compact transport form, so a parse followed by
//! normalization is a fixed point for well-formed input.

use serde::Serialize;
use serde_json::Value;

use crate::error::Kind;
use crate::{tracerr, Result};

/// Serialize `data` to the canonical byte stream.
///
/// # Errors
///
/// * `MalformedRequest` if the data cannot be serialized.
pub fn to_vec<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    match serde_json::to_vec(data) {
        Ok(buf) => Ok(buf),
        Err(e) => tracerr!(Kind::MalformedRequest, "canonical serialization failed: {}", e),
    }
}

/// Serialize `data` to the canonical string form.
///
/// # Errors
///
/// * `MalformedRequest` if the data cannot be serialized.
pub fn to_string<T: Serialize>(data: &T) -> Result<String> {
    match serde_json::to_string(data) {
        Ok(s) => Ok(s),
        Err(e) => tracerr!(Kind::MalformedRequest, "canonical serialization failed: {}", e),
    }
}

/// Re-serialize a JSON text in canonical form. Key order survives the round
/// trip, so normalizing already-normalized input returns identical bytes.
///
/// # Errors
///
/// * `MalformedRequest` if the input is not well-formed JSON.
pub fn normalize(json: &str) -> Result<String> {
    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => tracerr!(Kind::MalformedRequest, "not well-formed JSON: {}", e),
    };
    to_string(&value)
}
