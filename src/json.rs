//! SIMD-accelerated JSON handling.
//!
//! Uses `simd-json` for parsing, `serde_json::Value` as the shared
//! representation stored in request slot 8 and handed to handlers.

/// Parse a JSON body into a `serde_json::Value`. simd-json requires a
/// mutable, owned buffer, so the caller's bytes are copied once.
#[inline]
pub fn parse_json_bytes(input: &[u8]) -> Result<serde_json::Value, String> {
    let mut buf = input.to_vec();
    simd_json::serde::from_slice(&mut buf).map_err(|e| format!("JSON parse error: {e}"))
}

#[inline]
pub fn serialize_json(value: &serde_json::Value) -> Result<Vec<u8>, String> {
    serde_json::to_vec(value).map_err(|e| format!("JSON serialize error: {e}"))
}
