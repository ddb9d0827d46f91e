//! Gzip compression for response bodies: applied
//! when the embedded compression module is present, the client's
//! `Accept-Encoding` contains `gzip`, and the body is at least `min_size`.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

pub fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

/// Case-insensitive substring check for `Accept-Encoding: ...gzip...`.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.to_ascii_lowercase().contains("gzip")
}
