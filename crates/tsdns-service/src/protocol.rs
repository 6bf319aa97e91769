//! The line-oriented query protocol.
//!
//! A client connects, sends a domain and receives either the resolved `target` or
//! `target:port` without a trailing delimiter, or [`NOT_FOUND`]. There is exactly one query per
//! connection.

use crate::types::Record;

/// The maximum number of bytes read from a connection.
pub const MAX_QUERY_SIZE: usize = 512;

/// The response sent for domains without a live record.
pub const NOT_FOUND: &[u8] = b"404\n";

/// Extracts the queried domain from the raw bytes received on a connection.
///
/// Returns `None` if nothing but whitespace was received.
pub fn parse_query(payload: &[u8]) -> Option<String> {
    let query = String::from_utf8_lossy(payload);
    let query = query.trim();
    (!query.is_empty()).then(|| query.to_owned())
}

/// Renders the response for a lookup result.
pub fn render_response(record: Option<&Record>) -> Vec<u8> {
    match record {
        Some(record) => record.response().into_bytes(),
        None => NOT_FOUND.to_vec(),
    }
}
