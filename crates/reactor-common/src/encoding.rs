//! SHA-1 and Base64 adapters.
//!
//! The core treats these as external collaborators (spec §1): the only
//! place they are consumed is the WebSocket upgrade handshake, which needs
//! exactly `Base64(SHA1(key + GUID))`. Kept as free functions rather than a
//! trait so call sites don't need to thread a collaborator object through
//! for what is, in practice, always the real implementation.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

/// RFC 6455 handshake GUID, concatenated onto `Sec-WebSocket-Key` before
/// hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Base64(SHA1(input))`.
pub fn sha1_base64(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    STANDARD.encode(digest)
}

/// Computes the `Sec-WebSocket-Accept` value for a given client key.
pub fn websocket_accept(client_key: &str) -> String {
    sha1_base64(&format!("{client_key}{WEBSOCKET_GUID}"))
}

pub fn base64_encode(input: &[u8]) -> String {
    STANDARD.encode(input)
}

pub fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(input)
}
