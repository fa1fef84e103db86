//! This crate provides shared functionality used by every other crate in
//! reactor: the clock abstraction the event loop and timers are built on,
//! the SHA-1/Base64 adapters the WebSocket handshake depends on, and the
//! shutdown-requested flag the loop polls.

pub mod clock;
pub mod encoding;
pub mod error;
pub mod json;
pub mod shutdown;
