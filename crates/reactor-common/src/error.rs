//! The error taxonomy shared by the socket, HTTP and WebSocket layers
//! (spec §7). Each variant names a `Kind` from that table; the network,
//! HTTP and WebSocket crates wrap this (or a superset of it) in their own
//! `thiserror` enums rather than inventing unrelated vocabulary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("address in use")]
    AddressInUse,

    #[error("address unusable: {0}")]
    AddressUnusable(String),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("operation timed out")]
    Timeout,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Broken(#[from] std::io::Error),

    #[error("message too large")]
    MessageTooLarge,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("redirect count exceeded limit")]
    RedirectLoop,
}
