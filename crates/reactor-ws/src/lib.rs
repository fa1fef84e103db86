//! RFC 6455 WebSocket support (spec.md §4.11): the frame codec shared with
//! the HTTP server's upgrade path, and a standalone WebSocket client.

pub mod client;
pub mod frame;

pub use client::{WebSocketClient, WebSocketClientListener, WebSocketMessage, WsState};
pub use frame::{CloseCode, FrameError, Frame, Opcode, apply_mask, build_frame, parse_frame};
