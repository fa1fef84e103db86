//! Non-blocking sockets (spec.md §4.8): address parsing and family
//! detection, a raw `socket2`-backed wrapper, and an event-loop-bound
//! socket adapter with listen/connect/accept state handling.

pub mod address;
pub mod raw_socket;
pub mod socket;

pub use address::{ParsedAddr, SockFamily, SockType, parse_address, sock_family_for};
pub use raw_socket::RawSocket;
pub use socket::{Socket, SocketListener, SocketState};
