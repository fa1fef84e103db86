//! HTTP/1.1 server and client built on the socket adapter (spec C8), with
//! WebSocket upgrade support reusing `reactor-ws`'s frame codec.
//!
//! `server` and `client` each define their own `HttpRequest`/`HttpResponse`
//! pair (a server-side request is inbound and already-parsed; a client-side
//! request is outbound and still being built) so neither re-exports a bare
//! top-level `HttpRequest` — use `reactor_http::server::HttpRequest` or
//! `reactor_http::client::HttpRequest` explicitly, the same way callers
//! already have to pick `server::HttpRequestHandler` vs
//! `client::HttpClientListener`.

pub mod client;
pub mod common;
pub mod paged_buffer;
pub mod server;

pub use client::{HttpClient, HttpClientListener, HttpResponse};
pub use common::{HttpHeader, HttpHeaders, HttpMethod, HttpUrl, status};
pub use server::{HttpRequestHandler, HttpServer, HttpServerConnection};
