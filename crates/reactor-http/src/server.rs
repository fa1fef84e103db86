//! The HTTP server (spec C9), grounded on
//! `examples/original_source/include/xtils/net/http_server.h`'s
//! `HttpServer`/`HttpServerConnection`/`HttpRequestHandler`. The original
//! has no matching `.cc` in the retrieved sources, so the request-parsing
//! and dispatch loop below follow the header's documented contract
//! directly rather than a ported implementation.
//!
//! Every accepted connection gets its own dedicated [`Socket`] listener
//! (a `Weak<ConnInner>` bridge, the same shape `reactor_ws::client` uses
//! for its socket binding) rather than sharing the listening socket's, by
//! releasing the accepted socket's descriptor and re-adopting it — see
//! [`Socket::release`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, Mutex, Weak};

use reactor_common::encoding::websocket_accept;
use reactor_net::{SockType, Socket, SocketListener, sock_family_for};
use reactor_runtime::TaskRunner;
use reactor_ws::frame::{Opcode, build_frame, parse_frame};
pub use reactor_ws::WebSocketMessage;

use crate::common::{
    HttpHeaders, HttpMethod, add_header, find_double_crlf, get_header_value, has_header, status, status_message,
};
use crate::paged_buffer::PagedBuffer;

/// Request headers beyond this count are rejected with 431, matching the
/// original's fixed-size `kMaxHeaders = 32` header table.
pub const MAX_HEADERS: usize = 32;

/// Passed as the `content_length` argument to suppress the
/// auto-computed `Content-Length` header entirely (e.g. a response whose
/// headers already declare one, or one that will stream via `Connection:
/// close` with no length at all), matching the original's
/// `kOmitContentLength` sentinel.
pub const OMIT_CONTENT_LENGTH: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub uri: String,
    pub path: String,
    pub query: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
    pub is_websocket_handshake: bool,
}

impl HttpRequest {
    pub fn get_header(&self, name: &str) -> Option<&str> {
        get_header_value(&self.headers, name)
    }

    pub fn origin(&self) -> Option<&str> {
        self.get_header("Origin")
    }
}

struct Fragmented {
    opcode: Opcode,
    buffer: Vec<u8>,
}

struct ConnInner {
    id: u64,
    runner: Arc<dyn TaskRunner>,
    server: Weak<ServerInner>,
    socket: Mutex<Option<Socket>>,
    rxbuf: Mutex<PagedBuffer>,
    is_websocket: AtomicBool,
    keepalive: AtomicBool,
    fragmented: Mutex<Option<Fragmented>>,
    alive: Arc<AtomicBool>,
    /// The current request's `Origin`, set just before the handler is
    /// invoked when that origin is on the allow-list; `send_response*`
    /// echoes it back per §4.9 ("the standard CORS echo headers if
    /// applicable"). Cleared once the response is sent.
    cors_origin: Mutex<Option<String>>,
}

/// A handle to one accepted connection, passed to
/// [`HttpRequestHandler`] callbacks. Cheap to clone (an `Arc` underneath);
/// the handler is free to stash one and reply later (e.g. after an
/// asynchronous lookup) as long as the connection is still open.
#[derive(Clone)]
pub struct HttpServerConnection {
    inner: Arc<ConnInner>,
}

impl HttpServerConnection {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_websocket(&self) -> bool {
        self.inner.is_websocket.load(SeqCst)
    }

    pub fn peer_addr(&self) -> String {
        match self.inner.socket.lock().unwrap().as_ref() {
            Some(s) => s.peer_addr_string(),
            None => "<closed>".to_string(),
        }
    }

    /// Sends a response with an auto-computed `Content-Length` (unless
    /// `headers` already carries one). Closes the connection afterward if
    /// `force_close` is set or the request asked for it.
    pub fn send_response(&self, status: u16, headers: &HttpHeaders, body: &[u8], force_close: bool) -> bool {
        self.send_response_with_length(status, headers, body, body.len(), force_close)
    }

    /// As [`Self::send_response`], but `content_length` overrides what's
    /// written in the `Content-Length` header (or suppresses it entirely
    /// when passed [`OMIT_CONTENT_LENGTH`]) regardless of `body`'s actual
    /// length — for HEAD responses, or bodies framed some other way.
    pub fn send_response_with_length(
        &self,
        status: u16,
        headers: &HttpHeaders,
        body: &[u8],
        content_length: usize,
        force_close: bool,
    ) -> bool {
        let keepalive = self.inner.keepalive.load(SeqCst) && !force_close;

        let mut out = format!("HTTP/1.1 {status} {}\r\n", status_message(status));
        for h in headers {
            out.push_str(&format!("{}: {}\r\n", h.name, h.value));
        }
        if !has_header(headers, "Content-Length") && content_length != OMIT_CONTENT_LENGTH {
            out.push_str(&format!("Content-Length: {content_length}\r\n"));
        }
        if !has_header(headers, "Access-Control-Allow-Origin") {
            if let Some(origin) = self.inner.cors_origin.lock().unwrap().take() {
                out.push_str(&format!("Access-Control-Allow-Origin: {origin}\r\n"));
            }
        }
        if !has_header(headers, "Connection") {
            out.push_str(if keepalive { "Connection: keep-alive\r\n" } else { "Connection: close\r\n" });
        }
        out.push_str("\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(body);
        let sent = self.send_raw(&bytes);

        if !keepalive {
            self.close();
        }
        sent
    }

    /// Sends `content` and unconditionally closes the connection
    /// afterward, regardless of keep-alive negotiation.
    pub fn send_response_and_close(&self, status: u16, headers: &HttpHeaders, content: &[u8]) -> bool {
        self.send_response_with_length(status, headers, content, content.len(), true)
    }

    /// Completes the WebSocket upgrade handshake for `req` (which must
    /// have `is_websocket_handshake` set and carry a `Sec-WebSocket-Key`).
    /// Subsequent reads from this connection are parsed as WebSocket
    /// frames rather than HTTP requests.
    pub fn upgrade_to_websocket(&self, req: &HttpRequest) -> bool {
        let Some(key) = req.get_header("Sec-WebSocket-Key") else { return false };
        let accept = websocket_accept(key);
        let protocol_header = req
            .get_header("Sec-WebSocket-Protocol")
            .map(|p| format!("Sec-WebSocket-Protocol: {}\r\n", p.split(',').next().unwrap_or(p).trim()))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n{protocol_header}\r\n"
        );
        if !self.send_raw(response.as_bytes()) {
            return false;
        }
        self.inner.is_websocket.store(true, SeqCst);
        true
    }

    pub fn send_websocket_message_text(&self, text: &str) -> bool {
        self.send_websocket_frame(Opcode::Text, text.as_bytes())
    }

    pub fn send_websocket_message(&self, data: &[u8], is_text: bool) -> bool {
        self.send_websocket_frame(if is_text { Opcode::Text } else { Opcode::Binary }, data)
    }

    /// Sends a raw WebSocket frame; servers never mask outbound frames
    /// (RFC 6455 §5.1 — only clients do).
    pub fn send_websocket_frame(&self, opcode: Opcode, payload: &[u8]) -> bool {
        if !self.inner.is_websocket.load(SeqCst) {
            return false;
        }
        let frame = build_frame(opcode, payload, true, None);
        self.send_raw(&frame)
    }

    pub fn close(&self) {
        if let Some(socket) = self.inner.socket.lock().unwrap().as_ref() {
            socket.shutdown(false);
        }
        if let Some(server) = self.inner.server.upgrade() {
            server.clients.lock().unwrap().remove(&self.inner.id);
        }
    }

    fn send_raw(&self, bytes: &[u8]) -> bool {
        match self.inner.socket.lock().unwrap().as_ref() {
            Some(socket) => socket.send(bytes),
            None => false,
        }
    }
}

/// Mandatory `on_http_request`, matching the original's pure-virtual
/// method; the WebSocket and close callbacks default to no-ops so a
/// plain request/response handler doesn't need to override them.
pub trait HttpRequestHandler: Send + Sync {
    fn on_http_request(&self, conn: &HttpServerConnection, req: &HttpRequest);
    fn on_websocket_message(&self, conn: &HttpServerConnection, message: &WebSocketMessage) {
        let _ = (conn, message);
    }
    fn on_http_connection_closed(&self, conn: &HttpServerConnection) {
        let _ = conn;
    }
}

struct ServerInner {
    runner: Arc<dyn TaskRunner>,
    req_handler: Arc<dyn HttpRequestHandler>,
    listen_socket: Mutex<Option<Socket>>,
    clients: Mutex<HashMap<u64, HttpServerConnection>>,
    allowed_origins: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

/// Listens for and serves HTTP/1.1 (and upgraded WebSocket) connections
/// on one address, dispatching parsed requests to a single
/// [`HttpRequestHandler`].
pub struct HttpServer {
    inner: Arc<ServerInner>,
}

struct ListenBridge {
    server: Weak<ServerInner>,
}

impl SocketListener for ListenBridge {
    fn on_new_incoming_connection(&self, new_connection: Socket) {
        if let Some(server) = self.server.upgrade() {
            accept_connection(&server, new_connection);
        }
    }
}

struct ConnBridge {
    inner: Weak<ConnInner>,
}

impl SocketListener for ConnBridge {
    fn on_data_available(&self) {
        if let Some(inner) = self.inner.upgrade() {
            handle_data_available(&inner);
        }
    }
    fn on_disconnect(&self) {
        if let Some(inner) = self.inner.upgrade() {
            handle_disconnected(&inner);
        }
    }
}

impl HttpServer {
    pub fn new(runner: Arc<dyn TaskRunner>, req_handler: Arc<dyn HttpRequestHandler>) -> HttpServer {
        HttpServer {
            inner: Arc::new(ServerInner {
                runner,
                req_handler,
                listen_socket: Mutex::new(None),
                clients: Mutex::new(HashMap::new()),
                allowed_origins: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Binds and starts listening on `addr` (any textual form C2 accepts:
    /// `host:port`, `[host]:port`, or a Unix socket path/abstract name).
    pub fn start(&self, addr: &str, backlog: i32) -> Result<(), reactor_common::error::CoreError> {
        let family = sock_family_for(addr);
        let bridge = Arc::new(ListenBridge { server: Arc::downgrade(&self.inner) });
        let socket = Socket::listen(addr, family, SockType::Stream, self.inner.runner.clone(), bridge, backlog)?;
        *self.inner.listen_socket.lock().unwrap() = Some(socket);
        Ok(())
    }

    /// Stops accepting new connections and closes every currently open
    /// one. Matches the original's `Stop()`.
    pub fn stop(&self) {
        *self.inner.listen_socket.lock().unwrap() = None;
        let clients: Vec<HttpServerConnection> = self.inner.clients.lock().unwrap().drain().map(|(_, c)| c).collect();
        for conn in clients {
            conn.close();
        }
    }

    /// Registers an allowed CORS origin; `"*"` allows any origin. With no
    /// origins registered, CORS preflight requests are passed through to
    /// the handler unmodified (no automatic CORS support).
    pub fn add_allowed_origin(&self, origin: &str) {
        self.inner.allowed_origins.lock().unwrap().push(origin.to_string());
    }

    pub fn connection_count(&self) -> usize {
        self.inner.clients.lock().unwrap().len()
    }

    pub fn local_addr_string(&self) -> Option<String> {
        self.inner.listen_socket.lock().unwrap().as_ref().map(|s| s.local_addr_string())
    }
}

fn is_origin_allowed(server: &ServerInner, origin: Option<&str>) -> bool {
    let allowed = server.allowed_origins.lock().unwrap();
    if allowed.is_empty() {
        return true;
    }
    let Some(origin) = origin else { return false };
    allowed.iter().any(|a| a == "*" || a == origin)
}

fn accept_connection(server: &Arc<ServerInner>, accepted: Socket) {
    let runner = server.runner.clone();
    let raw = accepted.release();
    let rxbuf = match PagedBuffer::for_http_connection() {
        Ok(buf) => buf,
        Err(e) => {
            tracing::warn!(error = %e, "failed to allocate connection rx buffer");
            return;
        }
    };
    let id = server.next_id.fetch_add(1, SeqCst);
    let conn_inner = Arc::new(ConnInner {
        id,
        runner: runner.clone(),
        server: Arc::downgrade(server),
        socket: Mutex::new(None),
        rxbuf: Mutex::new(rxbuf),
        is_websocket: AtomicBool::new(false),
        keepalive: AtomicBool::new(true),
        fragmented: Mutex::new(None),
        alive: Arc::new(AtomicBool::new(true)),
        cors_origin: Mutex::new(None),
    });
    let bridge = Arc::new(ConnBridge { inner: Arc::downgrade(&conn_inner) });
    let socket = Socket::adopt_connected(raw, runner, bridge);
    *conn_inner.socket.lock().unwrap() = Some(socket);

    let handle = HttpServerConnection { inner: conn_inner };
    server.clients.lock().unwrap().insert(id, handle);
}

fn handle_data_available(inner: &Arc<ConnInner>) {
    let Some(server) = inner.server.upgrade() else { return };
    let Some(handle) = server.clients.lock().unwrap().get(&inner.id).cloned() else { return };

    loop {
        let mut rxbuf = inner.rxbuf.lock().unwrap();
        let spare = rxbuf.spare_capacity_mut();
        if spare.is_empty() {
            drop(rxbuf);
            handle.send_response_and_close(status::BAD_REQUEST, &Vec::new(), b"request too large");
            return;
        }
        let n = match inner.socket.lock().unwrap().as_ref() {
            Some(s) => s.receive(spare),
            None => return,
        };
        if n == 0 {
            break;
        }
        rxbuf.mark_filled(n);
    }

    if inner.is_websocket.load(SeqCst) {
        process_websocket_frames(inner, &server, &handle);
    } else {
        process_http_requests(inner, &server, &handle);
    }
}

/// Drains as many complete, pipelined requests as the buffer currently
/// holds. Stops (without consuming partial data) on the first incomplete
/// request, and stops entirely once the connection upgrades to WebSocket
/// or the handler closes it.
fn process_http_requests(inner: &Arc<ConnInner>, server: &Arc<ServerInner>, handle: &HttpServerConnection) {
    loop {
        if inner.is_websocket.load(SeqCst) {
            process_websocket_frames(inner, server, handle);
            return;
        }
        if !server.clients.lock().unwrap().contains_key(&inner.id) {
            return;
        }

        let parsed = {
            let rxbuf = inner.rxbuf.lock().unwrap();
            parse_one_http_request(rxbuf.filled())
        };
        let (req, consumed, keepalive) = match parsed {
            ParseOutcome::Incomplete => return,
            ParseOutcome::Invalid(code, message) => {
                handle.send_response_and_close(code, &Vec::new(), message.as_bytes());
                return;
            }
            ParseOutcome::Complete { request, consumed, keepalive } => (request, consumed, keepalive),
        };
        inner.rxbuf.lock().unwrap().consume(consumed);
        inner.keepalive.store(keepalive, SeqCst);

        if req.method == HttpMethod::Options && req.get_header("Access-Control-Request-Method").is_some() {
            handle_cors_preflight(server, handle, &req);
            continue;
        }
        if req.is_websocket_handshake && !is_origin_allowed(server, req.origin()) {
            handle.send_response_and_close(status::FORBIDDEN, &Vec::new(), b"origin not allowed");
            continue;
        }

        if let Some(origin) = req.origin() {
            if is_origin_allowed(server, Some(origin)) {
                *inner.cors_origin.lock().unwrap() = Some(origin.to_string());
            }
        }
        server.req_handler.on_http_request(handle, &req);
    }
}

fn handle_cors_preflight(server: &Arc<ServerInner>, handle: &HttpServerConnection, req: &HttpRequest) {
    let origin = req.origin();
    if !is_origin_allowed(server, origin) {
        handle.send_response(status::FORBIDDEN, &Vec::new(), b"", false);
        return;
    }
    let mut headers = HttpHeaders::new();
    add_header(&mut headers, "Access-Control-Allow-Origin", origin.unwrap_or("*"));
    add_header(&mut headers, "Access-Control-Allow-Methods", "GET, POST, OPTIONS");
    add_header(&mut headers, "Access-Control-Allow-Headers", "Content-Type, Authorization");
    add_header(&mut headers, "Access-Control-Max-Age", "86400");
    handle.send_response_with_length(status::NO_CONTENT, &headers, b"", OMIT_CONTENT_LENGTH, false);
}

enum ParseOutcome {
    Incomplete,
    Invalid(u16, String),
    Complete { request: HttpRequest, consumed: usize, keepalive: bool },
}

/// Parses the request line, headers, and (if present) body out of the
/// front of `data`, following RFC 7230: a `Content-Length` header or
/// `Transfer-Encoding: chunked` frames the body; otherwise the request
/// has none.
fn parse_one_http_request(data: &[u8]) -> ParseOutcome {
    let Some(header_end) = find_double_crlf(data) else {
        if data.len() >= 8192 {
            return ParseOutcome::Invalid(status::BAD_REQUEST, "request headers too large".to_string());
        }
        return ParseOutcome::Incomplete;
    };
    let header_text = match std::str::from_utf8(&data[..header_end]) {
        Ok(s) => s,
        Err(_) => return ParseOutcome::Invalid(status::BAD_REQUEST, "request headers are not valid UTF-8".to_string()),
    };
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let (Some(method_str), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return ParseOutcome::Invalid(status::BAD_REQUEST, "malformed request line".to_string());
    };
    let Some(method) = HttpMethod::from_str(method_str) else {
        return ParseOutcome::Invalid(status::NOT_IMPLEMENTED, format!("unsupported method {method_str}"));
    };

    let mut headers = HttpHeaders::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return ParseOutcome::Invalid(status::BAD_REQUEST, "malformed header line".to_string());
        };
        if headers.len() >= MAX_HEADERS {
            return ParseOutcome::Invalid(status::REQUEST_HEADER_FIELDS_TOO_LARGE, "too many headers".to_string());
        }
        add_header(&mut headers, name.trim(), value.trim());
    }

    let body_start = header_end + 4;
    let chunked = get_header_value(&headers, "Transfer-Encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let content_length = get_header_value(&headers, "Content-Length").and_then(|v| v.trim().parse::<usize>().ok());

    let (body, total_consumed) = if chunked {
        match crate::common::decode_chunked(&data[body_start..]) {
            crate::common::ChunkedOutcome::Complete { body, consumed } => (body, body_start + consumed),
            crate::common::ChunkedOutcome::Incomplete => return ParseOutcome::Incomplete,
            crate::common::ChunkedOutcome::Invalid(msg) => return ParseOutcome::Invalid(status::BAD_REQUEST, msg),
        }
    } else if let Some(len) = content_length {
        if data.len() < body_start + len {
            return ParseOutcome::Incomplete;
        }
        (data[body_start..body_start + len].to_vec(), body_start + len)
    } else if method.has_body() {
        return ParseOutcome::Invalid(status::LENGTH_REQUIRED, "Content-Length required".to_string());
    } else {
        (Vec::new(), body_start)
    };

    let (path, query) = match uri.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (uri.to_string(), String::new()),
    };

    let is_websocket_handshake = get_header_value(&headers, "Upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
        && get_header_value(&headers, "Connection").is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));

    let keepalive = match get_header_value(&headers, "Connection") {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
        _ => version.eq_ignore_ascii_case("HTTP/1.1"),
    };

    ParseOutcome::Complete {
        request: HttpRequest { method, uri: uri.to_string(), path, query, headers, body, is_websocket_handshake },
        consumed: total_consumed,
        keepalive,
    }
}

fn process_websocket_frames(inner: &Arc<ConnInner>, server: &Arc<ServerInner>, handle: &HttpServerConnection) {
    loop {
        let parsed = {
            let rxbuf = inner.rxbuf.lock().unwrap();
            parse_frame(rxbuf.filled(), 1 << 20)
        };
        let (frame, consumed) = match parsed {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, conn = inner.id, "websocket protocol error");
                handle.close();
                return;
            }
        };
        inner.rxbuf.lock().unwrap().consume(consumed);

        if !frame.masked {
            // RFC 6455 §5.1: every client-to-server frame must be masked.
            tracing::debug!(conn = inner.id, "unmasked client frame, closing");
            handle.close();
            return;
        }

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if frame.fin {
                    deliver_ws_message(server, handle, frame.opcode, frame.payload);
                } else {
                    *inner.fragmented.lock().unwrap() = Some(Fragmented { opcode: frame.opcode, buffer: frame.payload });
                }
            }
            Opcode::Continuation => {
                let mut fragmented = inner.fragmented.lock().unwrap();
                if let Some(frag) = fragmented.as_mut() {
                    frag.buffer.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let Fragmented { opcode, buffer } = fragmented.take().unwrap();
                        drop(fragmented);
                        deliver_ws_message(server, handle, opcode, buffer);
                    }
                }
            }
            Opcode::Ping => {
                handle.send_websocket_frame(Opcode::Pong, &frame.payload);
            }
            Opcode::Pong => {}
            Opcode::Close => {
                handle.send_websocket_frame(Opcode::Close, &frame.payload);
                handle.close();
                return;
            }
        }

        if !server.clients.lock().unwrap().contains_key(&inner.id) {
            return;
        }
    }
}

fn deliver_ws_message(server: &Arc<ServerInner>, handle: &HttpServerConnection, opcode: Opcode, data: Vec<u8>) {
    let message = WebSocketMessage { data, is_text: opcode == Opcode::Text };
    server.req_handler.on_websocket_message(handle, &message);
}

fn handle_disconnected(inner: &Arc<ConnInner>) {
    inner.alive.store(false, SeqCst);
    let Some(server) = inner.server.upgrade() else { return };
    let removed = server.clients.lock().unwrap().remove(&inner.id);
    if let Some(handle) = removed {
        server.req_handler.on_http_connection_closed(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_runtime::ThreadTaskRunner;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::mpsc::{Sender, channel};
    use std::time::Duration;

    struct EchoHandler {
        requests: Sender<HttpRequest>,
    }

    impl HttpRequestHandler for EchoHandler {
        fn on_http_request(&self, conn: &HttpServerConnection, req: &HttpRequest) {
            let mut headers = HttpHeaders::new();
            add_header(&mut headers, "Content-Type", "text/plain");
            conn.send_response(status::OK, &headers, b"hello from server", false);
            let _ = self.requests.send(req.clone());
        }
    }

    fn spawn_server() -> (HttpServer, String, std::sync::mpsc::Receiver<HttpRequest>) {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-server-test"));
        let (tx, rx) = channel();
        let server = HttpServer::new(runner, Arc::new(EchoHandler { requests: tx }));
        server.start("127.0.0.1:0", 16).unwrap();
        let addr = server.local_addr_string().unwrap();
        (server, addr, rx)
    }

    #[test]
    fn responds_to_a_simple_get_request() {
        let (server, addr, requests) = spawn_server();
        let mut stream = TcpStream::connect(&addr).unwrap();
        stream.write_all(b"GET /hello HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("hello from server"));

        let req = requests.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.path, "/hello");
        server.stop();
    }

    #[test]
    fn rejects_request_missing_content_length_on_a_body_bearing_method() {
        let (server, addr, _requests) = spawn_server();
        let mut stream = TcpStream::connect(&addr).unwrap();
        stream.write_all(b"POST /submit HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 411"));
        server.stop();
    }

    #[test]
    fn pipelines_multiple_requests_on_one_connection() {
        let (server, addr, requests) = spawn_server();
        let mut stream = TcpStream::connect(&addr).unwrap();
        stream.write_all(b"GET /a HTTP/1.1\r\nHost: test\r\n\r\nGET /b HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

        let first = requests.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = requests.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.path, "/a");
        assert_eq!(second.path, "/b");
        server.stop();
    }

    #[test]
    fn decodes_chunked_request_body() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-chunked-test"));
        let (tx, rx) = channel();
        let server = HttpServer::new(runner, Arc::new(EchoHandler { requests: tx }));
        server.start("127.0.0.1:0", 16).unwrap();
        let addr = server.local_addr_string().unwrap();

        let mut stream = TcpStream::connect(&addr).unwrap();
        stream
            .write_all(
                b"POST /upload HTTP/1.1\r\nHost: test\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            )
            .unwrap();

        let req = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(req.body, b"hello");
        server.stop();
    }

    #[test]
    fn cors_preflight_is_handled_without_reaching_the_handler() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-cors-test"));
        let (tx, rx) = channel();
        let server = HttpServer::new(runner, Arc::new(EchoHandler { requests: tx }));
        server.add_allowed_origin("https://example.com");
        server.start("127.0.0.1:0", 16).unwrap();
        let addr = server.local_addr_string().unwrap();

        let mut stream = TcpStream::connect(&addr).unwrap();
        stream
            .write_all(
                b"OPTIONS /api HTTP/1.1\r\nHost: test\r\nOrigin: https://example.com\r\nAccess-Control-Request-Method: POST\r\n\r\n",
            )
            .unwrap();
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.starts_with("HTTP/1.1 204"));
        assert!(response.contains("Access-Control-Allow-Origin: https://example.com"));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        server.stop();
    }

    #[test]
    fn ordinary_response_echoes_allowed_origin() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-cors-echo-test"));
        let (tx, _rx) = channel();
        let server = HttpServer::new(runner, Arc::new(EchoHandler { requests: tx }));
        server.add_allowed_origin("https://example.com");
        server.start("127.0.0.1:0", 16).unwrap();
        let addr = server.local_addr_string().unwrap();

        let mut stream = TcpStream::connect(&addr).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nOrigin: https://example.com\r\n\r\n")
            .unwrap();
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.contains("Access-Control-Allow-Origin: https://example.com"));
        server.stop();
    }

    #[test]
    fn ordinary_response_omits_origin_header_when_not_allowed() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-cors-deny-test"));
        let (tx, _rx) = channel();
        let server = HttpServer::new(runner, Arc::new(EchoHandler { requests: tx }));
        server.add_allowed_origin("https://example.com");
        server.start("127.0.0.1:0", 16).unwrap();
        let addr = server.local_addr_string().unwrap();

        let mut stream = TcpStream::connect(&addr).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nOrigin: https://evil.example\r\n\r\n")
            .unwrap();
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(!response.contains("Access-Control-Allow-Origin"));
        server.stop();
    }
}
