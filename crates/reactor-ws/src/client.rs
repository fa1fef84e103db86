//! WebSocket client (spec C11), grounded on
//! `examples/original_source/include/xtils/net/websocket_client.h`'s
//! `WebSocketClient`. Connects over a [`reactor_net::Socket`] directly
//! (rather than routing through an HTTP client) and speaks the upgrade
//! handshake and frame protocol itself, matching the original's use of a
//! bare `TcpClient` rather than `HttpClient`.
//!
//! The original's `ping_timer_id_` is a `Timer` handle; here a single
//! `AtomicBool` "ping generation is still current" flag does the same job
//! without pulling a full `Timer`/`TaskGroup` into this crate's API for one
//! periodic callback — the self-rescheduling closure checks the flag
//! before each reschedule, the same cancellation-flag idiom used by the
//! socket adapter.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex, Weak};

use reactor_common::encoding::{base64_encode, websocket_accept};
use reactor_net::{SockFamily, SockType, Socket, SocketListener};
use reactor_runtime::TaskRunner;

use crate::frame::{CloseCode, Opcode, build_frame, parse_frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Clone)]
pub struct WebSocketMessage {
    pub data: Vec<u8>,
    pub is_text: bool,
}

/// Mandatory callbacks have no default body (the original declares them
/// pure-virtual); `on_ping`/`on_pong` default to no-ops, matching the
/// original's optional overrides.
pub trait WebSocketClientListener: Send + Sync {
    fn on_connected(&self);
    fn on_message(&self, message: &WebSocketMessage);
    fn on_closed(&self, code: u16, reason: &str);
    fn on_error(&self, error: &str);
    fn on_ping(&self, data: &[u8]) {
        let _ = data;
    }
    fn on_pong(&self, data: &[u8]) {
        let _ = data;
    }
}

const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 20;

struct Fragmented {
    opcode: Opcode,
    buffer: Vec<u8>,
}

struct Inner {
    runner: Arc<dyn TaskRunner>,
    listener: Arc<dyn WebSocketClientListener>,
    socket: Mutex<Option<Socket>>,
    state: Mutex<WsState>,
    url: String,
    path: String,
    host: String,
    port: u16,
    extra_headers: Vec<(String, String)>,
    requested_protocols: Vec<String>,
    selected_protocol: Mutex<Option<String>>,
    key: String,
    recv_buf: Mutex<Vec<u8>>,
    fragmented: Mutex<Option<Fragmented>>,
    max_message_size: AtomicUsize,
    ping_interval_ms: AtomicU32,
    ping_active: Arc<AtomicBool>,
    auto_reconnect_delay_ms: Mutex<Option<u32>>,
    close_sent: AtomicBool,
    user_initiated_close: AtomicBool,
    alive: Arc<AtomicBool>,
}

/// A WebSocket client bound to one event-loop-capable [`TaskRunner`].
pub struct WebSocketClient {
    inner: Arc<Inner>,
}

struct SocketBridge {
    inner: Weak<Inner>,
}

impl SocketListener for SocketBridge {
    fn on_connect(&self, connected: bool) {
        if let Some(inner) = self.inner.upgrade() {
            handle_connected(&inner, connected);
        }
    }
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

impl WebSocketClient {
    /// Parses `url` (`ws://host[:port]/path`) and connects. Returns `false`
    /// immediately for an unparseable URL or unsupported scheme (`wss://`:
    /// TLS is out of scope); connection outcome past that point is reported
    /// asynchronously via the listener.
    pub fn connect(
        url: &str,
        extra_headers: Vec<(String, String)>,
        requested_protocols: Vec<String>,
        runner: Arc<dyn TaskRunner>,
        listener: Arc<dyn WebSocketClientListener>,
    ) -> Option<WebSocketClient> {
        let parsed = match parse_ws_url(url) {
            Ok(p) => p,
            Err(e) => {
                listener.on_error(&e);
                return None;
            }
        };
        if parsed.secure {
            listener.on_error("wss:// is not supported (TLS is out of scope)");
            return None;
        }

        let mut key_bytes = [0u8; 16];
        for b in &mut key_bytes {
            *b = fastrand::u8(..);
        }
        let key = base64_encode(&key_bytes);

        let inner = Arc::new(Inner {
            runner: runner.clone(),
            listener,
            socket: Mutex::new(None),
            state: Mutex::new(WsState::Connecting),
            url: url.to_string(),
            path: parsed.path,
            host: parsed.host.clone(),
            port: parsed.port,
            extra_headers,
            requested_protocols,
            selected_protocol: Mutex::new(None),
            key,
            recv_buf: Mutex::new(Vec::new()),
            fragmented: Mutex::new(None),
            max_message_size: AtomicUsize::new(DEFAULT_MAX_MESSAGE_SIZE),
            ping_interval_ms: AtomicU32::new(0),
            ping_active: Arc::new(AtomicBool::new(false)),
            auto_reconnect_delay_ms: Mutex::new(None),
            close_sent: AtomicBool::new(false),
            user_initiated_close: AtomicBool::new(false),
            alive: Arc::new(AtomicBool::new(true)),
        });

        if !dial(&inner) {
            return None;
        }
        Some(WebSocketClient { inner })
    }

    pub fn state(&self) -> WsState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == WsState::Connected
    }

    pub fn selected_protocol(&self) -> Option<String> {
        self.inner.selected_protocol.lock().unwrap().clone()
    }

    pub fn set_max_message_size(&self, max_size: usize) {
        self.inner.max_message_size.store(max_size, SeqCst);
    }

    pub fn set_ping_interval(&self, interval_ms: u32) {
        self.inner.ping_interval_ms.store(interval_ms, SeqCst);
        if interval_ms > 0 && self.is_connected() {
            start_ping_timer(&self.inner);
        }
    }

    pub fn set_auto_reconnect(&self, enable: bool, delay_ms: u32) {
        *self.inner.auto_reconnect_delay_ms.lock().unwrap() = if enable { Some(delay_ms) } else { None };
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.send_frame(Opcode::Text, text.as_bytes())
    }

    pub fn send_binary(&self, data: &[u8]) -> bool {
        self.send_frame(Opcode::Binary, data)
    }

    pub fn send_message(&self, message: &WebSocketMessage) -> bool {
        let opcode = if message.is_text { Opcode::Text } else { Opcode::Binary };
        self.send_frame(opcode, &message.data)
    }

    pub fn send_ping(&self, data: &[u8]) -> bool {
        self.send_frame(Opcode::Ping, data)
    }

    pub fn send_pong(&self, data: &[u8]) -> bool {
        self.send_frame(Opcode::Pong, data)
    }

    /// Sends a close frame (unless one was already sent) and shuts the
    /// connection down; `on_closed` is fired once the server's close
    /// acknowledgement arrives or the connection drops.
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.user_initiated_close.store(true, SeqCst);
        if !self.inner.close_sent.swap(true, SeqCst) {
            let mut payload = code.to_be_bytes().to_vec();
            payload.extend_from_slice(reason.as_bytes());
            self.send_frame(Opcode::Close, &payload);
        }
        *self.inner.state.lock().unwrap() = WsState::Closing;
    }

    pub fn disconnect(&self) {
        self.close(CloseCode::Normal as u16, "");
    }

    fn send_frame(&self, opcode: Opcode, payload: &[u8]) -> bool {
        if !matches!(*self.inner.state.lock().unwrap(), WsState::Connected | WsState::Closing) {
            return false;
        }
        let mask = [fastrand::u8(..), fastrand::u8(..), fastrand::u8(..), fastrand::u8(..)];
        let frame = build_frame(opcode, payload, true, Some(mask));
        match self.inner.socket.lock().unwrap().as_ref() {
            Some(sock) => sock.send(&frame),
            None => false,
        }
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.ping_active.store(false, SeqCst);
    }
}

fn dial(inner: &Arc<Inner>) -> bool {
    let addr = match resolve(&inner.host, inner.port) {
        Ok(a) => a,
        Err(e) => {
            inner.listener.on_error(&e);
            *inner.state.lock().unwrap() = WsState::Error;
            return false;
        }
    };
    let family = if addr.contains(']') || addr.matches(':').count() > 1 { SockFamily::Inet6 } else { SockFamily::Inet };
    let bridge = Arc::new(SocketBridge { inner: Arc::downgrade(inner) });
    match Socket::connect(&addr, family, SockType::Stream, inner.runner.clone(), bridge) {
        Ok(socket) => {
            *inner.socket.lock().unwrap() = Some(socket);
            true
        }
        Err(e) => {
            inner.listener.on_error(&e.to_string());
            *inner.state.lock().unwrap() = WsState::Error;
            false
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<String, String> {
    use std::net::ToSocketAddrs;
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("failed to resolve {host}: {e}"))?
        .next()
        .map(|a| a.to_string())
        .ok_or_else(|| format!("no addresses found for {host}"))
}

fn handle_connected(inner: &Arc<Inner>, connected: bool) {
    if !connected {
        *inner.state.lock().unwrap() = WsState::Error;
        inner.listener.on_error("connection failed");
        maybe_reconnect(inner);
        return;
    }
    *inner.state.lock().unwrap() = WsState::Handshaking;
    let request = build_handshake_request(inner);
    let sent = inner.socket.lock().unwrap().as_ref().map(|s| s.send(request.as_bytes())).unwrap_or(false);
    if !sent {
        inner.listener.on_error("failed to send handshake request");
        *inner.state.lock().unwrap() = WsState::Error;
    }
}

fn build_handshake_request(inner: &Arc<Inner>) -> String {
    let mut req = format!(
        "GET {} HTTP/1.1\r\nHost: {}:{}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        inner.path, inner.host, inner.port, inner.key
    );
    if !inner.requested_protocols.is_empty() {
        req.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", inner.requested_protocols.join(", ")));
    }
    for (name, value) in &inner.extra_headers {
        req.push_str(&format!("{name}: {value}\r\n"));
    }
    req.push_str("\r\n");
    req
}

fn handle_data_available(inner: &Arc<Inner>) {
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = inner.socket.lock().unwrap().as_ref().map(|s| s.receive(&mut buf)).unwrap_or(0);
        if n == 0 {
            break;
        }
        inner.recv_buf.lock().unwrap().extend_from_slice(&buf[..n]);
    }

    let state = *inner.state.lock().unwrap();
    if state == WsState::Handshaking {
        if !try_complete_handshake(inner) {
            return;
        }
    }
    process_frames(inner);
}

fn try_complete_handshake(inner: &Arc<Inner>) -> bool {
    let header_end = {
        let buf = inner.recv_buf.lock().unwrap();
        find_subsequence(&buf, b"\r\n\r\n")
    };
    let Some(end) = header_end else { return false };

    let header_text = {
        let mut buf = inner.recv_buf.lock().unwrap();
        let text = String::from_utf8_lossy(&buf[..end]).to_string();
        buf.drain(..end + 4);
        text
    };

    match validate_handshake_response(inner, &header_text) {
        Ok(protocol) => {
            *inner.selected_protocol.lock().unwrap() = protocol;
            *inner.state.lock().unwrap() = WsState::Connected;
            inner.listener.on_connected();
            if inner.ping_interval_ms.load(SeqCst) > 0 {
                start_ping_timer(inner);
            }
            true
        }
        Err(e) => {
            inner.listener.on_error(&e);
            *inner.state.lock().unwrap() = WsState::Error;
            if let Some(s) = inner.socket.lock().unwrap().as_ref() {
                s.shutdown(false);
            }
            false
        }
    }
}

fn validate_handshake_response(inner: &Arc<Inner>, header_text: &str) -> Result<Option<String>, String> {
    let mut lines = header_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    if !status_line.contains("101") {
        return Err(format!("unexpected handshake status line: {status_line}"));
    }

    let mut upgrade_ok = false;
    let mut connection_ok = false;
    let mut accept_ok = false;
    let mut protocol = None;
    let expected_accept = websocket_accept(&inner.key);

    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "upgrade" => upgrade_ok = value.eq_ignore_ascii_case("websocket"),
            "connection" => connection_ok = value.to_ascii_lowercase().contains("upgrade"),
            "sec-websocket-accept" => accept_ok = value == expected_accept,
            "sec-websocket-protocol" => {
                if !inner.requested_protocols.iter().any(|p| p == value) {
                    return Err(format!("server selected unrequested protocol {value}"));
                }
                protocol = Some(value.to_string());
            }
            _ => {}
        }
    }

    if !upgrade_ok || !connection_ok || !accept_ok {
        return Err("invalid WebSocket handshake response".to_string());
    }
    Ok(protocol)
}

fn process_frames(inner: &Arc<Inner>) {
    loop {
        let parsed = {
            let buf = inner.recv_buf.lock().unwrap();
            parse_frame(&buf, inner.max_message_size.load(SeqCst))
        };
        let (frame, consumed) = match parsed {
            Ok(Some(pair)) => pair,
            Ok(None) => return,
            Err(e) => {
                inner.listener.on_error(&e.to_string());
                close_with_protocol_error(inner);
                return;
            }
        };
        inner.recv_buf.lock().unwrap().drain(..consumed);

        if frame.masked {
            inner.listener.on_error("server frame was masked (protocol violation)");
            close_with_protocol_error(inner);
            return;
        }

        match frame.opcode {
            Opcode::Text | Opcode::Binary => handle_data_frame(inner, frame.opcode, frame.fin, frame.payload),
            Opcode::Continuation => handle_continuation(inner, frame.fin, frame.payload),
            Opcode::Ping => {
                inner.listener.on_ping(&frame.payload);
                if let Some(s) = inner.socket.lock().unwrap().as_ref() {
                    let pong = build_frame(Opcode::Pong, &frame.payload, true, Some(random_mask()));
                    s.send(&pong);
                }
            }
            Opcode::Pong => inner.listener.on_pong(&frame.payload),
            Opcode::Close => handle_close_frame(inner, &frame.payload),
        }
    }
}

fn handle_data_frame(inner: &Arc<Inner>, opcode: Opcode, fin: bool, payload: Vec<u8>) {
    if inner.fragmented.lock().unwrap().is_some() {
        inner.listener.on_error("new data frame before previous fragmented message completed");
        close_with_protocol_error(inner);
        return;
    }
    if fin {
        deliver_message(inner, opcode, payload);
    } else {
        *inner.fragmented.lock().unwrap() = Some(Fragmented { opcode, buffer: payload });
    }
}

fn handle_continuation(inner: &Arc<Inner>, fin: bool, payload: Vec<u8>) {
    let mut fragmented = inner.fragmented.lock().unwrap();
    let Some(frag) = fragmented.as_mut() else {
        inner.listener.on_error("continuation frame with no fragmentation in progress");
        return;
    };
    frag.buffer.extend_from_slice(&payload);
    if fin {
        let Fragmented { opcode, buffer } = fragmented.take().unwrap();
        drop(fragmented);
        deliver_message(inner, opcode, buffer);
    }
}

fn deliver_message(inner: &Arc<Inner>, opcode: Opcode, data: Vec<u8>) {
    let message = WebSocketMessage { data, is_text: opcode == Opcode::Text };
    inner.listener.on_message(&message);
}

fn handle_close_frame(inner: &Arc<Inner>, payload: &[u8]) {
    let code = if payload.len() >= 2 {
        u16::from_be_bytes([payload[0], payload[1]])
    } else {
        CloseCode::NoStatusReceived as u16
    };
    let reason = if payload.len() > 2 { String::from_utf8_lossy(&payload[2..]).to_string() } else { String::new() };

    if !inner.close_sent.swap(true, SeqCst) {
        if let Some(s) = inner.socket.lock().unwrap().as_ref() {
            let echo = build_frame(Opcode::Close, payload, true, Some(random_mask()));
            s.send(&echo);
        }
    }
    *inner.state.lock().unwrap() = WsState::Closed;
    inner.listener.on_closed(code, &reason);
    if let Some(s) = inner.socket.lock().unwrap().as_ref() {
        s.shutdown(false);
    }
}

fn close_with_protocol_error(inner: &Arc<Inner>) {
    if let Some(s) = inner.socket.lock().unwrap().as_ref() {
        s.shutdown(true);
    }
    *inner.state.lock().unwrap() = WsState::Error;
}

fn handle_disconnected(inner: &Arc<Inner>) {
    let was_closed_cleanly = *inner.state.lock().unwrap() == WsState::Closed;
    *inner.state.lock().unwrap() = WsState::Closed;
    if !was_closed_cleanly {
        inner.listener.on_closed(CloseCode::AbnormalClosure as u16, "connection lost");
    }
    maybe_reconnect(inner);
}

fn maybe_reconnect(inner: &Arc<Inner>) {
    if inner.user_initiated_close.load(SeqCst) {
        return;
    }
    let Some(delay_ms) = *inner.auto_reconnect_delay_ms.lock().unwrap() else { return };
    if !inner.alive.load(SeqCst) {
        return;
    }
    let inner = inner.clone();
    inner.runner.post_delayed_task(
        Box::new(move || {
            if inner.alive.load(SeqCst) {
                *inner.state.lock().unwrap() = WsState::Connecting;
                inner.recv_buf.lock().unwrap().clear();
                inner.close_sent.store(false, SeqCst);
                dial(&inner);
            }
        }),
        delay_ms,
    );
}

fn start_ping_timer(inner: &Arc<Inner>) {
    if inner.ping_active.swap(true, SeqCst) {
        return;
    }
    schedule_ping(inner.clone());
}

fn schedule_ping(inner: Arc<Inner>) {
    let interval = inner.ping_interval_ms.load(SeqCst);
    if interval == 0 {
        inner.ping_active.store(false, SeqCst);
        return;
    }
    let active = inner.ping_active.clone();
    let alive = inner.alive.clone();
    inner.runner.post_delayed_task(
        Box::new(move || {
            if !alive.load(SeqCst) || !active.load(SeqCst) {
                return;
            }
            if *inner.state.lock().unwrap() == WsState::Connected {
                if let Some(s) = inner.socket.lock().unwrap().as_ref() {
                    let ping = build_frame(Opcode::Ping, &[], true, Some(random_mask()));
                    s.send(&ping);
                }
                schedule_ping(inner);
            } else {
                active.store(false, SeqCst);
            }
        }),
        interval,
    );
}

fn random_mask() -> [u8; 4] {
    [fastrand::u8(..), fastrand::u8(..), fastrand::u8(..), fastrand::u8(..)]
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

struct WsUrl {
    host: String,
    port: u16,
    path: String,
    secure: bool,
}

fn parse_ws_url(url: &str) -> Result<WsUrl, String> {
    let (secure, rest) = if let Some(r) = url.strip_prefix("wss://") {
        (true, r)
    } else if let Some(r) = url.strip_prefix("ws://") {
        (false, r)
    } else {
        return Err(format!("unsupported scheme in {url}"));
    };

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, "/".to_string()),
    };
    if authority.is_empty() {
        return Err(format!("missing host in {url}"));
    }

    let (host, port) = match authority.rfind(':') {
        Some(i) => {
            let port: u16 = authority[i + 1..].parse().map_err(|_| format!("bad port in {url}"))?;
            (authority[..i].to_string(), port)
        }
        None => (authority.to_string(), if secure { 443 } else { 80 }),
    };

    Ok(WsUrl { host, port, path, secure })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ws_url_with_explicit_port_and_path() {
        let parsed = parse_ws_url("ws://example.com:9001/chat").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 9001);
        assert_eq!(parsed.path, "/chat");
        assert!(!parsed.secure);
    }

    #[test]
    fn defaults_port_and_path() {
        let parsed = parse_ws_url("ws://example.com").unwrap();
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path, "/");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_ws_url("http://example.com").is_err());
    }

    #[test]
    fn wss_is_rejected_up_front() {
        use reactor_runtime::ThreadTaskRunner;
        use std::sync::mpsc::channel;

        struct ErrorCapture(std::sync::mpsc::Sender<String>);
        impl WebSocketClientListener for ErrorCapture {
            fn on_connected(&self) {}
            fn on_message(&self, _message: &WebSocketMessage) {}
            fn on_closed(&self, _code: u16, _reason: &str) {}
            fn on_error(&self, error: &str) {
                let _ = self.0.send(error.to_string());
            }
        }

        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("ws-wss-test"));
        let (tx, rx) = channel();
        let client = WebSocketClient::connect("wss://example.com/", Vec::new(), Vec::new(), runner, Arc::new(ErrorCapture(tx)));
        assert!(client.is_none());
        let error = rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap();
        assert!(error.contains("TLS"));
    }

    #[test]
    fn handshake_and_echo_round_trip_over_a_plain_tcp_server() {
        use reactor_common::encoding::websocket_accept;
        use reactor_runtime::ThreadTaskRunner;
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::sync::Mutex as StdMutex;
        use std::sync::mpsc::channel;

        struct CollectingListener {
            connected: std::sync::mpsc::Sender<()>,
            messages: StdMutex<Vec<WebSocketMessage>>,
            received: std::sync::mpsc::Sender<()>,
        }
        impl WebSocketClientListener for CollectingListener {
            fn on_connected(&self) {
                let _ = self.connected.send(());
            }
            fn on_message(&self, message: &WebSocketMessage) {
                self.messages.lock().unwrap().push(message.clone());
                let _ = self.received.send(());
            }
            fn on_closed(&self, _code: u16, _reason: &str) {}
            fn on_error(&self, _error: &str) {}
        }

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                if find_subsequence(&request, b"\r\n\r\n").is_some() {
                    break;
                }
            }
            let text = String::from_utf8_lossy(&request);
            let key_line = text.lines().find(|l| l.to_ascii_lowercase().starts_with("sec-websocket-key")).unwrap();
            let key = key_line.split_once(':').unwrap().1.trim();
            let accept = websocket_accept(key);
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
            );
            stream.write_all(response.as_bytes()).unwrap();

            let frame = build_frame(Opcode::Text, b"hello from server", true, None);
            stream.write_all(&frame).unwrap();
        });

        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("ws-echo-test"));
        let (connected_tx, connected_rx) = channel();
        let (received_tx, received_rx) = channel();
        let listener = Arc::new(CollectingListener {
            connected: connected_tx,
            messages: StdMutex::new(Vec::new()),
            received: received_tx,
        });
        let client = WebSocketClient::connect(&format!("ws://{addr}/"), Vec::new(), Vec::new(), runner, listener.clone())
            .expect("connect should succeed");

        connected_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        received_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(listener.messages.lock().unwrap()[0].data, b"hello from server");
        assert!(client.is_connected());
        server.join().unwrap();
    }
}
