//! The HTTP client (spec C10), grounded on
//! `examples/original_source/include/xtils/net/http_client.h`'s
//! `HttpClient`/`HttpRequest`/`HttpResponse`/`HttpClientEventListener`.
//!
//! The original's `SetVerifySSL`/`SetSSLCertificate` placeholders aren't
//! carried forward: this client speaks plain HTTP only, and a placeholder
//! that can never do anything is worse than no API at all. `https://`
//! URLs fail fast with a clear error instead of silently connecting
//! unencrypted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::sync::{Arc, Mutex, Weak};

use reactor_net::{SockFamily, SockType, Socket, SocketListener};
use reactor_runtime::TaskRunner;

use crate::common::{
    ChunkedOutcome, HttpHeaders, HttpMethod, HttpUrl, add_header, decode_chunked, find_double_crlf,
    form_data_encode, get_header_value, has_header, is_error_status, is_redirect_status, is_success_status,
};

const DEFAULT_TIMEOUT_MS: u32 = 30_000;
const DEFAULT_MAX_REDIRECTS: u32 = 5;
const DEFAULT_USER_AGENT: &str = "reactor-http/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    SendingRequest,
    ReceivingResponse,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
    pub timeout_ms: u32,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: &str) -> HttpRequest {
        HttpRequest { method, url: url.to_string(), headers: HttpHeaders::new(), body: Vec::new(), timeout_ms: DEFAULT_TIMEOUT_MS }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> HttpRequest {
        add_header(&mut self.headers, name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> HttpRequest {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> HttpRequest {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
    pub content_length: Option<usize>,
    pub chunked_encoding: bool,
}

impl HttpResponse {
    pub fn get_header(&self, name: &str) -> Option<&str> {
        get_header_value(&self.headers, name)
    }

    pub fn has_header(&self, name: &str) -> bool {
        has_header(&self.headers, name)
    }

    pub fn is_successful(&self) -> bool {
        is_success_status(self.status_code)
    }

    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status_code)
    }

    pub fn is_error(&self) -> bool {
        is_error_status(self.status_code)
    }
}

/// Mandatory `on_http_response`/`on_http_error`, matching the original's
/// pure-virtual methods; progress and redirect notifications default to
/// no-ops.
pub trait HttpClientListener: Send + Sync {
    fn on_http_response(&self, response: &HttpResponse);
    fn on_http_error(&self, error: &str);
    fn on_progress(&self, bytes_received: usize, total: Option<usize>) {
        let _ = (bytes_received, total);
    }
    fn on_redirect(&self, location: &str) {
        let _ = location;
    }
}

struct ClientConfig {
    default_headers: HttpHeaders,
    user_agent: String,
    timeout_ms: u32,
    follow_redirects: bool,
    max_redirects: u32,
    keep_alive: bool,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            default_headers: HttpHeaders::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            keep_alive: true,
        }
    }
}

struct CurrentRequest {
    original: HttpRequest,
    url: HttpUrl,
    listener: Arc<dyn HttpClientListener>,
    redirects_followed: u32,
}

struct Inner {
    runner: Arc<dyn TaskRunner>,
    config: Mutex<ClientConfig>,
    cookies: Mutex<HashMap<String, HashMap<String, String>>>,
    state: Mutex<ClientState>,
    socket: Mutex<Option<Socket>>,
    connected_host: Mutex<Option<(String, u16)>>,
    recv_buf: Mutex<Vec<u8>>,
    current: Mutex<Option<CurrentRequest>>,
    generation: AtomicU64,
    alive: Arc<AtomicBool>,
}

/// One outstanding request at a time (matching the original's `IsBusy()`
/// gate); issue a new request only after `on_http_response`/`on_http_error`
/// fires for the last one.
pub struct HttpClient {
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

impl HttpClient {
    pub fn new(runner: Arc<dyn TaskRunner>) -> HttpClient {
        HttpClient {
            inner: Arc::new(Inner {
                runner,
                config: Mutex::new(ClientConfig::default()),
                cookies: Mutex::new(HashMap::new()),
                state: Mutex::new(ClientState::Idle),
                socket: Mutex::new(None),
                connected_host: Mutex::new(None),
                recv_buf: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                generation: AtomicU64::new(0),
                alive: Arc::new(AtomicBool::new(true)),
            }),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.state(), ClientState::Connecting | ClientState::SendingRequest | ClientState::ReceivingResponse)
    }

    pub fn set_default_headers(&self, headers: HttpHeaders) {
        self.inner.config.lock().unwrap().default_headers = headers;
    }

    pub fn add_default_header(&self, name: &str, value: &str) {
        add_header(&mut self.inner.config.lock().unwrap().default_headers, name, value);
    }

    pub fn set_user_agent(&self, user_agent: &str) {
        self.inner.config.lock().unwrap().user_agent = user_agent.to_string();
    }

    pub fn set_timeout(&self, timeout_ms: u32) {
        self.inner.config.lock().unwrap().timeout_ms = timeout_ms;
    }

    pub fn set_follow_redirects(&self, follow: bool, max_redirects: u32) {
        let mut config = self.inner.config.lock().unwrap();
        config.follow_redirects = follow;
        config.max_redirects = max_redirects;
    }

    pub fn set_keep_alive(&self, keep_alive: bool) {
        self.inner.config.lock().unwrap().keep_alive = keep_alive;
    }

    pub fn set_cookie(&self, domain: &str, name: &str, value: &str) {
        self.inner.cookies.lock().unwrap().entry(domain.to_string()).or_default().insert(name.to_string(), value.to_string());
    }

    pub fn clear_cookies(&self) {
        self.inner.cookies.lock().unwrap().clear();
    }

    pub fn get_cookies(&self, domain: &str) -> HashMap<String, String> {
        self.inner.cookies.lock().unwrap().get(domain).cloned().unwrap_or_default()
    }

    pub fn get(&self, url: &str, listener: Arc<dyn HttpClientListener>) -> bool {
        self.request_async(HttpRequest::new(HttpMethod::Get, url), listener)
    }

    pub fn post(&self, url: &str, body: Vec<u8>, content_type: &str, listener: Arc<dyn HttpClientListener>) -> bool {
        let req = HttpRequest::new(HttpMethod::Post, url).with_header("Content-Type", content_type).with_body(body);
        self.request_async(req, listener)
    }

    pub fn post_json(&self, url: &str, json_body: &str, listener: Arc<dyn HttpClientListener>) -> bool {
        self.post(url, json_body.as_bytes().to_vec(), "application/json", listener)
    }

    pub fn post_form(&self, url: &str, form: &HashMap<String, String>, listener: Arc<dyn HttpClientListener>) -> bool {
        let encoded = form_data_encode(form);
        self.post(url, encoded.into_bytes(), "application/x-www-form-urlencoded", listener)
    }

    /// Issues `request`, returning `false` immediately (without touching
    /// state) if a request is already in flight or the URL can't be used.
    pub fn request_async(&self, request: HttpRequest, listener: Arc<dyn HttpClientListener>) -> bool {
        if self.is_busy() {
            return false;
        }
        let url = match HttpUrl::parse(&request.url) {
            Ok(u) if u.is_https() => {
                listener.on_http_error("https:// is not supported (TLS is out of scope)");
                return false;
            }
            Ok(u) => u,
            Err(e) => {
                listener.on_http_error(&e);
                return false;
            }
        };

        *self.inner.state.lock().unwrap() = ClientState::Connecting;
        self.inner.recv_buf.lock().unwrap().clear();
        let generation = self.inner.generation.fetch_add(1, SeqCst) + 1;
        *self.inner.current.lock().unwrap() = Some(CurrentRequest { original: request, url, listener, redirects_followed: 0 });

        arm_timeout(&self.inner, generation);
        dial_or_reuse(&self.inner);
        true
    }

    /// Aborts the in-flight request (if any); no listener callback fires.
    pub fn cancel(&self) {
        self.inner.generation.fetch_add(1, SeqCst);
        *self.inner.current.lock().unwrap() = None;
        if let Some(s) = self.inner.socket.lock().unwrap().take() {
            s.shutdown(false);
        }
        *self.inner.connected_host.lock().unwrap() = None;
        *self.inner.state.lock().unwrap() = ClientState::Idle;
    }
}

impl Drop for HttpClient {
    fn drop(&mut self) {
        self.inner.alive.store(false, SeqCst);
    }
}

fn arm_timeout(inner: &Arc<Inner>, generation: u64) {
    let timeout_ms = inner.config.lock().unwrap().timeout_ms;
    let weak = Arc::downgrade(inner);
    inner.runner.post_delayed_task(
        Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            if !inner.alive.load(SeqCst) || inner.generation.load(SeqCst) != generation {
                return;
            }
            handle_error(&inner, "request timed out");
        }),
        timeout_ms,
    );
}

fn dial_or_reuse(inner: &Arc<Inner>) {
    let (host, port) = {
        let current = inner.current.lock().unwrap();
        let Some(c) = current.as_ref() else { return };
        (c.url.host.clone(), c.url.port)
    };

    let reusable = {
        let connected = inner.connected_host.lock().unwrap();
        let socket_present = inner.socket.lock().unwrap().is_some();
        matches!(connected.as_ref(), Some((h, p)) if *h == host && *p == port) && socket_present
    };
    if reusable {
        *inner.state.lock().unwrap() = ClientState::SendingRequest;
        send_request(inner);
        return;
    }

    let addr = match resolve(&host, port) {
        Ok(a) => a,
        Err(e) => {
            handle_error(inner, &e);
            return;
        }
    };
    let family = if addr.contains(']') || addr.matches(':').count() > 1 { SockFamily::Inet6 } else { SockFamily::Inet };
    let bridge = Arc::new(SocketBridge { inner: Arc::downgrade(inner) });
    match Socket::connect(&addr, family, SockType::Stream, inner.runner.clone(), bridge) {
        Ok(socket) => {
            *inner.socket.lock().unwrap() = Some(socket);
            *inner.connected_host.lock().unwrap() = Some((host, port));
        }
        Err(e) => handle_error(inner, &e.to_string()),
    }
}

fn resolve(host: &str, port: u16) -> Result<String, String> {
    use std::net::ToSocketAddrs;
    (host, port).to_socket_addrs().map_err(|e| format!("failed to resolve {host}: {e}"))?.next().map(|a| a.to_string()).ok_or_else(|| format!("no addresses found for {host}"))
}

fn handle_connected(inner: &Arc<Inner>, connected: bool) {
    if !connected {
        handle_error(inner, "connection failed");
        return;
    }
    *inner.state.lock().unwrap() = ClientState::SendingRequest;
    send_request(inner);
}

fn send_request(inner: &Arc<Inner>) {
    let request_bytes = {
        let current = inner.current.lock().unwrap();
        let Some(c) = current.as_ref() else { return };
        let config = inner.config.lock().unwrap();
        build_request_bytes(&c.original, &c.url, &config, &inner.cookies.lock().unwrap())
    };
    let sent = inner.socket.lock().unwrap().as_ref().map(|s| s.send(&request_bytes)).unwrap_or(false);
    if !sent {
        handle_error(inner, "failed to send request");
        return;
    }
    *inner.state.lock().unwrap() = ClientState::ReceivingResponse;
}

/// Builds the request as raw bytes rather than a `String`: `req.body` is
/// arbitrary binary data (e.g. a JSON or form body is text, but callers are
/// free to `post` anything), and routing it through `String` would corrupt
/// non-UTF-8 bytes.
fn build_request_bytes(
    req: &HttpRequest,
    url: &HttpUrl,
    config: &ClientConfig,
    cookies: &HashMap<String, HashMap<String, String>>,
) -> Vec<u8> {
    let mut out = format!("{} {} HTTP/1.1\r\n", req.method.as_str(), url.path_and_query());
    if !has_header(&req.headers, "Host") {
        out.push_str(&format!("Host: {}\r\n", url.host));
    }
    if !has_header(&req.headers, "User-Agent") {
        out.push_str(&format!("User-Agent: {}\r\n", config.user_agent));
    }
    if !has_header(&req.headers, "Connection") {
        out.push_str(if config.keep_alive { "Connection: keep-alive\r\n" } else { "Connection: close\r\n" });
    }
    if !req.body.is_empty() && !has_header(&req.headers, "Content-Length") {
        out.push_str(&format!("Content-Length: {}\r\n", req.body.len()));
    }
    for h in &config.default_headers {
        if !has_header(&req.headers, &h.name) {
            out.push_str(&format!("{}: {}\r\n", h.name, h.value));
        }
    }
    for h in &req.headers {
        out.push_str(&format!("{}: {}\r\n", h.name, h.value));
    }
    if let Some(jar) = cookies.get(&url.host) {
        if !jar.is_empty() && !has_header(&req.headers, "Cookie") {
            let cookie_header = jar.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("; ");
            out.push_str(&format!("Cookie: {cookie_header}\r\n"));
        }
    }
    out.push_str("\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&req.body);
    bytes
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
    try_complete_response(inner);
}

fn try_complete_response(inner: &Arc<Inner>) {
    let recv_buf = inner.recv_buf.lock().unwrap();
    let Some(header_end) = find_double_crlf(&recv_buf) else { return };
    let header_text = match std::str::from_utf8(&recv_buf[..header_end]) {
        Ok(s) => s.to_string(),
        Err(_) => {
            drop(recv_buf);
            handle_error(inner, "response headers are not valid UTF-8");
            return;
        }
    };

    let mut lines = header_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let (Some(_version), Some(code_str), message) = (parts.next(), parts.next(), parts.next().unwrap_or("").to_string())
    else {
        drop(recv_buf);
        handle_error(inner, "malformed status line");
        return;
    };
    let Ok(status_code) = code_str.parse::<u16>() else {
        drop(recv_buf);
        handle_error(inner, "malformed status code");
        return;
    };

    let mut headers = HttpHeaders::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            add_header(&mut headers, name.trim(), value.trim());
        }
    }

    let chunked = get_header_value(&headers, "Transfer-Encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let content_length = get_header_value(&headers, "Content-Length").and_then(|v| v.trim().parse::<usize>().ok());
    let body_start = header_end + 4;

    let (body, total_consumed) = if chunked {
        match decode_chunked(&recv_buf[body_start..]) {
            ChunkedOutcome::Complete { body, consumed } => (body, body_start + consumed),
            ChunkedOutcome::Incomplete => return,
            ChunkedOutcome::Invalid(msg) => {
                drop(recv_buf);
                handle_error(inner, &msg);
                return;
            }
        }
    } else if let Some(len) = content_length {
        if recv_buf.len() < body_start + len {
            return;
        }
        (recv_buf[body_start..body_start + len].to_vec(), body_start + len)
    } else {
        // No framing header: the original reads until the peer closes the
        // connection. Treat a still-open socket as "more to come".
        if inner.socket.lock().unwrap().as_ref().map(|s| s.is_connected()).unwrap_or(false) {
            return;
        }
        (recv_buf[body_start..].to_vec(), recv_buf.len())
    };
    drop(recv_buf);

    inner.recv_buf.lock().unwrap().drain(..total_consumed);
    process_set_cookie_headers(inner, &headers);

    let keepalive_response = !get_header_value(&headers, "Connection").is_some_and(|v| v.eq_ignore_ascii_case("close"));
    if !keepalive_response {
        if let Some(s) = inner.socket.lock().unwrap().take() {
            s.shutdown(false);
        }
        *inner.connected_host.lock().unwrap() = None;
    }

    let response = HttpResponse { status_code, status_message: message, headers, body, content_length, chunked_encoding: chunked };

    if is_redirect_status(status_code) {
        if let Some(location) = response.get_header("Location").map(|l| l.to_string()) {
            if try_follow_redirect(inner, &location) {
                return;
            }
        }
    }

    complete_request(inner, response);
}

fn try_follow_redirect(inner: &Arc<Inner>, location: &str) -> bool {
    let follow = inner.config.lock().unwrap().follow_redirects;
    if !follow {
        return false;
    }

    let mut current = inner.current.lock().unwrap();
    let Some(c) = current.as_mut() else { return false };
    let max_redirects = inner.config.lock().unwrap().max_redirects;
    if c.redirects_followed >= max_redirects {
        return false;
    }

    let next_url = if location.starts_with("http://") || location.starts_with("https://") {
        match HttpUrl::parse(location) {
            Ok(u) => u,
            Err(_) => return false,
        }
    } else if let Some(path) = location.strip_prefix('/') {
        let mut base = c.url.base();
        base.path = format!("/{path}");
        base
    } else {
        return false;
    };
    if next_url.is_https() {
        return false;
    }

    c.listener.on_redirect(location);
    c.redirects_followed += 1;
    let same_host = c.url.is_same_host(&next_url);
    c.url = next_url;
    drop(current);

    *inner.state.lock().unwrap() = ClientState::Connecting;
    if same_host && inner.socket.lock().unwrap().is_some() {
        *inner.state.lock().unwrap() = ClientState::SendingRequest;
        send_request(inner);
    } else {
        if let Some(s) = inner.socket.lock().unwrap().take() {
            s.shutdown(false);
        }
        *inner.connected_host.lock().unwrap() = None;
        dial_or_reuse(inner);
    }
    true
}

fn process_set_cookie_headers(inner: &Arc<Inner>, headers: &HttpHeaders) {
    let host = {
        let current = inner.current.lock().unwrap();
        match current.as_ref() {
            Some(c) => c.url.host.clone(),
            None => return,
        }
    };
    let mut cookies = inner.cookies.lock().unwrap();
    let jar = cookies.entry(host).or_default();
    for h in headers {
        if !h.name.eq_ignore_ascii_case("Set-Cookie") {
            continue;
        }
        let pair = h.value.split(';').next().unwrap_or("");
        if let Some((name, value)) = pair.split_once('=') {
            jar.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
}

fn complete_request(inner: &Arc<Inner>, response: HttpResponse) {
    inner.generation.fetch_add(1, SeqCst);
    *inner.state.lock().unwrap() = ClientState::Completed;
    let current = inner.current.lock().unwrap().take();
    if let Some(c) = current {
        c.listener.on_http_response(&response);
    }
}

fn handle_error(inner: &Arc<Inner>, error: &str) {
    inner.generation.fetch_add(1, SeqCst);
    *inner.state.lock().unwrap() = ClientState::Error;
    if let Some(s) = inner.socket.lock().unwrap().take() {
        s.shutdown(false);
    }
    *inner.connected_host.lock().unwrap() = None;
    let current = inner.current.lock().unwrap().take();
    if let Some(c) = current {
        c.listener.on_http_error(error);
    }
}

fn handle_disconnected(inner: &Arc<Inner>) {
    *inner.connected_host.lock().unwrap() = None;
    if matches!(*inner.state.lock().unwrap(), ClientState::ReceivingResponse) {
        // The peer may have closed deliberately right after a
        // framing-less body (no Content-Length, no chunking); give the
        // parser one more look before calling it an error.
        try_complete_response(inner);
        if matches!(*inner.state.lock().unwrap(), ClientState::ReceivingResponse) {
            handle_error(inner, "connection closed before response completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_runtime::ThreadTaskRunner;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc::{Sender, channel};
    use std::time::Duration;

    struct CapturingListener {
        responses: Sender<HttpResponse>,
        errors: Sender<String>,
    }

    impl HttpClientListener for CapturingListener {
        fn on_http_response(&self, response: &HttpResponse) {
            let _ = self.responses.send(response.clone());
        }
        fn on_http_error(&self, error: &str) {
            let _ = self.errors.send(error.to_string());
        }
    }

    fn spawn_plain_server(response: &'static str) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(response.as_bytes()).unwrap();
        });
        (addr, handle)
    }

    #[test]
    fn gets_a_simple_response() {
        let (addr, server) =
            spawn_plain_server("HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello");
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-client-test"));
        let client = HttpClient::new(runner);
        let (tx, rx) = channel();
        let (etx, _erx) = channel();
        let listener = Arc::new(CapturingListener { responses: tx, errors: etx });
        assert!(client.get(&format!("http://{addr}/"), listener));

        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"hello");
        server.join().unwrap();
    }

    #[test]
    fn decodes_chunked_response() {
        let (addr, server) = spawn_plain_server(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-client-chunked-test"));
        let client = HttpClient::new(runner);
        let (tx, rx) = channel();
        let (etx, _erx) = channel();
        let listener = Arc::new(CapturingListener { responses: tx, errors: etx });
        assert!(client.get(&format!("http://{addr}/"), listener));

        let response = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(response.body, b"hello");
        assert!(response.chunked_encoding);
        server.join().unwrap();
    }

    #[test]
    fn rejects_https_up_front() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-client-https-test"));
        let client = HttpClient::new(runner);
        let (tx, _rx) = channel();
        let (etx, erx) = channel();
        let listener = Arc::new(CapturingListener { responses: tx, errors: etx });
        assert!(!client.get("https://example.com/", listener));
        let error = erx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(error.contains("TLS"));
    }

    #[test]
    fn a_second_request_is_refused_while_busy() {
        let (addr, server) = spawn_plain_server("HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-client-busy-test"));
        let client = HttpClient::new(runner);
        let (tx, rx) = channel();
        let (etx, _erx) = channel();
        let listener = Arc::new(CapturingListener { responses: tx, errors: etx });
        assert!(client.get(&format!("http://{addr}/"), listener.clone()));
        assert!(!client.get(&format!("http://{addr}/"), listener));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn parses_and_round_trips_cookies() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("http-client-cookie-test"));
        let client = HttpClient::new(runner);
        client.set_cookie("example.com", "session", "abc123");
        let cookies = client.get_cookies("example.com");
        assert_eq!(cookies.get("session"), Some(&"abc123".to_string()));
    }
}
