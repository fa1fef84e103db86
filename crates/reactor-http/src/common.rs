//! Shared HTTP vocabulary (spec §6 "HTTP/1.1 wire format"), grounded on
//! `examples/original_source/include/xtils/net/http_common.h`.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Trace,
    Connect,
    /// Matches any method; used by routing layers, never produced by the
    /// parser.
    Any,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Any => "*",
        }
    }

    pub fn from_str(s: &str) -> Option<HttpMethod> {
        match s {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            "PATCH" => Some(HttpMethod::Patch),
            "TRACE" => Some(HttpMethod::Trace),
            "CONNECT" => Some(HttpMethod::Connect),
            _ => None,
        }
    }

    /// Methods whose requests carry a body and therefore require
    /// `Content-Length` before the server will dispatch them.
    pub fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

#[derive(Debug, Clone)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

pub type HttpHeaders = Vec<HttpHeader>;

pub mod status {
    pub const OK: u16 = 200;
    pub const CREATED: u16 = 201;
    pub const NO_CONTENT: u16 = 204;
    pub const SWITCHING_PROTOCOLS: u16 = 101;
    pub const MOVED_PERMANENTLY: u16 = 301;
    pub const FOUND: u16 = 302;
    pub const NOT_MODIFIED: u16 = 304;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const LENGTH_REQUIRED: u16 = 411;
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: u16 = 431;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const BAD_GATEWAY: u16 = 502;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

pub fn status_message(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        101 => "Switching Protocols",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        411 => "Length Required",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

pub fn is_success_status(code: u16) -> bool {
    (200..300).contains(&code)
}

pub fn is_redirect_status(code: u16) -> bool {
    (300..400).contains(&code)
}

pub fn is_error_status(code: u16) -> bool {
    code >= 400
}

pub fn get_header_value<'a>(headers: &'a [HttpHeader], name: &str) -> Option<&'a str> {
    headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)).map(|h| h.value.as_str())
}

pub fn has_header(headers: &[HttpHeader], name: &str) -> bool {
    headers.iter().any(|h| h.name.eq_ignore_ascii_case(name))
}

pub fn add_header(headers: &mut HttpHeaders, name: &str, value: &str) {
    headers.push(HttpHeader { name: name.to_string(), value: value.to_string() });
}

/// A parsed `http(s)://host[:port]/path?query#fragment` URL, grounded on
/// `HttpUrl` in the original; backed by the `url` crate for the actual
/// parsing work.
#[derive(Debug, Clone)]
pub struct HttpUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl HttpUrl {
    pub fn parse(raw: &str) -> Result<HttpUrl, String> {
        let parsed = url::Url::parse(raw).map_err(|e| format!("invalid URL {raw}: {e}"))?;
        let scheme = parsed.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(format!("unsupported scheme {scheme} in {raw}"));
        }
        let host = parsed.host_str().ok_or_else(|| format!("missing host in {raw}"))?.to_string();
        let port = parsed.port().unwrap_or_else(|| if scheme == "https" { 443 } else { 80 });
        let path = if parsed.path().is_empty() { "/".to_string() } else { parsed.path().to_string() };
        let query = parsed.query().unwrap_or("").to_string();
        let fragment = parsed.fragment().unwrap_or("").to_string();
        Ok(HttpUrl { scheme, host, port, path, query, fragment })
    }

    pub fn default_port(&self) -> u16 {
        if self.is_https() { 443 } else { 80 }
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && !self.scheme.is_empty()
    }

    /// The origin of this URL, with the path reset to `/` and no
    /// query/fragment — used to resolve root-relative redirect targets.
    pub fn base(&self) -> HttpUrl {
        HttpUrl { path: "/".to_string(), query: String::new(), fragment: String::new(), ..self.clone() }
    }

    pub fn is_same_host(&self, other: &HttpUrl) -> bool {
        self.host == other.host && self.port == other.port
    }

    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() { self.path.clone() } else { format!("{}?{}", self.path, self.query) }
    }

    pub fn to_string(&self) -> String {
        let mut s = format!("{}://{}", self.scheme, self.host);
        if self.port != self.default_port() {
            s.push_str(&format!(":{}", self.port));
        }
        s.push_str(&self.path_and_query());
        if !self.fragment.is_empty() {
            s.push_str(&format!("#{}", self.fragment));
        }
        s
    }
}

pub fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&input[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

pub fn form_data_encode(data: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = data.iter().map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v))).collect();
    pairs.sort();
    pairs.join("&")
}

pub fn parse_form_data(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((url_decode(k), url_decode(v)))
        })
        .collect()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Result of attempting to decode one `Transfer-Encoding: chunked` body out
/// of a byte buffer that starts right after the header block's blank line.
/// Shared by the server (request bodies) and client (response bodies) so
/// both run the real incremental state machine described in spec rather
/// than a substring search for a terminating `"0\r\n\r\n"` marker, which
/// falsely matches on a chunk size of `"0"` appearing inside chunk *data*.
pub enum ChunkedOutcome {
    /// Not enough bytes buffered yet to finish decoding.
    Incomplete,
    /// Fully decoded; `consumed` counts bytes of chunk framing (not
    /// counting whatever preceded it in the caller's buffer).
    Complete { body: Vec<u8>, consumed: usize },
    Invalid(String),
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Finds the blank line terminating an HTTP header block. Shared by the
/// server's request parser and the client's response parser.
pub fn find_double_crlf(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

pub fn decode_chunked(buf: &[u8]) -> ChunkedOutcome {
    let mut pos = 0usize;
    let mut body = Vec::new();
    loop {
        let Some(line_len) = find_crlf(&buf[pos..]) else { return ChunkedOutcome::Incomplete };
        let size_str = match std::str::from_utf8(&buf[pos..pos + line_len]) {
            Ok(s) => s.split(';').next().unwrap_or("").trim(),
            Err(_) => return ChunkedOutcome::Invalid("chunk size line is not valid UTF-8".to_string()),
        };
        let size = match usize::from_str_radix(size_str, 16) {
            Ok(s) => s,
            Err(_) => return ChunkedOutcome::Invalid(format!("invalid chunk size {size_str:?}")),
        };
        let chunk_start = pos + line_len + 2;

        if size == 0 {
            let mut trailer_pos = chunk_start;
            loop {
                let Some(trailer_line_len) = find_crlf(&buf[trailer_pos..]) else {
                    return ChunkedOutcome::Incomplete;
                };
                if trailer_line_len == 0 {
                    return ChunkedOutcome::Complete { body, consumed: trailer_pos + 2 };
                }
                trailer_pos += trailer_line_len + 2;
            }
        }

        let chunk_end = chunk_start + size;
        if buf.len() < chunk_end + 2 {
            return ChunkedOutcome::Incomplete;
        }
        body.extend_from_slice(&buf[chunk_start..chunk_end]);
        pos = chunk_end + 2;
    }
}

pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_url_with_default_port() {
        let url = HttpUrl::parse("http://example.com/a/b?x=1#frag").unwrap();
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/a/b");
        assert_eq!(url.query, "x=1");
        assert_eq!(url.fragment, "frag");
    }

    #[test]
    fn https_default_port_is_443() {
        let url = HttpUrl::parse("https://example.com").unwrap();
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/");
    }

    #[test]
    fn base_resets_path_and_drops_query_fragment() {
        let url = HttpUrl::parse("http://example.com/a?x=1#f").unwrap();
        let base = url.base();
        assert_eq!(base.path, "/");
        assert!(base.query.is_empty());
        assert!(base.fragment.is_empty());
    }

    #[test]
    fn is_same_host_compares_host_and_port() {
        let a = HttpUrl::parse("http://example.com:8080/a").unwrap();
        let b = HttpUrl::parse("http://example.com:8080/b").unwrap();
        let c = HttpUrl::parse("http://example.com:9090/a").unwrap();
        assert!(a.is_same_host(&b));
        assert!(!a.is_same_host(&c));
    }

    #[test]
    fn url_encode_decode_round_trips() {
        let input = "hello world & friends!";
        let encoded = url_encode(input);
        assert_eq!(url_decode(&encoded), input);
    }

    #[test]
    fn form_data_round_trips() {
        let mut data = HashMap::new();
        data.insert("name".to_string(), "a b".to_string());
        let encoded = form_data_encode(&data);
        let decoded = parse_form_data(&encoded);
        assert_eq!(decoded.get("name"), Some(&"a b".to_string()));
    }

    #[test]
    fn escapes_html_special_characters() {
        assert_eq!(escape_html("<a href=\"x\">'&'</a>"), "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;");
    }

    #[test]
    fn decodes_single_chunk() {
        let input = b"5\r\nhello\r\n0\r\n\r\n";
        match decode_chunked(input) {
            ChunkedOutcome::Complete { body, consumed } => {
                assert_eq!(body, b"hello");
                assert_eq!(consumed, input.len());
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn decodes_multiple_chunks_and_ignores_chunk_extensions() {
        let input = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        match decode_chunked(input) {
            ChunkedOutcome::Complete { body, .. } => assert_eq!(body, b"Wikipedia"),
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn a_chunk_size_of_zero_inside_data_does_not_terminate_early() {
        // Regression case: a naive `"0\r\n\r\n"` substring search would stop
        // here even though this "0\r\n" is chunk data, not the terminator.
        let input = b"3\r\n0\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        match decode_chunked(input) {
            ChunkedOutcome::Complete { body, consumed } => {
                assert_eq!(body, b"0\r\nhello");
                assert_eq!(consumed, input.len());
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn incomplete_chunk_requests_more_data() {
        let input = b"5\r\nhel";
        assert!(matches!(decode_chunked(input), ChunkedOutcome::Incomplete));
    }

    #[test]
    fn invalid_chunk_size_is_rejected() {
        let input = b"zz\r\nhello\r\n";
        assert!(matches!(decode_chunked(input), ChunkedOutcome::Invalid(_)));
    }
}
