//! Outgoing HTTP/1.x response: status line, headers, and a buffered body.
//!
//! The write path is intentionally simple — bodies are fully materialized
//! in memory before `to_bytes` renders them — the connection layer is
//! responsible for writing the resulting bytes to the socket in whatever
//! partial-write increments `write()` allows, the same split the teacher's
//! `HttpConnection::write_buffer` draws between "build the response" and
//! "push bytes down the wire".

use crate::cookie::SetCookie;
use crate::dict::Dict;
use crate::websocket::MessageHandler;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

static CACHED_DATE_EPOCH: AtomicI64 = AtomicI64::new(-1);
static CACHED_DATE_STRING: RwLock<String> = RwLock::new(String::new());

/// RFC 1123 `Date` header value for "now", recomputed at most once per
/// second. A server pushing thousands of responses a second has no
/// business formatting a timestamp on every single one.
pub fn cached_http_date() -> String {
    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    if CACHED_DATE_EPOCH.load(Ordering::Relaxed) == now_secs {
        if let Ok(cached) = CACHED_DATE_STRING.read() {
            if !cached.is_empty() {
                return cached.clone();
            }
        }
    }

    let formatted = chrono::DateTime::from_timestamp(now_secs, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| "Thu, 01 Jan 1970 00:00:00 GMT".to_string());

    if let Ok(mut cached) = CACHED_DATE_STRING.write() {
        *cached = formatted.clone();
        CACHED_DATE_EPOCH.store(now_secs, Ordering::Relaxed);
    }
    formatted
}

/// Wire-encodes one chunk of a `Transfer-Encoding: chunked` body
/// (`<hex-size>\r\n<data>\r\n`). Calling this with an empty slice produces
/// the terminating `0\r\n\r\n` chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: Dict,
    pub body: Vec<u8>,
    /// Set by a route that returns `ConnectionStatus::WebSocket` to
    /// install the per-frame callback the upgraded connection should
    /// use. `http_connection.rs` takes this out of the response once the
    /// upgrade completes; it plays no other part in the HTTP wire format.
    pub websocket_handler: Option<Arc<MessageHandler>>,
    /// Set the moment the first byte is written through `write`/`printf`/
    /// etc. Mirrors `onion_response_write`'s headers-first-flush contract:
    /// once body data has gone out, the status line and headers are
    /// considered sent and can no longer change, even though this
    /// connection model only actually serializes them once the handler
    /// returns.
    headers_committed: bool,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        let headers = Dict::new_icase();
        headers.set("content-length", "0");
        headers.set("date", cached_http_date());
        HttpResponse {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers,
            body: Vec::new(),
            websocket_handler: None,
            headers_committed: false,
        }
    }

    /// Installs the per-frame callback a WebSocket route wants to use.
    /// Call this before returning `ConnectionStatus::WebSocket` from a
    /// `Handler` — the connection layer picks it up once it finishes the
    /// handshake response.
    pub fn set_websocket_handler(&mut self, handler: Arc<MessageHandler>) -> &mut Self {
        self.websocket_handler = Some(handler);
        self
    }

    /// A `200 OK` with the status text filled in from the standard table.
    pub fn ok() -> Self {
        HttpResponse::new(200, Self::status_text(200))
    }

    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        if self.headers_committed {
            return self;
        }
        self.headers.set(key, value);
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers.set("content-length", body.len().to_string());
        self.headers.set("content-type", content_type);
        self.body = body;
        self
    }

    /// Switches this response to `Transfer-Encoding: chunked` — drops any
    /// `Content-Length` since the two are mutually exclusive on the wire.
    pub fn use_chunked_encoding(&mut self) -> &mut Self {
        if self.headers_committed {
            return self;
        }
        self.headers.remove("content-length");
        self.headers.set("transfer-encoding", "chunked");
        self
    }

    pub fn add_cookie(&mut self, cookie: SetCookie) -> &mut Self {
        if self.headers_committed {
            return self;
        }
        self.headers.add("set-cookie", cookie.to_header(), false);
        self
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        if self.headers_committed {
            return self;
        }
        self.status_code = code;
        self.status_text = Self::status_text(code).to_string();
        self
    }

    fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
    }

    /// Appends bytes to the buffered body, like `onion_response_write`. The
    /// first call commits the headers — if nothing declared a
    /// `Content-Length` by then, the response switches to
    /// `Transfer-Encoding: chunked` so the caller never has to know the
    /// total size up front.
    pub fn write(&mut self, data: &[u8]) -> &mut Self {
        if !self.headers_committed {
            if !self.headers.contains("content-length") {
                self.use_chunked_encoding();
            }
            self.headers_committed = true;
        }
        self.body.extend_from_slice(data);
        self
    }

    /// Like `write`, but stops at the first NUL byte — mirrors
    /// `onion_response_write0`'s use for C string bodies that may not carry
    /// an explicit length.
    pub fn write0(&mut self, data: &[u8]) -> &mut Self {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        self.write(&data[..end])
    }

    /// Writes `text` with `&`, `<`, `>`, and `"` escaped, for interpolating
    /// untrusted strings into an HTML body without opening a markup
    /// injection hole.
    pub fn write_html_safe(&mut self, text: &str) -> &mut Self {
        let mut escaped = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                _ => escaped.push(c),
            }
        }
        self.write(escaped.as_bytes())
    }

    /// Formats `args` (pass `format_args!(...)`) and appends the result to
    /// the body, the same shape as `onion_response_printf`.
    pub fn printf(&mut self, args: std::fmt::Arguments) -> &mut Self {
        self.write(args.to_string().as_bytes())
    }

    /// Commits the headers without writing any body bytes. Subsequent
    /// header mutation is ignored, matching the contract `write` enforces
    /// on its first call — `flush` exists so a handler that wants
    /// headers-first-flush semantics without sending a body yet (e.g.
    /// before looping to stream further writes) can ask for it explicitly.
    pub fn flush(&mut self) -> &mut Self {
        if !self.headers_committed {
            if !self.headers.contains("content-length") && self.body.is_empty() {
                self.use_chunked_encoding();
            }
            self.headers_committed = true;
        }
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut res = self.to_bytes_headers_only();
        if self.is_chunked() {
            res.extend_from_slice(&encode_chunk(&self.body));
            res.extend_from_slice(&encode_chunk(b""));
        } else {
            res.extend_from_slice(&self.body);
        }
        res
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut res = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.status_text
        )
        .into_bytes();

        for (key, val) in self.headers.entries() {
            res.extend_from_slice(format!("{}: {}\r\n", to_pascal_case(&key), val).as_bytes());
        }
        res.extend_from_slice(b"\r\n");
        res
    }

    pub fn status_text(code: u16) -> &'static str {
        match code {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            411 => "Length Required",
            412 => "Precondition Failed",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            415 => "Unsupported Media Type",
            416 => "Range Not Satisfiable",
            417 => "Expectation Failed",
            426 => "Upgrade Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown Status",
        }
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code, Self::status_text(code));
        res.set_header("location", target_url);
        res.set_header("content-length", "0");
        res
    }
}

/// Builds a response for a bare status code — used when no route/handler
/// produced one (unknown path, disallowed method, an internal failure).
/// Connection reuse follows RFC 7230 guidance: a response a client sent a
/// malformed request for cannot safely be followed by keep-alive, but a
/// routine 404/405 can.
pub fn error_response(code: u16) -> HttpResponse {
    let mut res = HttpResponse::new(code, HttpResponse::status_text(code));
    let body = format!("{} {}", code, HttpResponse::status_text(code)).into_bytes();
    res.set_body(body, "text/plain");
    let keep_alive = code == 404 || code == 405 || code < 400;
    res.set_header("connection", if keep_alive { "keep-alive" } else { "close" });
    res
}

fn to_pascal_case(s: &str) -> String {
    s.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                None => String::new(),
                Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_status_line_and_headers() {
        let mut res = HttpResponse::new(200, "OK");
        res.set_body(b"hi".to_vec(), "text/plain");
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn chunked_encoding_wraps_body_and_drops_content_length() {
        let mut res = HttpResponse::new(200, "OK");
        res.set_body(b"hello".to_vec(), "text/plain");
        res.use_chunked_encoding();
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("Content-Length"));
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(text.ends_with("5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn multiple_cookies_become_multiple_set_cookie_headers() {
        let mut res = HttpResponse::new(200, "OK");
        res.add_cookie(SetCookie::new("a", "1"));
        res.add_cookie(SetCookie::new("b", "2"));
        assert_eq!(res.headers.get_all("set-cookie").len(), 2);
    }

    #[test]
    fn redirect_sets_location_and_empty_body() {
        let res = HttpResponse::redirect(302, "/elsewhere");
        assert_eq!(res.headers.get("location").as_deref(), Some("/elsewhere"));
        assert_eq!(res.status_text, "Found");
    }

    #[test]
    fn error_response_closes_on_server_errors_but_not_404() {
        let not_found = error_response(404);
        assert_eq!(not_found.headers.get("connection").as_deref(), Some("keep-alive"));
        let internal = error_response(500);
        assert_eq!(internal.headers.get("connection").as_deref(), Some("close"));
    }

    #[test]
    fn write_accumulates_across_calls_and_switches_to_chunked() {
        let mut res = HttpResponse::new(200, "OK");
        res.write(b"hello, ");
        res.write(b"world");
        assert_eq!(res.body, b"hello, world");
        assert!(res.headers.get("content-length").is_none());
        assert_eq!(res.headers.get("transfer-encoding").as_deref(), Some("chunked"));
    }

    #[test]
    fn write_leaves_declared_content_length_alone() {
        let mut res = HttpResponse::new(200, "OK");
        res.set_header("content-length", "11");
        res.write(b"hello world");
        assert_eq!(res.headers.get("content-length").as_deref(), Some("11"));
        assert!(res.headers.get("transfer-encoding").is_none());
    }

    #[test]
    fn write0_stops_at_nul_byte() {
        let mut res = HttpResponse::new(200, "OK");
        res.write0(b"abc\0def");
        assert_eq!(res.body, b"abc");
    }

    #[test]
    fn write_html_safe_escapes_markup() {
        let mut res = HttpResponse::new(200, "OK");
        res.write_html_safe("<b>\"hi\" & bye</b>");
        assert_eq!(res.body, b"&lt;b&gt;&quot;hi&quot; &amp; bye&lt;/b&gt;");
    }

    #[test]
    fn printf_formats_into_the_body() {
        let mut res = HttpResponse::new(200, "OK");
        res.printf(format_args!("{} of {}", 3, 10));
        assert_eq!(res.body, b"3 of 10");
    }

    #[test]
    fn header_mutation_is_ignored_once_committed_by_write() {
        let mut res = HttpResponse::new(200, "OK");
        res.write(b"first");
        res.set_header("x-custom", "late");
        res.set_status_code(404);
        assert!(res.headers.get("x-custom").is_none());
        assert_eq!(res.status_code, 200);
    }

    #[test]
    fn flush_with_no_body_yet_commits_headers_and_enables_chunked() {
        let mut res = HttpResponse::new(200, "OK");
        res.flush();
        assert_eq!(res.headers.get("transfer-encoding").as_deref(), Some("chunked"));
        res.set_header("x-custom", "late");
        assert!(res.headers.get("x-custom").is_none());
    }

    #[test]
    fn cached_http_date_is_rfc1123_shaped() {
        let date = cached_http_date();
        assert!(date.ends_with("GMT"));
        assert_eq!(date.len(), 29);
    }
}
