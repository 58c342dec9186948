//! Incremental HTTP/1.x request parser.
//!
//! `HttpRequest` is a resumable state machine: bytes arrive off the wire in
//! arbitrary-sized chunks, get appended to an internal buffer, and `feed`
//! drives the state machine forward as far as the buffered data allows. If
//! a state needs more bytes than are currently available it returns without
//! erroring so the caller can register for more readability and call `feed`
//! again with the next chunk. Nothing here resolves routes, spawns
//! subprocesses, or reads configuration — this module only ever answers
//! "is this request fully parsed yet, and if not, what does it need".

use crate::dict::Dict;
use crate::multipart::{CompletedPart, MultipartParser, PartHeaders};
use std::fmt::{self, Display};
use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicU64, Ordering};

/// Methods recognized on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Patch,
    Trace,
    Propfind,
    Proppatch,
    Mkcol,
    Move,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Propfind => "PROPFIND",
            Method::Proppatch => "PROPPATCH",
            Method::Mkcol => "MKCOL",
            Method::Move => "MOVE",
        }
    }

    pub fn is_allowed(self, allowed_methods: &[String]) -> bool {
        allowed_methods.iter().any(|m| m == self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "CONNECT" => Ok(Method::Connect),
            "OPTIONS" => Ok(Method::Options),
            "PATCH" => Ok(Method::Patch),
            "TRACE" => Ok(Method::Trace),
            "PROPFIND" => Ok(Method::Propfind),
            "PROPPATCH" => Ok(Method::Proppatch),
            "MKCOL" => Ok(Method::Mkcol),
            "MOVE" => Ok(Method::Move),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
}

#[derive(Debug)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidUtf8(FromUtf8Error),
    HeaderTooLong,
    TooManyHeaders,
    InvalidHeaderValue,
    ParseHexError,
    PayloadTooLarge,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "unrecognized HTTP method"),
            ParseError::InvalidUtf8(e) => write!(f, "invalid utf-8 in request: {e}"),
            ParseError::HeaderTooLong => write!(f, "header section exceeded its size limit"),
            ParseError::TooManyHeaders => write!(f, "too many headers"),
            ParseError::InvalidHeaderValue => write!(f, "malformed header line"),
            ParseError::ParseHexError => write!(f, "invalid chunk size"),
            ParseError::PayloadTooLarge => write!(f, "request body exceeded the configured limit"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<FromUtf8Error> for ParseError {
    fn from(e: FromUtf8Error) -> Self {
        ParseError::InvalidUtf8(e)
    }
}

impl ParseError {
    /// Maps a parse failure onto the status code a connection layer should
    /// send back before closing. Parsing never crafts the response itself —
    /// it only tells the caller how to.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::PayloadTooLarge => 413,
            ParseError::InvalidMethod => 501,
            ParseError::HeaderTooLong | ParseError::TooManyHeaders => 431,
            _ => 400,
        }
    }
}

/// Caps and scratch space the parser needs but does not own. Kept separate
/// from any server/route configuration type so this module never has to
/// know about virtual hosts or handler chains.
#[derive(Debug, Clone)]
pub struct RequestLimits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
    pub max_headers: usize,
    pub temp_dir: PathBuf,
}

impl Default for RequestLimits {
    fn default() -> Self {
        RequestLimits {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 1_048_576,
            max_headers: 100,
            temp_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    NeedMoreData,
    Complete,
}

pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub path: String,
    pub query: String,
    pub version: String,
    pub headers: Dict,
    pub trailers: Dict,
    pub get_params: Dict,
    pub post_params: Dict,
    pub body: Vec<u8>,
    pub uploaded_files: Vec<CompletedPart>,
    /// The session dict for this request, populated by the connection
    /// layer from the `sessionid` cookie (or freshly allocated) before a
    /// handler ever sees the request. A handler that never touches this
    /// leaves it empty, so the connection layer knows not to mint a
    /// cookie for a session nobody asked for.
    pub session: Dict,
    pub session_id: Option<String>,

    buffer: Vec<u8>,
    cursor: usize,
    state: ParsingState,
    chunk_state: ChunkState,
    is_chunked: bool,
    body_remaining: usize,
    total_body_read: usize,
    multipart: Option<MultipartParser>,
    header_count: usize,
    put_file: Option<File>,
    put_temp_path: Option<PathBuf>,
}

/// Source of unique temp-file names for streamed `PUT` bodies — shared
/// across every `HttpRequest` so two requests being parsed on different
/// connections never collide on the same path.
static NEXT_PUT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::Get,
            url: String::new(),
            path: String::new(),
            query: String::new(),
            version: String::new(),
            headers: Dict::new_icase(),
            trailers: Dict::new_icase(),
            get_params: Dict::new(),
            post_params: Dict::new(),
            body: Vec::new(),
            uploaded_files: Vec::new(),
            session: Dict::new(),
            session_id: None,
            buffer: Vec::new(),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
            is_chunked: false,
            body_remaining: 0,
            total_body_read: 0,
            multipart: None,
            header_count: 0,
            put_file: None,
            put_temp_path: None,
        }
    }

    /// Resets everything back to a fresh `RequestLine` state while keeping
    /// any unconsumed bytes in the buffer (HTTP pipelining: a second
    /// request line can already be sitting behind the first one).
    pub fn reset_for_next_request(&mut self) {
        let leftover = self.buffer.split_off(self.cursor.min(self.buffer.len()));
        *self = HttpRequest {
            buffer: leftover,
            ..HttpRequest::new()
        };
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParsingState::Complete
    }

    /// Whether another request line could already be sitting in the
    /// buffer behind this one — the connection layer uses this to decide
    /// whether to immediately re-enter the parser instead of waiting on
    /// the socket again.
    pub fn has_pipelined_data(&self) -> bool {
        self.state == ParsingState::Complete && !self.buffer.is_empty()
    }

    /// Appends newly-read bytes and drives the state machine as far as
    /// possible. Returns `Complete` once the whole request (headers, body,
    /// trailers) has been parsed, or `NeedMoreData` if it ran out of
    /// buffered bytes partway through a state.
    pub fn feed(&mut self, data: &[u8], limits: &RequestLimits) -> Result<FeedOutcome, ParseError> {
        self.buffer.extend_from_slice(data);
        loop {
            match self.state {
                ParsingState::RequestLine => match self.parse_request_line() {
                    Ok(()) => self.state = ParsingState::Headers,
                    Err(ParseError::IncompleteRequestLine) => return Ok(FeedOutcome::NeedMoreData),
                    Err(e) => return Err(e),
                },
                ParsingState::Headers => {
                    if self.cursor > limits.max_header_bytes {
                        return Err(ParseError::HeaderTooLong);
                    }
                    match self.extract_and_parse_header() {
                        Ok(Some((k, v))) => {
                            self.header_count += 1;
                            if self.header_count > limits.max_headers {
                                return Err(ParseError::TooManyHeaders);
                            }
                            self.headers.add(k, v, false);
                        }
                        Ok(None) => {
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                            self.state = ParsingState::HeadersDone;
                        }
                        Err(ParseError::IncompleteRequestLine) => return Ok(FeedOutcome::NeedMoreData),
                        Err(e) => return Err(e),
                    }
                }
                ParsingState::HeadersDone => self.setup_body_strategy(limits)?,
                ParsingState::Body => {
                    if !self.parse_unchunked_body(limits)? {
                        return Ok(FeedOutcome::NeedMoreData);
                    }
                }
                ParsingState::ChunkedBody => {
                    if !self.parse_chunked_body(limits)? {
                        return Ok(FeedOutcome::NeedMoreData);
                    }
                }
                ParsingState::Complete => return Ok(FeedOutcome::Complete),
            }
        }
    }

    fn parse_request_line(&mut self) -> Result<(), ParseError> {
        let line_end = match find_crlf(&self.buffer, 0) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > 8 * 1024 {
                    return Err(ParseError::MalformedRequestLine);
                }
                return Err(ParseError::IncompleteRequestLine);
            }
        };

        let line = String::from_utf8(self.buffer[..line_end].to_vec())?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }

        self.method = parts[0].parse()?;
        self.url = parts[1].to_string();
        self.version = parts[2].to_string();

        match self.url.split_once('?') {
            Some((path, query)) => {
                self.path = path.to_string();
                self.query = query.to_string();
                parse_form_encoded(query, &mut self.get_params);
            }
            None => self.path = self.url.clone(),
        }

        self.buffer.drain(..line_end + 2);
        self.cursor = 0;
        Ok(())
    }

    /// Finds one `key: value` header line starting at `cursor`. Returns
    /// `Ok(None)` at the blank line that terminates the header section.
    fn extract_and_parse_header(&mut self) -> Result<Option<(String, String)>, ParseError> {
        let line_end = match find_crlf(&self.buffer, self.cursor) {
            Some(pos) => pos,
            None => return Err(ParseError::IncompleteRequestLine),
        };

        if line_end == self.cursor {
            self.cursor = line_end + 2;
            return Ok(None);
        }

        let line = &self.buffer[self.cursor..line_end];
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeaderValue)?;

        let key = String::from_utf8_lossy(&line[..colon]).trim().to_lowercase();
        let value = String::from_utf8_lossy(&line[colon + 1..]).trim().to_string();
        self.cursor = line_end + 2;
        Ok(Some((key, value)))
    }

    fn setup_body_strategy(&mut self, limits: &RequestLimits) -> Result<(), ParseError> {
        let content_length: usize = self
            .headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        self.is_chunked = self
            .headers
            .get("transfer-encoding")
            .map(|v| v.to_lowercase().contains("chunked"))
            .unwrap_or(false);

        if content_length > limits.max_body_bytes {
            return Err(ParseError::PayloadTooLarge);
        }

        if let Some(content_type) = self.headers.get("content-type") {
            if let Some(boundary) = parse_multipart_boundary(&content_type) {
                self.multipart = Some(MultipartParser::new(&boundary, limits.temp_dir.clone()));
            }
        }

        // A PUT body is streamed straight to a temp file instead of
        // buffered in `self.body` — the upload could be as large as
        // `max_file_size` allows, and nothing downstream needs it resident
        // in memory.
        if self.method == Method::Put && self.multipart.is_none() && (content_length > 0 || self.is_chunked) {
            let id = NEXT_PUT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
            let path = limits.temp_dir.join(format!("put-{id}.tmp"));
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)
                .map_err(|_| ParseError::InvalidHeaderValue)?;
            self.put_file = Some(file);
            self.put_temp_path = Some(path);
        }

        self.body_remaining = content_length;
        self.total_body_read = 0;

        self.state = if self.is_chunked {
            self.chunk_state = ChunkState::ReadSize;
            ParsingState::ChunkedBody
        } else if content_length > 0 {
            ParsingState::Body
        } else {
            ParsingState::Complete
        };
        Ok(())
    }

    fn consume_body_chunk(&mut self, data: &[u8]) -> Result<(), ParseError> {
        if let Some(parser) = &mut self.multipart {
            parser.feed(data).map_err(|_| ParseError::InvalidHeaderValue)?;
        } else if let Some(file) = &mut self.put_file {
            file.write_all(data).map_err(|_| ParseError::InvalidHeaderValue)?;
        } else {
            self.body.extend_from_slice(data);
        }
        Ok(())
    }

    fn finish_body(&mut self) {
        if let Some(parser) = self.multipart.take() {
            let (files, fields): (Vec<_>, Vec<_>) =
                parser.completed.into_iter().partition(|p| p.temp_path.is_some());
            for field in fields {
                let key = field.headers.name.clone().unwrap_or_default();
                let value = field
                    .value
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                self.post_params.add(key, value, false);
            }
            self.uploaded_files = files;
        } else if let Some(path) = self.put_temp_path.take() {
            self.put_file = None;
            self.uploaded_files.push(CompletedPart {
                headers: PartHeaders {
                    name: None,
                    filename: Some(self.path.clone()),
                    content_type: self.headers.get("content-type"),
                },
                temp_path: Some(path),
                value: None,
            });
        } else if self
            .headers
            .get("content-type")
            .map(|ct| ct.to_lowercase().starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
        {
            parse_urlencoded_body(&self.body, &mut self.post_params);
        }
        self.state = ParsingState::Complete;
    }

    fn parse_unchunked_body(&mut self, limits: &RequestLimits) -> Result<bool, ParseError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        let to_process = std::cmp::min(self.buffer.len(), self.body_remaining);
        let data: Vec<u8> = self.buffer.drain(..to_process).collect();
        self.total_body_read += to_process;
        if self.total_body_read > limits.max_body_bytes {
            return Err(ParseError::PayloadTooLarge);
        }
        self.consume_body_chunk(&data)?;
        self.body_remaining -= to_process;
        if self.body_remaining == 0 {
            self.finish_body();
            return Ok(true);
        }
        Ok(false)
    }

    fn parse_chunked_body(&mut self, limits: &RequestLimits) -> Result<bool, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::ReadSize => {
                    let search_limit = std::cmp::min(self.buffer.len(), 18);
                    match find_subsequence(&self.buffer[..search_limit], b"\r\n", 0) {
                        Some(line_end) => {
                            let hex_str = String::from_utf8_lossy(&self.buffer[..line_end]);
                            let hex_str = hex_str.split(';').next().unwrap_or("");
                            let chunk_size = usize::from_str_radix(hex_str.trim(), 16)
                                .map_err(|_| ParseError::ParseHexError)?;

                            if self.total_body_read + chunk_size > limits.max_body_bytes {
                                return Err(ParseError::PayloadTooLarge);
                            }

                            if chunk_size == 0 {
                                if self.buffer.len() < line_end + 2 {
                                    return Ok(false);
                                }
                                self.buffer.drain(..line_end + 2);
                                self.chunk_state = ChunkState::ReadTrailers;
                                continue;
                            }

                            self.buffer.drain(..line_end + 2);
                            self.chunk_state = ChunkState::ReadData(chunk_size);
                        }
                        None => {
                            if self.buffer.len() >= 18 {
                                return Err(ParseError::ParseHexError);
                            }
                            return Ok(false);
                        }
                    }
                }

                ChunkState::ReadData(remaining) => {
                    if self.buffer.is_empty() {
                        return Ok(false);
                    }
                    let to_read = std::cmp::min(self.buffer.len(), remaining);
                    let data: Vec<u8> = self.buffer.drain(..to_read).collect();
                    self.total_body_read += to_read;
                    if self.total_body_read > limits.max_body_bytes {
                        return Err(ParseError::PayloadTooLarge);
                    }
                    self.consume_body_chunk(&data)?;

                    let new_remaining = remaining - to_read;
                    if new_remaining == 0 {
                        self.chunk_state = ChunkState::ReadTrailingCrlf;
                    } else {
                        self.chunk_state = ChunkState::ReadData(new_remaining);
                        return Ok(false);
                    }
                }

                ChunkState::ReadTrailingCrlf => {
                    if self.buffer.len() < 2 {
                        return Ok(false);
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(ParseError::ParseHexError);
                    }
                    self.buffer.drain(..2);
                    self.chunk_state = ChunkState::ReadSize;
                }

                ChunkState::ReadTrailers => {
                    if self.buffer.len() > limits.max_header_bytes {
                        return Err(ParseError::HeaderTooLong);
                    }
                    match self.extract_and_parse_header() {
                        Ok(Some((k, v))) => {
                            if let Some(allowed) = self.headers.get("trailer") {
                                if allowed.to_lowercase().contains(k.as_str()) {
                                    self.trailers.add(k, v, false);
                                }
                            }
                            continue;
                        }
                        Ok(None) => {
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                            self.finish_body();
                            return Ok(true);
                        }
                        Err(ParseError::IncompleteRequestLine) => return Ok(false),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.method.as_str(), self.url, self.version)?;
        for (key, value) in self.headers.entries() {
            writeln!(f, "  {key}: {value}")?;
        }
        if self.body.is_empty() {
            write!(f, "<empty body>")
        } else {
            write!(f, "<{} byte body>", self.body.len())
        }
    }
}

fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    let search_area = buffer.get(start_offset..)?;
    let mut pos = 0;
    while let Some(r) = search_area[pos..].iter().position(|&b| b == b'\r') {
        let abs = pos + r;
        if search_area.get(abs + 1) == Some(&b'\n') {
            return Some(start_offset + abs);
        }
        pos = abs + 1;
    }
    None
}

fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first = needle[0];
    let mut pos = 0;
    while let Some(rel) = search_area[pos..].iter().position(|&b| b == first) {
        let abs = pos + rel;
        match search_area.get(abs..abs + needle.len()) {
            Some(candidate) if candidate == needle => return Some(start_offset + abs),
            Some(_) => {}
            None => return None,
        }
        pos = abs + 1;
    }
    None
}

/// `multipart/form-data; boundary=----WebKitFormBoundary...` -> the boundary
/// token, unquoted.
fn parse_multipart_boundary(content_type: &str) -> Option<String> {
    let lower = content_type.to_lowercase();
    if !lower.trim_start().starts_with("multipart/form-data") {
        return None;
    }
    content_type.split(';').skip(1).find_map(|segment| {
        let segment = segment.trim();
        segment
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Percent-decodes one `application/x-www-form-urlencoded` segment.
fn percent_decode(input: &str) -> String {
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
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses `a=1&b=2&b=3` into a dictionary, preserving duplicate keys the
/// way a query string or urlencoded form body can carry them.
fn parse_form_encoded(input: &str, into: &mut Dict) {
    for pair in input.split('&').filter(|s| !s.is_empty()) {
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        };
        into.add(k, v, false);
    }
}

/// Parses an `application/x-www-form-urlencoded` body once it is fully
/// buffered. Called by the connection layer after a request completes,
/// mirroring how multipart parts are only materialized once their own
/// parser reports the final boundary.
pub fn parse_urlencoded_body(body: &[u8], into: &mut Dict) {
    if let Ok(text) = std::str::from_utf8(body) {
        parse_form_encoded(text, into);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> RequestLimits {
        RequestLimits::default()
    }

    #[test]
    fn parses_simple_get_request() {
        let mut req = HttpRequest::new();
        let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let outcome = req.feed(raw, &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/hello");
        assert_eq!(req.get_params.get("name").as_deref(), Some("world"));
        assert_eq!(req.headers.get("host").as_deref(), Some("example.com"));
    }

    #[test]
    fn reports_need_more_data_for_split_request_line() {
        let mut req = HttpRequest::new();
        let outcome = req.feed(b"GET /partial", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::NeedMoreData);
        let outcome = req.feed(b" HTTP/1.1\r\n\r\n", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
    }

    #[test]
    fn parses_content_length_body_across_chunks() {
        let mut req = HttpRequest::new();
        req.feed(b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\n", &limits())
            .unwrap();
        let outcome = req.feed(b"hello ", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::NeedMoreData);
        let outcome = req.feed(b"world", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.body, b"hello world");
    }

    #[test]
    fn parses_chunked_body() {
        let mut req = HttpRequest::new();
        let raw = b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let outcome = req.feed(raw, &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.body, b"hello world");
    }

    #[test]
    fn chunked_trailer_is_kept_only_when_announced() {
        let mut req = HttpRequest::new();
        let raw = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\nTrailer: x-checksum\r\n\r\n3\r\nabc\r\n0\r\nx-checksum: deadbeef\r\nx-secret: nope\r\n\r\n";
        req.feed(raw, &limits()).unwrap();
        assert_eq!(req.trailers.get("x-checksum").as_deref(), Some("deadbeef"));
        assert_eq!(req.trailers.get("x-secret"), None);
    }

    #[test]
    fn rejects_oversized_content_length() {
        let mut req = HttpRequest::new();
        let mut tight = RequestLimits::default();
        tight.max_body_bytes = 4;
        let err = req
            .feed(b"POST /x HTTP/1.1\r\nContent-Length: 100\r\n\r\n", &tight)
            .unwrap_err();
        assert!(matches!(err, ParseError::PayloadTooLarge));
    }

    #[test]
    fn rejects_malformed_request_line() {
        let mut req = HttpRequest::new();
        let err = req.feed(b"GET\r\n\r\n", &limits()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedRequestLine));
    }

    #[test]
    fn rejects_unknown_method() {
        let mut req = HttpRequest::new();
        let err = req.feed(b"FROBNICATE / HTTP/1.1\r\n\r\n", &limits()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidMethod));
        assert_eq!(err.status_code(), 501);
    }

    #[test]
    fn recognizes_webdav_methods() {
        let mut req = HttpRequest::new();
        let outcome = req.feed(b"PROPFIND /coll HTTP/1.1\r\n\r\n", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.method, Method::Propfind);
    }

    #[test]
    fn pipelined_requests_leave_the_second_request_in_the_buffer() {
        let mut req = HttpRequest::new();
        let raw = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let outcome = req.feed(raw, &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert!(req.has_pipelined_data());
        req.reset_for_next_request();
        let outcome = req.feed(b"", &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.path, "/b");
    }

    #[test]
    fn detects_multipart_boundary_from_content_type() {
        let boundary = parse_multipart_boundary("multipart/form-data; boundary=----abc123").unwrap();
        assert_eq!(boundary, "----abc123");
        assert!(parse_multipart_boundary("application/json").is_none());
    }

    #[test]
    fn feed_populates_post_params_from_urlencoded_body() {
        let mut req = HttpRequest::new();
        let raw = b"POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 15\r\n\r\na=1&b=hello%21";
        let outcome = req.feed(raw, &limits()).unwrap();
        assert_eq!(outcome, FeedOutcome::Complete);
        assert_eq!(req.post_params.get("b").as_deref(), Some("hello!"));
    }

    #[test]
    fn parses_urlencoded_form_body() {
        let mut dict = Dict::new();
        parse_urlencoded_body(b"a=1&b=hello+world&b=again", &mut dict);
        assert_eq!(dict.get("a").as_deref(), Some("1"));
        assert_eq!(dict.get_all("b"), vec!["hello world".to_string(), "again".to_string()]);
    }
}
