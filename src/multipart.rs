//! `multipart/form-data` body parsing, streamed straight to a temporary
//! file as bytes arrive rather than buffered fully in memory.
//!
//! Grounded on the teacher's `upload.rs` (the boundary-scanning state
//! machine: `Start` → `HeaderSep` → `NextBoundary`, `find_subsequence`
//! over a growing buffer, draining consumed bytes as each part completes)
//! and `examples/original_source/src/onion/request_parser.c`'s
//! `onion_multipart_buffer`/`token_read_MULTIPART_next` for the underlying
//! boundary-detection contract. Route-specific behavior (upload directory
//! selection, response body construction) stays with the caller; this
//! module only turns bytes-plus-boundary into a sequence of completed
//! parts.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Default, Clone)]
pub struct PartHeaders {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Parses the small header block of a single multipart part (the text
/// between the opening boundary and the blank line that starts the part's
/// body), e.g. `Content-Disposition: form-data; name="file"; filename="a.png"`.
pub fn parse_part_headers(raw: &str) -> PartHeaders {
    let mut headers = PartHeaders::default();
    for line in raw.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "content-disposition" {
            for field in value.split(';').skip(1) {
                let field = field.trim();
                if let Some(name) = field.strip_prefix("name=") {
                    headers.name = Some(name.trim_matches('"').to_string());
                } else if let Some(filename) = field.strip_prefix("filename=") {
                    headers.filename = Some(filename.trim_matches('"').to_string());
                }
            }
        } else if key == "content-type" {
            headers.content_type = Some(value.to_string());
        }
    }
    headers
}

/// Finds the first occurrence of `needle` in `haystack` at or after
/// `from`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

#[derive(Debug)]
enum ScanState {
    Start,
    HeaderSep,
    NextBoundary(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub enum MultipartStatus {
    InProgress,
    Done,
}

/// A completed part: either its headers alone (no file contents, e.g. a
/// plain form field) or headers plus the path of the temp file its body
/// was streamed into.
#[derive(Debug)]
pub struct CompletedPart {
    pub headers: PartHeaders,
    pub temp_path: Option<PathBuf>,
    /// Buffered body bytes for a part that never announced a `filename` —
    /// an ordinary form field, which the connection layer folds into
    /// `POST` rather than `FILES`.
    pub value: Option<Vec<u8>>,
}

/// A part's temp file is scoped to the request it arrived on — once the
/// `CompletedPart` holding its path is dropped (the request resets or is
/// torn down), the file underneath it goes too.
impl Drop for CompletedPart {
    fn drop(&mut self) {
        if let Some(path) = &self.temp_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Streaming multipart body parser. Bytes are appended via `feed`; the
/// scanner advances a `find_subsequence` pass over the buffer exactly as
/// far as it safely can, draining consumed bytes so the buffer never
/// grows unbounded for a well-formed request.
pub struct MultipartParser {
    boundary: String,
    buffer: Vec<u8>,
    cursor: usize,
    state: ScanState,
    temp_dir: PathBuf,
    current_headers: PartHeaders,
    current_file: Option<File>,
    current_path: Option<PathBuf>,
    /// Accumulates body bytes for a part with no `filename` — an ordinary
    /// form field kept in memory instead of streamed to disk.
    current_value: Vec<u8>,
    next_temp_id: usize,
    pub completed: Vec<CompletedPart>,
}

impl MultipartParser {
    pub fn new(boundary: &str, temp_dir: PathBuf) -> Self {
        MultipartParser {
            boundary: boundary.to_string(),
            buffer: Vec::new(),
            cursor: 0,
            state: ScanState::Start,
            temp_dir,
            current_headers: PartHeaders::default(),
            current_file: None,
            current_path: None,
            current_value: Vec::new(),
            next_temp_id: 0,
            completed: Vec::new(),
        }
    }

    fn open_temp_file(&mut self) -> std::io::Result<(File, PathBuf)> {
        self.next_temp_id += 1;
        let path = self.temp_dir.join(format!("part-{}.tmp", self.next_temp_id));
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
        Ok((file, path))
    }

    pub fn feed(&mut self, chunk: &[u8]) -> std::io::Result<MultipartStatus> {
        self.buffer.extend_from_slice(chunk);

        let boundary_marker = format!("--{}", self.boundary);
        let boundary_bytes = boundary_marker.as_bytes();
        let header_sep = b"\r\n\r\n";

        loop {
            match self.state {
                ScanState::Start => {
                    let Some(start_idx) = find_subsequence(&self.buffer, boundary_bytes, self.cursor) else {
                        self.trim_buffer(boundary_bytes.len());
                        break;
                    };
                    let part_start = start_idx + boundary_bytes.len() + 2;
                    if self.buffer.len() < part_start {
                        break;
                    }
                    if self.buffer.get(part_start - 2..part_start) == Some(b"--") {
                        return Ok(MultipartStatus::Done);
                    }
                    self.cursor = part_start;
                    self.state = ScanState::HeaderSep;
                }
                ScanState::HeaderSep => {
                    let Some(sep_idx) = find_subsequence(&self.buffer, header_sep, self.cursor) else {
                        break;
                    };
                    let data_start = sep_idx + 4;
                    let headers_part = String::from_utf8_lossy(&self.buffer[self.cursor..data_start]);
                    self.current_headers = parse_part_headers(&headers_part);
                    self.current_value.clear();
                    if self.current_headers.filename.is_some() {
                        let (file, path) = self.open_temp_file()?;
                        self.current_file = Some(file);
                        self.current_path = Some(path);
                    }
                    self.cursor = data_start;
                    self.state = ScanState::NextBoundary(data_start);
                }
                ScanState::NextBoundary(data_start) => {
                    match find_subsequence(&self.buffer, boundary_bytes, data_start) {
                        Some(next_boundary_idx) => {
                            let mut data_end = next_boundary_idx;
                            if next_boundary_idx >= 2 && &self.buffer[next_boundary_idx - 2..next_boundary_idx] == b"\r\n" {
                                data_end -= 2;
                            }
                            self.finish_part(data_start, data_end)?;
                            self.buffer.drain(..next_boundary_idx);
                            self.cursor = 0;
                            self.state = ScanState::Start;
                        }
                        None => {
                            self.flush_safe_prefix(data_start)?;
                            break;
                        }
                    }
                }
            }
        }

        Ok(MultipartStatus::InProgress)
    }

    fn finish_part(&mut self, data_start: usize, data_end: usize) -> std::io::Result<()> {
        let tail = &self.buffer[data_start..data_end.max(data_start)];
        if let Some(file) = self.current_file.as_mut() {
            file.write_all(tail)?;
        } else {
            self.current_value.extend_from_slice(tail);
        }
        let headers = std::mem::take(&mut self.current_headers);
        let temp_path = self.current_path.take();
        self.current_file = None;
        let value = if temp_path.is_none() {
            Some(std::mem::take(&mut self.current_value))
        } else {
            None
        };
        self.completed.push(CompletedPart { headers, temp_path, value });
        Ok(())
    }

    /// Writes out everything that cannot possibly be part of the next
    /// boundary marker yet (keeping a safety margin the size of the
    /// boundary string) so a file part can be streamed incrementally
    /// rather than held entirely in the buffer.
    fn flush_safe_prefix(&mut self, data_start: usize) -> std::io::Result<()> {
        let safety_margin = self.boundary.len() + 8;
        if self.buffer.len() <= data_start + safety_margin {
            return Ok(());
        }
        let write_end = self.buffer.len() - safety_margin;
        if let Some(file) = self.current_file.as_mut() {
            file.write_all(&self.buffer[data_start..write_end])?;
        } else {
            self.current_value.extend_from_slice(&self.buffer[data_start..write_end]);
        }
        self.buffer.drain(data_start..write_end);
        self.cursor = data_start;
        Ok(())
    }

    fn trim_buffer(&mut self, boundary_len: usize) {
        let keep_tail = boundary_len + 4;
        if self.buffer.len() > keep_tail {
            let drain_to = self.buffer.len() - keep_tail;
            self.buffer.drain(..drain_to);
            self.cursor = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_disposition_with_filename() {
        let raw = "Content-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\nContent-Type: image/png\r\n\r\n";
        let headers = parse_part_headers(raw);
        assert_eq!(headers.name, Some("file".to_string()));
        assert_eq!(headers.filename, Some("a.png".to_string()));
        assert_eq!(headers.content_type, Some("image/png".to_string()));
    }

    #[test]
    fn streams_a_single_file_part_to_disk() {
        let dir = std::env::temp_dir().join(format!("mp-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut parser = MultipartParser::new("BOUNDARY", dir.clone());

        let body = concat!(
            "--BOUNDARY\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"hello.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "hello world",
            "\r\n--BOUNDARY--\r\n",
        );

        let status = parser.feed(body.as_bytes()).unwrap();
        assert_eq!(status, MultipartStatus::Done);
        assert_eq!(parser.completed.len(), 1);
        let part = &parser.completed[0];
        assert_eq!(part.headers.filename, Some("hello.txt".to_string()));
        let contents = std::fs::read_to_string(part.temp_path.as_ref().unwrap()).unwrap();
        assert_eq!(contents, "hello world");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn handles_fragmented_feed_calls() {
        let dir = std::env::temp_dir().join(format!("mp-test-frag-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut parser = MultipartParser::new("X", dir.clone());

        let body = "--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue\r\n--X--\r\n";
        let (first, second) = body.split_at(body.len() / 2);

        parser.feed(first.as_bytes()).unwrap();
        let status = parser.feed(second.as_bytes()).unwrap();
        assert_eq!(status, MultipartStatus::Done);
        assert_eq!(parser.completed.len(), 1);
        assert_eq!(parser.completed[0].headers.name, Some("a".to_string()));
        assert_eq!(parser.completed[0].value.as_deref(), Some(b"value".as_slice()));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn plain_form_field_value_is_kept_in_memory() {
        let dir = std::env::temp_dir().join(format!("mp-test-field-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut parser = MultipartParser::new("X", dir.clone());

        let body = "--X\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nhello world\r\n--X--\r\n";
        let status = parser.feed(body.as_bytes()).unwrap();
        assert_eq!(status, MultipartStatus::Done);
        let part = &parser.completed[0];
        assert!(part.temp_path.is_none());
        assert_eq!(part.value.as_deref(), Some(b"hello world".as_slice()));

        std::fs::remove_dir_all(&dir).ok();
    }
}
