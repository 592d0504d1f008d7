//! Streaming `multipart/form-data` reader.
//!
//! The body is read in fixed chunks and never held in full. While a part body
//! is copied, the last `delimiter.len() - 1` bytes are held back so a
//! delimiter split across two reads is still found.
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="upload"; filename="a.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! <part body>\r\n
//! --<boundary>--\r\n
//! ```

use crate::storage::StorageError;
use std::io::{self, Read};
use thiserror::Error;

/// Bytes requested from the body per read.
const READ_CHUNK: usize = 2048;

/// Longest boundary allowed by RFC 2046.
const MAX_BOUNDARY_LEN: usize = 70;

/// Largest accepted header block of a single part.
const MAX_PART_HEADER_BYTES: usize = 4096;

/// Multipart parsing errors.
#[derive(Debug, Error)]
pub enum MultipartError {
    /// Content type is not multipart or carries no usable boundary.
    #[error("missing multipart boundary")]
    MissingBoundary,
    /// Part headers exceed [`MAX_PART_HEADER_BYTES`].
    #[error("part headers too large")]
    HeadersTooLarge,
    /// The body ended before the closing delimiter.
    #[error("upload incomplete")]
    Truncated,
    /// A delimiter was followed by something other than CRLF or `--`.
    #[error("malformed multipart body")]
    Malformed,
    #[error("read error: {0}")]
    Io(#[from] io::Error),
    /// The sink rejected a chunk.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Headers of one part.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartHeaders {
    /// Form field name.
    pub name: Option<String>,
    /// Client-supplied file name, for file parts.
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Extract the boundary from a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media = params.next()?.trim();
    if !media.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|b| !b.is_empty() && b.len() <= MAX_BOUNDARY_LEN)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_part_headers(block: &[u8]) -> PartHeaders {
    let text = String::from_utf8_lossy(block);
    let mut headers = PartHeaders::default();
    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';').skip(1) {
                match param.trim().split_once('=') {
                    Some((key, v)) if key.eq_ignore_ascii_case("name") => {
                        headers.name = Some(unquote(v.trim()).to_string());
                    }
                    Some((key, v)) if key.eq_ignore_ascii_case("filename") => {
                        headers.filename = Some(unquote(v.trim()).to_string());
                    }
                    _ => {}
                }
            }
        } else if name.eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.trim().to_string());
        }
    }
    headers
}

/// Pull-based reader over a multipart body.
pub struct MultipartReader<R> {
    reader: R,
    /// `\r\n--<boundary>`
    delimiter: Vec<u8>,
    buf: Vec<u8>,
    in_body: bool,
    finished: bool,
}

impl<R: Read> MultipartReader<R> {
    /// Wrap `reader`, splitting on `boundary`.
    pub fn new(reader: R, boundary: &str) -> Self {
        let mut delimiter = b"\r\n--".to_vec();
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            reader,
            delimiter,
            // The first delimiter has no leading CRLF; supplying one lets
            // every delimiter be matched the same way.
            buf: b"\r\n".to_vec(),
            in_body: false,
            finished: false,
        }
    }

    /// Read more of the body. Returns `false` at end of input.
    fn fill(&mut self) -> Result<bool, MultipartError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Advance to the next part, skipping the rest of the current one.
    ///
    /// Returns `None` after the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<PartHeaders>, MultipartError> {
        if self.in_body {
            self.copy_body(|_| Ok(()))?;
        }
        if self.finished {
            return Ok(None);
        }

        // Preamble, or the delimiter left in place by `copy_body`.
        let start = loop {
            if let Some(pos) = find(&self.buf, &self.delimiter) {
                break pos;
            }
            let keep = self.delimiter.len() - 1;
            if self.buf.len() > keep {
                self.buf.drain(..self.buf.len() - keep);
            }
            if !self.fill()? {
                return Err(MultipartError::Truncated);
            }
        };
        self.buf.drain(..start + self.delimiter.len());

        while self.buf.len() < 2 {
            if !self.fill()? {
                return Err(MultipartError::Truncated);
            }
        }
        if self.buf.starts_with(b"--") {
            self.finished = true;
            return Ok(None);
        }
        if !self.buf.starts_with(b"\r\n") {
            return Err(MultipartError::Malformed);
        }
        self.buf.drain(..2);

        let end = loop {
            // A part with no headers at all.
            if self.buf.starts_with(b"\r\n") {
                self.buf.drain(..2);
                self.in_body = true;
                return Ok(Some(PartHeaders::default()));
            }
            if let Some(pos) = find(&self.buf, b"\r\n\r\n") {
                break pos;
            }
            if self.buf.len() > MAX_PART_HEADER_BYTES {
                return Err(MultipartError::HeadersTooLarge);
            }
            if !self.fill()? {
                return Err(MultipartError::Truncated);
            }
        };
        if end > MAX_PART_HEADER_BYTES {
            return Err(MultipartError::HeadersTooLarge);
        }
        let headers = parse_part_headers(&self.buf[..end]);
        self.buf.drain(..end + 4);
        self.in_body = true;
        Ok(Some(headers))
    }

    /// Stream the current part body into `sink`. Returns the bytes copied.
    pub fn copy_body<F>(&mut self, mut sink: F) -> Result<u64, MultipartError>
    where
        F: FnMut(&[u8]) -> Result<(), StorageError>,
    {
        if !self.in_body {
            return Ok(0);
        }
        let mut copied = 0u64;
        loop {
            if let Some(pos) = find(&self.buf, &self.delimiter) {
                if pos > 0 {
                    sink(&self.buf[..pos])?;
                    copied += pos as u64;
                }
                self.buf.drain(..pos);
                self.in_body = false;
                return Ok(copied);
            }

            let keep = self.delimiter.len() - 1;
            if self.buf.len() > keep {
                let safe = self.buf.len() - keep;
                sink(&self.buf[..safe])?;
                copied += safe as u64;
                self.buf.drain(..safe);
            }

            if !self.fill()? {
                return Err(MultipartError::Truncated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader handing out at most `step` bytes per call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len() - self.pos);
            out[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, filename, data) in parts {
            out.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match filename {
                Some(f) => out.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        name, f
                    )
                    .as_bytes(),
                ),
                None => out.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                ),
            }
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        out
    }

    fn collect<R: Read>(reader: &mut MultipartReader<R>) -> Vec<u8> {
        let mut out = Vec::new();
        reader
            .copy_body(|chunk| {
                out.extend_from_slice(chunk);
                Ok(())
            })
            .unwrap();
        out
    }

    // ==================== Boundary Tests ====================

    #[test]
    fn test_boundary_plain() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=----abc123"),
            Some("----abc123".to_string())
        );
    }

    #[test]
    fn test_boundary_quoted() {
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; Boundary=\"x y\""),
            Some("x y".to_string())
        );
    }

    #[test]
    fn test_boundary_rejected() {
        assert_eq!(boundary_from_content_type("text/plain; boundary=x"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
        assert_eq!(boundary_from_content_type("multipart/form-data; boundary="), None);
        let long = format!("multipart/form-data; boundary={}", "b".repeat(71));
        assert_eq!(boundary_from_content_type(&long), None);
    }

    // ==================== Part Tests ====================

    #[test]
    fn test_single_file_part() {
        let data = body("XyZ", &[("upload", Some("notes.txt"), b"hello world")]);
        let mut reader = MultipartReader::new(Cursor::new(data), "XyZ");

        let part = reader.next_part().unwrap().unwrap();
        assert_eq!(part.name.as_deref(), Some("upload"));
        assert_eq!(part.filename.as_deref(), Some("notes.txt"));
        assert_eq!(part.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(collect(&mut reader), b"hello world");
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_skips_unread_parts() {
        let data = body(
            "b",
            &[
                ("note", None, b"ignored field"),
                ("upload", Some("a.bin"), b"\x00\x01\x02"),
            ],
        );
        let mut reader = MultipartReader::new(Cursor::new(data), "b");

        let field = reader.next_part().unwrap().unwrap();
        assert_eq!(field.filename, None);
        let file = reader.next_part().unwrap().unwrap();
        assert_eq!(file.filename.as_deref(), Some("a.bin"));
        assert_eq!(collect(&mut reader), vec![0, 1, 2]);
        assert!(reader.next_part().unwrap().is_none());
    }

    #[test]
    fn test_preamble_ignored() {
        let mut data = b"this is a preamble\r\n".to_vec();
        data.extend(body("bnd", &[("f", Some("x.txt"), b"x")]));
        let mut reader = MultipartReader::new(Cursor::new(data), "bnd");
        assert!(reader.next_part().unwrap().is_some());
        assert_eq!(collect(&mut reader), b"x");
    }

    #[test]
    fn test_body_containing_crlf_dashes() {
        let payload = b"line1\r\n--not-the-boundary\r\nline3";
        let data = body("real", &[("f", Some("x.txt"), payload)]);
        let mut reader = MultipartReader::new(Cursor::new(data), "real");
        reader.next_part().unwrap();
        assert_eq!(collect(&mut reader), payload);
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let data = body("----WebKitFormBoundary7MA4YWxk", &[("f", Some("big.bin"), &payload)]);
        for step in [1, 3, 17, 64, 2048] {
            let trickle = Trickle {
                data: data.clone(),
                pos: 0,
                step,
            };
            let mut reader = MultipartReader::new(trickle, "----WebKitFormBoundary7MA4YWxk");
            reader.next_part().unwrap().unwrap();
            assert_eq!(collect(&mut reader), payload, "step {}", step);
            assert!(reader.next_part().unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_file() {
        let data = body("b", &[("f", Some("empty.txt"), b"")]);
        let mut reader = MultipartReader::new(Cursor::new(data), "b");
        reader.next_part().unwrap();
        assert_eq!(collect(&mut reader), b"");
    }

    // ==================== Error Tests ====================

    #[test]
    fn test_truncated_body() {
        let mut data = body("b", &[("f", Some("x.txt"), b"partial data")]);
        data.truncate(data.len() - 12);
        let mut reader = MultipartReader::new(Cursor::new(data), "b");
        reader.next_part().unwrap();
        let result = reader.copy_body(|_| Ok(()));
        assert!(matches!(result, Err(MultipartError::Truncated)));
    }

    #[test]
    fn test_no_delimiter_at_all() {
        let mut reader = MultipartReader::new(Cursor::new(b"garbage".to_vec()), "b");
        assert!(matches!(reader.next_part(), Err(MultipartError::Truncated)));
    }

    #[test]
    fn test_sink_error_propagates() {
        let data = body("b", &[("f", Some("x.txt"), b"data")]);
        let mut reader = MultipartReader::new(Cursor::new(data), "b");
        reader.next_part().unwrap();
        let result = reader.copy_body(|_| Err(StorageError::NotFound("/x.txt".into())));
        assert!(matches!(result, Err(MultipartError::Storage(_))));
    }
}
