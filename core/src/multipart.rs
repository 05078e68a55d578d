//! Streaming multipart/form-data encoder.
//!
//! # Overview
//! A `MultipartStream` is the logical concatenation
//!
//! ```text
//! header(1) | body(1) | CRLF | header(2) | body(2) | CRLF | ... | --boundary--CRLF
//! ```
//!
//! served through `Read` in chunks of any size. Header and footer segments
//! are copied out of small precomputed buffers; body segments are delegated
//! to each part's own source.
//!
//! # Design
//! - Each part is framed by a `PartStream` which owns the cursor for its own
//!   three segments. The composed stream only decides which part the global
//!   cursor falls into (binary search over cumulative part offsets) and hands
//!   the read down.
//! - Part sources are opened the first time the cursor reaches the body
//!   segment and dropped as soon as the segment is exhausted, so at most one
//!   file handle is open at any time.
//! - Framing arithmetic trusts `Part::length`. A source that yields more is
//!   truncated; a source that yields less makes `read` return early and the
//!   stream never reaches its end. Callers must declare exact lengths.
//! - A cursor outside every segment means the bookkeeping is broken. That is
//!   a bug, not an I/O condition, and it panics.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::body::BodyStream;
use crate::error::PartError;

const CRLF: &[u8] = b"\r\n";

/// Produces a fresh reader over a part's body each time it is called.
pub type ReaderOpener = Arc<dyn Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync>;

/// Where a part's body bytes come from.
#[derive(Clone)]
pub enum PartSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
    Reader(ReaderOpener),
}

impl PartSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match self {
            PartSource::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            PartSource::File(path) => Ok(Box::new(File::open(path)?)),
            PartSource::Reader(opener) => opener(),
        }
    }
}

impl fmt::Debug for PartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            PartSource::File(path) => f.debug_tuple("File").field(path).finish(),
            PartSource::Reader(_) => f.write_str("Reader"),
        }
    }
}

/// A single named part of a multipart/form-data body.
#[derive(Debug, Clone)]
pub struct Part {
    source: PartSource,
    name: String,
    mime_type: Option<String>,
    file_name: Option<String>,
    length: u64,
}

impl Part {
    /// A part holding the textual form of `value`, encoded as UTF-8.
    pub fn value(value: impl fmt::Display, name: impl Into<String>) -> Self {
        Self::data(value.to_string().into_bytes(), name)
    }

    /// A part holding an in-memory buffer.
    pub fn data(data: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        let data: Arc<[u8]> = Arc::from(data.into());
        Self {
            length: data.len() as u64,
            source: PartSource::Bytes(data),
            name: name.into(),
            mime_type: None,
            file_name: None,
        }
    }

    /// A part streaming the contents of a file.
    ///
    /// The length is taken from the file's metadata. The mime type is guessed
    /// from the extension and the file name defaults to the last path
    /// component; both can be overridden afterwards.
    pub fn file(path: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, PartError> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|source| PartError::FileSize {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(PartError::NotAFile(path.display().to_string()));
        }
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(mime_type_for_extension)
            .unwrap_or("application/octet-stream");
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Self {
            source: PartSource::File(path.to_path_buf()),
            name: name.into(),
            mime_type: Some(mime_type.to_string()),
            file_name,
            length: metadata.len(),
        })
    }

    /// A part streaming from caller-provided readers.
    ///
    /// `length` must be the exact number of bytes each reader yields.
    pub fn reader<F, R>(opener: F, length: u64, name: impl Into<String>) -> Self
    where
        F: Fn() -> io::Result<R> + Send + Sync + 'static,
        R: Read + Send + 'static,
    {
        let opener: ReaderOpener =
            Arc::new(move || opener().map(|r| Box::new(r) as Box<dyn Read + Send>));
        Self {
            source: PartSource::Reader(opener),
            name: name.into(),
            mime_type: None,
            file_name: None,
            length,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    fn header(&self, boundary: &str) -> Vec<u8> {
        let header = match (&self.mime_type, &self.file_name) {
            (Some(mime_type), Some(file_name)) => format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\nContent-Type: {mime_type}\r\n\r\n",
                self.name
            ),
            (Some(mime_type), None) => format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"; \r\nContent-Type: {mime_type}\r\n\r\n",
                self.name
            ),
            _ => format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
                self.name
            ),
        };
        header.into_bytes()
    }
}

fn mime_type_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "json" => "application/json",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

/// Copy as much of `segment[offset..]` into `out` as fits.
fn copy_segment(segment: &[u8], offset: u64, out: &mut [u8]) -> usize {
    let start = offset as usize;
    let n = (segment.len() - start).min(out.len());
    out[..n].copy_from_slice(&segment[start..start + n]);
    n
}

/// The framed byte stream of one part: header, body, CRLF.
pub struct PartStream {
    header: Vec<u8>,
    source: PartSource,
    reader: Option<Box<dyn Read + Send>>,
    name: String,
    body_length: u64,
    total_length: u64,
    total_sent: u64,
    pending_error: Option<io::Error>,
}

impl PartStream {
    pub fn new(part: &Part, boundary: &str) -> Self {
        let header = part.header(boundary);
        let total_length = header.len() as u64 + part.length + CRLF.len() as u64;
        Self {
            header,
            source: part.source.clone(),
            reader: None,
            name: part.name.clone(),
            body_length: part.length,
            total_length,
            total_sent: 0,
            pending_error: None,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Whether the underlying body source is currently open.
    pub fn is_source_open(&self) -> bool {
        self.reader.is_some()
    }

    fn body_start(&self) -> u64 {
        self.header.len() as u64
    }

    fn body_end(&self) -> u64 {
        self.body_start() + self.body_length
    }

    fn read_body(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = self.body_end() - self.total_sent;
        let want = (out.len() as u64).min(remaining) as usize;
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => {
                debug!(part = %self.name, length = self.body_length, "opening part source");
                self.source.open()?
            }
        };
        let reader = self.reader.insert(reader);
        let n = reader.read(&mut out[..want])?;
        if n as u64 == remaining {
            self.reader = None;
        }
        Ok(n)
    }
}

impl Read for PartStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }

        let mut sent = 0;
        while sent < buf.len() && self.total_sent < self.total_length {
            let out = &mut buf[sent..];
            let n = if self.total_sent < self.body_start() {
                copy_segment(&self.header, self.total_sent, out)
            } else if self.total_sent < self.body_end() {
                match self.read_body(out) {
                    // Source stalled before its declared length; hand back what we have.
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if sent > 0 => {
                        self.pending_error = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                copy_segment(CRLF, self.total_sent - self.body_end(), out)
            };
            sent += n;
            self.total_sent += n as u64;
        }
        Ok(sent)
    }
}

impl BodyStream for PartStream {
    fn has_bytes_available(&self) -> bool {
        self.total_sent < self.total_length
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.total_length)
    }
}

/// Lifecycle of a `MultipartStream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    NotOpen,
    Open,
    Reading,
    AtEnd,
    Closed,
}

/// The complete multipart/form-data body as a lazy byte stream.
pub struct MultipartStream {
    parts: Vec<PartStream>,
    part_offsets: Vec<u64>,
    parts_length: u64,
    footer: Vec<u8>,
    total_length: u64,
    total_sent: u64,
    status: StreamStatus,
    pending_error: Option<io::Error>,
}

impl MultipartStream {
    pub fn new(parts: &[Part], boundary: &str) -> Self {
        let parts: Vec<PartStream> = parts.iter().map(|p| PartStream::new(p, boundary)).collect();
        let mut part_offsets = Vec::with_capacity(parts.len());
        let mut parts_length = 0;
        for part in &parts {
            part_offsets.push(parts_length);
            parts_length += part.total_length();
        }
        let footer = format!("--{boundary}--\r\n").into_bytes();
        let total_length = parts_length + footer.len() as u64;
        Self {
            parts,
            part_offsets,
            parts_length,
            footer,
            total_length,
            total_sent: 0,
            status: StreamStatus::NotOpen,
            pending_error: None,
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    pub fn open(&mut self) {
        if self.status == StreamStatus::NotOpen {
            self.status = StreamStatus::Open;
        }
    }

    /// Close the stream. Terminal: further reads fail.
    pub fn close(&mut self) {
        self.status = StreamStatus::Closed;
        for part in &mut self.parts {
            part.reader = None;
        }
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    /// Number of part sources currently open.
    pub fn open_sources(&self) -> usize {
        self.parts.iter().filter(|p| p.is_source_open()).count()
    }

    fn current_part(&mut self) -> &mut PartStream {
        let index = self.part_offsets.partition_point(|&start| start <= self.total_sent) - 1;
        let part = &mut self.parts[index];
        let local = self.total_sent - self.part_offsets[index];
        if part.total_sent() != local {
            panic!(
                "multipart cursor out of sync: global offset {} maps to {} in part {}, part reports {}",
                self.total_sent,
                local,
                index,
                part.total_sent()
            );
        }
        part
    }
}

impl Read for MultipartStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.status {
            StreamStatus::Closed => {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "multipart stream is closed"))
            }
            StreamStatus::NotOpen => self.open(),
            _ => {}
        }
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        if self.has_bytes_available() {
            self.status = StreamStatus::Reading;
        }

        let mut sent = 0;
        while sent < buf.len() && self.total_sent < self.total_length {
            let out = &mut buf[sent..];
            let n = if self.total_sent < self.parts_length {
                match self.current_part().read(out) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if sent > 0 => {
                        self.pending_error = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            } else {
                copy_segment(&self.footer, self.total_sent - self.parts_length, out)
            };
            sent += n;
            self.total_sent += n as u64;
        }

        if !self.has_bytes_available() {
            self.status = StreamStatus::AtEnd;
        }
        Ok(sent)
    }
}

impl BodyStream for MultipartStream {
    fn has_bytes_available(&self) -> bool {
        self.total_sent < self.total_length
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.total_length)
    }
}

impl fmt::Debug for MultipartStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartStream")
            .field("parts", &self.parts.len())
            .field("total_length", &self.total_length)
            .field("total_sent", &self.total_sent)
            .field("status", &self.status)
            .finish()
    }
}
