//! Request body entities.
//!
//! A body is either fully materialized bytes or a lazy stream that the
//! transport pulls from while uploading. Streams implement `BodyStream`,
//! which is `std::io::Read` plus an explicit "more to come" query.

use std::fmt;
use std::io::{self, Read};

/// Chunk size used by `drain`.
const DRAIN_CHUNK: usize = 64 * 1024;

/// A readable body source with a known end.
pub trait BodyStream: Read + Send {
    /// True while the stream has not produced all of its bytes.
    fn has_bytes_available(&self) -> bool;

    /// Total number of bytes the stream yields, when known up front.
    fn content_length(&self) -> Option<u64> {
        None
    }
}

/// Request body produced by a `BodyParameters` strategy.
pub enum BodyEntity {
    Bytes(Vec<u8>),
    Stream(Box<dyn BodyStream>),
}

impl BodyEntity {
    /// Body length if it can be known without reading.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            BodyEntity::Bytes(bytes) => Some(bytes.len() as u64),
            BodyEntity::Stream(stream) => stream.content_length(),
        }
    }

    /// Materialize the entity into memory.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self {
            BodyEntity::Bytes(bytes) => Ok(bytes),
            BodyEntity::Stream(mut stream) => drain(&mut stream),
        }
    }
}

impl fmt::Debug for BodyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyEntity::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            BodyEntity::Stream(stream) => f
                .debug_struct("Stream")
                .field("content_length", &stream.content_length())
                .finish(),
        }
    }
}

/// Read `stream` to the end and return everything it produced.
///
/// A read error aborts the drain; it is never mistaken for end of stream.
pub fn drain<R: Read + ?Sized>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; DRAIN_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(data),
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
