//! Error types for the request toolkit.
//!
//! # Design
//! `SessionTaskError` is the only error a `Session` callback ever sees. Its
//! four variants follow the lifecycle of a task: the request could not be
//! built, the transport failed (cancellation included), the transport
//! returned something that is not an HTTP response, or the response could
//! not be turned into the typed result. Foreign causes travel as `BoxError`
//! so request implementations can fail with their own error types.
//!
//! None of these errors are retried internally.

use thiserror::Error;

use crate::http::ResponseMetadata;
use crate::transport::TransportError;

/// Boxed error carried across the request/response hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The terminal error delivered to a `Session::send` handler.
#[derive(Debug, Error)]
pub enum SessionTaskError {
    /// The wire request could not be constructed. No task was created.
    #[error("request construction failed: {0}")]
    Request(#[source] BoxError),

    /// The transport reported a failure, including cancellation.
    #[error("connection failed: {0}")]
    Connection(#[source] TransportError),

    /// The transport returned metadata that is not a well-formed HTTP response.
    #[error("malformed response: {0}")]
    ResponseShape(#[source] ResponseError),

    /// Parsing, status validation, or typed construction of the response failed.
    #[error("response decoding failed: {0}")]
    ResponseDecoding(#[source] BoxError),
}

impl SessionTaskError {
    /// True if this is a connection failure caused by cancelling the task.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionTaskError::Connection(e) if e.is_cancelled())
    }

    /// Downcast the cause of a `ResponseDecoding` error to a concrete type.
    pub fn decoding_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            SessionTaskError::ResponseDecoding(cause) => cause.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Downcast the cause of a `Request` error to a concrete type.
    pub fn request_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            SessionTaskError::Request(cause) => cause.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Errors raised while turning a `Request` into a `WireRequest`.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid base url `{url}`: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// A header name is not an HTTP token or its value contains a line break.
    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },
}

/// Errors describing an unusable response.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The transport metadata is missing or is not an HTTP response.
    #[error("response is not an HTTP response: {0:?}")]
    NonHttpResponse(Option<ResponseMetadata>),

    /// An HTTP response arrived without a body buffer.
    #[error("HTTP response carried no body buffer")]
    MissingBody,

    /// The status code is outside the acceptable set.
    #[error("unacceptable status code {0}")]
    UnacceptableStatusCode(u16),

    /// The parsed object does not have the shape the request expects.
    #[error("unexpected response object: {0}")]
    UnexpectedObject(String),
}

/// Errors raised while serializing structured parameters into a body.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("value is not a JSON object or array")]
    InvalidJsonObject,

    #[error("value is not an object: {0}")]
    NotAnObject(String),

    #[error("json serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by `DataParser` implementations.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response body is not valid UTF-8")]
    InvalidUtf8,

    #[error("json parse failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while constructing multipart parts.
#[derive(Debug, Error)]
pub enum PartError {
    #[error("cannot read size of `{path}`: {source}")]
    FileSize {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{0}` is not a regular file")]
    NotAFile(String),
}
