//! Typed web API requests over a pluggable transport.
//!
//! # Overview
//! A `Request` describes one API call declaratively: method, URL, parameters,
//! how to parse the response and how to turn it into a typed value. `Session`
//! builds the wire request, hands it to a `Transport`, tracks the task until
//! it completes, and delivers the typed result on a `CallbackQueue`.
//!
//! # Design
//! - The core never touches the network. A `Transport` implementation (an
//!   HTTP client, or a scripted fake in tests) owns all I/O.
//! - Bodies are built by `BodyParameters` strategies. Multipart bodies are
//!   produced by a lazy `MultipartStream` that reads part sources on demand,
//!   so large files are never loaded into memory unless asked for.
//! - Responses are parsed by `DataParser` strategies into a `ResponseObject`
//!   before the request-specific builder produces the typed response.
//! - Every `send` that reaches the transport yields exactly one handler call.

pub mod body;
pub mod callback;
pub mod error;
pub mod http;
pub mod multipart;
pub mod parameters;
pub mod parser;
pub mod request;
pub mod session;
pub mod transport;
pub mod urlencoded;

pub use body::{BodyEntity, BodyStream};
pub use callback::{CallbackQueue, WorkerQueue};
pub use error::{BoxError, ParseError, PartError, RequestError, ResponseError, SerializationError, SessionTaskError};
pub use http::{HttpMethod, ResponseHead, ResponseMetadata, WireRequest};
pub use multipart::{MultipartStream, Part, StreamStatus};
pub use parameters::{
    BodyParameters, CustomBodyParameters, EntityKind, FormUrlEncodedBodyParameters, JsonBodyParameters,
    MultipartFormDataBodyParameters, ProtobufBodyParameters, QueryParameters, UrlEncodedQueryParameters,
};
pub use parser::{DataParser, FormUrlEncodedDataParser, JsonDataParser, RawDataParser, ResponseObject, StringDataParser};
pub use request::Request;
pub use session::Session;
pub use transport::{CompletionHandler, TaskHandle, TaskId, TasksHandler, Transport, TransportError, TransportErrorKind};
pub use urlencoded::FormFields;
