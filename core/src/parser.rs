//! Response body parsers.
//!
//! A `DataParser` turns the raw response buffer into a `ResponseObject` and
//! names the media type it accepts (sent as the `Accept` header).

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{BoxError, ParseError, ResponseError};
use crate::urlencoded::{self, FormFields};

/// Structured, not yet typed, response value.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseObject {
    Json(Value),
    Form(FormFields),
    Text(String),
    Bytes(Vec<u8>),
}

impl ResponseObject {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseObject::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseObject::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormFields> {
        match self {
            ResponseObject::Form(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseObject::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Deserialize a JSON (or raw JSON bytes) object into `T`.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, BoxError> {
        match self {
            ResponseObject::Json(value) => Ok(serde_json::from_value(value)?),
            ResponseObject::Bytes(bytes) => Ok(serde_json::from_slice(&bytes)?),
            other => Err(ResponseError::UnexpectedObject(format!("{other:?}")).into()),
        }
    }
}

pub trait DataParser: Send + Sync {
    /// Value for the `Accept` request header, if any.
    fn content_type(&self) -> Option<&str>;

    fn parse(&self, data: &[u8]) -> Result<ResponseObject, BoxError>;
}

/// Parses JSON. An empty body parses to an empty object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataParser;

impl DataParser for JsonDataParser {
    fn content_type(&self) -> Option<&str> {
        Some("application/json")
    }

    fn parse(&self, data: &[u8]) -> Result<ResponseObject, BoxError> {
        if data.is_empty() {
            return Ok(ResponseObject::Json(Value::Object(Default::default())));
        }
        let value = serde_json::from_slice(data).map_err(ParseError::from)?;
        Ok(ResponseObject::Json(value))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FormUrlEncodedDataParser;

impl DataParser for FormUrlEncodedDataParser {
    fn content_type(&self) -> Option<&str> {
        Some("application/x-www-form-urlencoded")
    }

    fn parse(&self, data: &[u8]) -> Result<ResponseObject, BoxError> {
        Ok(ResponseObject::Form(urlencoded::from_bytes(data)?))
    }
}

/// Decodes the body as UTF-8 text. Sends no `Accept` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDataParser;

impl DataParser for StringDataParser {
    fn content_type(&self) -> Option<&str> {
        None
    }

    fn parse(&self, data: &[u8]) -> Result<ResponseObject, BoxError> {
        let text = std::str::from_utf8(data).map_err(|_| ParseError::InvalidUtf8)?;
        Ok(ResponseObject::Text(text.to_string()))
    }
}

/// Passes the body through untouched.
///
/// Covers protobuf payloads and JSON that is decoded later by the typed
/// response builder.
#[derive(Debug, Clone)]
pub struct RawDataParser {
    accept: Option<String>,
}

impl RawDataParser {
    pub fn new(accept: Option<&str>) -> Self {
        Self {
            accept: accept.map(str::to_string),
        }
    }

    pub fn protobuf() -> Self {
        Self::new(Some("application/protobuf"))
    }

    pub fn json() -> Self {
        Self::new(Some("application/json"))
    }
}

impl DataParser for RawDataParser {
    fn content_type(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    fn parse(&self, data: &[u8]) -> Result<ResponseObject, BoxError> {
        Ok(ResponseObject::Bytes(data.to_vec()))
    }
}
