//! Strategies that turn structured parameters into a request body or a URL
//! query string.
//!
//! Each `BodyParameters` implementation names the `Content-Type` it produces
//! and builds a `BodyEntity`. `build_entity` takes `&self` and may be called
//! more than once; multipart sources are reopened for every entity.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::body::{drain, BodyEntity};
use crate::error::{BoxError, SerializationError};
use crate::multipart::{MultipartStream, Part};
use crate::urlencoded::{self, FormFields};

/// Serializes parameters into a request body.
pub trait BodyParameters: Send {
    /// Value for the `Content-Type` request header.
    fn content_type(&self) -> String;

    fn build_entity(&self) -> Result<BodyEntity, BoxError>;
}

/// Produces the percent-encoded query component of a URL.
pub trait QueryParameters: Send {
    /// `None` (or an empty string) leaves the URL without a query.
    fn encode(&self) -> Option<String>;
}

/// JSON request body.
#[derive(Debug, Clone)]
pub struct JsonBodyParameters {
    value: Value,
    pretty: bool,
}

impl JsonBodyParameters {
    pub fn new(value: Value) -> Self {
        Self { value, pretty: false }
    }

    pub fn from_serializable<T: Serialize>(input: &T) -> Result<Self, SerializationError> {
        Ok(Self::new(serde_json::to_value(input)?))
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }
}

impl BodyParameters for JsonBodyParameters {
    fn content_type(&self) -> String {
        "application/json".to_string()
    }

    fn build_entity(&self) -> Result<BodyEntity, BoxError> {
        if !(self.value.is_object() || self.value.is_array()) {
            return Err(SerializationError::InvalidJsonObject.into());
        }
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&self.value)
        } else {
            serde_json::to_vec(&self.value)
        }
        .map_err(SerializationError::from)?;
        Ok(BodyEntity::Bytes(bytes))
    }
}

/// `application/x-www-form-urlencoded` request body.
#[derive(Debug, Clone, Default)]
pub struct FormUrlEncodedBodyParameters {
    fields: FormFields,
}

impl FormUrlEncodedBodyParameters {
    pub fn new(fields: FormFields) -> Self {
        Self { fields }
    }

    pub fn from_json(value: &Value) -> Result<Self, SerializationError> {
        Ok(Self::new(urlencoded::fields_from_json(value)?))
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }
}

impl BodyParameters for FormUrlEncodedBodyParameters {
    fn content_type(&self) -> String {
        "application/x-www-form-urlencoded".to_string()
    }

    fn build_entity(&self) -> Result<BodyEntity, BoxError> {
        Ok(BodyEntity::Bytes(urlencoded::to_string(&self.fields).into_bytes()))
    }
}

/// How a multipart body is handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityKind {
    /// Drain the encoder into memory up front.
    #[default]
    Bytes,
    /// Hand the lazy encoder to the transport.
    Stream,
}

/// `multipart/form-data` request body.
#[derive(Debug, Clone)]
pub struct MultipartFormDataBodyParameters {
    parts: Vec<Part>,
    boundary: String,
    entity_kind: EntityKind,
}

impl MultipartFormDataBodyParameters {
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            parts,
            boundary: random_boundary(),
            entity_kind: EntityKind::default(),
        }
    }

    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    pub fn with_entity_kind(mut self, entity_kind: EntityKind) -> Self {
        self.entity_kind = entity_kind;
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn stream(&self) -> MultipartStream {
        MultipartStream::new(&self.parts, &self.boundary)
    }
}

fn random_boundary() -> String {
    let mut boundary = Uuid::new_v4().simple().to_string();
    boundary.truncate(16);
    boundary
}

impl BodyParameters for MultipartFormDataBodyParameters {
    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn build_entity(&self) -> Result<BodyEntity, BoxError> {
        let mut stream = self.stream();
        match self.entity_kind {
            EntityKind::Stream => Ok(BodyEntity::Stream(Box::new(stream))),
            EntityKind::Bytes => Ok(BodyEntity::Bytes(drain(&mut stream)?)),
        }
    }
}

/// Pre-serialized protobuf message body.
#[derive(Debug, Clone)]
pub struct ProtobufBodyParameters {
    message: Vec<u8>,
}

impl ProtobufBodyParameters {
    pub fn new(message: Vec<u8>) -> Self {
        Self { message }
    }
}

impl BodyParameters for ProtobufBodyParameters {
    fn content_type(&self) -> String {
        "application/protobuf".to_string()
    }

    fn build_entity(&self) -> Result<BodyEntity, BoxError> {
        Ok(BodyEntity::Bytes(self.message.clone()))
    }
}

/// Caller-supplied content type and bytes.
#[derive(Debug, Clone)]
pub struct CustomBodyParameters {
    content_type: String,
    bytes: Vec<u8>,
}

impl CustomBodyParameters {
    pub fn new(content_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

impl BodyParameters for CustomBodyParameters {
    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    fn build_entity(&self) -> Result<BodyEntity, BoxError> {
        Ok(BodyEntity::Bytes(self.bytes.clone()))
    }
}

/// URL query built from form fields.
#[derive(Debug, Clone, Default)]
pub struct UrlEncodedQueryParameters {
    fields: FormFields,
}

impl UrlEncodedQueryParameters {
    pub fn new(fields: FormFields) -> Self {
        Self { fields }
    }

    pub fn from_json(value: &Value) -> Result<Self, SerializationError> {
        Ok(Self::new(urlencoded::fields_from_json(value)?))
    }
}

impl QueryParameters for UrlEncodedQueryParameters {
    fn encode(&self) -> Option<String> {
        if self.fields.is_empty() {
            return None;
        }
        Some(urlencoded::to_string(&self.fields))
    }
}
