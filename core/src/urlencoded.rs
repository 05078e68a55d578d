//! `application/x-www-form-urlencoded` serialization.
//!
//! Used for URL query strings, form bodies, and form response parsing.
//! Keys and values are escaped so that only RFC 3986 unreserved characters
//! plus `/` and `?` pass through untouched. A `None` value is written as a
//! bare key with no `=`.

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::{ParseError, SerializationError};

/// Ordered form fields. `None` is the null value.
pub type FormFields = BTreeMap<String, Option<String>>;

/// Everything outside the query-allowed set, plus the reserved delimiters.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/')
    .remove(b'?');

pub fn escape(input: &str) -> String {
    utf8_percent_encode(input, QUERY_ESCAPE).to_string()
}

/// Decode percent escapes. `+` is kept as a literal plus sign.
pub fn unescape(input: &str) -> Result<String, ParseError> {
    percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| ParseError::InvalidUtf8)
}

/// Serialize `fields` as `k=v&k2=v2`.
pub fn to_string(fields: &FormFields) -> String {
    fields
        .iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{}={}", escape(key), escape(value)),
            None => escape(key),
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn from_str(input: &str) -> Result<FormFields, ParseError> {
    let mut fields = FormFields::new();
    for pair in input.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, Some(unescape(value)?)),
            None => (pair, None),
        };
        fields.insert(unescape(key)?, value);
    }
    Ok(fields)
}

pub fn from_bytes(input: &[u8]) -> Result<FormFields, ParseError> {
    let input = std::str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)?;
    from_str(input)
}

/// Flatten a JSON object into form fields.
///
/// Strings are taken verbatim, `null` becomes a bare key, and any other
/// value is written as its JSON text.
pub fn fields_from_json(value: &Value) -> Result<FormFields, SerializationError> {
    let object = value
        .as_object()
        .ok_or_else(|| SerializationError::NotAnObject(value.to_string()))?;
    Ok(object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            (key.clone(), value)
        })
        .collect())
}
