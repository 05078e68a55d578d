//! Declarative description of a web API call.
//!
//! # Design
//! A `Request` implementation only states what differs per endpoint: base
//! URL, method, path and how to build the typed response. Everything else
//! has a provided default. The two composed operations, `build_request` and
//! `parse_response`, are provided methods too and are what `Session` calls;
//! implementations normally leave them alone and customize the hooks
//! (`intercept_request`, `intercept_response`, `data_parser`, ...) instead.

use std::ops::Range;

use serde_json::Value;
use url::Url;

use crate::error::{BoxError, RequestError, ResponseError};
use crate::http::{HttpMethod, ResponseHead, WireRequest};
use crate::parameters::{BodyParameters, JsonBodyParameters, QueryParameters, UrlEncodedQueryParameters};
use crate::parser::{DataParser, JsonDataParser, ResponseObject};

pub trait Request: Send + Sync + 'static {
    /// Typed result delivered to the caller.
    type Response: Send + 'static;

    fn base_url(&self) -> String;

    fn method(&self) -> HttpMethod;

    /// Path appended to `base_url`. An empty path leaves the base untouched.
    fn path(&self) -> String;

    /// Generic parameters. Sent as the URL query for methods that prefer
    /// query parameters and as a JSON body otherwise, unless
    /// `query_parameters`/`body_parameters` are overridden.
    fn parameters(&self) -> Option<Value> {
        None
    }

    fn query_parameters(&self) -> Option<Box<dyn QueryParameters>> {
        if !self.method().prefers_query_parameters() {
            return None;
        }
        let parameters = self.parameters()?;
        let query = UrlEncodedQueryParameters::from_json(&parameters).ok()?;
        Some(Box::new(query))
    }

    fn body_parameters(&self) -> Option<Box<dyn BodyParameters>> {
        if self.method().prefers_query_parameters() {
            return None;
        }
        let parameters = self.parameters()?;
        Some(Box::new(JsonBodyParameters::new(parameters)))
    }

    /// Extra headers. These win over the `Accept` and `Content-Type` headers
    /// derived from `data_parser` and `body_parameters`.
    fn header_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn data_parser(&self) -> Box<dyn DataParser> {
        Box::new(JsonDataParser)
    }

    /// Status codes `intercept_response` lets through.
    fn acceptable_status_codes(&self) -> Range<u16> {
        200..300
    }

    /// Last chance to adjust or reject the wire request. An error here is
    /// reported as a request construction failure.
    fn intercept_request(&self, request: WireRequest) -> Result<WireRequest, BoxError> {
        Ok(request)
    }

    /// Validate the parsed response before it is turned into `Response`.
    fn intercept_response(&self, object: ResponseObject, head: &ResponseHead) -> Result<ResponseObject, BoxError> {
        if !self.acceptable_status_codes().contains(&head.status) {
            return Err(ResponseError::UnacceptableStatusCode(head.status).into());
        }
        Ok(object)
    }

    fn response(&self, object: ResponseObject, head: &ResponseHead) -> Result<Self::Response, BoxError>;

    /// Compose the wire request from this description.
    fn build_request(&self) -> Result<WireRequest, BoxError> {
        let base_url = self.base_url();
        let mut url = Url::parse(&base_url).map_err(|e| RequestError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(RequestError::InvalidBaseUrl {
                url: base_url,
                reason: "url cannot carry a path".to_string(),
            }
            .into());
        }

        let path = self.path();
        if !path.is_empty() {
            let joined = format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                path.trim_start_matches('/')
            );
            url.set_path(&joined);
        }

        if let Some(query) = self.query_parameters().and_then(|q| q.encode()) {
            if !query.is_empty() {
                url.set_query(Some(&query));
            }
        }

        let mut request = WireRequest::new(self.method(), url.as_str());

        if let Some(body) = self.body_parameters() {
            request.set_header("Content-Type", body.content_type());
            request.body = Some(body.build_entity()?);
        }

        if let Some(accept) = self.data_parser().content_type() {
            request.set_header("Accept", accept);
        }

        for (name, value) in self.header_fields() {
            if !is_valid_header(&name, &value) {
                return Err(RequestError::InvalidHeader { name }.into());
            }
            request.set_header(&name, value);
        }

        self.intercept_request(request)
    }

    /// Decode a raw response: parse, intercept, then build the typed value.
    fn parse_response(&self, data: &[u8], head: &ResponseHead) -> Result<Self::Response, BoxError> {
        let parsed = self.data_parser().parse(data)?;
        let passed = self.intercept_response(parsed, head)?;
        self.response(passed, head)
    }
}

fn is_valid_header(name: &str, value: &str) -> bool {
    let token = |b: u8| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b);
    !name.is_empty() && name.bytes().all(token) && !value.bytes().any(|b| b == b'\r' || b == b'\n')
}
