//! Local HTTP server used by the integration tests.
//!
//! Every endpoint reflects what it received so tests can assert on the exact
//! wire traffic a client produced:
//!
//! - `ANY /anything` echoes method, raw query, parsed query, headers and body.
//! - `GET /status/{code}` answers with the given status code.
//! - `GET /delay/{ms}` answers after sleeping.
//! - `POST /form` parses a urlencoded body and returns the fields as JSON.
//! - `POST /echo-form` returns the raw body as a urlencoded response.
//! - `POST /upload` parses a multipart body and summarizes each part.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, RawQuery},
    http::{header, HeaderMap, Method, StatusCode},
    routing::{any, get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    pub args: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadedPart {
    pub name: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub text: Option<String>,
}

pub fn app() -> Router {
    Router::new()
        .route("/anything", any(anything))
        .route("/status/{code}", get(status))
        .route("/delay/{ms}", get(delay))
        .route("/form", post(form))
        .route("/echo-form", post(echo_form))
        .route("/upload", post(upload))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn anything(
    method: Method,
    RawQuery(query): RawQuery,
    Query(args): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Json(Echo {
        method: method.as_str().to_string(),
        query,
        args,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, Json(serde_json::json!({ "status": code }))))
}

async fn delay(Path(ms): Path<u64>) -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(serde_json::json!({ "delayed_ms": ms }))
}

async fn form(Form(fields): Form<BTreeMap<String, String>>) -> Json<BTreeMap<String, String>> {
    Json(fields)
}

async fn echo_form(body: Bytes) -> ([(header::HeaderName, &'static str); 1], Bytes) {
    ([(header::CONTENT_TYPE, "application/x-www-form-urlencoded")], body)
}

async fn upload(mut multipart: Multipart) -> Result<Json<Vec<UploadedPart>>, (StatusCode, String)> {
    let mut parts = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        debug!(?name, size = data.len(), "received part");
        parts.push(UploadedPart {
            name,
            file_name,
            content_type,
            size: data.len(),
            text: String::from_utf8(data.to_vec()).ok(),
        });
    }
    Ok(Json(parts))
}
