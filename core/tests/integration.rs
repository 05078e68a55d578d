//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port, then drives a `Session` over a
//! small blocking `Transport` built on ureq. Each resumed task runs on its own
//! thread. Cancellation is advisory here too: a cancelled task still finishes
//! its HTTP exchange but reports a cancelled error instead of the response.

use std::collections::HashMap;
use std::io::Write;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use mock_server::UploadedPart;
use restkit_core::{
    BodyEntity, BodyParameters, BoxError, CompletionHandler, CustomBodyParameters, DataParser, EntityKind,
    FormFields, FormUrlEncodedBodyParameters, FormUrlEncodedDataParser, HttpMethod, MultipartFormDataBodyParameters,
    Part, Request, ResponseError, ResponseHead, ResponseMetadata, ResponseObject, Session, SessionTaskError,
    TaskHandle, TaskId, TasksHandler, Transport, TransportError, TransportErrorKind, WireRequest,
};
use serde_json::{json, Value};
use ureq::SendBody;

// ---------------------------------------------------------------------------
// ureq transport
// ---------------------------------------------------------------------------

type LiveTasks = Arc<Mutex<HashMap<TaskId, Arc<UreqTask>>>>;

struct UreqTransport {
    agent: ureq::Agent,
    next_id: AtomicU64,
    live: LiveTasks,
}

impl UreqTransport {
    /// Disables ureq's status-code-as-error behavior so 4xx/5xx responses
    /// come back as data and the request decides what is acceptable.
    fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            next_id: AtomicU64::new(1),
            live: Arc::default(),
        }
    }
}

impl Transport for UreqTransport {
    fn create_task(&self, request: WireRequest, on_complete: CompletionHandler) -> Arc<dyn TaskHandle> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let task = Arc::new(UreqTask {
            id,
            agent: self.agent.clone(),
            pending: Mutex::new(Some((request, on_complete))),
            cancelled: Arc::new(AtomicBool::new(false)),
            live: Arc::clone(&self.live),
        });
        self.live.lock().unwrap().insert(id, Arc::clone(&task));
        task
    }

    fn live_tasks(&self, on_result: TasksHandler) {
        let tasks = self
            .live
            .lock()
            .unwrap()
            .values()
            .map(|task| Arc::clone(task) as Arc<dyn TaskHandle>)
            .collect();
        on_result(tasks);
    }
}

struct UreqTask {
    id: TaskId,
    agent: ureq::Agent,
    pending: Mutex<Option<(WireRequest, CompletionHandler)>>,
    cancelled: Arc<AtomicBool>,
    live: LiveTasks,
}

impl TaskHandle for UreqTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn resume(&self) {
        let Some((request, on_complete)) = self.pending.lock().unwrap().take() else {
            return;
        };
        let id = self.id;
        let agent = self.agent.clone();
        let cancelled = Arc::clone(&self.cancelled);
        let live = Arc::clone(&self.live);
        std::thread::spawn(move || {
            let outcome = execute(&agent, request);
            live.lock().unwrap().remove(&id);
            if cancelled.load(Ordering::SeqCst) {
                return on_complete(None, None, Some(TransportError::cancelled()));
            }
            match outcome {
                Ok((head, body)) => on_complete(Some(body), Some(ResponseMetadata::Http(head)), None),
                Err(e) => on_complete(None, None, Some(e)),
            }
        });
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn execute(agent: &ureq::Agent, request: WireRequest) -> Result<(ResponseHead, Vec<u8>), TransportError> {
    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = match request.body {
        None => agent.run(builder.body(()).map_err(TransportError::other)?),
        Some(BodyEntity::Bytes(bytes)) => agent.run(builder.body(bytes).map_err(TransportError::other)?),
        Some(BodyEntity::Stream(mut stream)) => {
            let body = SendBody::from_reader(&mut stream);
            agent.run(builder.body(body).map_err(TransportError::other)?)
        }
    };
    let mut response = response.map_err(TransportError::io)?;

    let mut head = ResponseHead::new(response.status().as_u16());
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            head.headers.push((name.as_str().to_string(), value.to_string()));
        }
    }
    let body = response.body_mut().read_to_vec().map_err(TransportError::io)?;
    Ok((head, body))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Start the mock server on a random port and return its base URL.
fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn session() -> (Session, String) {
    (Session::new(UreqTransport::new()), start_server())
}

fn wait<T: Request>(session: &Session, request: T) -> Result<T::Response, SessionTaskError> {
    let (tx, rx) = mpsc::channel();
    session.send(request, None, move |result| {
        tx.send(result).unwrap();
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Hits `/anything`, which echoes the request back as JSON.
struct Anything {
    base: String,
    method: HttpMethod,
    parameters: Option<Value>,
}

impl Request for Anything {
    type Response = Value;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        self.method
    }

    fn path(&self) -> String {
        "/anything".to_string()
    }

    fn parameters(&self) -> Option<Value> {
        self.parameters.clone()
    }

    fn header_fields(&self) -> Vec<(String, String)> {
        vec![("X-Client".to_string(), "restkit".to_string())]
    }

    fn response(&self, object: ResponseObject, _head: &ResponseHead) -> Result<Value, BoxError> {
        object.deserialize()
    }
}

struct PostForm {
    base: String,
    fields: FormFields,
}

impl Request for PostForm {
    type Response = HashMap<String, String>;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    fn path(&self) -> String {
        "/form".to_string()
    }

    fn body_parameters(&self) -> Option<Box<dyn BodyParameters>> {
        Some(Box::new(FormUrlEncodedBodyParameters::new(self.fields.clone())))
    }

    fn response(&self, object: ResponseObject, _head: &ResponseHead) -> Result<Self::Response, BoxError> {
        object.deserialize()
    }
}

/// Posts raw bytes to `/echo-form` and parses the echo as a form.
struct EchoForm {
    base: String,
    body: &'static str,
}

impl Request for EchoForm {
    type Response = FormFields;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    fn path(&self) -> String {
        "/echo-form".to_string()
    }

    fn body_parameters(&self) -> Option<Box<dyn BodyParameters>> {
        Some(Box::new(CustomBodyParameters::new("text/plain", self.body)))
    }

    fn data_parser(&self) -> Box<dyn DataParser> {
        Box::new(FormUrlEncodedDataParser)
    }

    fn response(&self, object: ResponseObject, head: &ResponseHead) -> Result<FormFields, BoxError> {
        assert_eq!(head.header("content-type"), Some("application/x-www-form-urlencoded"));
        object.as_form().cloned().ok_or_else(|| "expected form response".into())
    }
}

struct Upload {
    base: String,
    body: MultipartFormDataBodyParameters,
}

impl Request for Upload {
    type Response = Vec<UploadedPart>;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    fn path(&self) -> String {
        "/upload".to_string()
    }

    fn body_parameters(&self) -> Option<Box<dyn BodyParameters>> {
        Some(Box::new(self.body.clone()))
    }

    fn response(&self, object: ResponseObject, _head: &ResponseHead) -> Result<Self::Response, BoxError> {
        object.deserialize()
    }
}

struct Status {
    base: String,
    code: u16,
    acceptable: Range<u16>,
}

impl Request for Status {
    type Response = u16;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Get
    }

    fn path(&self) -> String {
        format!("/status/{}", self.code)
    }

    fn acceptable_status_codes(&self) -> Range<u16> {
        self.acceptable.clone()
    }

    fn response(&self, _object: ResponseObject, head: &ResponseHead) -> Result<u16, BoxError> {
        Ok(head.status)
    }
}

struct Delay {
    base: String,
    ms: u64,
}

impl Request for Delay {
    type Response = Value;

    fn base_url(&self) -> String {
        self.base.clone()
    }

    fn method(&self) -> HttpMethod {
        HttpMethod::Get
    }

    fn path(&self) -> String {
        format!("/delay/{}", self.ms)
    }

    fn response(&self, object: ResponseObject, _head: &ResponseHead) -> Result<Value, BoxError> {
        object.deserialize()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn get_sends_parameters_as_query() {
    let (session, base) = session();

    let echo = wait(
        &session,
        Anything {
            base,
            method: HttpMethod::Get,
            parameters: Some(json!({"q": "hello world", "page": 2})),
        },
    )
    .unwrap();

    assert_eq!(echo["method"], "GET");
    assert_eq!(echo["query"], "page=2&q=hello%20world");
    assert_eq!(echo["args"]["q"], "hello world");
    assert_eq!(echo["headers"]["accept"], "application/json");
    assert_eq!(echo["headers"]["x-client"], "restkit");
    assert_eq!(echo["body"], "");
}

#[test]
fn post_sends_parameters_as_json_body() {
    let (session, base) = session();

    let echo = wait(
        &session,
        Anything {
            base,
            method: HttpMethod::Post,
            parameters: Some(json!({"name": "widget", "tags": ["a", "b"]})),
        },
    )
    .unwrap();

    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["query"], Value::Null);
    assert_eq!(echo["headers"]["content-type"], "application/json");
    let body: Value = serde_json::from_str(echo["body"].as_str().unwrap()).unwrap();
    assert_eq!(body, json!({"name": "widget", "tags": ["a", "b"]}));
}

#[test]
fn form_body_is_parsed_by_server() {
    let (session, base) = session();
    let fields = FormFields::from([
        ("greeting".to_string(), Some("hello world".to_string())),
        ("symbols".to_string(), Some("a&b=c".to_string())),
    ]);

    let echoed = wait(&session, PostForm { base, fields }).unwrap();

    assert_eq!(echoed["greeting"], "hello world");
    assert_eq!(echoed["symbols"], "a&b=c");
}

#[test]
fn form_response_is_parsed() {
    let (session, base) = session();

    let fields = wait(
        &session,
        EchoForm {
            base,
            body: "a=1&b=two%20words&flag",
        },
    )
    .unwrap();

    assert_eq!(fields["a"].as_deref(), Some("1"));
    assert_eq!(fields["b"].as_deref(), Some("two words"));
    assert_eq!(fields["flag"], None);
}

#[test]
fn multipart_stream_upload_is_parsed_by_server() {
    let (session, base) = session();

    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(br#"{"from": "disk"}"#).unwrap();
    let chunk = vec![b'z'; 100_000];
    let body = MultipartFormDataBodyParameters::new(vec![
        Part::value("report", "title"),
        Part::file(file.path(), "config").unwrap(),
        Part::data(b"plain bytes".to_vec(), "notes")
            .with_mime_type("text/plain")
            .with_file_name("notes.txt"),
        Part::reader(
            move || Ok(std::io::Cursor::new(chunk.clone())),
            100_000,
            "blob",
        )
        .with_mime_type("application/octet-stream")
        .with_file_name("blob.bin"),
    ])
    .with_entity_kind(EntityKind::Stream);

    let parts = wait(&session, Upload { base, body }).unwrap();

    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0].name.as_deref(), Some("title"));
    assert_eq!(parts[0].text.as_deref(), Some("report"));
    assert_eq!(parts[1].name.as_deref(), Some("config"));
    assert_eq!(parts[1].content_type.as_deref(), Some("application/json"));
    assert_eq!(parts[1].text.as_deref(), Some(r#"{"from": "disk"}"#));
    assert!(parts[1].file_name.as_deref().unwrap().ends_with(".json"));
    assert_eq!(parts[2].file_name.as_deref(), Some("notes.txt"));
    assert_eq!(parts[2].text.as_deref(), Some("plain bytes"));
    assert_eq!(parts[3].size, 100_000);
}

#[test]
fn multipart_bytes_upload_is_parsed_by_server() {
    let (session, base) = session();
    let body = MultipartFormDataBodyParameters::new(vec![Part::value(42, "answer")]);

    let parts = wait(&session, Upload { base, body }).unwrap();

    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].text.as_deref(), Some("42"));
}

#[test]
fn server_error_is_unacceptable() {
    let (session, base) = session();

    let err = wait(
        &session,
        Status {
            base,
            code: 500,
            acceptable: 200..300,
        },
    )
    .unwrap_err();

    assert!(matches!(
        err.decoding_cause::<ResponseError>(),
        Some(ResponseError::UnacceptableStatusCode(500))
    ));
}

#[test]
fn custom_acceptable_status_codes() {
    let (session, base) = session();

    let status = wait(
        &session,
        Status {
            base,
            code: 404,
            acceptable: 200..500,
        },
    )
    .unwrap();

    assert_eq!(status, 404);
}

#[test]
fn cancelling_in_flight_request() {
    let (session, base) = session();

    let (tx, rx) = mpsc::channel();
    session.send(Delay { base, ms: 300 }, None, move |result| {
        tx.send(result).unwrap();
    });
    session.cancel_all::<Delay>();

    let err = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
    assert_eq!(session.pending_tasks(), 0);
}

#[test]
fn unreachable_server_is_a_connection_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let session = Session::new(UreqTransport::new());

    let err = wait(
        &session,
        Delay {
            base: format!("http://127.0.0.1:{port}"),
            ms: 0,
        },
    )
    .unwrap_err();

    match err {
        SessionTaskError::Connection(e) => assert_eq!(e.kind(), TransportErrorKind::Io),
        other => panic!("expected connection error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn async_response_over_real_http() {
    let (session, base) = session();

    let echo = session
        .response(
            Anything {
                base,
                method: HttpMethod::Put,
                parameters: Some(json!({"async": true})),
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(echo["method"], "PUT");
}
