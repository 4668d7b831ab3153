#![allow(dead_code)]

use axum::body::Body;
use axum::extract::{Extension, Multipart, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use steg_walkthrough::{Config, PollMode};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const API_KEY: &str = "test-key";
pub const ENCODED_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nencoded-by-stub";
pub const ORIGINAL_BYTES: &[u8] = b"\x89PNG\r\n\x1a\noriginal-image";
pub const ENCODE_REQUEST_ID: &str = "enc-1";
pub const DECODE_REQUEST_ID: &str = "dec-1";

/// What `/media_status` answers for a request.
#[derive(Clone, Debug)]
pub struct StatusScript {
    /// Answers with `pending_status` this many times before completing
    pub pending_polls: usize,
    pub pending_status: String,
    /// `None` never completes
    pub final_status: Option<String>,
}

impl StatusScript {
    pub fn completes_after(pending_polls: usize) -> Self {
        Self {
            pending_polls,
            pending_status: "Processing.".into(),
            final_status: Some("Completed.".into()),
        }
    }

    pub fn never_completes() -> Self {
        Self {
            pending_polls: usize::MAX,
            pending_status: "Processing.".into(),
            final_status: None,
        }
    }

    pub fn fails_after(pending_polls: usize, status: &str) -> Self {
        Self {
            pending_polls,
            pending_status: "Processing.".into(),
            final_status: Some(status.into()),
        }
    }
}

/// How the fake CDN answers the encoded media download.
#[derive(Clone, Debug, Default)]
pub enum CdnAnswer {
    #[default]
    Encoded,
    Status(StatusCode),
    /// Sends the first bytes, then drops the connection
    BreaksMidway,
}

/// One multipart POST received by the fake bucket.
#[derive(Clone, Debug, Default)]
pub struct RecordedPush {
    pub fields: BTreeMap<String, String>,
    pub file_field: Option<String>,
    pub file_name: Option<String>,
    pub file: Vec<u8>,
    pub api_key: Option<String>,
}

#[derive(Default)]
pub struct StubState {
    pub base_url: String,
    pub status_script: Mutex<StatusScript>,
    /// Fires `cancel` once this many status checks were served in total
    pub status_ceiling: Mutex<Option<(usize, CancellationToken)>>,
    pub upload_override: Mutex<Option<(StatusCode, JsonValue)>>,
    pub bucket_override: Mutex<Option<StatusCode>>,
    pub cdn_answer: Mutex<CdnAnswer>,
    pub usage_response: Mutex<JsonValue>,

    pub upload_requests: Mutex<Vec<(Option<String>, JsonValue)>>,
    pub pushes: Mutex<Vec<RecordedPush>>,
    pub encode_requests: Mutex<Vec<JsonValue>>,
    pub decode_requests: Mutex<Vec<JsonValue>>,
    pub status_calls: Mutex<HashMap<String, usize>>,
    pub total_status_calls: AtomicUsize,
    pub usage_queries: Mutex<Vec<HashMap<String, String>>>,
    pub downloads: AtomicUsize,
}

impl Default for StatusScript {
    fn default() -> Self {
        StatusScript::completes_after(0)
    }
}

/// Fake Steg.AI API plus the bucket and CDN it points at.
pub struct StubService {
    _handle: JoinHandle<()>,
    pub state: Arc<StubState>,
}

impl StubService {
    pub async fn start() -> Self {
        let port = portpicker::pick_unused_port().expect("No available port");
        let base_url = format!("http://127.0.0.1:{port}/");

        let state = Arc::new(StubState {
            base_url: base_url.clone(),
            usage_response: Mutex::new(json!({ "message": 0, "data": { "items": [] } })),
            ..Default::default()
        });

        let app = Router::new()
            .route("/upload", post(upload))
            .route("/bucket", post(bucket))
            .route("/encode_image_async", post(encode))
            .route("/decode_image_async", post(decode))
            .route("/media_status", get(media_status))
            .route("/usage", get(usage))
            .route("/cdn/encoded.png", get(cdn))
            .layer(Extension(state.clone()));

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("Failed to bind stub service");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub service error");
        });

        StubService {
            _handle: handle,
            state,
        }
    }

    pub fn base_url(&self) -> String {
        self.state.base_url.clone()
    }

    pub fn script_status(&self, script: StatusScript) {
        *self.state.status_script.lock().unwrap() = script;
    }

    pub fn cancel_after_status_calls(&self, ceiling: usize, cancel: CancellationToken) {
        *self.state.status_ceiling.lock().unwrap() = Some((ceiling, cancel));
    }

    pub fn override_upload(&self, status: StatusCode, body: JsonValue) {
        *self.state.upload_override.lock().unwrap() = Some((status, body));
    }

    pub fn override_bucket(&self, status: StatusCode) {
        *self.state.bucket_override.lock().unwrap() = Some(status);
    }

    pub fn answer_cdn_with(&self, answer: CdnAnswer) {
        *self.state.cdn_answer.lock().unwrap() = answer;
    }

    pub fn set_usage_response(&self, body: JsonValue) {
        *self.state.usage_response.lock().unwrap() = body;
    }

    pub fn status_calls(&self, request_id: &str) -> usize {
        self.state
            .status_calls
            .lock()
            .unwrap()
            .get(request_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        self.state.pushes.lock().unwrap().clone()
    }

    pub fn upload_requests(&self) -> Vec<(Option<String>, JsonValue)> {
        self.state.upload_requests.lock().unwrap().clone()
    }

    pub fn encode_requests(&self) -> Vec<JsonValue> {
        self.state.encode_requests.lock().unwrap().clone()
    }

    pub fn decode_requests(&self) -> Vec<JsonValue> {
        self.state.decode_requests.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub fn usage_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.usage_queries.lock().unwrap().clone()
    }

    /// Config pointed at this stub, with short poll delays.
    pub fn config(&self, image: &Path, output_dir: &Path) -> Config {
        Config {
            api_key: API_KEY.into(),
            image: Some(image.to_path_buf()),
            base_url: self.base_url(),
            output_dir: output_dir.to_path_buf(),
            owner: Some("Owner Name".into()),
            editorial: true,
            poll_mode: PollMode::Backoff,
            poll_initial_delay_ms: 1,
            poll_max_delay_ms: 5,
            poll_max_attempts: 50,
            poll_timeout_secs: 10,
            request_timeout_secs: 5,
            ..Default::default()
        }
    }
}

/// Writes the original test image into `dir` and returns its path.
pub fn write_image(dir: &Path) -> PathBuf {
    let path = dir.join("cat.png");
    std::fs::write(&path, ORIGINAL_BYTES).expect("write test image");
    path
}

pub fn output_of(out: Vec<u8>) -> String {
    String::from_utf8(out).expect("walkthrough output is utf-8")
}

/// Guards a test that must not hang.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(20), future)
        .await
        .expect("test took too long")
}

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn upload(
    Extension(state): Extension<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Response {
    let mut requests = state.upload_requests.lock().unwrap();
    requests.push((api_key(&headers), body));
    let n = requests.len();
    drop(requests);

    if let Some((status, body)) = state.upload_override.lock().unwrap().clone() {
        return (status, Json(body)).into_response();
    }

    Json(json!({
        "data": {
            "post_to": {
                "url": format!("{}bucket", state.base_url),
                "fields": { "key": format!("uploads/{n}"), "policy": "cG9saWN5" }
            },
            "media_id": format!("media-{n}")
        }
    }))
    .into_response()
}

async fn bucket(
    Extension(state): Extension<Arc<StubState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> StatusCode {
    let mut push = RecordedPush {
        api_key: api_key(&headers),
        ..Default::default()
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        if let Some(file_name) = file_name {
            push.file_field = Some(name);
            push.file_name = Some(file_name);
            push.file = field.bytes().await.expect("read file part").to_vec();
        } else {
            let value = field.text().await.expect("read text part");
            push.fields.insert(name, value);
        }
    }

    state.pushes.lock().unwrap().push(push);
    state
        .bucket_override
        .lock()
        .unwrap()
        .unwrap_or(StatusCode::NO_CONTENT)
}

async fn encode(
    Extension(state): Extension<Arc<StubState>>,
    Json(body): Json<JsonValue>,
) -> Json<JsonValue> {
    state.encode_requests.lock().unwrap().push(body);
    Json(json!({ "data": { "request_id": ENCODE_REQUEST_ID } }))
}

async fn decode(
    Extension(state): Extension<Arc<StubState>>,
    Json(body): Json<JsonValue>,
) -> Json<JsonValue> {
    state.decode_requests.lock().unwrap().push(body);
    Json(json!({ "data": { "request_id": DECODE_REQUEST_ID } }))
}

async fn media_status(
    Extension(state): Extension<Arc<StubState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<JsonValue> {
    let request_id = params.get("request_id").cloned().unwrap_or_default();
    let call = {
        let mut calls = state.status_calls.lock().unwrap();
        let count = calls.entry(request_id.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let total = state.total_status_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some((ceiling, cancel)) = state.status_ceiling.lock().unwrap().as_ref()
        && total >= *ceiling
    {
        cancel.cancel();
    }

    let script = state.status_script.lock().unwrap().clone();
    let status = match &script.final_status {
        Some(final_status) if call > script.pending_polls => final_status.clone(),
        _ => script.pending_status.clone(),
    };

    let media_data = if status != "Completed." {
        JsonValue::Null
    } else if request_id == ENCODE_REQUEST_ID {
        json!({ "media_url": format!("{}cdn/encoded.png", state.base_url) })
    } else {
        json!({ "owner": "Owner Name", "payload": "hello" })
    };

    Json(json!({ "data": { "status": status, "media_data": media_data } }))
}

async fn usage(
    Extension(state): Extension<Arc<StubState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if api_key(&headers).as_deref() != Some(API_KEY) {
        return (StatusCode::FORBIDDEN, Json(json!({ "message": "Forbidden" }))).into_response();
    }
    state.usage_queries.lock().unwrap().push(params);
    Json(state.usage_response.lock().unwrap().clone()).into_response()
}

async fn cdn(Extension(state): Extension<Arc<StubState>>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    let answer = state.cdn_answer.lock().unwrap().clone();
    match answer {
        CdnAnswer::Encoded => ENCODED_BYTES.into_response(),
        CdnAnswer::Status(status) => (status, "no such media").into_response(),
        CdnAnswer::BreaksMidway => {
            let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
                Ok(&ENCODED_BYTES[..4]),
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "cdn went away",
                )),
            ];
            Body::from_stream(futures::stream::iter(chunks)).into_response()
        }
    }
}
