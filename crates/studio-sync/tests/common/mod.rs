//! In-process mock of the studio API, served by axum on an ephemeral port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use studio_proto::config::ApiConfig;
use studio_proto::job::{Job, JobStatus, Slot};
use studio_proto::protocol::{JobStats, Style};
use studio_sync::{ApiClient, Opener};

pub const TOKEN: &str = "test-token";
pub const PASSWORD: &str = "secret";
pub const AUDIO: &[u8] = b"ID3\x03fake-mp3-bytes";

#[derive(Default)]
pub struct MockState {
    pub jobs: Mutex<Vec<Job>>,
    pub styles: Mutex<Vec<Style>>,
    pub list_calls: AtomicUsize,
    pub last_query: Mutex<HashMap<String, String>>,
    pub puts: Mutex<Vec<(i64, Value)>>,
    pub artifact_hits: AtomicUsize,
    /// Artifact downloads answer 404.
    pub artifacts_gone: AtomicBool,
    /// PUTs are acknowledged but downloaded flags are not stored.
    pub drop_downloaded_flags: AtomicBool,
    next_id: AtomicUsize,
}

impl MockState {
    pub fn set_jobs(&self, jobs: Vec<Job>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    pub fn job(&self, id: i64) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn artifact_hits(&self) -> usize {
        self.artifact_hits.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

pub struct MockApi {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockApi {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        state.next_id.store(100, Ordering::SeqCst);

        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/me", get(me))
            .route("/songs/", get(list_songs).post(create_song))
            .route("/songs/stats", get(stats))
            .route(
                "/songs/:id",
                get(get_song).put(update_song).delete(delete_song),
            )
            .route("/songs/:id/recreate", post(recreate_song))
            .route("/styles/", get(list_styles).post(create_style))
            .route("/speech/voices", get(voices))
            .route("/speech/synthesize", post(synthesize));

        let app = Router::new()
            .nest("/api/v1", api)
            .route("/files/:name", get(artifact))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn artifact_url(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url(), name)
    }

    pub fn client(&self) -> ApiClient {
        let config = ApiConfig {
            base_url: self.base_url(),
            request_timeout_secs: 5,
            ..ApiConfig::default()
        };
        ApiClient::new(&config).unwrap()
    }

    pub fn authed_client(&self) -> ApiClient {
        self.client().with_token(Some(TOKEN.to_string()))
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Records opened URLs instead of launching anything.
#[derive(Default)]
pub struct RecordingOpener {
    pub opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl Opener for RecordingOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Poll `cond` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn song(id: i64, status: JobStatus) -> Job {
    Job::new(id, status).with_title(format!("Song {}", id))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

type Shared = State<Arc<MockState>>;

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn check_auth(headers: &HeaderMap) -> Result<(), Response> {
    let expected = format!("Bearer {}", TOKEN);
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(v) if v == expected => Ok(()),
        Some(_) => Err(error(StatusCode::UNAUTHORIZED, "Invalid token")),
        None => Err(error(StatusCode::UNAUTHORIZED, "Missing token")),
    }
}

fn user_json() -> Value {
    json!({ "id": 1, "username": "ada", "email": "ada@example.com", "is_active": true })
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] == PASSWORD {
        Json(json!({ "access_token": TOKEN, "user": user_json() })).into_response()
    } else {
        error(StatusCode::UNAUTHORIZED, "Invalid username or password")
    }
}

async fn me(headers: HeaderMap) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    Json(json!({ "user": user_json() })).into_response()
}

async fn list_songs(
    State(state): Shared,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_query.lock().unwrap() = query.clone();

    let jobs: Vec<Job> = state
        .jobs
        .lock()
        .unwrap()
        .iter()
        .filter(|j| {
            query
                .get("status")
                .map_or(true, |s| j.status.as_str() == s.as_str())
        })
        .cloned()
        .collect();
    Json(json!({ "songs": jobs, "total": jobs.len() })).into_response()
}

async fn stats(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let jobs = state.jobs.lock().unwrap();
    let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count() as u64;
    let stats = JobStats {
        total: jobs.len() as u64,
        create: count(JobStatus::Create),
        submitted: count(JobStatus::Submitted),
        completed: jobs.iter().filter(|j| j.has_audio()).count() as u64,
        failed: count(JobStatus::Failed),
        unspecified: count(JobStatus::Unspecified),
    };
    Json(stats).into_response()
}

async fn get_song(State(state): Shared, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    match state.job(id) {
        Some(job) => Json(json!({ "song": job })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Song not found"),
    }
}

async fn create_song(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    if body["specific_title"].as_str().map_or(true, str::is_empty) {
        return error(StatusCode::BAD_REQUEST, "Title is required");
    }
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) as i64;
    let mut record = body.clone();
    record["id"] = json!(id);
    if record.get("status").map_or(true, Value::is_null) {
        record["status"] = json!("submitted");
    }
    let job: Job = match serde_json::from_value(record) {
        Ok(job) => job,
        Err(e) => return error(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state.jobs.lock().unwrap().push(job.clone());
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Song created successfully", "song": job })),
    )
        .into_response()
}

async fn update_song(
    State(state): Shared,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    state.puts.lock().unwrap().push((id, body.clone()));
    let drop_flags = state.drop_downloaded_flags.load(Ordering::SeqCst);

    let mut jobs = state.jobs.lock().unwrap();
    let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
        return error(StatusCode::NOT_FOUND, "Song not found");
    };
    if let Some(stars) = body["star_rating"].as_u64() {
        job.star_rating = stars as u8;
    }
    if let Some(title) = body["specific_title"].as_str() {
        job.title = Some(title.to_string());
    }
    if !drop_flags {
        for slot in Slot::ALL {
            let field = format!("downloaded_url_{}", slot.number());
            if let Some(flag) = body[field.as_str()].as_bool() {
                job.artifact_mut(slot).downloaded = flag;
            }
        }
    }
    Json(json!({ "message": "Song updated successfully", "song": job.clone() })).into_response()
}

async fn delete_song(State(state): Shared, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let mut jobs = state.jobs.lock().unwrap();
    let before = jobs.len();
    jobs.retain(|j| j.id != id);
    if jobs.len() == before {
        return error(StatusCode::NOT_FOUND, "Song not found");
    }
    Json(json!({ "message": "Song deleted successfully" })).into_response()
}

async fn recreate_song(State(state): Shared, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let mut jobs = state.jobs.lock().unwrap();
    let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
        return error(StatusCode::NOT_FOUND, "Song not found");
    };
    job.status = JobStatus::Submitted;
    for slot in Slot::ALL {
        *job.artifact_mut(slot) = Default::default();
    }
    Json(json!({ "message": "Song recreation started", "song": job.clone() })).into_response()
}

async fn list_styles(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let styles = state.styles.lock().unwrap().clone();
    Json(json!({ "styles": styles, "total": styles.len() })).into_response()
}

async fn create_style(State(state): Shared, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let mut styles = state.styles.lock().unwrap();
    if styles.iter().any(|s| s.name == name) {
        return error(StatusCode::CONFLICT, "Style name already exists");
    }
    let style = Style {
        id: styles.len() as i64 + 1,
        name,
        style_prompt: body["style_prompt"].as_str().map(str::to_string),
        created_by: Some("ada".to_string()),
        created_by_id: Some(1),
    };
    styles.push(style.clone());
    (
        StatusCode::CREATED,
        Json(json!({ "message": "Style created successfully", "style": style })),
    )
        .into_response()
}

async fn voices(headers: HeaderMap) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    Json(json!({ "voices": [
        { "id": "en-US-AvaMultilingualNeural", "name": "Ava Multilingual", "gender": "Female" },
        { "id": "en-US-AndrewMultilingualNeural", "name": "Andrew Multilingual", "gender": "Male" }
    ]}))
    .into_response()
}

async fn synthesize(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Err(r) = check_auth(&headers) {
        return r;
    }
    if body["voice_name"].as_str().map_or(true, str::is_empty) {
        return error(StatusCode::BAD_REQUEST, "Voice is required");
    }
    ([(header::CONTENT_TYPE, "audio/mpeg")], Bytes::from_static(AUDIO)).into_response()
}

async fn artifact(State(state): Shared, headers: HeaderMap, Path(_name): Path<String>) -> Response {
    state.artifact_hits.fetch_add(1, Ordering::SeqCst);
    if headers.contains_key(header::AUTHORIZATION) {
        return error(StatusCode::BAD_REQUEST, "Artifact storage takes no bearer token");
    }
    if state.artifacts_gone.load(Ordering::SeqCst) {
        return error(StatusCode::NOT_FOUND, "Expired");
    }
    ([(header::CONTENT_TYPE, "audio/mpeg")], Bytes::from_static(AUDIO)).into_response()
}
