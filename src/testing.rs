//! Test doubles shared by the unit tests
//!
//! - `FakeMapiServer`: a real HTTP maya API server on 127.0.0.1
//! - `FakeDirectory`: in-memory `VolumeDirectory` with scripted failures
//! - `FakeAttachBackend`: in-memory `AttachBackend` tracking mounts
//! - `fake_driver`: a `CsiDriver` wired to both fakes

use crate::context::CallContext;
use crate::controller::ControllerReconciler;
use crate::driver::{CsiDriver, DriverInfo, DEFAULT_DRIVER_NAME, DEFAULT_NODE_ID};
use crate::domain::ports::{AttachBackend, AttachOutcome, DetachOutcome, VolumeDirectory};
use crate::domain::volume::{annotations, Volume, VolumeList, VolumeMetadata, VolumeSpec};
use crate::error::{Error, Result};
use crate::node::session::AttachmentSession;
use crate::node::AttachmentManager;
use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode as HttpStatus};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_IQN_PREFIX: &str = "iqn.2016-09.com.openebs.jiva:";
pub const TEST_PORTAL: &str = "10.103.7.228:3260";

/// A volume carrying every annotation the controller requires
pub fn annotated_volume(name: &str, capacity: &str) -> Volume {
    let mut map = BTreeMap::new();
    map.insert(
        annotations::IQN.to_string(),
        serde_json::Value::from(format!("{}{}", TEST_IQN_PREFIX, name)),
    );
    map.insert(annotations::TARGET_PORTAL.to_string(), TEST_PORTAL.into());
    map.insert(annotations::PORTALS.to_string(), TEST_PORTAL.into());
    map.insert(annotations::CAPACITY.to_string(), capacity.into());

    Volume {
        metadata: VolumeMetadata {
            name: name.to_string(),
            annotations: Some(map),
            ..Default::default()
        },
        status: None,
    }
}

/// `annotated_volume` with one annotation removed
pub fn volume_without(name: &str, capacity: &str, missing: &str) -> Volume {
    let mut volume = annotated_volume(name, capacity);
    if let Some(map) = volume.metadata.annotations.as_mut() {
        map.remove(missing);
    }
    volume
}

// =============================================================================
// Fake maya API server (HTTP)
// =============================================================================

#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct MapiState {
    volumes: BTreeMap<String, Volume>,
    posts: Vec<RecordedPost>,
    failure: Option<u16>,
    requests: usize,
}

type SharedMapiState = Arc<Mutex<MapiState>>;

pub struct FakeMapiServer {
    addr: SocketAddr,
    state: SharedMapiState,
}

impl FakeMapiServer {
    pub async fn start() -> Self {
        let state: SharedMapiState = Arc::default();
        let app = Router::new()
            .route("/latest/volumes/", get(list_handler).post(create_handler))
            .route("/latest/volumes/info/:name", get(info_handler))
            .route("/latest/volumes/delete/:name", get(delete_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn insert(&self, volume: Volume) {
        self.state
            .lock()
            .volumes
            .insert(volume.name().to_string(), volume);
    }

    /// Answer every subsequent request with `status`
    pub fn fail_with(&self, status: StatusCode) {
        self.state.lock().failure = Some(status.as_u16());
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.state.lock().posts.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests
    }
}

fn scripted_failure(state: &SharedMapiState) -> Option<Response> {
    let mut guard = state.lock();
    guard.requests += 1;
    guard
        .failure
        .and_then(|code| HttpStatus::from_u16(code).ok())
        .map(|status| status.into_response())
}

async fn create_handler(
    State(state): State<SharedMapiState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if let Some(resp) = scripted_failure(&state) {
        return resp;
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let spec: VolumeSpec = match serde_yaml::from_str(&body) {
        Ok(spec) => spec,
        Err(_) => return HttpStatus::BAD_REQUEST.into_response(),
    };

    let mut guard = state.lock();
    guard.posts.push(RecordedPost { content_type, body });
    let volume = annotated_volume(spec.name(), &spec.metadata.labels.storage);
    guard.volumes.insert(spec.name().to_string(), volume.clone());
    Json(volume).into_response()
}

async fn list_handler(State(state): State<SharedMapiState>) -> Response {
    if let Some(resp) = scripted_failure(&state) {
        return resp;
    }
    let items = state.lock().volumes.values().cloned().collect();
    Json(VolumeList { items }).into_response()
}

async fn info_handler(State(state): State<SharedMapiState>, Path(name): Path<String>) -> Response {
    if let Some(resp) = scripted_failure(&state) {
        return resp;
    }
    match state.lock().volumes.get(&name) {
        Some(volume) => Json(volume.clone()).into_response(),
        None => HttpStatus::NOT_FOUND.into_response(),
    }
}

async fn delete_handler(
    State(state): State<SharedMapiState>,
    Path(name): Path<String>,
) -> Response {
    if let Some(resp) = scripted_failure(&state) {
        return resp;
    }
    match state.lock().volumes.remove(&name) {
        Some(_) => HttpStatus::OK.into_response(),
        None => HttpStatus::NOT_FOUND.into_response(),
    }
}

// =============================================================================
// Fake volume directory (in-memory)
// =============================================================================

#[derive(Default)]
struct DirectoryState {
    volumes: BTreeMap<String, Volume>,
    calls: Vec<String>,
    created: Vec<VolumeSpec>,
    create_failure: Option<StatusCode>,
    get_failure: Option<StatusCode>,
    delete_failure: Option<StatusCode>,
    list_failure: Option<StatusCode>,
    hide_created: bool,
}

#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<DirectoryState>,
    create_delay: Option<Duration>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(self, volume: Volume) -> Self {
        self.state
            .lock()
            .volumes
            .insert(volume.name().to_string(), volume);
        self
    }

    /// Sleep inside `create_volume`, widening any check-then-create race
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn fail_create(self, status: StatusCode) -> Self {
        self.state.lock().create_failure = Some(status);
        self
    }

    pub fn fail_get(self, status: StatusCode) -> Self {
        self.state.lock().get_failure = Some(status);
        self
    }

    pub fn fail_delete(self, status: StatusCode) -> Self {
        self.state.lock().delete_failure = Some(status);
        self
    }

    pub fn fail_list(self, status: StatusCode) -> Self {
        self.state.lock().list_failure = Some(status);
        self
    }

    /// Accept creates but never make the volume visible to `get_volume`
    pub fn hide_created(self) -> Self {
        self.state.lock().hide_created = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.split(':').next() == Some(op))
            .count()
    }

    pub fn created(&self) -> Vec<VolumeSpec> {
        self.state.lock().created.clone()
    }
}

#[async_trait]
impl VolumeDirectory for FakeDirectory {
    async fn create_volume(&self, ctx: &CallContext, spec: &VolumeSpec) -> Result<()> {
        ctx.check()?;
        self.state
            .lock()
            .calls
            .push(format!("create:{}", spec.name()));

        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(status) = state.create_failure {
            return Err(Error::ExternalService { status });
        }
        state.created.push(spec.clone());
        if !state.hide_created {
            let volume = annotated_volume(spec.name(), &spec.metadata.labels.storage);
            state.volumes.insert(spec.name().to_string(), volume);
        }
        Ok(())
    }

    async fn get_volume(&self, ctx: &CallContext, name: &str) -> Result<Volume> {
        ctx.check()?;
        let mut state = self.state.lock();
        state.calls.push(format!("get:{}", name));
        if let Some(status) = state.get_failure {
            return Err(Error::ExternalService { status });
        }
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or(Error::ExternalService {
                status: StatusCode::NOT_FOUND,
            })
    }

    async fn delete_volume(&self, ctx: &CallContext, name: &str) -> Result<()> {
        ctx.check()?;
        let mut state = self.state.lock();
        state.calls.push(format!("delete:{}", name));
        if let Some(status) = state.delete_failure {
            return Err(Error::ExternalService { status });
        }
        state.volumes.remove(name);
        Ok(())
    }

    async fn list_volumes(&self, ctx: &CallContext) -> Result<Vec<Volume>> {
        ctx.check()?;
        let mut state = self.state.lock();
        state.calls.push("list".to_string());
        if let Some(status) = state.list_failure {
            return Err(Error::ExternalService { status });
        }
        Ok(state.volumes.values().cloned().collect())
    }
}

// =============================================================================
// Fake attach backend
// =============================================================================

#[derive(Default)]
struct AttachState {
    mounted: BTreeSet<String>,
    sessions: Vec<AttachmentSession>,
    detach_calls: Vec<String>,
    failures: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeAttachBackend {
    state: Mutex<AttachState>,
}

impl FakeAttachBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail attach/detach on `target_path` with `reason`
    pub fn fail_on(self, target_path: &str, reason: &str) -> Self {
        self.state
            .lock()
            .failures
            .insert(target_path.to_string(), reason.to_string());
        self
    }

    pub fn is_mounted(&self, target_path: &str) -> bool {
        self.state.lock().mounted.contains(target_path)
    }

    pub fn sessions(&self) -> Vec<AttachmentSession> {
        self.state.lock().sessions.clone()
    }

    pub fn detach_calls(&self) -> Vec<String> {
        self.state.lock().detach_calls.clone()
    }
}

#[async_trait]
impl AttachBackend for FakeAttachBackend {
    async fn attach(&self, ctx: &CallContext, session: &AttachmentSession) -> Result<AttachOutcome> {
        ctx.check()?;
        let mut state = self.state.lock();
        state.sessions.push(session.clone());

        if let Some(reason) = state.failures.get(&session.target_path) {
            return Err(Error::Command {
                command: "mount".into(),
                reason: reason.clone(),
            });
        }
        if !state.mounted.insert(session.target_path.clone()) {
            return Ok(AttachOutcome::AlreadyMounted);
        }
        Ok(AttachOutcome::Attached {
            device: "/dev/sdb".into(),
        })
    }

    async fn detach(&self, ctx: &CallContext, target_path: &str) -> Result<DetachOutcome> {
        ctx.check()?;
        let mut state = self.state.lock();
        state.detach_calls.push(target_path.to_string());

        if let Some(reason) = state.failures.get(target_path) {
            return Err(Error::Command {
                command: "umount".into(),
                reason: reason.clone(),
            });
        }
        if state.mounted.remove(target_path) {
            Ok(DetachOutcome::Detached)
        } else {
            Ok(DetachOutcome::NotMounted)
        }
    }
}

// =============================================================================
// Driver wiring
// =============================================================================

pub fn fake_driver() -> (CsiDriver, Arc<FakeDirectory>, Arc<FakeAttachBackend>) {
    fake_driver_with(FakeDirectory::new(), FakeAttachBackend::new())
}

pub fn fake_driver_with(
    directory: FakeDirectory,
    backend: FakeAttachBackend,
) -> (CsiDriver, Arc<FakeDirectory>, Arc<FakeAttachBackend>) {
    let directory = Arc::new(directory);
    let backend = Arc::new(backend);
    let info = DriverInfo::new(DEFAULT_DRIVER_NAME, crate::VERSION, DEFAULT_NODE_ID).unwrap();
    let driver = CsiDriver::new(
        info,
        Arc::new(ControllerReconciler::new(directory.clone())),
        Arc::new(AttachmentManager::new(backend.clone())),
    );
    (driver, directory, backend)
}
