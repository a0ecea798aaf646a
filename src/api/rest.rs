//! JSON API Handlers
//!
//! Binds the lifecycle surface to `POST /csi/v0/<Operation>` with camelCase
//! JSON bodies. A call deadline may be supplied in milliseconds through the
//! `x-csi-timeout-ms` header; failures come back as `{code, message}`.

use crate::context::CallContext;
use crate::domain::csi::{
    ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest, CreateVolumeRequest,
    DeleteVolumeRequest, GetCapacityRequest, NodePublishVolumeRequest, NodeStageVolumeRequest,
    NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, ValidateVolumeCapabilitiesRequest,
};
use crate::driver::CsiDriver;
use crate::error::{Code, Error, Result};
use crate::metrics::DriverMetrics;
use axum::{
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Header carrying the caller's deadline in milliseconds
pub const TIMEOUT_HEADER: &str = "x-csi-timeout-ms";

// =============================================================================
// Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: String,
    pub message: String,
}

// =============================================================================
// Router
// =============================================================================

/// JSON API router builder
pub struct CsiRouter {
    driver: Arc<CsiDriver>,
    metrics: Arc<DriverMetrics>,
    shutdown: CancellationToken,
}

impl CsiRouter {
    pub fn new(driver: Arc<CsiDriver>, metrics: Arc<DriverMetrics>) -> Self {
        Self {
            driver,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight calls when `token` fires
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            driver: self.driver,
            metrics: self.metrics,
            shutdown: self.shutdown,
        };

        Router::new()
            // Identity
            .route("/csi/v0/GetPluginInfo", post(get_plugin_info))
            .route("/csi/v0/GetPluginCapabilities", post(get_plugin_capabilities))
            .route("/csi/v0/Probe", post(probe))
            // Controller
            .route("/csi/v0/CreateVolume", post(create_volume))
            .route("/csi/v0/DeleteVolume", post(delete_volume))
            .route("/csi/v0/ListVolumes", post(list_volumes))
            .route(
                "/csi/v0/ValidateVolumeCapabilities",
                post(validate_volume_capabilities),
            )
            .route(
                "/csi/v0/ControllerGetCapabilities",
                post(controller_get_capabilities),
            )
            .route("/csi/v0/GetCapacity", post(get_capacity))
            .route("/csi/v0/ControllerPublishVolume", post(controller_publish_volume))
            .route(
                "/csi/v0/ControllerUnpublishVolume",
                post(controller_unpublish_volume),
            )
            // Node
            .route("/csi/v0/NodePublishVolume", post(node_publish_volume))
            .route("/csi/v0/NodeUnpublishVolume", post(node_unpublish_volume))
            .route("/csi/v0/NodeStageVolume", post(node_stage_volume))
            .route("/csi/v0/NodeUnstageVolume", post(node_unstage_volume))
            .route("/csi/v0/NodeGetId", post(node_get_id))
            .route("/csi/v0/NodeGetCapabilities", post(node_get_capabilities))
            // Health
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    driver: Arc<CsiDriver>,
    metrics: Arc<DriverMetrics>,
    shutdown: CancellationToken,
}

impl AppState {
    fn call_context(&self, headers: &HeaderMap) -> Result<CallContext> {
        let ctx = match headers.get(TIMEOUT_HEADER) {
            Some(value) => {
                let millis: u64 = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!("invalid {} header", TIMEOUT_HEADER))
                    })?;
                CallContext::with_timeout(Duration::from_millis(millis))
            }
            None => CallContext::background(),
        };
        Ok(ctx.with_cancellation(self.shutdown.child_token()))
    }
}

/// Run one lifecycle call, record it, and render the result
async fn observe<T, F>(state: &AppState, operation: &'static str, call: F) -> Response
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = call.await;
    state
        .metrics
        .observe(operation, result.as_ref().err().map(Error::code), started.elapsed());

    match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            match e.code() {
                Code::Internal | Code::Unavailable | Code::DeadlineExceeded => {
                    error!("{} failed: {}", operation, e)
                }
                _ => debug!("{} rejected: {}", operation, e),
            }
            error_response(&e)
        }
    }
}

fn error_response(e: &Error) -> Response {
    let code = e.code();
    let status = StatusCode::from_u16(code.http_status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(ApiErrorResponse {
            code: code.as_str().into(),
            message: e.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Identity Handlers
// =============================================================================

async fn get_plugin_info(State(state): State<AppState>) -> Response {
    observe(&state, "GetPluginInfo", async { state.driver.get_plugin_info() }).await
}

async fn get_plugin_capabilities(State(state): State<AppState>) -> Response {
    observe(&state, "GetPluginCapabilities", async {
        state.driver.get_plugin_capabilities()
    })
    .await
}

async fn probe(State(state): State<AppState>) -> Response {
    observe(&state, "Probe", async { state.driver.probe() }).await
}

// =============================================================================
// Controller Handlers
// =============================================================================

async fn create_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateVolumeRequest>,
) -> Response {
    observe(&state, "CreateVolume", async {
        let ctx = state.call_context(&headers)?;
        state.driver.create_volume(&ctx, &request).await
    })
    .await
}

async fn delete_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DeleteVolumeRequest>,
) -> Response {
    observe(&state, "DeleteVolume", async {
        let ctx = state.call_context(&headers)?;
        state.driver.delete_volume(&ctx, &request).await
    })
    .await
}

async fn list_volumes(State(state): State<AppState>, headers: HeaderMap) -> Response {
    observe(&state, "ListVolumes", async {
        let ctx = state.call_context(&headers)?;
        state.driver.list_volumes(&ctx).await
    })
    .await
}

async fn validate_volume_capabilities(
    State(state): State<AppState>,
    Json(request): Json<ValidateVolumeCapabilitiesRequest>,
) -> Response {
    observe(&state, "ValidateVolumeCapabilities", async {
        state.driver.validate_volume_capabilities(&request)
    })
    .await
}

async fn controller_get_capabilities(State(state): State<AppState>) -> Response {
    observe(&state, "ControllerGetCapabilities", async {
        state.driver.controller_get_capabilities()
    })
    .await
}

async fn get_capacity(
    State(state): State<AppState>,
    Json(request): Json<GetCapacityRequest>,
) -> Response {
    observe(&state, "GetCapacity", async { state.driver.get_capacity(&request) }).await
}

async fn controller_publish_volume(
    State(state): State<AppState>,
    Json(request): Json<ControllerPublishVolumeRequest>,
) -> Response {
    observe(&state, "ControllerPublishVolume", async {
        state.driver.controller_publish_volume(&request)
    })
    .await
}

async fn controller_unpublish_volume(
    State(state): State<AppState>,
    Json(request): Json<ControllerUnpublishVolumeRequest>,
) -> Response {
    observe(&state, "ControllerUnpublishVolume", async {
        state.driver.controller_unpublish_volume(&request)
    })
    .await
}

// =============================================================================
// Node Handlers
// =============================================================================

async fn node_publish_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NodePublishVolumeRequest>,
) -> Response {
    observe(&state, "NodePublishVolume", async {
        let ctx = state.call_context(&headers)?;
        state.driver.node_publish_volume(&ctx, &request).await
    })
    .await
}

async fn node_unpublish_volume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NodeUnpublishVolumeRequest>,
) -> Response {
    observe(&state, "NodeUnpublishVolume", async {
        let ctx = state.call_context(&headers)?;
        state.driver.node_unpublish_volume(&ctx, &request).await
    })
    .await
}

async fn node_stage_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeStageVolumeRequest>,
) -> Response {
    observe(&state, "NodeStageVolume", async {
        state.driver.node_stage_volume(&request)
    })
    .await
}

async fn node_unstage_volume(
    State(state): State<AppState>,
    Json(request): Json<NodeUnstageVolumeRequest>,
) -> Response {
    observe(&state, "NodeUnstageVolume", async {
        state.driver.node_unstage_volume(&request)
    })
    .await
}

async fn node_get_id(State(state): State<AppState>) -> Response {
    observe(&state, "NodeGetId", async { state.driver.node_get_id() }).await
}

async fn node_get_capabilities(State(state): State<AppState>) -> Response {
    observe(&state, "NodeGetCapabilities", async {
        state.driver.node_get_capabilities()
    })
    .await
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
