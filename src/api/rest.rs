use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::domain::types::{OperationKind, OperationState};
use crate::domain::update_manager::{Started, UpdateError, UpdateManager};

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub updates: UpdateManager,
    pub started: Instant,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonHealth {
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct RuntimeUpgradeRequest {
    #[serde(default)]
    pub version: Option<String>,
}

/// Acknowledgement of an accepted `start`. The rollout itself continues in
/// the background.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub operation: OperationKind,
    pub node_order: Vec<String>,
}

impl From<Started> for StartResponse {
    fn from(started: Started) -> Self {
        Self {
            success: true,
            operation: started.operation,
            node_order: started.node_order,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Maps orchestrator rejections onto HTTP status codes.
pub struct ApiError(UpdateError);

impl From<UpdateError> for ApiError {
    fn from(e: UpdateError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            UpdateError::AlreadyInProgress | UpdateError::ResetWhileRunning => StatusCode::CONFLICT,
            UpdateError::MissingTargetVersion | UpdateError::InvalidTargetVersion(_) => {
                StatusCode::BAD_REQUEST
            }
            UpdateError::Inventory(_) | UpdateError::Check(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/updates/status", get(status))
        .route("/api/v1/updates/check", post(check))
        .route("/api/v1/updates/start/os", post(start_os))
        .route("/api/v1/updates/start/runtime", post(start_runtime))
        .route("/api/v1/updates/reset", post(reset))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<DaemonHealth> {
    Json(DaemonHealth {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn status(State(state): State<AppState>) -> Json<OperationState> {
    Json(state.updates.status().await)
}

async fn check(State(state): State<AppState>) -> Result<Json<OperationState>, ApiError> {
    Ok(Json(state.updates.check().await?))
}

async fn start_os(State(state): State<AppState>) -> Result<Json<StartResponse>, ApiError> {
    let started = state.updates.start(OperationKind::OsUpdate, None).await?;
    Ok(Json(started.into()))
}

/// A request without a JSON body is treated as "no version" and rejected with
/// the missing-target 400.
async fn start_runtime(
    State(state): State<AppState>,
    body: Option<Json<RuntimeUpgradeRequest>>,
) -> Result<Json<StartResponse>, ApiError> {
    let version = body.and_then(|Json(b)| b.version);
    let started = state
        .updates
        .start(OperationKind::RuntimeUpgrade, version)
        .await?;
    Ok(Json(started.into()))
}

async fn reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, ApiError> {
    state.updates.reset().await?;
    Ok(Json(ResetResponse { success: true }))
}
