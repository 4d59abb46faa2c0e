use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineAPIError, engine_error};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<dyn EngineController>,
}

/// Snapshot of one sink's progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkInfo {
    pub id: String,
    pub target: String,
    /// Last durably committed source offset.
    pub offset: u64,
    /// `active`, `backoff` or `failed`.
    pub health: String,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub rows_written: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    /// Scheduler state, e.g. `awaiting_interval` or `stopped`.
    pub state: String,
    pub source: String,
    pub triggers: u64,
    pub sinks: Vec<SinkInfo>,
    /// Why the engine stopped, when it stopped on an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineInfo {
    pub fn is_stopped(&self) -> bool {
        self.state == "stopped"
    }

    pub fn is_failed(&self) -> bool {
        self.is_stopped() && self.error.is_some()
    }
}

#[async_trait]
pub trait EngineController: Send + Sync {
    async fn list(&self) -> Vec<EngineInfo>;

    async fn get(&self, name: &str) -> Result<EngineInfo, EngineAPIError>;

    /// Request a graceful stop and wait for in-flight commits to drain.
    async fn stop(&self, name: &str) -> Result<EngineInfo, EngineAPIError>;
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/engines", get(list_engines))
        .route("/engines/{name}", get(get_engine))
        .route("/engines/{name}/stop", post(stop_engine))
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

async fn list_engines(State(st): State<AppState>) -> Json<Vec<EngineInfo>> {
    Json(st.controller.list().await)
}

async fn get_engine(
    State(st): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<EngineInfo> {
    st.controller.get(&name).await.map(Json).map_err(engine_error)
}

async fn stop_engine(
    State(st): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<EngineInfo> {
    st.controller.stop(&name).await.map(Json).map_err(engine_error)
}
