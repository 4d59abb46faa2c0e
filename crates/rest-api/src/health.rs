use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::engines::{AppState, EngineInfo};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ReadyStatus {
    status: &'static str,
    engines: Vec<EngineInfo>,
}

/// Not ready once any engine has stopped on an error.
async fn readyz(State(st): State<AppState>) -> (StatusCode, Json<ReadyStatus>) {
    let engines = st.controller.list().await;
    if engines.iter().any(EngineInfo::is_failed) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyStatus {
                status: "failed",
                engines,
            }),
        )
    } else {
        (
            StatusCode::OK,
            Json(ReadyStatus {
                status: "ready",
                engines,
            }),
        )
    }
}
