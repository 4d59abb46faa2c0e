use axum::Router;

mod engines;
mod errors;
mod health;

pub use engines::{AppState, EngineController, EngineInfo, SinkInfo};
pub use errors::{EngineAPIError, engine_error};

/// Health probes plus engine inspection and stop routes.
pub fn router(state: AppState) -> Router {
    health::router(state.clone()).merge(engines::router(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    struct FakeController {
        engine: Mutex<EngineInfo>,
    }

    impl FakeController {
        fn new(info: EngineInfo) -> Arc<Self> {
            Arc::new(Self {
                engine: Mutex::new(info),
            })
        }
    }

    #[async_trait::async_trait]
    impl EngineController for FakeController {
        async fn list(&self) -> Vec<EngineInfo> {
            vec![self.engine.lock().unwrap().clone()]
        }

        async fn get(&self, name: &str) -> Result<EngineInfo, EngineAPIError> {
            let info = self.engine.lock().unwrap().clone();
            if info.name == name {
                Ok(info)
            } else {
                Err(EngineAPIError::NotFound(name.to_string()))
            }
        }

        async fn stop(&self, name: &str) -> Result<EngineInfo, EngineAPIError> {
            let mut info = self.engine.lock().unwrap();
            if info.name != name {
                return Err(EngineAPIError::NotFound(name.to_string()));
            }
            if info.is_stopped() {
                return Err(EngineAPIError::AlreadyStopped(name.to_string()));
            }
            info.state = "stopped".into();
            Ok(info.clone())
        }
    }

    fn sample() -> EngineInfo {
        EngineInfo {
            name: "person-normalize".into(),
            state: "awaiting_interval".into(),
            source: "bronze_person".into(),
            triggers: 12,
            sinks: vec![SinkInfo {
                id: "silver_identity".into(),
                target: "silver_identity".into(),
                offset: 3,
                health: "active".into(),
                consecutive_failures: 0,
                last_error: None,
                rows_written: 6,
            }],
            error: None,
        }
    }

    fn app(controller: Arc<FakeController>) -> Router {
        router(AppState { controller })
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_and_readiness() {
        let app = app(FakeController::new(sample()));

        let resp = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");

        let ready = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        let payload = json_body(ready).await;
        assert_eq!(payload["status"], json!("ready"));
        assert_eq!(payload["engines"][0]["sinks"][0]["offset"], json!(3));
    }

    #[tokio::test]
    async fn failed_engine_is_not_ready() {
        let mut info = sample();
        info.state = "stopped".into();
        info.error = Some("offset persistence failed".into());
        let resp = app(FakeController::new(info))
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn engine_routes() {
        let app = app(FakeController::new(sample()));

        let list = app
            .clone()
            .oneshot(Request::get("/engines").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        let engines: Vec<EngineInfo> =
            serde_json::from_value(json_body(list).await).unwrap();
        assert_eq!(engines, vec![sample()]);

        let missing = app
            .clone()
            .oneshot(Request::get("/engines/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let stop = || {
            Request::builder()
                .method(Method::POST)
                .uri("/engines/person-normalize/stop")
                .body(Body::empty())
                .unwrap()
        };
        let stopped = app.clone().oneshot(stop()).await.unwrap();
        assert_eq!(stopped.status(), StatusCode::OK);
        assert_eq!(json_body(stopped).await["state"], json!("stopped"));

        let again = app.oneshot(stop()).await.unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);
    }
}
