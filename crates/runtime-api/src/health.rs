use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
pub async fn health(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use runtime_core::testing::{MockLlmSdk, ScriptedTurn};
    use runtime_core::{Runtime, RuntimeConfig};
    use runtime_storage::InMemoryPersistence;
    use tower::ServiceExt;

    use super::*;

    async fn test_state() -> AppState {
        let config = RuntimeConfig::default();
        let persistence: Arc<dyn runtime_core::PersistenceDriver> = Arc::new(InMemoryPersistence::new());
        let sdk: Arc<dyn runtime_core::LlmSdk> = MockLlmSdk::new(vec![ScriptedTurn::text("hi")]);
        let runtime = Arc::new(Runtime::start(config.clone(), Default::default(), persistence, sdk).await);
        AppState {
            runtime,
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn health_reports_ok_status() {
        let app = routes(test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
    }
}
