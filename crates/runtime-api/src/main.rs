// Agent runtime API server.

mod error;
mod health;
mod state;
mod ws;

use std::sync::Arc;

use axum::Router;
use runtime_core::testing::{MockLlmSdk, ScriptedTurn};
use runtime_core::{DefaultAgentConfig, Runtime, RuntimeConfig};
use runtime_llm::AnthropicSdkConfig;
use runtime_storage::{InMemoryPersistence, PostgresPersistence};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::error::{ApiError, Result};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(health::health),
    components(schemas(health::HealthResponse)),
    info(title = "Agent Runtime API", version = "0.2.0")
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "runtime_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    tracing::info!("runtime-api starting...");

    let config = RuntimeConfig::from_env()?;
    let default_agent = envy::prefixed("RUNTIME_DEFAULT_AGENT_")
        .from_env::<DefaultAgentConfig>()
        .unwrap_or_default();

    let persistence: Arc<dyn runtime_core::PersistenceDriver> = match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to Postgres persistence driver");
            Arc::new(
                PostgresPersistence::from_url(url)
                    .await
                    .map_err(|e| ApiError::Configuration(format!("failed to connect to database: {e}")))?,
            )
        }
        None => {
            tracing::info!("no RUNTIME_DATABASE_URL set, using in-memory persistence");
            Arc::new(InMemoryPersistence::new())
        }
    };

    let sdk: Arc<dyn runtime_core::LlmSdk> = match AnthropicSdkConfig::from_env() {
        Ok(sdk_config) => {
            tracing::info!(model = %sdk_config.model, "using Anthropic-shaped LLM SDK adapter");
            runtime_llm::build_sdk(sdk_config)
        }
        Err(err) => {
            tracing::warn!(%err, "ANTHROPIC_API_KEY not configured, falling back to a scripted mock SDK");
            MockLlmSdk::new(vec![ScriptedTurn::text("this is a mock reply - configure ANTHROPIC_API_KEY for real responses")])
                as Arc<dyn runtime_core::LlmSdk>
        }
    };

    let runtime = Arc::new(Runtime::start(config.clone(), default_agent, persistence, sdk).await);
    let state = AppState {
        runtime,
        config: Arc::new(config.clone()),
    };

    let app = Router::new()
        .merge(health::routes(state.clone()))
        .merge(ws::routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| ApiError::Bind(format!("{}: {e}", config.bind_addr)))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    Ok(())
}
