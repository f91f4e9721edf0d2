use crate::agent::AgentController;
use crate::config::Config;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

/// Shared server state. The agent is optional so the server can come up
/// and report readiness even when construction failed.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Mutex<Option<AgentController>>>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    page_urls: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    panel_urls: Vec<String>,
}

pub fn build_router(state: AppState, output_dir: &str, frontend_url: Option<&str>) -> Router {
    let cors = match frontend_url.and_then(|url| HeaderValue::from_str(url).ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .nest_service("/outputs", ServeDir::new(output_dir))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let agent = if state.agent.lock().await.is_some() {
        "ready"
    } else {
        "not initialized"
    };
    Json(json!({"status": "ok", "agent": agent}))
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<Value>)> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message is required"})),
        ));
    }

    let mut guard = state.agent.lock().await;
    let agent = guard.as_mut().ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "agent not initialized"})),
    ))?;

    let outcome = agent.handle_turn(message).await.map_err(|e| {
        log::error!("Chat turn failed: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("{:#}", e)})),
        )
    })?;

    Ok(Json(ChatResponse {
        response: outcome.reply,
        page_urls: outcome.page_urls,
        panel_urls: outcome.panel_urls,
    }))
}

/// Construct the agent and serve the API until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let output_dir = config.output_dir.clone();
    let frontend_url = config.frontend_url.clone();
    let port = config.port;

    let agent = match AgentController::new(config) {
        Ok(agent) => Some(agent),
        Err(e) => {
            log::error!("Agent initialization failed: {:#}", e);
            None
        }
    };
    let state = AppState {
        agent: Arc::new(Mutex::new(agent)),
    };
    let router = build_router(state, &output_dir, frontend_url.as_deref());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    log::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, router)
        .await
        .context("Server terminated")?;
    Ok(())
}
