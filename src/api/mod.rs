pub mod auth;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agents::{AgentOrchestrator, AgentStats, FleetStatus, Reply};
use crate::config::Config;
use crate::error::{FleetError, Result};

pub type SharedOrchestrator = Arc<RwLock<AgentOrchestrator>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
    pub contact_id: String,
    /// Defaults to the contact id when absent
    pub conversation_id: Option<String>,
}

pub fn create_router(orchestrator: SharedOrchestrator, config: Arc<Config>) -> Router {
    Router::new()
        .route("/status", get(get_fleet_status))
        .route("/agents", get(list_agents))
        .route("/agents/:id", get(get_agent))
        .route("/agents/:id/messages", post(send_message))
        .route_layer(middleware::from_fn_with_state(config, auth::auth_middleware))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve the status API until `shutdown` resolves.
pub async fn start_api_server(
    orchestrator: SharedOrchestrator,
    config: Arc<Config>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(orchestrator, config.clone());

    let addr = format!("0.0.0.0:{}", config.monitoring.api_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FleetError::NetworkError(format!("Failed to bind {}: {}", addr, e)))?;
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| FleetError::NetworkError(format!("API server error: {}", e)))?;

    info!("API server stopped");
    Ok(())
}

async fn get_fleet_status(
    State(orchestrator): State<SharedOrchestrator>,
) -> Json<ApiResponse<FleetStatus>> {
    let status = orchestrator.read().await.get_status().await;
    Json(ApiResponse::success(status))
}

async fn list_agents(
    State(orchestrator): State<SharedOrchestrator>,
) -> Json<ApiResponse<Vec<AgentStats>>> {
    let status = orchestrator.read().await.get_status().await;
    Json(ApiResponse::success(status.agents))
}

async fn get_agent(
    State(orchestrator): State<SharedOrchestrator>,
    Path(agent_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<AgentStats>>) {
    match orchestrator.read().await.agent_stats(&agent_id).await {
        Some(stats) => (StatusCode::OK, Json(ApiResponse::success(stats))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Agent {} not found", agent_id))),
        ),
    }
}

async fn send_message(
    State(orchestrator): State<SharedOrchestrator>,
    Path(agent_id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> (StatusCode, Json<ApiResponse<Reply>>) {
    // Release the fleet lock before processing so a slow unit never holds up shutdown
    let agent = orchestrator.read().await.agent(&agent_id);
    let Some(agent) = agent else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Agent {} not found", agent_id))),
        );
    };

    let conversation_id = payload
        .conversation_id
        .unwrap_or_else(|| payload.contact_id.clone());
    let reply = agent
        .process_message(&payload.text, &payload.contact_id, &conversation_id)
        .await;
    (StatusCode::OK, Json(ApiResponse::success(reply)))
}
