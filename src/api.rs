//! Local Control API (SPEC_FULL §4.6): a loopback-only HTTP server letting
//! co-resident tools enumerate and message agents.

use crate::config::{resolve_control_port, DEFAULT_CONTROL_PORT};
use crate::router::AgentRouter;
use crate::types::{AgentInfo, ThreadName};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// Upper bound on port increments tried after the first `EADDRINUSE`
/// (SPEC_FULL §4.6), so a persistently occupied range can't spin forever.
const MAX_PORT_ATTEMPTS: u16 = 50;

#[derive(Debug, Serialize)]
struct AgentsResponse {
    agents: Vec<AgentInfo>,
    #[serde(rename = "activeTab")]
    active_tab: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateAgentRequest {
    #[serde(rename = "threadName")]
    thread_name: String,
}

#[derive(Debug, Serialize)]
struct CreateAgentResponse {
    created: bool,
    #[serde(rename = "threadName")]
    thread_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InjectMessageRequest {
    message: String,
    sender: String,
}

#[derive(Debug, Serialize)]
struct DeliveredResponse {
    delivered: bool,
    target: String,
}

#[derive(Debug, Serialize)]
struct UndeliveredResponse {
    delivered: bool,
    error: String,
    available: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn get_agents(State(router): State<Arc<AgentRouter>>) -> Json<AgentsResponse> {
    Json(AgentsResponse {
        agents: router.list_agents().await,
        active_tab: None,
    })
}

async fn create_agent(
    State(router): State<Arc<AgentRouter>>,
    Json(body): Json<CreateAgentRequest>,
) -> Response {
    let name = match ThreadName::new(body.thread_name.clone()) {
        Ok(n) => n,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response(),
    };

    let supervisor = router.supervisor();
    if supervisor.thread_exists(&name).await {
        return Json(CreateAgentResponse {
            created: false,
            thread_name: body.thread_name,
            reason: Some("already exists".to_string()),
        })
        .into_response();
    }

    match supervisor.ensure_thread(&name).await {
        Ok(()) => Json(CreateAgentResponse {
            created: true,
            thread_name: body.thread_name,
            reason: None,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

async fn post_message(
    State(router): State<Arc<AgentRouter>>,
    Path(name): Path<String>,
    Json(body): Json<InjectMessageRequest>,
) -> Response {
    let target = match ThreadName::new(name.clone()) {
        Ok(n) => n,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: e.to_string() })).into_response(),
    };

    if !router.supervisor().thread_exists(&target).await {
        let available = router
            .list_agents()
            .await
            .into_iter()
            .map(|a| a.name)
            .collect();
        return (
            StatusCode::NOT_FOUND,
            Json(UndeliveredResponse {
                delivered: false,
                error: format!("Agent \"{name}\" not found"),
                available,
            }),
        )
            .into_response();
    }

    match router.inject_message(&target, &body.message, &body.sender).await {
        Ok(()) => Json(DeliveredResponse {
            delivered: true,
            target: name,
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error: e.to_string() })).into_response(),
    }
}

fn build_router(router: Arc<AgentRouter>) -> Router {
    // Permissive by design (SPEC_FULL §4.6): this is a loopback-only
    // control surface for co-resident tooling, not a public API.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/agents", get(get_agents).post(create_agent))
        .route("/api/agents/{name}/message", post(post_message))
        .layer(cors)
        .with_state(router)
}

/// Bind the control API to loopback, starting at `resolve_control_port()`
/// and incrementing on `EADDRINUSE` (SPEC_FULL §4.6). Returns the bound
/// address and a handle to the running server task.
pub async fn serve(router: Arc<AgentRouter>) -> crate::error::Result<(SocketAddr, JoinHandle<()>)> {
    let start_port = resolve_control_port();
    let mut last_err = None;

    for offset in 0..MAX_PORT_ATTEMPTS {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                let app = build_router(router);
                let bound_addr = listener.local_addr()?;
                let handle = tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!(error = %e, "control API server exited with error");
                    }
                });
                return Ok((bound_addr, handle));
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(crate::error::Error::config(format!(
        "no free port found near {start_port} after {MAX_PORT_ATTEMPTS} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// The default port the server tries first, re-exported for callers that
/// want to display or probe it without importing `config` directly.
pub const fn default_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
