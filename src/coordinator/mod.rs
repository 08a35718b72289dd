//! Coordinator ingest surface: the two agent-facing HTTP endpoints.
//!
//! Grounded on the teacher's `api::mod` router assembly (axum + tower-http
//! tracing layer) and on `agentsConfig`/`agentsResults` in `http.go`.

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::model::{Service, ServiceResult};
use crate::persistence::Persistence;
use auth::{authenticate, AgentHeaders};

#[derive(Clone)]
pub struct CoordinatorState {
    pub persistence: Arc<dyn Persistence>,
    pub results_tx: mpsc::Sender<ServiceResult>,
    pub global_agent_key: Arc<str>,
}

pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/agents/config", get(agents_config))
        .route("/agents/results", post(agents_results))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn spawn_coordinator(addr: SocketAddr, state: CoordinatorState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("coordinator ingest listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[instrument(skip(state))]
async fn agents_config(
    State(state): State<CoordinatorState>,
    headers: AgentHeaders,
) -> Result<Json<Vec<Service>>, StatusCode> {
    authenticate(
        state.persistence.as_ref(),
        &state.global_agent_key,
        &headers.name,
        &headers.key,
        &headers.location,
    )
    .await?;

    let services = state
        .persistence
        .read_services(0, &headers.location, headers.only_location)
        .await
        .map_err(|err| {
            warn!("failed to read services for agent {}: {err}", headers.name);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(services))
}

/// Decode errors and enqueue errors are logged, never fail the batch —
/// the protocol only guarantees "accepted for processing", not per-result
/// success (§7's documented open note on partial-failure semantics).
#[instrument(skip(state, results))]
async fn agents_results(
    State(state): State<CoordinatorState>,
    headers: AgentHeaders,
    Json(results): Json<Vec<ServiceResult>>,
) -> Result<StatusCode, StatusCode> {
    authenticate(
        state.persistence.as_ref(),
        &state.global_agent_key,
        &headers.name,
        &headers.key,
        &headers.location,
    )
    .await?;

    for result in results {
        if state.results_tx.send(result).await.is_err() {
            warn!("analytics queue closed, dropping remaining results from {}", headers.name);
            break;
        }
    }

    Ok(StatusCode::OK)
}
