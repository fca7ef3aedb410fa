//! Administrative API under `/_deployer/api`.
//!
//! Manager calls probe the site over HTTP and touch the filesystem, so each
//! one runs on the blocking pool.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use deployer::core::types::StrategyState;
use deployer::manager::SwitchTarget;
use deployer::status::EndpointStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(get_status))
        .route("/endpoints/switch", post(switch_endpoint))
        .route("/deactivate", post(deactivate))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /status - one row per known endpoint.
async fn get_status(State(state): State<AppState>) -> Result<Json<Vec<EndpointStatus>>, ApiError> {
    let manager = state.manager.clone();
    let rows = blocking(move || manager.status())
        .await?
        .map_err(|err| internal(&err))?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    path: String,
    /// Strategy name; the next one in the preference list when absent.
    strategy: Option<String>,
}

/// POST /endpoints/switch - move an endpoint to another strategy.
async fn switch_endpoint(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<StrategyState>, ApiError> {
    let target = request
        .strategy
        .map_or(SwitchTarget::Next, SwitchTarget::Named);
    let manager = state.manager.clone();
    let path = request.path;
    let switched = blocking(move || manager.switch(&path, target))
        .await?
        .map_err(|err| bad_request(&err))?;
    Ok(Json(switched))
}

#[derive(Debug, Serialize)]
struct DeactivatedEntry {
    path: String,
    ok: bool,
    error: Option<String>,
}

/// POST /deactivate - tear down every endpoint.
async fn deactivate(State(state): State<AppState>) -> Result<Json<Vec<DeactivatedEntry>>, ApiError> {
    let manager = state.manager.clone();
    let outcomes = blocking(move || manager.deactivate())
        .await?
        .map_err(|err| internal(&err))?;
    let entries = outcomes
        .into_iter()
        .map(|outcome| DeactivatedEntry {
            path: outcome.path,
            ok: outcome.result.is_ok(),
            error: outcome.result.err().map(|err| format!("{err:#}")),
        })
        .collect();
    Ok(Json(entries))
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        warn!(err = %err, "blocking task failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "task failed" })),
        )
    })
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("{err:#}") })),
    )
}

fn internal(err: &anyhow::Error) -> ApiError {
    warn!(err = %format!("{err:#}"), "api request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": format!("{err:#}") })),
    )
}
