//! The public site: files from the document root first, then the
//! deployer's dispatcher, then 404.

use std::path::Path;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use deployer::dispatch::{DispatchRequest, DispatchResponse, Dispatcher};
use tower_http::services::ServeDir;
use tracing::{debug, warn};

use crate::routes;
use crate::state::AppState;

/// Largest request body handed to dynamic routes.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Full application: admin API plus the site.
pub fn app(state: AppState, document_root: &Path) -> Router {
    let dynamic = Router::new()
        .fallback(dispatch_request)
        .with_state(state.dispatcher.clone());
    let files = ServeDir::new(document_root)
        .append_index_html_on_directories(true)
        .call_fallback_on_method_not_allowed(true)
        .fallback(dynamic);

    Router::new()
        .nest("/_deployer/api", routes::api_router())
        .with_state(state)
        .fallback_service(files)
}

async fn dispatch_request(State(dispatcher): State<Dispatcher>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    if !dispatcher.handles(&path) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            debug!(path, err = %err, "request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let dispatch = DispatchRequest {
        method: parts.method.as_str().to_string(),
        path,
        query: parts.uri.query().map(str::to_string),
        headers,
        body,
    };

    // Generators and proxying block.
    let answered = tokio::task::spawn_blocking(move || dispatcher.dispatch(&dispatch)).await;
    match answered {
        Ok(Some(response)) => into_response(response),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            warn!(err = %err, "dispatch task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_response(dispatched: DispatchResponse) -> Response {
    let mut response = Response::new(Body::from(dispatched.body));
    *response.status_mut() =
        StatusCode::from_u16(dispatched.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = response.headers_mut();
    for (name, value) in dispatched.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(name, "dropping invalid response header"),
        }
    }
    response
}
