use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use docbrain_core::{Brain, BrainError};
use docbrain_schema::ChatRequest;
use futures_util::StreamExt;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(chat))
}

/// One chat turn. `stream: false` returns a single JSON object; `stream:
/// true` returns a live `text/event-stream` body owned by the engine's
/// stream coordinator. Validation failures are rejected before any work.
async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Response {
    if let Err(error) = Brain::validate(&request) {
        return error_response(&error);
    }

    let bearer = bearer_token(&headers);

    if request.stream {
        let stream = state
            .brain
            .clone()
            .event_stream(request, bearer)
            .map(Ok::<_, Infallible>);
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    match state
        .brain
        .handle_buffered(&request, bearer.as_deref())
        .await
    {
        Ok(body) => Json(body).into_response(),
        Err(error) => error_response(&error),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}

/// Pre-stream errors become one structured JSON error. The downstream
/// status is preserved when it is a valid HTTP error status.
fn error_response(error: &BrainError) -> Response {
    let (status, code) = match error {
        BrainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        BrainError::Context(_) => (StatusCode::INTERNAL_SERVER_ERROR, "context_error"),
        BrainError::Downstream { status, .. } => {
            let status = status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, "downstream_error")
        }
        BrainError::Stream(_) => (StatusCode::INTERNAL_SERVER_ERROR, "stream_error"),
    };

    tracing::warn!(%error, code, "request failed");
    let body = serde_json::json!({
        "error": {
            "code": code,
            "message": error.to_string(),
            "status": status.as_u16(),
        }
    });
    (status, Json(body)).into_response()
}
