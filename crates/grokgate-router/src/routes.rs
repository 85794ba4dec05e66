use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use grokgate_common::GatewayError;
use grokgate_core::{DispatchOutput, Dispatcher, catalog};
use grokgate_protocol::chat::{ChatCompletionRequest, ErrorPayload, ModelList};
use grokgate_upstream::assets;

const UPSTREAM_ASSET_BASE: &str = "https://assets.grok.com";

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn gateway_router(dispatcher: Arc<Dispatcher>) -> Router {
    let state = GatewayState { dispatcher };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models_list))
        .route("/v1/assets/{token}", get(asset_redirect))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<GatewayState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match state.dispatcher.dispatch(&request).await {
        Ok(DispatchOutput::Complete(completion)) => Json(completion).into_response(),
        Ok(DispatchOutput::Stream(lines)) => sse_response(lines),
        Err(err) => error_response(err),
    }
}

async fn models_list() -> Response {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let list = ModelList::new(
        catalog::all().iter().map(|spec| spec.id.to_string()),
        created,
    );
    Json(list).into_response()
}

/// Resolve an asset token back to its upstream location. Path tokens are
/// rooted at the upstream asset host; foreign tokens 404.
async fn asset_redirect(Path(token): Path<String>) -> Response {
    let Some(target) = assets::decode(&token) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let location = if target.starts_with('/') {
        format!("{UPSTREAM_ASSET_BASE}{target}")
    } else {
        target
    };
    Redirect::temporary(&location).into_response()
}

fn sse_response(lines: mpsc::Receiver<String>) -> Response {
    let stream = ReceiverStream::new(lines).map(Ok::<_, Infallible>);
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream");
    if let Some(headers) = builder.headers_mut() {
        // Hint common reverse proxies to avoid buffering SSE responses.
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_response(err: GatewayError) -> Response {
    let status = err.http_status();
    warn!(status, error = %err, "request failed");
    let kind = match status {
        400 => "invalid_request_error",
        429 => "rate_limit_error",
        _ => "api_error",
    };
    let payload = ErrorPayload::new(err.to_string(), kind, err.code());
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(payload)).into_response()
}
