//! Gateway command: serves the agent over HTTP.
//!
//! Mounts the request handler at the same path peers use to call each other:
//! `POST /openai/deployments/{deployment}/chat/completions`.
//!
//! With `"stream": true` the reply is an event stream of
//! `chat.completion.chunk` objects: one per capability stage (as
//! `custom_content.stages`), one carrying the answer, then `[DONE]`.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use agentmesh_agent::{ChatOutcome, ChoiceEvent, RequestHandler, ResponseChoice};
use agentmesh_core::config::Config;
use agentmesh_core::error::{RegistryError, TurnError};
use agentmesh_core::types::{ChatCompletionResponse, ChatRequest, ErrorBody};

use crate::helpers;

#[derive(Clone)]
struct AppState {
    handler: Arc<RequestHandler>,
    deployment: String,
}

/// Run the gateway until Ctrl+C.
pub async fn run(config: Config) -> Result<()> {
    helpers::print_banner();

    let handler = Arc::new(crate::build_handler(&config)?);
    let deployment = config.agent.deployment_name.clone();
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    println!("  Deployment: {deployment}");
    println!("  Listening:  http://{addr}/openai/deployments/{deployment}/chat/completions");
    println!();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, deployment = %deployment, "gateway listening");

    axum::serve(listener, router(handler, deployment))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received Ctrl+C, shutting down");
        })
        .await
        .context("gateway server failed")?;

    Ok(())
}

/// HTTP routes for one agent deployment.
pub fn router(handler: Arc<RequestHandler>, deployment: String) -> Router {
    Router::new()
        .route(
            "/openai/deployments/:deployment/chat/completions",
            post(chat_completions),
        )
        .route("/health", get(|| async { "ok" }))
        .with_state(AppState {
            handler,
            deployment,
        })
}

async fn chat_completions(
    State(state): State<AppState>,
    Path(deployment): Path<String>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected malformed chat request");
            return (
                rejection.status(),
                Json(ErrorBody::new(rejection.body_text(), "invalid_request")),
            )
                .into_response();
        }
    };

    if deployment != state.deployment {
        warn!(requested = %deployment, "request for a deployment this gateway does not serve");
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new(
                format!("deployment '{deployment}' not found"),
                "unknown_deployment",
            )),
        )
            .into_response();
    }

    info!(
        deployment = %deployment,
        messages = request.messages.len(),
        depth = request.mesh_depth,
        stream = request.stream,
        "chat completion request"
    );

    if request.stream {
        return stream_completion(state, request).into_response();
    }

    let mut choice = ResponseChoice::new();
    let outcome = state.handler.handle(request, &mut choice).await;
    match &outcome {
        ChatOutcome::Answer(answer) => {
            Json(ChatCompletionResponse::answer(&state.deployment, answer)).into_response()
        }
        ChatOutcome::Failure(e) => (
            status_for(e),
            Json(ErrorBody::new(outcome.message(), e.code())),
        )
            .into_response(),
    }
}

fn stream_completion(
    state: AppState,
    request: ChatRequest,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (mut choice, events) = ResponseChoice::streaming();
    let handler = state.handler.clone();
    let turn = AbortOnDrop(tokio::spawn(async move {
        handler.handle(request, &mut choice).await;
    }));

    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let model = state.deployment.clone();
    let mut stage_index = 0usize;

    // Dropping the body (client disconnect) aborts the turn.
    let body = UnboundedReceiverStream::new(events).map(move |event| {
        let _turn = &turn;
        let chunk = match event {
            ChoiceEvent::Stage(stage) => {
                let index = stage_index;
                stage_index += 1;
                completion_chunk(
                    &id,
                    &model,
                    json!({
                        "custom_content": {
                            "stages": [{
                                "index": index,
                                "name": stage.capability,
                                "content": format!("Arguments: {}\n\n{}", stage.arguments, stage.result),
                                "status": if stage.failed { "failed" } else { "completed" }
                            }]
                        }
                    }),
                    None,
                )
            }
            ChoiceEvent::Content(text) => completion_chunk(&id, &model, json!({ "content": text }), Some("stop")),
            ChoiceEvent::Failure { message, code } => {
                json!({ "error": { "message": message, "code": code } })
            }
        };
        Ok(SseEvent::default().data(chunk.to_string()))
    });
    let done = stream::once(async { Ok(SseEvent::default().data("[DONE]")) });

    Sse::new(body.chain(done)).keep_alive(KeepAlive::default())
}

/// Aborts the spawned turn when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            debug!("response stream dropped; aborting turn");
            self.0.abort();
        }
    }
}

fn completion_chunk(id: &str, model: &str, delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
    })
}

/// HTTP status for a failed turn.
fn status_for(error: &TurnError) -> StatusCode {
    match error {
        TurnError::EmptyRequest | TurnError::DepthExceeded { .. } => StatusCode::BAD_REQUEST,
        TurnError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        TurnError::Registry(RegistryError::Discovery(_)) => StatusCode::SERVICE_UNAVAILABLE,
        TurnError::Reasoning(_) => StatusCode::BAD_GATEWAY,
        TurnError::Registry(_) | TurnError::LoopExceeded { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
