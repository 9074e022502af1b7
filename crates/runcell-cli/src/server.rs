//! HTTP boundary for the execution engine

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Query, State, rejection::JsonRejection},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use runcell::{Engine, ExecutionRequest, ExecutionResult, Phase, RequestError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

/* ---------------- server ---------------- */

/// Build the router with all routes and middleware
pub fn router(engine: Engine) -> Router {
    let body_limit = engine.config().limits.max_request_bytes();

    Router::new()
        .route("/health", get(health))
        .route("/execute", post(execute))
        .route("/templates", get(templates))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        "request completed"
                    );
                }),
        )
        .with_state(engine)
}

/// Serve until Ctrl-C
pub async fn serve(engine: Engine, addr: &str) -> anyhow::Result<()> {
    let socket: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid bind address '{addr}'"))?;
    let listener = TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {socket}"))?;

    info!(
        languages = engine.config().languages.len(),
        max_concurrent = engine.config().max_concurrent,
        "runcell listening on http://{}",
        socket
    );

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

/* ---------------- response models ---------------- */

#[derive(Debug, Serialize)]
struct SuccessResponse {
    stdout: String,
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct RejectionResponse {
    error: &'static str,
    detail: String,
}

#[derive(Debug, Serialize)]
struct FailureResponse {
    error: String,
    output: Option<String>,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signal: Option<i32>,
}

impl FailureResponse {
    fn new(error: String, kind: &'static str) -> Self {
        Self {
            error,
            output: None,
            kind,
            phase: None,
            exit_code: None,
            signal: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    #[serde(rename = "languageId", alias = "language")]
    language_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TemplateResponse {
    template: String,
    supported_languages: Vec<String>,
}

/* ---------------- endpoints ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn execute(
    State(engine): State<Engine>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return invalid_request(rejection.body_text());
        }
    };

    match engine.execute(request).await {
        Ok(result) => result_response(result),
        Err(e) => rejection_response(e),
    }
}

async fn templates(State(engine): State<Engine>, Query(query): Query<TemplateQuery>) -> Response {
    let Some(language_id) = query.language_id else {
        return invalid_request("languageId is required".to_owned());
    };

    match engine.template(&language_id) {
        Ok(template) => (
            StatusCode::OK,
            Json(TemplateResponse {
                template: template.template,
                supported_languages: template.supported_languages,
            }),
        )
            .into_response(),
        Err(e) => rejection_response(e),
    }
}

/* ---------------- mapping ---------------- */

fn invalid_request(detail: String) -> Response {
    rejection_response(RequestError::InvalidRequest(detail))
}

fn rejection_response(err: RequestError) -> Response {
    let (error, detail) = match err {
        RequestError::InvalidRequest(detail) => ("invalid request", detail),
        RequestError::UnsupportedLanguage(id) => ("unsupported language", id),
    };
    (
        StatusCode::BAD_REQUEST,
        Json(RejectionResponse { error, detail }),
    )
        .into_response()
}

fn result_response(result: ExecutionResult) -> Response {
    let kind = result.kind();
    let (status, body) = match result {
        ExecutionResult::Success { stdout, truncated } => {
            return (StatusCode::OK, Json(SuccessResponse { stdout, truncated })).into_response();
        }
        ExecutionResult::CompileFailure { diagnostics } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            FailureResponse::new(diagnostics, kind),
        ),
        ExecutionResult::RuntimeFailure {
            diagnostics,
            exit_code,
            signal,
            ..
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            FailureResponse {
                exit_code,
                signal,
                ..FailureResponse::new(diagnostics, kind)
            },
        ),
        ExecutionResult::Timeout { phase } => (
            StatusCode::GATEWAY_TIMEOUT,
            FailureResponse {
                phase: Some(phase),
                ..FailureResponse::new(format!("time limit exceeded during {phase}"), kind)
            },
        ),
        ExecutionResult::EngineError { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            FailureResponse::new(message, kind),
        ),
    };
    (status, Json(body)).into_response()
}
