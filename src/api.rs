//! HTTP front end for code execution.
//!
//! ```text
//! POST /        {"lang": "python", "code": "print(1)"}  ─▶  {"output": "1", "error": false}
//! GET  /health  ─▶  ok
//! ```
//!
//! Bad request bodies, unsupported languages and invalid or in-use job ids
//! are answered with `400`. Every other failure is a `200` whose body carries the error
//! text as `output` with `error` set.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::ServerError;
use crate::sandbox::{Job, JobId, Language, SandboxManager};

/// Maximum JSON body size for execution requests (1 MB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Body of an execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub code: String,
    pub lang: String,
    /// Optional caller-chosen job id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Body of an execution response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub output: String,
    pub error: bool,
}

/// Shared state for the API.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<SandboxManager>,
}

/// The public execution API.
pub struct ExecApi;

impl ExecApi {
    /// Build the axum router.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/", post(handle_exec))
            .route("/health", get(health_check))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve the API on `addr` until `shutdown` resolves.
    pub async fn serve<F>(state: ApiState, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        tracing::info!("Code execution API listening on {}", addr);

        axum::serve(listener, Self::router(state))
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn health_check() -> &'static str {
    "ok"
}

async fn handle_exec(
    State(state): State<ApiState>,
    payload: Result<Json<ExecRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Failed to decode request body: {}", rejection.body_text()),
            )
                .into_response();
        }
    };

    let language: Language = match req.lang.parse() {
        Ok(language) => language,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let mut job = Job::new(language, req.code);
    if let Some(id) = req.job_id {
        match JobId::parse(&id) {
            Ok(id) => job = job.with_id(id),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    tracing::info!(job_id = %job.id, "Received {} code execution request", language);

    let response = match state.manager.execute_job(job).await {
        Ok(output) => ExecResponse {
            output: output.output,
            error: false,
        },
        Err(e) if e.is_client_error() => {
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(e) => ExecResponse {
            output: e.to_string(),
            error: true,
        },
    };

    Json(response).into_response()
}
