// src/api.rs
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Secrets;
use crate::error::PipelineError;
use crate::model::BatchRun;
use crate::pipeline::{Pipeline, RunReport};

pub const STATUS_MESSAGE: &str = "Ledge Pipeline endpoint. Use POST with Bearer token to run.";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub secrets: Arc<Secrets>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, secrets: Secrets) -> Self {
        Self {
            pipeline,
            secrets: Arc::new(secrets),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/pipeline/run", get(pipeline_status).post(trigger_run))
        .route("/api/cron", get(cron_run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn matches_secret(token: Option<&str>, secret: Option<&str>) -> bool {
    matches!((token, secret), (Some(t), Some(s)) if t == s)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

fn failure(e: PipelineError) -> Response {
    match e {
        PipelineError::AlreadyRunning => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Pipeline already running" })),
        )
            .into_response(),
        other => internal_error(other.to_string()),
    }
}

fn internal_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Pipeline failed", "message": message })),
    )
        .into_response()
}

/// Run on its own task: a client that hangs up must not cancel the run
/// mid-stage and leave its batch_log row open.
async fn run_detached(pipeline: Arc<Pipeline>) -> Result<RunReport, Response> {
    match tokio::spawn(async move { pipeline.run().await }).await {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(failure(e)),
        Err(e) => {
            tracing::error!(error = %e, "pipeline task aborted");
            Err(internal_error(e.to_string()))
        }
    }
}

/// POST /api/pipeline/run: requires `Bearer $PIPELINE_SECRET`.
async fn trigger_run(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !matches_secret(bearer(&headers), state.secrets.pipeline_secret.as_deref()) {
        return unauthorized();
    }
    match run_detached(state.pipeline.clone()).await {
        Ok(report) => Json(report).into_response(),
        Err(resp) => resp,
    }
}

#[derive(Serialize)]
struct StatusResp {
    status: &'static str,
    message: &'static str,
    time: String,
    running: bool,
    last_run: Option<BatchRun>,
}

/// GET /api/pipeline/run: liveness plus the latest run record; never triggers a run.
async fn pipeline_status(State(state): State<AppState>) -> Json<StatusResp> {
    let last_run = match state.pipeline.store().latest_run().await {
        Ok(run) => run,
        Err(e) => {
            tracing::warn!(error = %e, "could not read latest batch run");
            None
        }
    };
    Json(StatusResp {
        status: "ok",
        message: STATUS_MESSAGE,
        time: Utc::now().to_rfc3339(),
        running: state.pipeline.is_running(),
        last_run,
    })
}

#[derive(Serialize)]
struct CronResp {
    triggered_at: String,
    #[serde(flatten)]
    report: RunReport,
}

/// GET /api/cron: open unless `CRON_SECRET` is set; then either secret is accepted.
async fn cron_run(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let secrets = &state.secrets;
    if secrets.cron_secret.is_some() {
        let token = bearer(&headers);
        if !matches_secret(token, secrets.cron_secret.as_deref())
            && !matches_secret(token, secrets.pipeline_secret.as_deref())
        {
            return unauthorized();
        }
    }

    let triggered_at = Utc::now().to_rfc3339();
    tracing::info!(%triggered_at, "cron run triggered");
    match run_detached(state.pipeline.clone()).await {
        Ok(report) => Json(CronResp { triggered_at, report }).into_response(),
        Err(resp) => resp,
    }
}
