//! HTTP server.
//!
//! Exposes red-link resolution, job progress, and page reads as a JSON API
//! for the wiki front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/create` | Resolve a red link: `{sourceSlug, targetSlug}` → `{redirect, jobId}` |
//! | `GET`  | `/api/queue/{id}` | A creation job and its log |
//! | `GET`  | `/api/wiki/{slug}` | Page metadata, markdown, and live view count (records a view) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "sourceSlug and targetSlug must be non-empty slugs" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `rate_limited` (429),
//! `internal` (500).
//!
//! A background task periodically fails jobs that outlived the run ceiling
//! (see [`crate::jobs::JobLedger::reconcile_stale`]).

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::creation::{CreateError, CreateRequest};
use crate::models::{Job, LogEntry, Page};
use crate::ratelimit::client_key_from_headers;
use crate::services::Services;

/// Build the services from `config` and serve on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Exopedia listening on http://{}", config.server.bind);
    serve(services, listener).await
}

/// Serve on an already-bound listener.
pub async fn serve(services: Services, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    spawn_reconciler(&services);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = router(services).layer(TraceLayer::new_for_http()).layer(cors);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/api/create", post(handle_create))
        .route("/api/queue/{id}", get(handle_queue))
        .route("/api/wiki/{slug}", get(handle_wiki))
        .route("/health", get(handle_health))
        .with_state(services)
}

fn spawn_reconciler(services: &Services) {
    let ledger = services.ledger.clone();
    let every = Duration::from_secs(services.config.jobs.reconcile_interval_secs.max(1));
    let max_age = services.config.jobs.max_duration_secs as i64;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match ledger.reconcile_stale(max_age).await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(count = n, "failed stale creation jobs"),
                Err(e) => tracing::error!(error = %e, "stale job reconciliation failed"),
            }
        }
    });
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal error".to_string(),
    }
}

impl From<CreateError> for AppError {
    fn from(err: CreateError) -> Self {
        let message = err.to_string();
        match err {
            CreateError::Validation(m) => bad_request(m),
            CreateError::NotFound(m) => not_found(m),
            CreateError::RateLimited => AppError {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limited".to_string(),
                message,
            },
            CreateError::Internal(e) => internal(e),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/create ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    redirect: String,
    job_id: String,
}

async fn handle_create(
    State(services): State<Services>,
    headers: HeaderMap,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Json<CreateResponse>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let client_key = client_key_from_headers(&headers);

    let outcome = services.creation.create(&request, &client_key).await?;

    Ok(Json(CreateResponse {
        redirect: outcome.redirect,
        job_id: outcome.job_id,
    }))
}

// ============ GET /api/queue/{id} ============

#[derive(Serialize)]
struct QueueResponse {
    job: Job,
    logs: Vec<LogEntry>,
}

async fn handle_queue(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<QueueResponse>, AppError> {
    let (job, logs) = services
        .creation
        .job_with_logs(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("job not found: {}", id)))?;

    Ok(Json(QueueResponse { job, logs }))
}

// ============ GET /api/wiki/{slug} ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WikiResponse {
    page: Page,
    markdown: String,
    view_count: i64,
}

async fn handle_wiki(
    State(services): State<Services>,
    Path(slug): Path<String>,
) -> Result<Json<WikiResponse>, AppError> {
    let missing = || not_found(format!("page not found: {}", slug));

    let page = services
        .pages
        .get_meta(&slug)
        .await
        .map_err(internal)?
        .ok_or_else(missing)?;
    let document = services
        .pages
        .get_page(&slug)
        .await
        .map_err(internal)?
        .ok_or_else(missing)?;
    let view_count = services.pages.record_view(&page.id).await.map_err(internal)?;

    Ok(Json(WikiResponse {
        page,
        markdown: document.markdown,
        view_count,
    }))
}
