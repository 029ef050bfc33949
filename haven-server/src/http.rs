//! Haven HTTP API
//!
//! Each endpoint has a thin axum handler that delegates to an inner function
//! returning `(StatusCode, serde_json::Value)`. The inner functions are called
//! directly by the unit tests below.
//!
//! Endpoints:
//! - GET  /health                       store status
//! - GET  /version                      server version info
//! - POST /process-transcript           insights + profile synthesis
//! - POST /synthesize-therapy-session   personalize the next session
//! - POST /check-goals                  goal completion check
//! - POST /webhooks/post-call           signed voice-vendor callback
//! - POST /mood                         record a mood score
//! - GET  /users/:id/mood               recent mood entries
//! - GET  /users/:id/sessions           session history
//! - GET  /users/:id/next-session       prepared script (`?consume=true` marks it used)
//!
//! When `http.api_token` is set, every endpoint except health, version and the
//! webhook requires `Authorization: Bearer <token>`.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use haven_core::pipeline::{PipelineError, TranscriptJob};
use haven_core::webhook::{self, PayloadError, PostCallEvent, SignatureError};
use haven_core::{CompletionBackend, HavenConfig, Store};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::router::{self, HavenRequest};

const DEFAULT_MOOD_LIMIT: i64 = 30;
const MAX_MOOD_LIMIT: i64 = 365;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn Store>,
    pub backend: Arc<dyn CompletionBackend>,
    pub config: HavenConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let protected = Router::new()
        .route("/process-transcript", post(process_transcript_handler))
        .route("/synthesize-therapy-session", post(personalize_handler))
        .route("/check-goals", post(check_goals_handler))
        .route("/mood", post(record_mood_handler))
        .route("/users/:id/mood", get(list_mood_handler))
        .route("/users/:id/sessions", get(list_sessions_handler))
        .route("/users/:id/next-session", get(next_session_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/webhooks/post-call", post(post_call_handler))
        .merge(protected)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(Arc::new(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Haven HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTranscriptRequest {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub transcript: Option<String>,
    /// Call length in seconds; fractional values are rounded.
    pub duration: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizeRequest {
    pub user_id: Option<String>,
    pub module_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CheckGoalsRequest {
    pub user_id: Option<String>,
    pub transcript: Option<String>,
    /// Defaults to the goals on the user's profile.
    pub goals: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MoodRequest {
    pub user_id: Option<String>,
    pub score: Option<i16>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MoodQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct NextSessionQuery {
    #[serde(default)]
    pub consume: bool,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }

    pub fn body(msg: impl Into<String>) -> serde_json::Value {
        serde_json::to_value(Self::new(msg)).unwrap_or_default()
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check, asks the store to describe itself.
pub async fn health_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    match store.describe().await {
        Ok(description) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": description,
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": "store unavailable",
                }),
            )
        }
    }
}

/// Inner version, returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "haven/1",
    })
}

/// Bearer-token check. `None` configured token means the API is open.
pub fn authorize_inner(
    expected: Option<&str>,
    authorization: Option<&str>,
) -> Result<(), (StatusCode, serde_json::Value)> {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let presented = authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match presented {
        None => Err((
            StatusCode::UNAUTHORIZED,
            ErrorResponse::body("missing bearer token"),
        )),
        Some(t) if webhook::secrets_match(expected, t) => Ok(()),
        Some(_) => Err((StatusCode::FORBIDDEN, ErrorResponse::body("invalid token"))),
    }
}

pub async fn process_transcript_inner(
    state: &HttpState,
    req: ProcessTranscriptRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(state, transcript_request(req), StatusCode::OK).await
}

pub async fn personalize_inner(
    state: &HttpState,
    req: PersonalizeRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(state, personalize_request(req), StatusCode::OK).await
}

pub async fn check_goals_inner(
    state: &HttpState,
    req: CheckGoalsRequest,
) -> (StatusCode, serde_json::Value) {
    let request = parse_user_id(req.user_id.as_deref()).map(|user_id| HavenRequest::CheckGoals {
        user_id,
        transcript: req.transcript.unwrap_or_default(),
        goals: req.goals,
    });
    dispatch(state, request, StatusCode::OK).await
}

pub async fn record_mood_inner(
    state: &HttpState,
    req: MoodRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(state, mood_request(req), StatusCode::CREATED).await
}

pub async fn list_mood_inner(
    state: &HttpState,
    user_id: &str,
    query: MoodQuery,
) -> (StatusCode, serde_json::Value) {
    let request = parse_user_id(Some(user_id)).map(|user_id| HavenRequest::ListMood {
        user_id,
        limit: query
            .limit
            .unwrap_or(DEFAULT_MOOD_LIMIT)
            .clamp(1, MAX_MOOD_LIMIT),
    });
    dispatch(state, request, StatusCode::OK).await
}

pub async fn list_sessions_inner(
    state: &HttpState,
    user_id: &str,
) -> (StatusCode, serde_json::Value) {
    let request = parse_user_id(Some(user_id)).map(|user_id| HavenRequest::ListSessions { user_id });
    dispatch(state, request, StatusCode::OK).await
}

pub async fn next_session_inner(
    state: &HttpState,
    user_id: &str,
    query: NextSessionQuery,
) -> (StatusCode, serde_json::Value) {
    let request = parse_user_id(Some(user_id)).map(|user_id| HavenRequest::NextSession {
        user_id,
        consume: query.consume,
    });
    dispatch(state, request, StatusCode::OK).await
}

/// Inner post-call webhook.
///
/// Order matters: the signature is checked against the raw body before it is
/// parsed, and required fields are checked before the store is touched.
pub async fn post_call_inner(
    state: &HttpState,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
) -> (StatusCode, serde_json::Value) {
    let secret = state.config.webhook.resolved_secret();
    if let Err(e) = webhook::verify(
        secret.as_deref(),
        signature,
        body,
        now,
        state.config.webhook.tolerance_seconds,
    ) {
        return signature_rejection(e);
    }

    let event = match PostCallEvent::from_body(body) {
        Ok(event) => event,
        Err(e) => return (StatusCode::BAD_REQUEST, ErrorResponse::body(e.to_string())),
    };

    if !event.is_transcription() {
        tracing::debug!(event_type = %event.event_type, "Ignoring post-call event");
        return (
            StatusCode::OK,
            serde_json::json!({ "received": true, "ignored": event.event_type }),
        );
    }

    let call = match event.into_post_call() {
        Ok(call) => call,
        Err(PayloadError::MissingField(field)) => {
            return (
                StatusCode::BAD_REQUEST,
                ErrorResponse::body(format!("Missing required field: {}", field)),
            )
        }
        Err(e) => return (StatusCode::BAD_REQUEST, ErrorResponse::body(e.to_string())),
    };

    dispatch(state, Ok(HavenRequest::PostCall(call)), StatusCode::OK).await
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

/// Extractor rejections (bad JSON, wrong types, missing content type) use the
/// same error envelope as everything else.
fn bad_request(detail: String) -> (StatusCode, serde_json::Value) {
    tracing::debug!(detail = %detail, "Rejected request input");
    (
        StatusCode::BAD_REQUEST,
        ErrorResponse::body(format!("Invalid request: {}", detail)),
    )
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn process_transcript_handler(
    State(state): State<Arc<HttpState>>,
    req: Result<Json<ProcessTranscriptRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match req {
        Ok(Json(req)) => process_transcript_inner(&state, req).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn personalize_handler(
    State(state): State<Arc<HttpState>>,
    req: Result<Json<PersonalizeRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match req {
        Ok(Json(req)) => personalize_inner(&state, req).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn check_goals_handler(
    State(state): State<Arc<HttpState>>,
    req: Result<Json<CheckGoalsRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match req {
        Ok(Json(req)) => check_goals_inner(&state, req).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn record_mood_handler(
    State(state): State<Arc<HttpState>>,
    req: Result<Json<MoodRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match req {
        Ok(Json(req)) => record_mood_inner(&state, req).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn list_mood_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
    query: Result<Query<MoodQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query {
        Ok(Query(query)) => list_mood_inner(&state, &user_id, query).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn list_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (status, body) = list_sessions_inner(&state, &user_id).await;
    (status, Json(body))
}

pub async fn next_session_handler(
    State(state): State<Arc<HttpState>>,
    Path(user_id): Path<String>,
    query: Result<Query<NextSessionQuery>, QueryRejection>,
) -> impl IntoResponse {
    let (status, body) = match query {
        Ok(Query(query)) => next_session_inner(&state, &user_id, query).await,
        Err(rejection) => bad_request(rejection.body_text()),
    };
    (status, Json(body))
}

pub async fn post_call_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(webhook::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let now = chrono::Utc::now().timestamp();
    let (status, body) = post_call_inner(&state, signature, &body, now).await;
    (status, Json(body))
}

async fn require_token(
    State(state): State<Arc<HttpState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match authorize_inner(state.config.http.api_token.as_deref(), authorization) {
        Ok(()) => next.run(request).await,
        Err((status, body)) => (status, Json(body)).into_response(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn dispatch(
    state: &HttpState,
    request: Result<HavenRequest, PipelineError>,
    success: StatusCode,
) -> (StatusCode, serde_json::Value) {
    let result = match request {
        Ok(request) => {
            router::handle_request(
                request,
                state.store.as_ref(),
                state.backend.as_ref(),
                &state.config,
            )
            .await
        }
        Err(e) => Err(e),
    };
    pipeline_to_http(result, success)
}

/// Map a router result onto a status code and body.
///
/// Client errors echo their message. Server errors are logged with the
/// underlying cause and answered with a generic message.
pub fn pipeline_to_http(
    result: std::result::Result<serde_json::Value, PipelineError>,
    success: StatusCode,
) -> (StatusCode, serde_json::Value) {
    match result {
        Ok(data) => (success, data),
        Err(e) => {
            let status = error_status(&e);
            if status.is_server_error() {
                tracing::error!("Request failed: {}", e);
                (status, ErrorResponse::body("internal error"))
            } else {
                (status, ErrorResponse::body(e.to_string()))
            }
        }
    }
}

pub fn error_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::MissingField(_) | PipelineError::Invalid(_) => StatusCode::BAD_REQUEST,
        PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::Completion(_) | PipelineError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn signature_rejection(err: SignatureError) -> (StatusCode, serde_json::Value) {
    if err == SignatureError::MissingSecret {
        tracing::error!("Post-call webhook received but no webhook secret is configured");
    } else {
        tracing::warn!("Rejected post-call webhook: {}", err);
    }
    (StatusCode::UNAUTHORIZED, ErrorResponse::body(err.to_string()))
}

fn transcript_request(req: ProcessTranscriptRequest) -> Result<HavenRequest, PipelineError> {
    let user_id = parse_user_id(req.user_id.as_deref())?;
    let conversation_id = required(req.conversation_id, "conversationId")?;
    let transcript = required(req.transcript, "transcript")?;
    Ok(HavenRequest::ProcessTranscript(TranscriptJob {
        user_id,
        conversation_id,
        transcript,
        duration_secs: req.duration.map(|d| d.round() as i32).unwrap_or(0),
    }))
}

fn personalize_request(req: PersonalizeRequest) -> Result<HavenRequest, PipelineError> {
    let user_id = parse_user_id(req.user_id.as_deref())?;
    let module_id = match req.module_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            Uuid::parse_str(raw)
                .map_err(|_| PipelineError::Invalid("moduleId must be a UUID".into()))?,
        ),
    };
    Ok(HavenRequest::Personalize { user_id, module_id })
}

fn mood_request(req: MoodRequest) -> Result<HavenRequest, PipelineError> {
    let user_id = parse_user_id(req.user_id.as_deref())?;
    let score = req.score.ok_or(PipelineError::MissingField("score"))?;
    Ok(HavenRequest::RecordMood {
        user_id,
        score,
        note: req.note,
    })
}

fn required(value: Option<String>, field: &'static str) -> Result<String, PipelineError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(PipelineError::MissingField(field))
}

fn parse_user_id(raw: Option<&str>) -> Result<Uuid, PipelineError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(PipelineError::MissingField("userId"))?;
    Uuid::parse_str(raw).map_err(|_| PipelineError::Invalid("userId must be a UUID".into()))
}

// ============================================================================
// Unit Tests, call inner functions directly
// ============================================================================
