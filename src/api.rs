//! HTTP routes over the tutor engine

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::{FeedbackAck, FeedbackSubmission, TutorEngine};
use crate::error::Error;
use crate::memory::Recollection;
use crate::progress::ProgressSummary;

const DEFAULT_SESSION: &str = "default";
const DEFAULT_LANG: &str = "en";

type SharedEngine = Arc<TutorEngine>;

/// Build the router. Rendered audio is served from `audio_dir`.
pub fn router(engine: SharedEngine, audio_dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/converse", post(converse))
        .route("/api/search", post(search))
        .route("/api/feedback", post(feedback))
        .route("/api/progress/:session_id", get(progress))
        .route("/api/reset", post(reset))
        .nest_service("/api/audio", ServeDir::new(audio_dir.into()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Error body returned by every route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_client_fault() => StatusCode::BAD_REQUEST,
            Error::Completion(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let error = match self.0 {
            Error::InvalidInput(msg) | Error::Completion(msg) => msg,
            other => other.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

fn session_or_default(session_id: Option<String>) -> String {
    session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION.to_string())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct ConverseRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub tts: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ConverseResponse {
    pub session_id: String,
    pub reply: String,
    pub reply_id: Option<String>,
    pub audio_url: Option<String>,
}

async fn converse(
    State(engine): State<SharedEngine>,
    Json(request): Json<ConverseRequest>,
) -> Result<Json<ConverseResponse>, ApiError> {
    let session_id = session_or_default(request.session_id);
    let lang = request.lang.unwrap_or_else(|| DEFAULT_LANG.to_string());

    let outcome = engine
        .converse(&session_id, &request.text, &lang, request.tts.unwrap_or(true))
        .await?;

    Ok(Json(ConverseResponse {
        session_id: outcome.session_id,
        reply: outcome.reply,
        reply_id: outcome.reply_id,
        audio_url: outcome.audio_ref.map(|file| format!("/api/audio/{}", file)),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub session_id: String,
    pub matches: Vec<Recollection>,
}

async fn search(
    State(engine): State<SharedEngine>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let session_id = session_or_default(request.session_id);
    let matches = engine
        .search(&session_id, &request.query, request.top_k)
        .await?;
    Ok(Json(SearchResponse {
        session_id,
        matches,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub learning_feedback: String,
    #[serde(default)]
    pub ai_response: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub reply_id: Option<String>,
}

async fn feedback(
    State(engine): State<SharedEngine>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackAck>, ApiError> {
    let ack = engine
        .submit_feedback(FeedbackSubmission {
            session_id: session_or_default(request.session_id),
            learning_feedback: request.learning_feedback,
            ai_response: request.ai_response,
            user_message: request.user_message,
            target_lang: request.target_lang,
            reply_id: request.reply_id,
        })
        .await?;
    Ok(Json(ack))
}

async fn progress(
    State(engine): State<SharedEngine>,
    Path(session_id): Path<String>,
) -> Json<ProgressSummary> {
    Json(engine.get_progress(&session_id).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

async fn reset(
    State(engine): State<SharedEngine>,
    Json(request): Json<ResetRequest>,
) -> Json<serde_json::Value> {
    let session_id = session_or_default(request.session_id);
    engine.reset(&session_id);
    Json(serde_json::json!({ "session_id": session_id, "reset": true }))
}
