use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use super::signature::{self, SIGNATURE_HEADER};
use super::AppState;
use crate::discourse::WebhookPayload;
use crate::dispatcher::Dispatch;
use crate::topics::{NewTopic, TopicError};

/// Header carrying the management API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/webhook", post(webhook))
        .route("/api/categories", get(list_categories))
        .route("/api/topics", post(create_topic))
        .route("/healthz", get(health))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid API Key")]
    InvalidApiKey,

    #[error("Malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Topic(#[from] TopicError),

    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSignature | Self::InvalidApiKey => StatusCode::FORBIDDEN,
            Self::MalformedJson(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Topic(TopicError::Inappropriate(_) | TopicError::Duplicate { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Topic(TopicError::Forum(_)) | Self::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// Requests carrying the configured management API key.
pub struct ApiKey;

#[async_trait]
impl FromRequestParts<AppState> for ApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided.is_empty() || provided != state.config.app_api_key {
            return Err(ApiError::InvalidApiKey);
        }
        Ok(Self)
    }
}

/// Discourse webhook. Work is dispatched in the background; the response never waits for it.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !signature::verify(&state.config.webhook_secret, &body, signature) {
        warn!("Rejected webhook with invalid signature");
        return Err(ApiError::InvalidSignature);
    }

    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedJson(e.to_string()))?;
    let payload: WebhookPayload =
        serde_json::from_value(value).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let status = match state.dispatcher.dispatch(payload.post) {
        Dispatch::Ignored(_) => "ignored",
        Dispatch::Accepted(_) => "processing",
    };
    Ok(Json(json!({ "status": status })))
}

async fn list_categories(
    State(state): State<AppState>,
    _key: ApiKey,
) -> Result<Response, ApiError> {
    let categories = state
        .topics
        .list_categories()
        .await
        .map_err(|e| ApiError::Upstream(format!("Failed to fetch categories: {e:#}")))?;
    Ok(Json(categories).into_response())
}

async fn create_topic(
    State(state): State<AppState>,
    _key: ApiKey,
    body: Bytes,
) -> Result<Response, ApiError> {
    let topic: NewTopic =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    let created = state.topics.create_topic(&topic).await?;
    Ok(Json(created).into_response())
}

async fn health() -> &'static str {
    "ok"
}
