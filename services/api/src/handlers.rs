//! Axum Handlers for the REST API
//!
//! Thin adapters from HTTP onto [`LessonService`] operations. Every route
//! identifies the caller through the `x-user-id` header.
//!
//! [`LessonService`]: lingocast_core::LessonService

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use lingocast_core::{Language, LessonError};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    models::{
        CacheHandlePayload, CompleteLessonPayload, CustomLessonAccepted, CustomLessonPayload,
        CustomLessonResponse, ErrorResponse, LessonResponse, MenuResponse, ProgressResponse,
        RequestLessonPayload,
    },
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::ServiceUnavailable(detail) => {
                warn!("Lesson generation unavailable: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Lesson generation is temporarily unavailable. Please try again later."
                        .to_string(),
                )
            }
            ApiError::InternalServerError(detail) => {
                error!("Internal Server Error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<LessonError> for ApiError {
    fn from(err: LessonError) -> Self {
        let message = err.to_string();
        match err {
            LessonError::Validation(_) => ApiError::BadRequest(message),
            LessonError::LessonNotFound { .. } | LessonError::NotFound(_) => {
                ApiError::NotFound(message)
            }
            LessonError::LessonLocked { .. } => ApiError::Forbidden(message),
            LessonError::AlreadyProcessing(_) => ApiError::Conflict(message),
            LessonError::Generation(_) | LessonError::MalformedDocument { .. } => {
                ApiError::ServiceUnavailable(message)
            }
            LessonError::Audio(_) => ApiError::InternalServerError(message),
            LessonError::Store(e) => ApiError::InternalServerError(format!("{e:#}")),
        }
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

fn language(raw: &str) -> Result<Language, ApiError> {
    raw.parse::<Language>().map_err(ApiError::BadRequest)
}

/// Show the user's progress and the status of every unit on their level.
#[utoipa::path(
    get,
    path = "/languages/{language}/menu",
    responses(
        (status = 200, description = "Progress summary and unit statuses", body = MenuResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("language" = String, Path, description = "Target language, e.g. 'spanish'"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_menu(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(language_name): Path<String>,
) -> Result<Json<MenuResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let menu = state.service.menu(user_id, language(&language_name)?).await?;
    Ok(Json(menu.into()))
}

/// Request a curriculum lesson. Renders it on first request, replays it afterwards.
#[utoipa::path(
    post,
    path = "/lessons",
    request_body = RequestLessonPayload,
    responses(
        (status = 200, description = "Lesson audio is ready", body = LessonResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 403, description = "Lesson is locked", body = ErrorResponse),
        (status = 404, description = "Lesson not available", body = ErrorResponse),
        (status = 409, description = "A lesson is already being prepared for this user", body = ErrorResponse),
        (status = 503, description = "Generation backend unavailable", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn request_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RequestLessonPayload>,
) -> Result<Json<LessonResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let delivery = state
        .service
        .request_lesson(
            user_id,
            language(&payload.language)?,
            payload.level,
            payload.unit,
        )
        .await?;
    Ok(Json(delivery.into()))
}

/// Record that the user finished listening to a lesson.
#[utoipa::path(
    post,
    path = "/lessons/complete",
    request_body = CompleteLessonPayload,
    responses(
        (status = 200, description = "Updated progress", body = ProgressResponse),
        (status = 400, description = "Artifact does not belong to this lesson", body = ErrorResponse),
        (status = 403, description = "Lesson is locked", body = ErrorResponse),
        (status = 404, description = "Artifact not found", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn complete_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CompleteLessonPayload>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let summary = state
        .service
        .mark_complete(
            user_id,
            language(&payload.language)?,
            payload.level,
            payload.unit,
            payload.artifact_id,
        )
        .await?;
    Ok(Json(summary.into()))
}

/// Submit free text to be turned into a lesson in the background.
#[utoipa::path(
    post,
    path = "/custom-lessons",
    request_body = CustomLessonPayload,
    responses(
        (status = 202, description = "Request accepted", body = CustomLessonAccepted),
        (status = 400, description = "Text rejected", body = ErrorResponse),
        (status = 409, description = "A custom lesson is already being prepared for this user", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn submit_custom_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CustomLessonPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let request_id = state
        .service
        .submit_custom_text(user_id, language(&payload.language)?, &payload.text)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(CustomLessonAccepted { request_id })))
}

/// Poll a custom lesson request.
#[utoipa::path(
    get,
    path = "/custom-lessons/{id}",
    responses(
        (status = 200, description = "Request state", body = CustomLessonResponse),
        (status = 404, description = "Request not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Custom lesson request ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_custom_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomLessonResponse>, ApiError> {
    let user_id = user_id(&headers)?;
    let request = state.service.custom_request(user_id, id).await?;
    Ok(Json(request.into()))
}

/// Download the rendered WAV for an artifact.
#[utoipa::path(
    get,
    path = "/artifacts/{id}/audio",
    responses(
        (status = 200, description = "WAV audio", content_type = "audio/wav", body = Vec<u8>),
        (status = 404, description = "Artifact not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Artifact ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_artifact_audio(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    user_id(&headers)?;
    let audio = state.service.artifact_audio(id).await?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio))
}

/// Store the delivery front-end's reusable identifier for an artifact.
#[utoipa::path(
    put,
    path = "/artifacts/{id}/cache-handle",
    request_body = CacheHandlePayload,
    responses(
        (status = 204, description = "Handle recorded"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Artifact not found", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Artifact ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn set_cache_handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<CacheHandlePayload>,
) -> Result<StatusCode, ApiError> {
    user_id(&headers)?;
    let handle = payload.handle.trim();
    if handle.is_empty() {
        return Err(ApiError::BadRequest("handle must not be empty".to_string()));
    }
    state.service.record_cache_handle(id, handle).await?;
    Ok(StatusCode::NO_CONTENT)
}
