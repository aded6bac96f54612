//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ArtifactResponse, CacheHandlePayload, CompleteLessonPayload, CustomLessonAccepted,
        CustomLessonPayload, CustomLessonResponse, ErrorResponse, LessonResponse, MenuResponse,
        MenuUnit, ProgressResponse, RequestLessonPayload,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_menu,
        handlers::request_lesson,
        handlers::complete_lesson,
        handlers::submit_custom_lesson,
        handlers::get_custom_lesson,
        handlers::get_artifact_audio,
        handlers::set_cache_handle,
    ),
    components(
        schemas(
            MenuResponse, MenuUnit, ProgressResponse, LessonResponse, ArtifactResponse,
            RequestLessonPayload, CompleteLessonPayload, CustomLessonPayload,
            CustomLessonAccepted, CustomLessonResponse, CacheHandlePayload, ErrorResponse
        )
    ),
    tags(
        (name = "LingoCast API", description = "Narrated audio lessons, progress and custom lessons")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/languages/{language}/menu", get(handlers::get_menu))
        .route("/lessons", post(handlers::request_lesson))
        .route("/lessons/complete", post(handlers::complete_lesson))
        .route("/custom-lessons", post(handlers::submit_custom_lesson))
        .route("/custom-lessons/{id}", get(handlers::get_custom_lesson))
        .route("/artifacts/{id}/audio", get(handlers::get_artifact_audio))
        .route("/artifacts/{id}/cache-handle", put(handlers::set_cache_handle))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
