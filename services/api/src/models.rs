//! API Models
//!
//! Request and response bodies for the REST API. Core types are mapped into
//! these so that the OpenAPI document stays independent of the domain crate.

use chrono::{DateTime, Utc};
use lingocast_core::{
    service::{LessonDelivery, LessonMenu, ProgressSummary, UnitStatus},
    store::{AudioArtifact, CustomLessonRequest},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProgressResponse {
    #[schema(example = "spanish")]
    pub language: String,
    pub level: u32,
    pub current_unit: u32,
    pub completed_units: usize,
    pub streak: u32,
    pub listening_secs: f64,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl From<ProgressSummary> for ProgressResponse {
    fn from(summary: ProgressSummary) -> Self {
        Self {
            language: summary.language.to_string(),
            level: summary.level,
            current_unit: summary.current_unit,
            completed_units: summary.completed_units,
            streak: summary.streak,
            listening_secs: summary.listening_secs,
            last_completed_at: summary.last_completed_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MenuUnit {
    pub unit: u32,
    #[schema(example = "unlocked")]
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct MenuResponse {
    pub progress: ProgressResponse,
    pub units: Vec<MenuUnit>,
}

fn unit_status_str(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::Completed => "completed",
        UnitStatus::Unlocked => "unlocked",
        UnitStatus::Locked => "locked",
    }
}

impl From<LessonMenu> for MenuResponse {
    fn from(menu: LessonMenu) -> Self {
        Self {
            progress: menu.progress.into(),
            units: menu
                .units
                .into_iter()
                .map(|entry| MenuUnit {
                    unit: entry.unit,
                    status: unit_status_str(entry.status).to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ArtifactResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub title: String,
    pub duration_secs: f64,
    pub byte_size: usize,
    pub segment_count: usize,
    pub failed_segments: usize,
    pub characters_synthesized: usize,
    pub cache_handle: Option<String>,
    #[schema(example = "/artifacts/550e8400-e29b-41d4-a716-446655440000/audio")]
    pub audio_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<AudioArtifact> for ArtifactResponse {
    fn from(artifact: AudioArtifact) -> Self {
        Self {
            audio_url: format!("/artifacts/{}/audio", artifact.id),
            id: artifact.id,
            title: artifact.title,
            duration_secs: artifact.duration_secs,
            byte_size: artifact.byte_size,
            segment_count: artifact.segment_count,
            failed_segments: artifact.failed_segments,
            characters_synthesized: artifact.characters_synthesized,
            cache_handle: artifact.cache_handle,
            created_at: artifact.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct LessonResponse {
    pub artifact: ArtifactResponse,
    /// True when an earlier render was replayed.
    pub cached: bool,
}

impl From<LessonDelivery> for LessonResponse {
    fn from(delivery: LessonDelivery) -> Self {
        Self {
            artifact: delivery.artifact.into(),
            cached: delivery.cached,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct RequestLessonPayload {
    #[schema(example = "spanish")]
    pub language: String,
    #[schema(example = 1)]
    pub level: u32,
    #[schema(example = 1)]
    pub unit: u32,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CompleteLessonPayload {
    #[schema(example = "spanish")]
    pub language: String,
    pub level: u32,
    pub unit: u32,
    #[schema(value_type = String, format = Uuid)]
    pub artifact_id: Uuid,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CustomLessonPayload {
    #[schema(example = "french")]
    pub language: String,
    #[schema(example = "This morning I missed the bus and walked to work in the rain.")]
    pub text: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CustomLessonAccepted {
    #[schema(value_type = String, format = Uuid)]
    pub request_id: Uuid,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CustomLessonResponse {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub language: String,
    #[schema(example = "generating")]
    pub status: String,
    /// Vocabulary and dialogue derived from the submitted text, once available.
    #[schema(value_type = Option<Object>)]
    pub material: Option<Value>,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub artifact_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CustomLessonRequest> for CustomLessonResponse {
    fn from(request: CustomLessonRequest) -> Self {
        Self {
            id: request.id,
            language: request.language.to_string(),
            status: request.status.as_str().to_string(),
            material: request.material,
            artifact_id: request.artifact_id,
            failure_reason: request.failure_reason,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CacheHandlePayload {
    #[schema(example = "AwACAgQAAxkBAAIC")]
    pub handle: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
