//! Persistence interface for documents, audio artifacts, progress and
//! free-text requests, with an in-memory implementation.

use crate::{
    audio::RenderReport, language::Language, lesson::LessonDocument,
    progress::UserLessonProgress,
};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A curriculum lesson slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonKey {
    pub language: Language,
    pub level: u32,
    pub unit: u32,
}

/// What an artifact was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    Curriculum(LessonKey),
    Custom { request_id: Uuid },
}

/// A rendered lesson. Immutable once stored; a newer artifact for the same
/// key supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub id: Uuid,
    pub source: ArtifactSource,
    pub document_id: Uuid,
    pub title: String,
    pub duration_secs: f64,
    pub byte_size: usize,
    pub characters_synthesized: usize,
    pub segment_count: usize,
    pub failed_segments: usize,
    /// Reusable identifier handed back by the delivery front-end.
    pub cache_handle: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AudioArtifact {
    pub fn new(source: ArtifactSource, document: &LessonDocument, report: &RenderReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            document_id: document.id,
            title: document.metadata.title.clone(),
            duration_secs: report.duration_secs,
            byte_size: report.byte_size,
            characters_synthesized: report.characters_synthesized,
            segment_count: report.segment_count,
            failed_segments: report.failed_segments,
            cache_handle: None,
            created_at: Utc::now(),
        }
    }

    pub fn lesson_key(&self) -> Option<LessonKey> {
        match self.source {
            ArtifactSource::Curriculum(key) => Some(key),
            ArtifactSource::Custom { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomRequestStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl CustomRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomRequestStatus::Pending => "pending",
            CustomRequestStatus::Generating => "generating",
            CustomRequestStatus::Ready => "ready",
            CustomRequestStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CustomRequestStatus::Ready | CustomRequestStatus::Failed)
    }

    fn can_become(&self, next: CustomRequestStatus) -> bool {
        use CustomRequestStatus::*;
        matches!(
            (self, next),
            (Pending, Generating) | (Pending, Failed) | (Generating, Ready) | (Generating, Failed)
        )
    }
}

impl std::str::FromStr for CustomRequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(CustomRequestStatus::Pending),
            "generating" => Ok(CustomRequestStatus::Generating),
            "ready" => Ok(CustomRequestStatus::Ready),
            "failed" => Ok(CustomRequestStatus::Failed),
            other => bail!("unknown custom request status '{other}'"),
        }
    }
}

/// A free-text lesson submission and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomLessonRequest {
    pub id: Uuid,
    pub user_id: String,
    pub language: Language,
    pub source_text: String,
    pub status: CustomRequestStatus,
    /// Stage-one output, kept as returned for display.
    pub material: Option<Value>,
    pub artifact_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomLessonRequest {
    pub fn new(user_id: impl Into<String>, language: Language, source_text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            language,
            source_text: source_text.into(),
            status: CustomRequestStatus::Pending,
            material: None,
            artifact_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the request forward. Terminal states never change.
    pub fn advance(&mut self, next: CustomRequestStatus) -> Result<()> {
        if !self.status.can_become(next) {
            bail!(
                "custom request {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            );
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
pub trait LessonStore: Send + Sync {
    /// Persists a document with the artifact rendered from it, as one unit.
    async fn save_rendered_lesson(
        &self,
        document: &LessonDocument,
        artifact: &AudioArtifact,
        audio: &[u8],
    ) -> Result<()>;
    async fn document(&self, id: Uuid) -> Result<Option<LessonDocument>>;
    async fn artifact(&self, id: Uuid) -> Result<Option<AudioArtifact>>;
    /// The newest artifact for a curriculum lesson.
    async fn latest_artifact(&self, key: LessonKey) -> Result<Option<AudioArtifact>>;
    async fn artifact_audio(&self, id: Uuid) -> Result<Option<Vec<u8>>>;
    /// Returns `false` when the artifact does not exist.
    async fn set_cache_handle(&self, id: Uuid, handle: &str) -> Result<bool>;
    async fn progress(&self, user_id: &str, language: Language) -> Result<Option<UserLessonProgress>>;
    async fn save_progress(&self, progress: &UserLessonProgress) -> Result<()>;
    async fn create_custom_request(&self, request: &CustomLessonRequest) -> Result<()>;
    async fn update_custom_request(&self, request: &CustomLessonRequest) -> Result<()>;
    async fn custom_request(&self, id: Uuid) -> Result<Option<CustomLessonRequest>>;
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<Uuid, LessonDocument>,
    artifacts: HashMap<Uuid, AudioArtifact>,
    audio: HashMap<Uuid, Vec<u8>>,
    progress: HashMap<(String, Language), UserLessonProgress>,
    custom_requests: HashMap<Uuid, CustomLessonRequest>,
}

/// Keeps everything in process memory. Used by tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn artifact_count(&self) -> usize {
        self.state.read().await.artifacts.len()
    }
}

#[async_trait]
impl LessonStore for MemoryStore {
    async fn save_rendered_lesson(
        &self,
        document: &LessonDocument,
        artifact: &AudioArtifact,
        audio: &[u8],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.documents.insert(document.id, document.clone());
        state.artifacts.insert(artifact.id, artifact.clone());
        state.audio.insert(artifact.id, audio.to_vec());
        Ok(())
    }

    async fn document(&self, id: Uuid) -> Result<Option<LessonDocument>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn artifact(&self, id: Uuid) -> Result<Option<AudioArtifact>> {
        Ok(self.state.read().await.artifacts.get(&id).cloned())
    }

    async fn latest_artifact(&self, key: LessonKey) -> Result<Option<AudioArtifact>> {
        Ok(self
            .state
            .read()
            .await
            .artifacts
            .values()
            .filter(|a| a.lesson_key() == Some(key))
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn artifact_audio(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().await.audio.get(&id).cloned())
    }

    async fn set_cache_handle(&self, id: Uuid, handle: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.artifacts.get_mut(&id) {
            Some(artifact) => {
                artifact.cache_handle = Some(handle.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn progress(&self, user_id: &str, language: Language) -> Result<Option<UserLessonProgress>> {
        Ok(self
            .state
            .read()
            .await
            .progress
            .get(&(user_id.to_string(), language))
            .cloned())
    }

    async fn save_progress(&self, progress: &UserLessonProgress) -> Result<()> {
        self.state
            .write()
            .await
            .progress
            .insert((progress.user_id.clone(), progress.language), progress.clone());
        Ok(())
    }

    async fn create_custom_request(&self, request: &CustomLessonRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.custom_requests.contains_key(&request.id) {
            bail!("custom request {} already exists", request.id);
        }
        state.custom_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_custom_request(&self, request: &CustomLessonRequest) -> Result<()> {
        let mut state = self.state.write().await;
        match state.custom_requests.get_mut(&request.id) {
            Some(existing) => {
                *existing = request.clone();
                Ok(())
            }
            None => bail!("custom request {} does not exist", request.id),
        }
    }

    async fn custom_request(&self, id: Uuid) -> Result<Option<CustomLessonRequest>> {
        Ok(self.state.read().await.custom_requests.get(&id).cloned())
    }
}
