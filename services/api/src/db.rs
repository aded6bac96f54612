//! Data Access Layer
//!
//! A PostgreSQL implementation of [`LessonStore`]. Documents and progress are
//! stored as JSONB; rendered audio lives next to its artifact row as BYTEA.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use lingocast_core::{
    language::Language,
    lesson::LessonDocument,
    progress::UserLessonProgress,
    store::{ArtifactSource, AudioArtifact, CustomLessonRequest, LessonKey, LessonStore},
};
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
use uuid::Uuid;

const ARTIFACT_COLUMNS: &str = "id, document_id, source_kind, language, level, unit, \
     custom_request_id, title, duration_secs, byte_size, characters_synthesized, \
     segment_count, failed_segments, cache_handle, created_at";

const CUSTOM_REQUEST_COLUMNS: &str = "id, user_id, language, source_text, status, material, \
     artifact_id, failure_reason, created_at, updated_at";

/// A wrapper around the `PgPool` implementing the lesson store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Columns that identify where an artifact came from.
#[derive(Debug, PartialEq)]
struct SourceColumns {
    kind: &'static str,
    language: Option<String>,
    level: Option<i32>,
    unit: Option<i32>,
    custom_request_id: Option<Uuid>,
}

impl SourceColumns {
    fn from_source(source: &ArtifactSource) -> Result<Self> {
        Ok(match source {
            ArtifactSource::Curriculum(key) => Self {
                kind: "curriculum",
                language: Some(key.language.to_string()),
                level: Some(to_i32(key.level)?),
                unit: Some(to_i32(key.unit)?),
                custom_request_id: None,
            },
            ArtifactSource::Custom { request_id } => Self {
                kind: "custom",
                language: None,
                level: None,
                unit: None,
                custom_request_id: Some(*request_id),
            },
        })
    }

    fn into_source(self) -> Result<ArtifactSource> {
        match self.kind {
            "curriculum" => Ok(ArtifactSource::Curriculum(LessonKey {
                language: parse_language(
                    self.language
                        .as_deref()
                        .context("curriculum artifact without language")?,
                )?,
                level: to_u32(self.level.context("curriculum artifact without level")?)?,
                unit: to_u32(self.unit.context("curriculum artifact without unit")?)?,
            })),
            "custom" => Ok(ArtifactSource::Custom {
                request_id: self
                    .custom_request_id
                    .context("custom artifact without request id")?,
            }),
            other => bail!("unknown artifact source '{other}'"),
        }
    }
}

fn parse_language(raw: &str) -> Result<Language> {
    raw.parse::<Language>().map_err(|e| anyhow!(e))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("{value} does not fit a database integer"))
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("negative value {value} in database"))
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{value} does not fit a database bigint"))
}

fn to_usize(value: i64) -> Result<usize> {
    usize::try_from(value).with_context(|| format!("negative value {value} in database"))
}

fn artifact_from_row(row: &PgRow) -> Result<AudioArtifact> {
    let kind: String = row.try_get("source_kind")?;
    let source = SourceColumns {
        kind: match kind.as_str() {
            "curriculum" => "curriculum",
            "custom" => "custom",
            other => bail!("unknown artifact source '{other}'"),
        },
        language: row.try_get("language")?,
        level: row.try_get("level")?,
        unit: row.try_get("unit")?,
        custom_request_id: row.try_get("custom_request_id")?,
    }
    .into_source()?;

    Ok(AudioArtifact {
        id: row.try_get("id")?,
        source,
        document_id: row.try_get("document_id")?,
        title: row.try_get("title")?,
        duration_secs: row.try_get("duration_secs")?,
        byte_size: to_usize(row.try_get("byte_size")?)?,
        characters_synthesized: to_usize(row.try_get("characters_synthesized")?)?,
        segment_count: to_usize(row.try_get("segment_count")?)?,
        failed_segments: to_usize(row.try_get("failed_segments")?)?,
        cache_handle: row.try_get("cache_handle")?,
        created_at: row.try_get("created_at")?,
    })
}

fn custom_request_from_row(row: &PgRow) -> Result<CustomLessonRequest> {
    let language: String = row.try_get("language")?;
    let status: String = row.try_get("status")?;
    Ok(CustomLessonRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        language: parse_language(&language)?,
        source_text: row.try_get("source_text")?,
        status: status.parse()?,
        material: row.try_get::<Option<Value>, _>("material")?,
        artifact_id: row.try_get("artifact_id")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl LessonStore for PgStore {
    /// Writes the document and its artifact in a single transaction.
    async fn save_rendered_lesson(
        &self,
        document: &LessonDocument,
        artifact: &AudioArtifact,
        audio: &[u8],
    ) -> Result<()> {
        let source = SourceColumns::from_source(&artifact.source)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO lesson_documents (id, title, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(document.id)
        .bind(&document.metadata.title)
        .bind(Json(document))
        .execute(&mut *tx)
        .await
        .context("Failed to insert lesson document")?;

        sqlx::query(
            r#"
            INSERT INTO audio_artifacts (
                id, document_id, source_kind, language, level, unit, custom_request_id,
                title, duration_secs, byte_size, characters_synthesized, segment_count,
                failed_segments, cache_handle, audio, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.document_id)
        .bind(source.kind)
        .bind(source.language)
        .bind(source.level)
        .bind(source.unit)
        .bind(source.custom_request_id)
        .bind(&artifact.title)
        .bind(artifact.duration_secs)
        .bind(to_i64(artifact.byte_size)?)
        .bind(to_i64(artifact.characters_synthesized)?)
        .bind(to_i64(artifact.segment_count)?)
        .bind(to_i64(artifact.failed_segments)?)
        .bind(&artifact.cache_handle)
        .bind(audio)
        .bind(artifact.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert audio artifact")?;

        tx.commit().await?;
        Ok(())
    }

    async fn document(&self, id: Uuid) -> Result<Option<LessonDocument>> {
        let row = sqlx::query("SELECT document FROM lesson_documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(document) = row.try_get::<Json<LessonDocument>, _>("document")?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    async fn artifact(&self, id: Uuid) -> Result<Option<AudioArtifact>> {
        let row = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM audio_artifacts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(artifact_from_row).transpose()
    }

    async fn latest_artifact(&self, key: LessonKey) -> Result<Option<AudioArtifact>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ARTIFACT_COLUMNS}
            FROM audio_artifacts
            WHERE source_kind = 'curriculum' AND language = $1 AND level = $2 AND unit = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(key.language.to_string())
        .bind(to_i32(key.level)?)
        .bind(to_i32(key.unit)?)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(artifact_from_row).transpose()
    }

    async fn artifact_audio(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT audio FROM audio_artifacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get("audio")).transpose()?)
    }

    async fn set_cache_handle(&self, id: Uuid, handle: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE audio_artifacts SET cache_handle = $1 WHERE id = $2")
            .bind(handle)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn progress(&self, user_id: &str, language: Language) -> Result<Option<UserLessonProgress>> {
        let row = sqlx::query("SELECT state FROM user_progress WHERE user_id = $1 AND language = $2")
            .bind(user_id)
            .bind(language.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let Json(progress) = row.try_get::<Json<UserLessonProgress>, _>("state")?;
                Ok(Some(progress))
            }
            None => Ok(None),
        }
    }

    async fn save_progress(&self, progress: &UserLessonProgress) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_progress (user_id, language, state, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id, language)
            DO UPDATE SET state = EXCLUDED.state, updated_at = now()
            "#,
        )
        .bind(&progress.user_id)
        .bind(progress.language.to_string())
        .bind(Json(progress))
        .execute(&self.pool)
        .await
        .context("Failed to save progress")?;
        Ok(())
    }

    async fn create_custom_request(&self, request: &CustomLessonRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO custom_lesson_requests (
                id, user_id, language, source_text, status, material,
                artifact_id, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(request.id)
        .bind(&request.user_id)
        .bind(request.language.to_string())
        .bind(&request.source_text)
        .bind(request.status.as_str())
        .bind(&request.material)
        .bind(request.artifact_id)
        .bind(&request.failure_reason)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create custom lesson request")?;
        Ok(())
    }

    async fn update_custom_request(&self, request: &CustomLessonRequest) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE custom_lesson_requests
            SET status = $1, material = $2, artifact_id = $3, failure_reason = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(request.status.as_str())
        .bind(&request.material)
        .bind(request.artifact_id)
        .bind(&request.failure_reason)
        .bind(request.updated_at)
        .bind(request.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("custom request {} does not exist", request.id);
        }
        Ok(())
    }

    async fn custom_request(&self, id: Uuid) -> Result<Option<CustomLessonRequest>> {
        let row = sqlx::query(&format!(
            "SELECT {CUSTOM_REQUEST_COLUMNS} FROM custom_lesson_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(custom_request_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curriculum_source_columns_round_trip() {
        let source = ArtifactSource::Curriculum(LessonKey {
            language: Language::Italian,
            level: 2,
            unit: 14,
        });
        let columns = SourceColumns::from_source(&source).unwrap();
        assert_eq!(columns.kind, "curriculum");
        assert_eq!(columns.language.as_deref(), Some("italian"));
        assert_eq!((columns.level, columns.unit), (Some(2), Some(14)));
        assert_eq!(columns.custom_request_id, None);
        assert_eq!(columns.into_source().unwrap(), source);
    }

    #[test]
    fn test_custom_source_columns_round_trip() {
        let request_id = Uuid::new_v4();
        let source = ArtifactSource::Custom { request_id };
        let columns = SourceColumns::from_source(&source).unwrap();
        assert_eq!(columns.kind, "custom");
        assert_eq!(columns.language, None);
        assert_eq!(columns.into_source().unwrap(), source);
    }

    #[test]
    fn test_incomplete_source_columns_are_rejected() {
        let columns = SourceColumns {
            kind: "curriculum",
            language: Some("spanish".to_string()),
            level: Some(1),
            unit: None,
            custom_request_id: None,
        };
        assert!(columns.into_source().is_err());

        let columns = SourceColumns {
            kind: "curriculum",
            language: Some("klingon".to_string()),
            level: Some(1),
            unit: Some(1),
            custom_request_id: None,
        };
        assert!(columns.into_source().is_err());
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(to_i32(30).unwrap(), 30);
        assert!(to_i32(u32::MAX).is_err());
        assert!(to_u32(-1).is_err());
        assert!(to_usize(-5).is_err());
        assert_eq!(to_i64(1024).unwrap(), 1024);
    }
}
