//! Script Generator
//!
//! Turns curriculum material into a [`LessonDocument`] with one call to the
//! text backend, and free text into material with one more call before that.

pub mod enhance;
pub mod prompt;
pub mod repair;

use crate::{
    curriculum::{DialogueLine, Phrase, UnitDefinition, VocabularyItem},
    error::{LessonError, LessonResult},
    language::Language,
    lesson::LessonDocument,
    llm_client::TextGenerator,
    scheduler::ScheduledVocabulary,
};
use prompt::PromptTemplates;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Token budget for a full lesson script.
pub const LESSON_TOKEN_BUDGET: u32 = 8192;
/// Token budget for the material-derivation stage.
pub const MATERIAL_TOKEN_BUDGET: u32 = 2048;
/// Level at which free-text lessons are pitched.
pub const CUSTOM_LESSON_LEVEL: u32 = 1;
/// Unit number used for free-text lessons, which sit outside the curriculum.
pub const CUSTOM_LESSON_UNIT: u32 = 0;

/// Lesson material derived from user text, shaped like a curriculum unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomMaterial {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub vocabulary: Vec<VocabularyItem>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
    #[serde(default)]
    pub phrases: Vec<Phrase>,
    #[serde(default)]
    pub grammar_notes: Vec<String>,
}

impl CustomMaterial {
    pub fn into_unit(self, language: Language) -> UnitDefinition {
        let title = if self.title.trim().is_empty() {
            "Custom lesson".to_string()
        } else {
            self.title
        };
        UnitDefinition {
            language,
            level: CUSTOM_LESSON_LEVEL,
            unit: CUSTOM_LESSON_UNIT,
            title,
            categories: vec!["custom".to_string()],
            dialogue: self.dialogue,
            vocabulary: self.vocabulary,
            phrases: self.phrases,
            grammar_notes: self.grammar_notes,
            review_units: Vec::new(),
        }
    }
}

/// Stage-one output: the parsed material plus the model's JSON as returned.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMaterial {
    pub material: CustomMaterial,
    pub raw: Value,
}

pub struct ScriptGenerator {
    backend: Arc<dyn TextGenerator>,
    templates: PromptTemplates,
}

impl ScriptGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>, templates: PromptTemplates) -> Self {
        Self { backend, templates }
    }

    /// Generates the script for a curriculum unit.
    #[instrument(skip_all, fields(language = %unit.language, level = unit.level, unit = unit.unit))]
    pub async fn generate(
        &self,
        unit: &UnitDefinition,
        schedule: &ScheduledVocabulary,
    ) -> LessonResult<LessonDocument> {
        let system = self.templates.lesson_system(unit.language);
        let user = prompt::lesson_user_message(unit, schedule);
        let output = self
            .backend
            .generate_text(&system, &user, LESSON_TOKEN_BUDGET)
            .await?;

        let (value, repaired) = repair::parse_model_json(&output)?;
        if repaired {
            warn!(output_chars = output.len(), "Lesson script needed repair");
        }
        let document = enhance::enhance(value, unit, schedule);
        info!(
            document_id = %document.id,
            segments = document.segments.len(),
            duration = document.metadata.total_duration,
            clean = document.metadata.validation.is_clean(),
            "Lesson script generated"
        );
        Ok(document)
    }

    /// Stage one of the free-text flow: derives lesson material from text
    /// that has already passed the input validator.
    #[instrument(skip_all, fields(%language, text_chars = text.chars().count()))]
    pub async fn derive_material(&self, language: Language, text: &str) -> LessonResult<DerivedMaterial> {
        let system = self.templates.custom_system(language);
        let user = prompt::custom_user_message(text);
        let output = self
            .backend
            .generate_text(&system, &user, MATERIAL_TOKEN_BUDGET)
            .await?;

        let (raw, _) = repair::parse_model_json(&output)?;
        let material: CustomMaterial =
            serde_json::from_value(raw.clone()).map_err(|_| LessonError::malformed(&output))?;
        if material.vocabulary.is_empty() {
            return Err(LessonError::malformed(&output));
        }
        info!(
            words = material.vocabulary.len(),
            dialogue_lines = material.dialogue.len(),
            "Custom material derived"
        );
        Ok(DerivedMaterial { material, raw })
    }

    /// Stage two of the free-text flow: runs the curriculum path over the
    /// derived material. There is no review vocabulary.
    pub async fn generate_from_material(
        &self,
        language: Language,
        material: &CustomMaterial,
    ) -> LessonResult<LessonDocument> {
        let unit = material.clone().into_unit(language);
        let schedule = ScheduledVocabulary {
            new: unit.vocabulary.clone(),
            review: Vec::new(),
        };
        self.generate(&unit, &schedule).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curriculum::fixtures::unit_with_words, error::GenerationError,
        llm_client::MockTextGenerator, lesson::SegmentType,
    };
    use mockall::predicate::*;
    use serde_json::json;

    fn templates() -> PromptTemplates {
        PromptTemplates::new(
            "Write a {target_language} lesson.",
            "Derive {target_language} material.",
        )
    }

    fn generator(mock: MockTextGenerator) -> ScriptGenerator {
        ScriptGenerator::new(Arc::new(mock), templates())
    }

    #[tokio::test]
    async fn test_generate_parses_fenced_output() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate_text()
            .with(eq("Write a Spanish lesson."), always(), eq(LESSON_TOKEN_BUDGET))
            .times(1)
            .returning(|_, _, _| {
                Ok(format!(
                    "```json\n{}\n```",
                    json!({"title": "T", "segments": [
                        {"type": "intro", "text": "Hola"},
                        {"type": "farewell", "text": "Adiós"}
                    ]})
                ))
            });

        let unit = unit_with_words(Language::Spanish, 1, 2, "w", 1);
        let schedule = ScheduledVocabulary {
            new: unit.vocabulary.clone(),
            review: vec![],
        };
        let doc = generator(mock).generate(&unit, &schedule).await.unwrap();
        assert_eq!(doc.metadata.title, "T");
        assert_eq!(doc.segments[1].segment_type, SegmentType::OpeningDialogue);
    }

    #[tokio::test]
    async fn test_generate_repairs_truncated_output() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate_text().returning(|_, _, _| {
            Ok(r#"{"title": "T", "segments": [{"type": "intro", "text": "Hola"}, {"type": "vocabulary_intro", "text": "w"#.to_string())
        });
        let unit = unit_with_words(Language::Spanish, 1, 2, "w", 1);
        let doc = generator(mock)
            .generate(&unit, &ScheduledVocabulary::default())
            .await
            .unwrap();
        // intro, curriculum dialogue, the vocabulary_intro stub, appended farewell
        assert_eq!(doc.segments.len(), 4);
        assert!(doc.metadata.validation.closing_added);
    }

    #[tokio::test]
    async fn test_generate_surfaces_malformed_and_backend_errors() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate_text()
            .times(1)
            .returning(|_, _, _| Ok("no json at all".to_string()));
        let unit = unit_with_words(Language::Spanish, 1, 2, "w", 1);
        let err = generator(mock)
            .generate(&unit, &ScheduledVocabulary::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LessonError::MalformedDocument { .. }));

        let mut mock = MockTextGenerator::new();
        mock.expect_generate_text()
            .returning(|_, _, _| Err(GenerationError::Quota("limit".into())));
        let err = generator(mock)
            .generate(&unit, &ScheduledVocabulary::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LessonError::Generation(GenerationError::Quota(_))));
    }

    #[tokio::test]
    async fn test_two_stage_custom_flow() {
        let material = json!({
            "title": "Mi gato",
            "vocabulary": [
                {"target": "gato", "native": "cat", "word_type": "noun"},
                {"target": "dormir", "native": "to sleep", "word_type": "verb"}
            ],
            "dialogue": [
                {"speaker": "speaker_a", "target": "¿Dónde está el gato?", "native": "Where is the cat?"},
                {"speaker": "speaker_b", "target": "Está durmiendo.", "native": "It is sleeping."}
            ],
            "grammar_notes": ["estar for location"]
        });
        let lesson = json!({"title": "Mi gato", "segments": [
            {"type": "opening_dialogue", "text": "invented"},
            {"type": "vocabulary_intro", "text": "gato", "words": ["gato"]},
            {"type": "recall_prompt", "text": "gato?", "words": ["gato"]},
            {"type": "farewell", "text": "Adiós"}
        ]});

        let mut mock = MockTextGenerator::new();
        let material_out = material.to_string();
        mock.expect_generate_text()
            .with(eq("Derive Spanish material."), always(), eq(MATERIAL_TOKEN_BUDGET))
            .times(1)
            .returning(move |_, user, _| {
                assert!(user.contains("My cat sleeps all day."));
                Ok(material_out.clone())
            });
        let lesson_out = lesson.to_string();
        mock.expect_generate_text()
            .with(eq("Write a Spanish lesson."), always(), eq(LESSON_TOKEN_BUDGET))
            .times(1)
            .returning(move |_, user, _| {
                assert!(user.contains("\"unit\": 0"));
                assert!(user.contains("gato"));
                Ok(lesson_out.clone())
            });

        let generator = generator(mock);
        let derived = generator
            .derive_material(Language::Spanish, "My cat sleeps all day.")
            .await
            .unwrap();
        assert_eq!(derived.raw, material);
        assert_eq!(derived.material.vocabulary.len(), 2);

        let doc = generator
            .generate_from_material(Language::Spanish, &derived.material)
            .await
            .unwrap();
        let opening = doc.opening_dialogue().unwrap();
        assert_eq!(opening.lines[0].text, "¿Dónde está el gato?");
        assert!(doc.metadata.validation.dialogue_replaced);
        assert!(doc.metadata.reviewed_units.is_empty());
    }

    #[tokio::test]
    async fn test_material_without_vocabulary_is_malformed() {
        let mut mock = MockTextGenerator::new();
        mock.expect_generate_text()
            .returning(|_, _, _| Ok(r#"{"title": "Empty", "vocabulary": []}"#.to_string()));
        let err = generator(mock)
            .derive_material(Language::French, "Bonjour")
            .await
            .unwrap_err();
        assert!(matches!(err, LessonError::MalformedDocument { .. }));
    }
}
