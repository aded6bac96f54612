//! The structured lesson document produced by the script generator and
//! consumed by the audio assembler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The structural role a segment type plays in a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentCategory {
    Opening,
    Teaching,
    Practice,
    Grammar,
    Closing,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    // opening
    Intro,
    LessonPreview,
    OpeningDialogue,
    DialogueTranslation,
    // teaching
    VocabularyIntro,
    BackwardBuildup,
    WordRepetition,
    Translation,
    NativeExplanation,
    PronunciationTip,
    PhraseIntro,
    CulturalNote,
    Dialogue,
    // practice
    RecallPrompt,
    ResponseModel,
    CompositionPrompt,
    SubstitutionDrill,
    ListenRepeat,
    QuestionAnswer,
    ReviewRecall,
    RoleplayPrompt,
    // grammar
    GrammarExplanation,
    GrammarExample,
    PatternDrill,
    // closing
    Summary,
    ClosingDialogue,
    NextPreview,
    Farewell,
    // pause
    Pause,
}

impl SegmentType {
    pub const ALL: [SegmentType; 29] = {
        use SegmentType::*;
        [
            Intro, LessonPreview, OpeningDialogue, DialogueTranslation,
            VocabularyIntro, BackwardBuildup, WordRepetition, Translation, NativeExplanation,
            PronunciationTip, PhraseIntro, CulturalNote, Dialogue,
            RecallPrompt, ResponseModel, CompositionPrompt, SubstitutionDrill, ListenRepeat,
            QuestionAnswer, ReviewRecall, RoleplayPrompt,
            GrammarExplanation, GrammarExample, PatternDrill,
            Summary, ClosingDialogue, NextPreview, Farewell,
            Pause,
        ]
    };

    pub fn category(&self) -> SegmentCategory {
        use SegmentType::*;
        match self {
            Intro | LessonPreview | OpeningDialogue | DialogueTranslation => {
                SegmentCategory::Opening
            }
            VocabularyIntro | BackwardBuildup | WordRepetition | Translation
            | NativeExplanation | PronunciationTip | PhraseIntro | CulturalNote | Dialogue => {
                SegmentCategory::Teaching
            }
            RecallPrompt | ResponseModel | CompositionPrompt | SubstitutionDrill | ListenRepeat
            | QuestionAnswer | ReviewRecall | RoleplayPrompt => SegmentCategory::Practice,
            GrammarExplanation | GrammarExample | PatternDrill => SegmentCategory::Grammar,
            Summary | ClosingDialogue | NextPreview | Farewell => SegmentCategory::Closing,
            Pause => SegmentCategory::Pause,
        }
    }

    /// Segments whose text holds several speakers' lines.
    pub fn is_dialogue(&self) -> bool {
        matches!(
            self,
            SegmentType::OpeningDialogue | SegmentType::Dialogue | SegmentType::ClosingDialogue
        )
    }

    /// Segments that introduce a word to the learner.
    pub fn introduces_words(&self) -> bool {
        matches!(
            self,
            SegmentType::VocabularyIntro
                | SegmentType::BackwardBuildup
                | SegmentType::PhraseIntro
                | SegmentType::Translation
        )
    }

    /// Estimated seconds for a speech segment whose duration the model left out.
    pub fn default_duration(&self) -> f32 {
        use SegmentType::*;
        match self {
            Intro | LessonPreview => 8.0,
            OpeningDialogue | Dialogue | ClosingDialogue => 15.0,
            DialogueTranslation => 10.0,
            VocabularyIntro | Translation | PhraseIntro => 4.0,
            BackwardBuildup => 6.0,
            WordRepetition | ListenRepeat => 3.0,
            NativeExplanation | CulturalNote => 10.0,
            PronunciationTip => 5.0,
            RecallPrompt | ResponseModel | ReviewRecall => 3.0,
            CompositionPrompt | RoleplayPrompt | QuestionAnswer | SubstitutionDrill => 5.0,
            GrammarExplanation => 12.0,
            GrammarExample | PatternDrill => 5.0,
            Summary | NextPreview => 8.0,
            Farewell => 3.0,
            Pause => PausePurpose::Other.default_duration(),
        }
    }
}

/// Why the lesson stops talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PausePurpose {
    Thinking,
    Composition,
    Repetition,
    Transition,
    #[default]
    #[serde(other)]
    Other,
}

impl PausePurpose {
    pub fn default_duration(&self) -> f32 {
        match self {
            PausePurpose::Thinking => 3.5,
            PausePurpose::Composition => 4.5,
            PausePurpose::Repetition => 2.3,
            PausePurpose::Transition => 1.5,
            PausePurpose::Other => 2.0,
        }
    }
}

/// Which language a segment is spoken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LanguageTag {
    #[default]
    Target,
    Native,
}

/// One speaker's line inside a dialogue segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentLine {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub segment_type: SegmentType,
    #[serde(default = "default_speaker")]
    pub speaker: String,
    #[serde(default)]
    pub language: LanguageTag,
    #[serde(default)]
    pub text: String,
    /// Estimated seconds; `0.0` until filled in by enhancement.
    #[serde(default)]
    pub duration: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<PausePurpose>,
    /// Vocabulary this segment introduces or practices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<String>,
    /// Explicit dialogue lines; when empty the text is split by speaker.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<SegmentLine>,
}

fn default_speaker() -> String {
    "narrator".to_string()
}

impl Segment {
    pub fn speech(segment_type: SegmentType, speaker: &str, language: LanguageTag, text: impl Into<String>) -> Self {
        Self {
            segment_type,
            speaker: speaker.to_string(),
            language,
            text: text.into(),
            duration: 0.0,
            purpose: None,
            words: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn pause(purpose: PausePurpose, duration: f32) -> Self {
        Self {
            segment_type: SegmentType::Pause,
            speaker: default_speaker(),
            language: LanguageTag::Native,
            text: String::new(),
            duration,
            purpose: Some(purpose),
            words: Vec::new(),
            lines: Vec::new(),
        }
    }

    pub fn category(&self) -> SegmentCategory {
        self.segment_type.category()
    }
}

/// Problems found while validating a document. Flagged, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub missing_categories: Vec<SegmentCategory>,
    pub missing_native_instruction: bool,
    /// Practice words that no earlier segment introduced.
    pub unintroduced_words: Vec<String>,
    pub dialogue_replaced: bool,
    pub closing_added: bool,
    pub skipped_segments: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.missing_categories.is_empty()
            && !self.missing_native_instruction
            && self.unintroduced_words.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LessonMetadata {
    pub title: String,
    /// Word -> seconds from lesson start at which it is introduced.
    pub vocabulary_timing: BTreeMap<String, f32>,
    pub reviewed_units: Vec<u32>,
    pub total_duration: f32,
    pub validation: ValidationReport,
}

/// A validated lesson script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonDocument {
    pub id: Uuid,
    pub segments: Vec<Segment>,
    pub metadata: LessonMetadata,
}

impl LessonDocument {
    pub fn has_category(&self, category: SegmentCategory) -> bool {
        self.segments.iter().any(|s| s.category() == category)
    }

    pub fn opening_dialogue(&self) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.segment_type == SegmentType::OpeningDialogue)
    }

    /// Total characters that would be sent to the speech backend.
    pub fn speech_characters(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.segment_type != SegmentType::Pause)
            .map(|s| {
                if s.lines.is_empty() {
                    s.text.chars().count()
                } else {
                    s.lines.iter().map(|l| l.text.chars().count()).sum()
                }
            })
            .sum()
    }
}
