//! Post-processing of a parsed model document.
//!
//! Fills defaults, puts the curriculum's own opening dialogue in place of
//! anything the model invented, guarantees an opening and a closing, computes
//! durations and vocabulary timing, and records what looked wrong. Nothing
//! here rejects a document; problems end up in the validation report.

use crate::{
    curriculum::UnitDefinition,
    lesson::{
        LanguageTag, LessonDocument, LessonMetadata, Segment, SegmentCategory, SegmentLine,
        SegmentType, ValidationReport,
    },
    scheduler::ScheduledVocabulary,
    script::prompt::NATIVE_INSTRUCTION_THRESHOLD,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

const REQUIRED_CATEGORIES: [SegmentCategory; 4] = [
    SegmentCategory::Opening,
    SegmentCategory::Teaching,
    SegmentCategory::Practice,
    SegmentCategory::Closing,
];

const DIALOGUE_SECONDS_PER_LINE: f32 = 3.0;
const MAX_PAUSE_SECONDS: f32 = 10.0;

/// Turns the model's JSON into a validated [`LessonDocument`].
pub fn enhance(raw: Value, unit: &UnitDefinition, schedule: &ScheduledVocabulary) -> LessonDocument {
    let mut report = ValidationReport::default();

    let title = raw
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| unit.title.clone());

    let items = match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("segments") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut segments = Vec::with_capacity(items.len() + 2);
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<Segment>(item) {
            Ok(segment) => segments.push(segment),
            Err(e) => {
                report.skipped_segments += 1;
                warn!(index, error = %e, "Skipping unreadable segment");
            }
        }
    }

    report.dialogue_replaced = install_curriculum_dialogue(&mut segments, unit);

    report.missing_categories = REQUIRED_CATEGORIES
        .into_iter()
        .filter(|category| !segments.iter().any(|s| s.category() == *category))
        .collect();

    if !segments.iter().any(|s| s.category() == SegmentCategory::Opening) {
        segments.insert(
            0,
            Segment::speech(
                SegmentType::Intro,
                "narrator",
                LanguageTag::Native,
                format!("Welcome. Today's lesson: {title}."),
            ),
        );
    }
    if !segments.iter().any(|s| s.category() == SegmentCategory::Closing) {
        segments.push(Segment::speech(
            SegmentType::Farewell,
            "teacher",
            LanguageTag::Target,
            unit.language.profile().farewell,
        ));
        report.closing_added = true;
    }

    for segment in &mut segments {
        fill_duration(segment);
    }

    report.missing_native_instruction = unit.unit > NATIVE_INSTRUCTION_THRESHOLD
        && !segments.iter().any(|s| {
            s.language == LanguageTag::Native
                && matches!(s.category(), SegmentCategory::Teaching | SegmentCategory::Grammar)
        });

    let (vocabulary_timing, unintroduced) = trace_vocabulary(&segments, schedule);
    report.unintroduced_words = unintroduced;

    let total_duration = segments.iter().map(|s| s.duration).sum();
    if !report.is_clean() {
        debug!(?report, "Lesson document flagged");
    }

    LessonDocument {
        id: Uuid::new_v4(),
        segments,
        metadata: LessonMetadata {
            title,
            vocabulary_timing,
            reviewed_units: schedule.reviewed_units(),
            total_duration,
            validation: report,
        },
    }
}

/// The unit's dialogue as a single opening-dialogue segment.
pub fn curriculum_dialogue(unit: &UnitDefinition) -> Segment {
    let first_speaker = unit
        .dialogue
        .first()
        .map(|l| l.speaker.as_str())
        .unwrap_or("narrator");
    let text = unit
        .dialogue
        .iter()
        .map(|l| format!("{}: {}", l.speaker, l.target))
        .collect::<Vec<_>>()
        .join("\n");
    let mut segment = Segment::speech(
        SegmentType::OpeningDialogue,
        first_speaker,
        LanguageTag::Target,
        text,
    );
    segment.lines = unit
        .dialogue
        .iter()
        .map(|l| SegmentLine {
            speaker: l.speaker.clone(),
            text: l.target.clone(),
        })
        .collect();
    segment.duration = segment.lines.len() as f32 * DIALOGUE_SECONDS_PER_LINE;
    segment
}

/// Returns whether a model-written opening dialogue was thrown away.
fn install_curriculum_dialogue(segments: &mut Vec<Segment>, unit: &UnitDefinition) -> bool {
    if unit.dialogue.is_empty() {
        return false;
    }
    let first_invented = segments
        .iter()
        .position(|s| s.segment_type == SegmentType::OpeningDialogue);
    let position = first_invented.unwrap_or_else(|| {
        segments
            .iter()
            .take_while(|s| matches!(s.segment_type, SegmentType::Intro | SegmentType::LessonPreview))
            .count()
    });
    segments.retain(|s| s.segment_type != SegmentType::OpeningDialogue);
    let position = position.min(segments.len());
    segments.insert(position, curriculum_dialogue(unit));
    first_invented.is_some()
}

fn fill_duration(segment: &mut Segment) {
    if segment.segment_type == SegmentType::Pause {
        let purpose = segment.purpose.unwrap_or_default();
        segment.purpose = Some(purpose);
        if segment.duration.is_nan() || segment.duration <= 0.0 {
            segment.duration = purpose.default_duration();
        }
        segment.duration = segment.duration.min(MAX_PAUSE_SECONDS);
    } else if segment.segment_type.is_dialogue() && !segment.lines.is_empty() {
        segment.duration = segment.lines.len() as f32 * DIALOGUE_SECONDS_PER_LINE;
    } else {
        segment.duration = segment.segment_type.default_duration();
    }
}

/// Words a teaching segment introduces. Untagged segments are matched
/// against the scheduled new words by text.
fn introduced_by(segment: &Segment, schedule: &ScheduledVocabulary) -> Vec<String> {
    if !segment.words.is_empty() {
        return segment.words.clone();
    }
    let text = segment.text.to_lowercase();
    schedule
        .new
        .iter()
        .filter(|w| text.contains(&w.target.to_lowercase()))
        .map(|w| w.target.clone())
        .collect()
}

fn trace_vocabulary(
    segments: &[Segment],
    schedule: &ScheduledVocabulary,
) -> (BTreeMap<String, f32>, Vec<String>) {
    let mut timing = BTreeMap::new();
    // Review words were taught in earlier lessons.
    let mut known: HashSet<String> = schedule
        .review
        .iter()
        .map(|r| r.item.target.to_lowercase())
        .collect();
    let mut unintroduced: Vec<String> = Vec::new();
    let mut offset = 0.0;

    for segment in segments {
        if segment.segment_type.introduces_words() {
            for word in introduced_by(segment, schedule) {
                known.insert(word.to_lowercase());
                timing.entry(word).or_insert(offset);
            }
        } else if segment.category() == SegmentCategory::Practice {
            for word in &segment.words {
                if !known.contains(&word.to_lowercase()) && !unintroduced.contains(word) {
                    unintroduced.push(word.clone());
                }
            }
        }
        offset += segment.duration;
    }
    (timing, unintroduced)
}
