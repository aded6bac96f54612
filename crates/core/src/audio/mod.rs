//! Audio Assembler
//!
//! Renders a lesson document to a single mono PCM16 WAV. Each segment is
//! rendered to its own file in a scoped working directory, then all of them
//! are concatenated in document order. A segment whose synthesis fails is
//! replaced by silence of roughly the length the speech would have had.

pub mod pcm;

use crate::{
    error::{LessonError, LessonResult, SynthesisError},
    language::{Language, NATIVE_LANGUAGE_CODE},
    lesson::{LanguageTag, LessonDocument, Segment, SegmentType},
    speech::{SpeechRequest, SpeechSynthesizer},
};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Silence between consecutive lines of a dialogue.
pub const DIALOGUE_LINE_GAP_SECS: f32 = 0.3;
/// Estimated speaking time per character when synthesis fails.
pub const FALLBACK_SECS_PER_CHAR: f32 = 0.06;
pub const DEFAULT_SYNTHESIS_CONCURRENCY: usize = 4;

/// What a render cost and produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderReport {
    pub characters_synthesized: usize,
    pub segment_count: usize,
    pub failed_segments: usize,
    pub duration_secs: f64,
    pub byte_size: usize,
}

#[derive(Debug, Clone)]
pub struct RenderedLesson {
    pub wav: Vec<u8>,
    pub report: RenderReport,
}

struct Utterance {
    text: String,
    voice: String,
    language_code: &'static str,
}

enum RenderJob {
    Silence(f32),
    Speech(Utterance),
    Dialogue(Vec<Utterance>),
}

struct RenderedSegment {
    path: PathBuf,
    characters: usize,
    failed: bool,
}

fn utterance(segment: &Segment, speaker: &str, text: &str, language: Language) -> Utterance {
    match segment.language {
        LanguageTag::Native => Utterance {
            text: text.to_string(),
            voice: language.profile().narrator_voice.to_string(),
            language_code: NATIVE_LANGUAGE_CODE,
        },
        LanguageTag::Target => Utterance {
            text: text.to_string(),
            voice: language.voice_for(speaker).to_string(),
            language_code: language.code(),
        },
    }
}

/// Lines of a dialogue segment: its explicit lines, else its text split by speaker.
fn dialogue_lines(segment: &Segment, language: Language) -> Vec<(String, String)> {
    if !segment.lines.is_empty() {
        return segment
            .lines
            .iter()
            .map(|l| (l.speaker.clone(), l.text.clone()))
            .collect();
    }
    language.parse_dialogue_lines(&segment.text)
}

fn plan(document: &LessonDocument, language: Language) -> Vec<RenderJob> {
    document
        .segments
        .iter()
        .filter_map(|segment| {
            if segment.segment_type == SegmentType::Pause {
                return Some(RenderJob::Silence(segment.duration));
            }
            if segment.segment_type.is_dialogue() {
                let lines = dialogue_lines(segment, language);
                if lines.len() > 1 {
                    return Some(RenderJob::Dialogue(
                        lines
                            .iter()
                            .map(|(speaker, text)| utterance(segment, speaker, text, language))
                            .collect(),
                    ));
                }
                if let Some((speaker, text)) = lines.first() {
                    return Some(RenderJob::Speech(utterance(segment, speaker, text, language)));
                }
            }
            let text = segment.text.trim();
            if text.is_empty() {
                return None;
            }
            Some(RenderJob::Speech(utterance(segment, &segment.speaker, text, language)))
        })
        .collect()
}

fn audio_error(context: &str, err: impl std::fmt::Display) -> LessonError {
    LessonError::Audio(format!("{context}: {err}"))
}

/// Writes mono PCM16 samples to a WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Concatenates segment files into one WAV and returns the total sample count.
fn concatenate(parts: &[PathBuf], output: &Path) -> anyhow::Result<usize> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: OUTPUT_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;
    let mut total = 0;
    for part in parts {
        let mut reader = hound::WavReader::open(part)?;
        for sample in reader.samples::<i16>() {
            writer.write_sample(sample?)?;
            total += 1;
        }
    }
    writer.finalize()?;
    Ok(total)
}

pub struct AudioAssembler {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    concurrency: usize,
}

impl AudioAssembler {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, concurrency: usize) -> Self {
        Self {
            synthesizer,
            concurrency: concurrency.max(1),
        }
    }

    /// Renders a document to WAV bytes.
    ///
    /// Synthesis runs with bounded overlap but results are assembled in
    /// document order. Only I/O failures abort the render.
    #[instrument(skip_all, fields(document_id = %document.id, %language))]
    pub async fn render(&self, document: &LessonDocument, language: Language) -> LessonResult<RenderedLesson> {
        let workdir = tempfile::tempdir().map_err(|e| audio_error("creating working directory", e))?;
        let jobs = plan(document, language);
        let segment_count = jobs.len();
        debug!(segment_count, "Rendering lesson segments");

        let rendered: Vec<RenderedSegment> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| self.render_segment(index, job, workdir.path()))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let parts: Vec<PathBuf> = rendered.iter().map(|r| r.path.clone()).collect();
        let output = workdir.path().join("lesson.wav");
        let output_path = output.clone();
        let total_samples = tokio::task::spawn_blocking(move || concatenate(&parts, &output_path))
            .await
            .map_err(|e| audio_error("joining concatenation task", e))?
            .map_err(|e| audio_error("concatenating segments", e))?;
        let wav = tokio::fs::read(&output)
            .await
            .map_err(|e| audio_error("reading rendered lesson", e))?;

        let report = RenderReport {
            characters_synthesized: rendered.iter().map(|r| r.characters).sum(),
            segment_count,
            failed_segments: rendered.iter().filter(|r| r.failed).count(),
            duration_secs: total_samples as f64 / OUTPUT_SAMPLE_RATE as f64,
            byte_size: wav.len(),
        };
        info!(
            characters = report.characters_synthesized,
            segments = report.segment_count,
            failed = report.failed_segments,
            duration_secs = report.duration_secs,
            bytes = report.byte_size,
            "Lesson audio rendered"
        );
        Ok(RenderedLesson { wav, report })
    }

    async fn render_segment(&self, index: usize, job: RenderJob, dir: &Path) -> LessonResult<RenderedSegment> {
        let mut characters = 0;
        let mut failed = false;
        let samples = match job {
            RenderJob::Silence(secs) => pcm::silence(secs, OUTPUT_SAMPLE_RATE),
            RenderJob::Speech(utterance) => {
                let (samples, ok) = self.speak(index, &utterance).await;
                if ok {
                    characters += utterance.text.chars().count();
                } else {
                    failed = true;
                }
                samples
            }
            RenderJob::Dialogue(lines) => {
                let gap = pcm::silence(DIALOGUE_LINE_GAP_SECS, OUTPUT_SAMPLE_RATE);
                let mut samples = Vec::new();
                for (n, line) in lines.iter().enumerate() {
                    if n > 0 {
                        samples.extend_from_slice(&gap);
                    }
                    let (line_samples, ok) = self.speak(index, line).await;
                    if ok {
                        characters += line.text.chars().count();
                    } else {
                        failed = true;
                    }
                    samples.extend(line_samples);
                }
                samples
            }
        };

        let path = dir.join(format!("segment_{index:04}.wav"));
        let write_path = path.clone();
        tokio::task::spawn_blocking(move || write_wav(&write_path, &samples, OUTPUT_SAMPLE_RATE))
            .await
            .map_err(|e| audio_error("joining segment writer", e))?
            .map_err(|e| audio_error("writing segment", e))?;

        Ok(RenderedSegment {
            path,
            characters,
            failed,
        })
    }

    /// Synthesizes one utterance at the output rate. On failure, returns
    /// estimated silence and `false`.
    async fn speak(&self, index: usize, utterance: &Utterance) -> (Vec<i16>, bool) {
        let request = SpeechRequest {
            text: utterance.text.clone(),
            voice: utterance.voice.clone(),
            language_code: utterance.language_code.to_string(),
            speed: 1.0,
        };
        let result = match self.synthesizer.synthesize(&request).await {
            Ok(speech) if speech.sample_rate == 0 => {
                Err(SynthesisError::InvalidAudio("zero sample rate".to_string()))
            }
            Ok(speech) => pcm::resample(&speech.samples, speech.sample_rate, OUTPUT_SAMPLE_RATE)
                .map_err(|e| SynthesisError::InvalidAudio(e.to_string())),
            Err(e) => Err(e),
        };
        match result {
            Ok(samples) => (samples, true),
            Err(e) => {
                let secs = utterance.text.chars().count() as f32 * FALLBACK_SECS_PER_CHAR;
                warn!(segment = index, voice = %utterance.voice, error = %e, fallback_secs = secs, "Synthesis failed, substituting silence");
                (pcm::silence(secs, OUTPUT_SAMPLE_RATE), false)
            }
        }
    }
}
