//! Error taxonomy for the lesson pipeline.
//!
//! Failures absorbed inside a single segment render or a single repair attempt
//! never reach these types. Everything here propagates to the request layer.

use thiserror::Error;

/// A failed call to the text-generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("text backend timed out after {0}s")]
    Timeout(u64),
    #[error("text backend quota exhausted: {0}")]
    Quota(String),
    #[error("text backend rejected credentials: {0}")]
    Auth(String),
    #[error("text backend failed: {0}")]
    Backend(String),
    #[error("text backend returned an empty response")]
    EmptyResponse,
}

/// A failed call to the speech backend for one segment.
///
/// Never user-facing: the assembler substitutes silence and moves on.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech backend timed out")]
    Timeout,
    #[error("speech backend quota exhausted: {0}")]
    Quota(String),
    #[error("speech backend failed: {0}")]
    Backend(String),
    #[error("speech backend returned undecodable audio: {0}")]
    InvalidAudio(String),
}

/// The errors a front-end operation can end with.
#[derive(Debug, Error)]
pub enum LessonError {
    #[error("invalid lesson text: {0}")]
    Validation(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("lesson document could not be parsed or repaired (tail: {tail:?})")]
    MalformedDocument { tail: String },
    #[error("lesson {level}-{unit} is not available")]
    LessonNotFound { level: u32, unit: u32 },
    #[error("{0} not found")]
    NotFound(String),
    #[error("lesson {level}-{unit} is locked")]
    LessonLocked { level: u32, unit: u32 },
    #[error("a {0} request is already being processed")]
    AlreadyProcessing(&'static str),
    #[error("audio rendering failed: {0}")]
    Audio(String),
    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl LessonError {
    /// Whether the caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            LessonError::Generation(GenerationError::Auth(_)) => false,
            LessonError::Generation(_) | LessonError::MalformedDocument { .. } => true,
            _ => false,
        }
    }

    /// Builds a `MalformedDocument` error keeping only the last characters of the output.
    pub fn malformed(output: &str) -> Self {
        const TAIL_CHARS: usize = 200;
        let count = output.chars().count();
        let tail: String = output.chars().skip(count.saturating_sub(TAIL_CHARS)).collect();
        LessonError::MalformedDocument { tail }
    }
}

pub type LessonResult<T> = std::result::Result<T, LessonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LessonError::Generation(GenerationError::Timeout(30)).is_retryable());
        assert!(LessonError::Generation(GenerationError::Quota("x".into())).is_retryable());
        assert!(!LessonError::Generation(GenerationError::Auth("bad key".into())).is_retryable());
        assert!(LessonError::malformed("{\"a\":").is_retryable());
        assert!(!LessonError::Validation("empty".into()).is_retryable());
        assert!(!LessonError::LessonLocked { level: 1, unit: 3 }.is_retryable());
    }

    #[test]
    fn test_malformed_keeps_tail() {
        let output = "x".repeat(500) + "END";
        match LessonError::malformed(&output) {
            LessonError::MalformedDocument { tail } => {
                assert_eq!(tail.chars().count(), 200);
                assert!(tail.ends_with("END"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = LessonError::LessonNotFound { level: 2, unit: 7 };
        assert_eq!(err.to_string(), "lesson 2-7 is not available");
        let err = LessonError::AlreadyProcessing("lesson");
        assert_eq!(err.to_string(), "a lesson request is already being processed");
    }
}
