//! Free-text lesson submission gate.
//!
//! Runs strictly before any call to the generation backend. Detection is
//! idiom-based: single words such as "ignore", "forget" or "pretend" never
//! trigger a rejection on their own, only the multi-word constructions used
//! to hijack a prompt do.

use regex::Regex;
use std::{fmt, sync::LazyLock};

/// Default ceiling for submitted text, in characters.
pub const DEFAULT_MAX_TEXT_LENGTH: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionKind {
    InstructionOverride,
    RoleReassignment,
    PromptExtraction,
    OutputHijack,
    DelimiterInjection,
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InjectionKind::InstructionOverride => "instruction override",
            InjectionKind::RoleReassignment => "role reassignment",
            InjectionKind::PromptExtraction => "prompt extraction",
            InjectionKind::OutputHijack => "output hijacking",
            InjectionKind::DelimiterInjection => "delimiter injection",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooLong { max: usize, actual: usize },
    Injection(InjectionKind),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "the text is empty"),
            Rejection::TooLong { max, actual } => {
                write!(f, "the text is {} characters long, the limit is {}", actual, max)
            }
            Rejection::Injection(kind) => {
                write!(f, "the text contains a disallowed instruction pattern ({})", kind)
            }
        }
    }
}

const DELIMITER_PATTERNS: &[&str] = &[
    r"<\|\s*(?:im_start|im_end|system|user|assistant|endoftext)\s*\|>",
    r"\[/?(?:INST|SYS)\]",
    r"<<\s*/?SYS\s*>>",
    r"(?mi)^[ \t]*#{2,}[ \t]*(?:system|assistant|instruction)s?\b[ \t]*:?",
    r"(?mi)^[ \t]*(?:system|assistant)[ \t]*:",
    r"</?(?:system|assistant)>",
    // The markers fencing submitted text in the material-derivation prompt.
    r"(?i)<<<\s*TEXT\b",
    r"(?i)\bTEXT\s*>>>",
];

static PATTERNS: LazyLock<Vec<(InjectionKind, Regex)>> = LazyLock::new(|| {
    let idioms: &[(InjectionKind, &str)] = &[
        (
            InjectionKind::InstructionOverride,
            r"(?i)\b(?:ignore|disregard|forget|override|bypass|skip)\s+(?:all\s+|any\s+|the\s+|your\s+|of\s+|these\s+|those\s+)*(?:previous|prior|above|earlier|preceding|original|system|initial)\s+(?:instructions?|prompts?|rules|directions|directives|messages|context)\b",
        ),
        (
            InjectionKind::InstructionOverride,
            r"(?i)\b(?:ignore|disregard|forget)\s+(?:everything|all)\s+(?:you\s+(?:were|have\s+been)\s+told|above|before\s+this)\b",
        ),
        (
            InjectionKind::RoleReassignment,
            r"(?i)\byou\s+are\s+(?:now|no\s+longer)\s+(?:a\s+|an\s+|my\s+|the\s+)?(?:ai|assistant|chatbot|bot|model|language\s+model|dan|jailbroken|unrestricted|unfiltered|uncensored)\b",
        ),
        (
            InjectionKind::RoleReassignment,
            r"(?i)\byou\s+are\s+(?:now|no\s+longer)\s+[^.!?\n]{0,40}?\b(?:with\s+no\s+|without\s+(?:any\s+)?|free\s+of\s+(?:any\s+)?)(?:rules|restrictions|limits|filters|guidelines)\b",
        ),
        (
            InjectionKind::RoleReassignment,
            r"(?i)\bfrom\s+now\s+on,?\s+you\s+(?:are|will|must|shall)\b",
        ),
        (
            InjectionKind::RoleReassignment,
            r"(?i)\b(?:pretend|act|behave)\s+(?:to\s+be|you\s+are|as\s+if\s+you\s+(?:are|were)|as)\s+(?:a|an|the)?\s*(?:ai|assistant|chatbot|model|system|developer|unrestricted|jailbroken|dan)\b",
        ),
        (
            InjectionKind::PromptExtraction,
            r"(?i)\b(?:reveal|show|print|repeat|display|output|leak|tell)\s+(?:me\s+|us\s+)?(?:(?:your|the)\s+(?:system|initial|hidden|original|secret)\s+(?:prompts?|instructions)|your\s+(?:instructions|prompts?))\b",
        ),
        (
            InjectionKind::PromptExtraction,
            r"(?i)\bwhat\s+(?:is|are|were)\s+your\s+(?:system\s+prompt|instructions|original\s+instructions)\b",
        ),
        (
            InjectionKind::OutputHijack,
            r"(?i)\b(?:instead|rather),?\s+(?:just\s+)?(?:output|respond\s+with|reply\s+with|print|return)\s+(?:only\b|exactly\b|verbatim\b|nothing\s+but\b|the\s+following\b)",
        ),
        (
            InjectionKind::OutputHijack,
            r"(?i)\b(?:respond|reply|answer)\s+only\s+with\b",
        ),
        (
            InjectionKind::OutputHijack,
            r"(?i)\bdo\s+not\s+(?:generate|create|write|produce)\s+(?:a|the|any)\s+lesson\b",
        ),
    ];

    idioms
        .iter()
        .map(|(kind, pattern)| (*kind, pattern))
        .chain(
            DELIMITER_PATTERNS
                .iter()
                .map(|pattern| (InjectionKind::DelimiterInjection, pattern)),
        )
        .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
        .collect()
});

static DELIMITERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DELIMITER_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Checks a free-text lesson submission.
pub fn validate(text: &str, max_length: usize) -> Result<(), Rejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Rejection::Empty);
    }
    let length = trimmed.chars().count();
    if length > max_length {
        return Err(Rejection::TooLong {
            max: max_length,
            actual: length,
        });
    }
    for (kind, pattern) in PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return Err(Rejection::Injection(*kind));
        }
    }
    Ok(())
}

static ANGLE_RUNS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<{3,}|>{3,}").ok());

/// Strips delimiter-injection sequences from text that already passed
/// [`validate`]. Runs of three or more angle brackets are removed too, so
/// the result can never open or close a fenced block in a prompt.
pub fn sanitize(text: &str) -> String {
    let mut cleaned = text.to_string();
    for pattern in DELIMITERS.iter().chain(ANGLE_RUNS.iter()) {
        cleaned = pattern.replace_all(&cleaned, " ").into_owned();
    }
    cleaned
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
