//! Two-phase parsing of the model's structured output.
//!
//! Phase 1 is a strict parse after stripping formatting fences. Phase 2 is a
//! single textual repair of truncated output followed by exactly one reparse.
//! There is no repair loop: a second failure is final.

use crate::error::{LessonError, LessonResult};
use serde_json::Value;
use tracing::{debug, warn};

/// Removes markdown code fences and any chatter before the first bracket.
pub fn strip_fences(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        // Drop the info string ("json", "JSON", ...) on the fence line.
        body = rest.split_once('\n').map(|(_, after)| after).unwrap_or("");
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    let body = body.trim();
    match body.find(['{', '[']) {
        Some(start) => &body[start..],
        None => body,
    }
}

/// Parses model output as JSON, repairing it once if needed.
///
/// Returns the value and whether the repair pass was used.
pub fn parse_model_json(raw: &str) -> LessonResult<(Value, bool)> {
    let body = strip_fences(raw);
    match serde_json::from_str::<Value>(body) {
        Ok(value) => Ok((value, false)),
        Err(first) => {
            debug!(error = %first, "Strict parse failed, attempting repair");
            let repaired = repair_truncated_json(body);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => Ok((value, true)),
                Err(second) => {
                    warn!(error = %second, "Repaired output still unparseable");
                    Err(LessonError::malformed(raw))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Frame {
    Object { awaiting_value: bool },
    Array,
}

fn value_done(stack: &mut [Frame]) {
    if let Some(Frame::Object { awaiting_value }) = stack.last_mut() {
        *awaiting_value = false;
    }
}

fn is_complete_literal(literal: &str) -> bool {
    matches!(literal, "true" | "false" | "null")
        || serde_json::from_str::<serde_json::Number>(literal).is_ok()
}

/// Cuts truncated JSON back to its last complete value and closes every
/// container still open at that point.
///
/// Dangling keys, half-written strings or literals, and trailing commas or
/// colons are dropped. Text after the top-level value is ignored.
pub fn repair_truncated_json(text: &str) -> String {
    let mut stack: Vec<Frame> = Vec::new();
    let mut started = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_value = false;
    let mut literal_start: Option<usize> = None;
    let mut safe: Option<(usize, Vec<Frame>)> = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if string_is_value {
                    value_done(&mut stack);
                    safe = Some((i + 1, stack.clone()));
                }
            }
            continue;
        }

        if let Some(start) = literal_start {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+') {
                continue;
            }
            literal_start = None;
            if is_complete_literal(&text[start..i]) {
                value_done(&mut stack);
                safe = Some((i, stack.clone()));
            }
        }

        if !started && c != '{' && c != '[' {
            continue;
        }

        match c {
            '{' | '[' => {
                started = true;
                stack.push(if c == '{' {
                    Frame::Object {
                        awaiting_value: false,
                    }
                } else {
                    Frame::Array
                });
                safe = Some((i + 1, stack.clone()));
            }
            '}' | ']' => {
                stack.pop();
                value_done(&mut stack);
                safe = Some((i + 1, stack.clone()));
                if stack.is_empty() {
                    break;
                }
            }
            '"' => {
                in_string = true;
                string_is_value = match stack.last() {
                    Some(Frame::Object { awaiting_value }) => *awaiting_value,
                    _ => true,
                };
            }
            ':' => {
                if let Some(Frame::Object { awaiting_value }) = stack.last_mut() {
                    *awaiting_value = true;
                }
            }
            ',' => value_done(&mut stack),
            c if c.is_whitespace() => {}
            _ => literal_start = Some(i),
        }
    }

    if let Some(start) = literal_start {
        if is_complete_literal(text[start..].trim_end()) {
            value_done(&mut stack);
            safe = Some((text.len(), stack.clone()));
        }
    }

    let Some((end, open)) = safe else {
        return text.to_string();
    };
    let mut repaired = text[..end].trim_end().to_string();
    for frame in open.iter().rev() {
        repaired.push(match frame {
            Frame::Object { .. } => '}',
            Frame::Array => ']',
        });
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "title": "En el café",
            "segments": [
                {"type": "intro", "speaker": "narrator", "language": "native", "text": "Welcome \"friend\" {ok}"},
                {"type": "pause", "purpose": "thinking", "duration": 3.5},
                {"type": "farewell", "text": "Adiós", "words": ["adiós"], "flag": true}
            ],
            "reviewed_units": [3, 4]
        })
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("Here you go:\n{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_clean_output_needs_no_repair() {
        let raw = format!("```json\n{}\n```", sample());
        let (value, repaired) = parse_model_json(&raw).unwrap();
        assert_eq!(value, sample());
        assert!(!repaired);
    }

    #[test]
    fn test_missing_trailing_delimiters_recover_everything() {
        let full = r#"{"title": "T", "segments": [{"type": "intro", "text": "Welcome \"friend\" {ok}"}, {"type": "pause", "duration": 3.5}]}"#;
        let expected: Value = serde_json::from_str(full).unwrap();
        for cut in 1..=3 {
            let truncated = &full[..full.len() - cut];
            let (value, repaired) = parse_model_json(truncated).unwrap();
            assert!(repaired, "{truncated}");
            assert_eq!(value, expected);
        }
    }

    #[test]
    fn test_truncated_mid_value_keeps_complete_pairs() {
        let raw = r#"{"title": "Hola", "segments": [{"type": "intro", "text": "Bienv"#;
        let (value, repaired) = parse_model_json(raw).unwrap();
        assert!(repaired);
        assert_eq!(value, json!({"title": "Hola", "segments": [{"type": "intro"}]}));
    }

    #[test]
    fn test_dangling_key_and_trailing_punctuation_are_dropped() {
        assert_eq!(repair_truncated_json(r#"{"a": 1, "b""#), r#"{"a": 1}"#);
        assert_eq!(repair_truncated_json(r#"{"a": 1, "b":"#), r#"{"a": 1}"#);
        assert_eq!(repair_truncated_json(r#"{"a": [1, 2,"#), r#"{"a": [1, 2]}"#);
        assert_eq!(repair_truncated_json(r#"{"a": tru"#), "{}");
        assert_eq!(repair_truncated_json(r#"{"a": {"#), r#"{"a": {}}"#);
        assert_eq!(repair_truncated_json(r#"{"a": -1.5"#), r#"{"a": -1.5}"#);
    }

    #[test]
    fn test_trailing_text_after_document_is_ignored() {
        let (value, repaired) = parse_model_json("{\"a\": 1}\nHope this helps!").unwrap();
        assert!(repaired);
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_escaped_quotes_do_not_confuse_repair() {
        let (value, _) = parse_model_json(r#"{"text": "say \"hi\" [now]", "n": 2"#).unwrap();
        assert_eq!(value, json!({"text": "say \"hi\" [now]", "n": 2}));
    }

    #[test]
    fn test_unrepairable_output_is_malformed() {
        let err = parse_model_json("I'm sorry, I can't produce that lesson.").unwrap_err();
        assert!(matches!(err, LessonError::MalformedDocument { .. }));

        let err = parse_model_json(r#"{"a": 1,, "b": 2}"#).unwrap_err();
        match err {
            LessonError::MalformedDocument { tail } => assert!(tail.ends_with("2}")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
