//! Recovery of a classification payload from raw model output.
//!
//! Models wrap JSON in many ways: reasoning blocks, Markdown fences, prose
//! before and after. Recovery runs in order and stops at the first success:
//!
//! 1. strip `<think>…</think>` blocks and code fences
//! 2. parse the remaining text directly
//! 3. parse every balanced `{…}` substring, largest first
//!
//! Nothing is ever fabricated: when no candidate carries a category the
//! result is [`Error::MalformedOutput`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use vaultsort_core::{clamp_confidence, ClassificationResult, Error, Result};

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").unwrap());

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

const CATEGORY_KEYS: &[&str] = &["category", "moc"];
const CONFIDENCE_KEYS: &[&str] = &["confidence"];
const RATIONALE_KEYS: &[&str] = &["rationale", "reasoning"];
const TAG_KEYS: &[&str] = &["tags", "suggested_tags"];
const RELATED_KEYS: &[&str] = &["related", "related_notes"];

/// Parse raw provider output into a [`ClassificationResult`].
pub fn parse_classification(raw: &str) -> Result<ClassificationResult> {
    let cleaned = clean(raw);
    if cleaned.is_empty() {
        return Err(Error::MalformedOutput("empty response".to_string()));
    }

    let mut saw_object = false;
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&cleaned) {
        saw_object = true;
        if let Some(result) = from_object(&obj) {
            trace!("Parsed classification directly");
            return Ok(result);
        }
    }

    let mut candidates = balanced_objects(&cleaned);
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));
    for candidate in candidates {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(candidate) {
            saw_object = true;
            if let Some(result) = from_object(&obj) {
                debug!(
                    candidate_len = candidate.len(),
                    response_len = raw.len(),
                    "Recovered classification from embedded JSON"
                );
                return Ok(result);
            }
        }
    }

    Err(Error::MalformedOutput(if saw_object {
        "JSON payload has no category".to_string()
    } else {
        format!("no JSON object found in {} byte response", raw.len())
    }))
}

/// Remove reasoning blocks and code fences, then trim.
pub fn clean(raw: &str) -> String {
    let without_think = strip_reasoning(raw);
    strip_code_fences(&without_think).trim().to_string()
}

/// Remove `<think>` blocks. An unterminated block at the start is dropped
/// up to the closing tag when one exists, otherwise the text is kept.
pub fn strip_reasoning(raw: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(raw, "");
    match stripped.find("</think>") {
        Some(end) => stripped[end + "</think>".len()..].to_string(),
        None => stripped.into_owned(),
    }
}

/// Replace every fenced block with its inner content.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "$1").into_owned()
}

/// Every balanced `{…}` substring in order of its opening brace, skipping
/// braces inside JSON strings.
///
/// One pass with a stack of open positions; unmatched braces are dropped.
/// Quotes only open strings inside an object, so stray quotes in the prose
/// around a payload do not hide it.
pub fn balanced_objects(text: &str) -> Vec<&str> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i));
                }
            }
            _ => {}
        }
    }
    spans.sort_unstable();
    spans.into_iter().map(|(start, end)| &text[start..=end]).collect()
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
}

/// Build a result from a JSON object; `None` when it has no usable category.
fn from_object(obj: &Map<String, Value>) -> Option<ClassificationResult> {
    let category = field(obj, CATEGORY_KEYS)
        .and_then(Value::as_str)
        .map(strip_wikilink)
        .filter(|c| !c.is_empty())?;

    let confidence = field(obj, CONFIDENCE_KEYS)
        .map(confidence_value)
        .unwrap_or(0.0);

    let rationale = field(obj, RATIONALE_KEYS)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let tags = field(obj, TAG_KEYS)
        .map(string_list)
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim_start_matches('#').to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let related = field(obj, RELATED_KEYS)
        .map(string_list)
        .unwrap_or_default()
        .into_iter()
        .map(|r| strip_wikilink(&r))
        .filter(|r| !r.is_empty())
        .collect();

    Some(
        ClassificationResult::new(category, confidence)
            .with_rationale(rationale)
            .with_tags(tags)
            .with_related(related),
    )
}

fn confidence_value(v: &Value) -> f64 {
    let raw = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    clamp_confidence(raw)
}

/// Array of strings, or a single comma-separated string.
fn string_list(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        Value::String(s) => s.split(',').map(|s| s.trim().to_string()).collect(),
        _ => Vec::new(),
    }
}

fn strip_wikilink(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix("[[")
        .and_then(|s| s.strip_suffix("]]"))
        .unwrap_or(s)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let r = parse_classification(r#"{"category":"X","confidence":0.9}"#).unwrap();
        assert_eq!(r.category, "X");
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn test_fenced_json() {
        let r = parse_classification("```json\n{\"category\":\"X\",\"confidence\":0.9}\n```").unwrap();
        assert_eq!(r, ClassificationResult::new("X", 0.9));
    }

    #[test]
    fn test_fence_without_language() {
        let r = parse_classification("```\n{\"category\":\"Y\",\"confidence\":0.5}\n```").unwrap();
        assert_eq!(r.category, "Y");
    }

    #[test]
    fn test_prose_around_json() {
        let raw = "Sure! Here is the classification:\n{\"moc\": \"Rust\", \"confidence\": 0.8}\nLet me know.";
        let r = parse_classification(raw).unwrap();
        assert_eq!(r.category, "Rust");
        assert_eq!(r.confidence, 0.8);
    }

    #[test]
    fn test_think_block_is_stripped() {
        let raw = "<think>The note mentions {borrowing}. Maybe \"Rust\"?</think>\n{\"category\":\"Rust\",\"confidence\":0.7}";
        let r = parse_classification(raw).unwrap();
        assert_eq!(r.category, "Rust");
    }

    #[test]
    fn test_dangling_close_tag() {
        let raw = "reasoning without an opening tag</think>{\"category\":\"Go\",\"confidence\":0.6}";
        assert_eq!(parse_classification(raw).unwrap().category, "Go");
    }

    #[test]
    fn test_largest_balanced_object_wins() {
        let raw = r#"Example: {"category": "Wrong"} Answer: {"category": "Right", "confidence": 0.9, "tags": ["a", "b"]}"#;
        let r = parse_classification(raw).unwrap();
        assert_eq!(r.category, "Right");
        assert_eq!(r.tags, vec!["a", "b"]);
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"result: {"category": "Syntax", "rationale": "uses } and { in text", "confidence": 0.75}"#;
        let r = parse_classification(raw).unwrap();
        assert_eq!(r.category, "Syntax");
        assert_eq!(r.rationale, "uses } and { in text");
    }

    #[test]
    fn test_field_aliases() {
        let raw = r##"{"moc":"[[Databases]]","confidence":"0.65","reasoning":"talks about SQL","suggested_tags":["#sql","db"],"related_notes":["[[Postgres]]","Indexes"]}"##;
        let r = parse_classification(raw).unwrap();
        assert_eq!(r.category, "Databases");
        assert_eq!(r.confidence, 0.65);
        assert_eq!(r.rationale, "talks about SQL");
        assert_eq!(r.tags, vec!["sql", "db"]);
        assert_eq!(r.related, vec!["Postgres", "Indexes"]);
    }

    #[test]
    fn test_confidence_clamped_and_defaulted() {
        let r = parse_classification(r#"{"category":"X","confidence":3.5}"#).unwrap();
        assert_eq!(r.confidence, 1.0);
        let r = parse_classification(r#"{"category":"X","confidence":-1}"#).unwrap();
        assert_eq!(r.confidence, 0.0);
        let r = parse_classification(r#"{"category":"X"}"#).unwrap();
        assert_eq!(r.confidence, 0.0);
        let r = parse_classification(r#"{"category":"X","confidence":"high"}"#).unwrap();
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_comma_separated_tags() {
        let r = parse_classification(r#"{"category":"X","tags":"rust, async ,tokio"}"#).unwrap();
        assert_eq!(r.tags, vec!["rust", "async", "tokio"]);
    }

    #[test]
    fn test_missing_category_is_malformed() {
        let err = parse_classification(r#"{"confidence":0.9}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedOutput(ref m) if m.contains("no category")));
        let err = parse_classification(r#"{"category":"  ","confidence":0.9}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedOutput(_)));
    }

    #[test]
    fn test_no_json_is_malformed() {
        let err = parse_classification("I cannot classify this note.").unwrap_err();
        assert!(matches!(err, Error::MalformedOutput(ref m) if m.contains("no JSON")));
        assert!(matches!(parse_classification("   "), Err(Error::MalformedOutput(_))));
    }

    #[test]
    fn test_unbalanced_json_is_malformed() {
        let err = parse_classification(r#"{"category": "X", "confidence": 0.9"#).unwrap_err();
        assert!(matches!(err, Error::MalformedOutput(_)));
    }

    #[test]
    fn test_balanced_objects_nested() {
        let found = balanced_objects(r#"a {"x": {"y": 1}} b"#);
        assert_eq!(found, vec![r#"{"x": {"y": 1}}"#, r#"{"y": 1}"#]);
    }

    #[test]
    fn test_many_unmatched_braces_still_parse() {
        let noisy = format!(
            "{}{}",
            "{ ".repeat(20_000),
            r#"{"category": "Rust", "confidence": 0.8}"#
        );
        let found = balanced_objects(&noisy);
        assert_eq!(found, vec![r#"{"category": "Rust", "confidence": 0.8}"#]);
        assert_eq!(parse_classification(&noisy).unwrap().category, "Rust");
    }

    #[test]
    fn test_stray_quote_in_prose_does_not_hide_payload() {
        let raw = r#"He said "sure. {"category": "Cooking", "confidence": 0.7}"#;
        assert_eq!(parse_classification(raw).unwrap().category, "Cooking");
    }

    #[test]
    fn test_escaped_quote_in_string() {
        let found = balanced_objects(r#"{"a": "say \"}\" ok"}"#);
        assert_eq!(found.len(), 1);
    }
}
