//! Response normalization: pull one candidate mapping out of a model reply.
//!
//! The model is prompted for clean JSON but in practice returns any of:
//!
//! - a bare JSON object
//! - JSON inside ```` ```json ```` fences, or after a sentence of prose
//! - JSON with a trailing comma
//! - `LABEL: value` lines (asked for, or volunteered), sometimes as markdown
//!   bullets with bold labels
//!
//! Two strategies run in order. The **JSON strategy** strips fence markers,
//! takes the span from the first `{` to the last `}` and parses it as an
//! object. When that fails, the **label strategy** scans line by line for the
//! fixed label set of [`ReceiptField`]. If neither produces a single field the
//! reply is rejected with `Normalization`: an empty record must never pass as
//! success.
//!
//! Values are not interpreted here beyond turning JSON scalars into their
//! literal text; digit handling is the reconciler's job.

use crate::error::ReceiptError;
use crate::record::{CandidateFields, FieldValue};
use crate::schema::{is_ambiguous_identifier_key, ReceiptField, AMBIGUOUS_IDENTIFIER_KEY};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Which strategy produced the candidate mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Json,
    Labels,
}

/// Candidate mapping plus the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub strategy: Strategy,
    pub fields: CandidateFields,
}

/// Extract the candidate field mapping from a raw model reply.
pub fn normalize(raw: &str) -> Result<CandidateFields, ReceiptError> {
    normalize_detailed(raw).map(|n| n.fields)
}

/// Like [`normalize`], also reporting which strategy succeeded.
pub fn normalize_detailed(raw: &str) -> Result<Normalized, ReceiptError> {
    let text = remove_invisible_chars(raw);
    if text.trim().is_empty() {
        return Err(ReceiptError::normalization("model reply is empty", raw));
    }

    if let Some(fields) = json_strategy(&text) {
        debug!("Normalized reply via JSON strategy ({} keys)", fields.len());
        return Ok(Normalized {
            strategy: Strategy::Json,
            fields,
        });
    }

    if let Some(fields) = label_strategy(&text) {
        debug!("Normalized reply via label strategy");
        return Ok(Normalized {
            strategy: Strategy::Labels,
            fields,
        });
    }

    Err(ReceiptError::normalization(
        "neither a JSON object nor any LABEL: value line was found",
        raw,
    ))
}

// ── Shared cleanup ───────────────────────────────────────────────────────

/// Zero-width and bidi control characters. Persian receipts are full of RLM /
/// LRM marks that would otherwise split digit runs. ZWNJ (U+200C) is kept: it
/// is orthographic in Persian words.
fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}'
                    | '\u{200E}'
                    | '\u{200F}'
                    | '\u{FEFF}'
                    | '\u{00AD}'
                    | '\u{2060}'
                    | '\u{202A}'..='\u{202E}'
                    | '\u{2066}'..='\u{2069}'
            )
        })
        .collect()
}

/// Strings a model writes when it means "missing".
fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    ["null", "none", "n/a", "na", "nil", "undefined", "-", "--", "---", "—"]
        .iter()
        .any(|p| v.eq_ignore_ascii_case(p))
}

// ── Strategy 1: JSON ─────────────────────────────────────────────────────

static RE_FENCE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z0-9_-]*").unwrap());

static RE_TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());

/// Wrapper keys some models nest the record under.
const ENVELOPE_KEYS: &[&str] = &["data", "result", "receipt", "fields", "extracted", "output"];

fn json_strategy(text: &str) -> Option<CandidateFields> {
    let cleaned = RE_FENCE_MARKER.replace_all(text, "");
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    let span = &cleaned[start..=end];

    let value: Value = match serde_json::from_str(span) {
        Ok(v) => v,
        Err(first) => {
            let repaired = RE_TRAILING_COMMA.replace_all(span, "$1");
            match serde_json::from_str(&repaired) {
                Ok(v) => v,
                Err(_) => {
                    debug!("JSON strategy failed: {}", first);
                    return None;
                }
            }
        }
    };

    let object = unwrap_envelope(value.as_object()?);
    if !object.keys().any(|k| is_recognised_key(k)) {
        debug!("JSON object has no receipt field keys");
        return None;
    }

    Some(
        object
            .iter()
            .map(|(k, v)| (k.clone(), json_to_field(v)))
            .collect(),
    )
}

fn is_recognised_key(key: &str) -> bool {
    ReceiptField::from_key(key).is_some() || is_ambiguous_identifier_key(key)
}

/// Descend into `{"data": {...}}`-style wrappers when the outer object has no
/// recognisable field of its own.
fn unwrap_envelope(object: &Map<String, Value>) -> &Map<String, Value> {
    if object.keys().any(|k| is_recognised_key(k)) {
        return object;
    }
    ENVELOPE_KEYS
        .iter()
        .find_map(|key| {
            object
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .and_then(|(_, v)| v.as_object())
        })
        .unwrap_or(object)
}

/// Literal text of a JSON value. Numbers keep their exact source digits.
fn json_to_field(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Absent,
        Value::String(s) if is_placeholder(s) => FieldValue::Absent,
        Value::String(s) => FieldValue::Found(s.clone()),
        Value::Number(n) => FieldValue::Found(n.to_string()),
        Value::Bool(b) => FieldValue::Found(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|v| json_to_field(v).as_deref().map(str::to_string))
                .collect();
            if parts.is_empty() {
                FieldValue::Absent
            } else {
                FieldValue::Found(parts.join(", "))
            }
        }
        Value::Object(_) => FieldValue::Found(value.to_string()),
    }
}

// ── Strategy 2: LABEL: value lines ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelTarget {
    Field(ReceiptField),
    Ambiguous,
}

const AMBIGUOUS_LABEL_PATTERNS: &[&str] = &[r"identifiers?", r"ids?"];

fn label_regex(alternatives: &[&str]) -> Regex {
    // Optional bullet / heading marker, optional bold or quotes around the
    // label, then `:` `：` or `=`.
    let pattern = format!(
        r#"(?i)^\s*(?:[-*•>#]+\s*)?(?:\*\*|__)?\s*["']?(?:{})["']?\s*(?:\*\*|__)?\s*[:：=]\s*(?:\*\*|__)?\s*(?P<value>.*?)\s*$"#,
        alternatives.join("|")
    );
    Regex::new(&pattern).unwrap()
}

static LABEL_RULES: Lazy<Vec<(LabelTarget, Regex)>> = Lazy::new(|| {
    let mut rules: Vec<(LabelTarget, Regex)> = ReceiptField::ALL
        .into_iter()
        .map(|f| (LabelTarget::Field(f), label_regex(f.label_patterns())))
        .collect();
    rules.push((LabelTarget::Ambiguous, label_regex(AMBIGUOUS_LABEL_PATTERNS)));
    rules
});

/// Trailing punctuation left over from half-JSON lines and markdown.
fn clean_label_value(value: &str) -> &str {
    value
        .trim_end_matches(|c: char| c == ',' || c == '*' || c == '_' || c.is_whitespace())
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
}

fn label_strategy(text: &str) -> Option<CandidateFields> {
    let mut found: Vec<(ReceiptField, FieldValue)> = Vec::new();
    let mut ambiguous: Vec<String> = Vec::new();

    for line in text.lines() {
        for (target, re) in LABEL_RULES.iter() {
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let raw_value = caps.name("value").map_or("", |m| m.as_str());
            let value = clean_label_value(raw_value);
            let value = if is_placeholder(value) {
                FieldValue::Absent
            } else {
                FieldValue::Found(value.to_string())
            };

            match target {
                LabelTarget::Field(field) => {
                    // First occurrence wins.
                    if !found.iter().any(|(f, _)| f == field) {
                        found.push((*field, value));
                    }
                }
                LabelTarget::Ambiguous => {
                    if let FieldValue::Found(v) = value {
                        ambiguous.push(v);
                    }
                }
            }
            break;
        }
    }

    if found.is_empty() && ambiguous.is_empty() {
        return None;
    }

    let mut fields: CandidateFields = ReceiptField::ALL
        .into_iter()
        .map(|f| {
            let value = found
                .iter()
                .find(|(g, _)| *g == f)
                .map(|(_, v)| v.clone())
                .unwrap_or(FieldValue::Absent);
            (f.key().to_string(), value)
        })
        .collect();
    if !ambiguous.is_empty() {
        fields.insert(
            AMBIGUOUS_IDENTIFIER_KEY.to_string(),
            FieldValue::Found(ambiguous.join(", ")),
        );
    }
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(fields: &'a CandidateFields, key: &str) -> &'a FieldValue {
        fields.get(key).unwrap_or(&FieldValue::Absent)
    }

    #[test]
    fn bare_json() {
        let n = normalize_detailed(r#"{"amount": "250000", "trackingCode": null}"#).unwrap();
        assert_eq!(n.strategy, Strategy::Json);
        assert_eq!(get(&n.fields, "amount"), &FieldValue::found("250000"));
        assert_eq!(get(&n.fields, "trackingCode"), &FieldValue::Absent);
    }

    #[test]
    fn fenced_json_with_prose() {
        let raw = "Here is the data:\n```json\n{\"date\": \"1403/02/01\", \"time\": \"14:30\"}\n```\nLet me know!";
        let f = normalize(raw).unwrap();
        assert_eq!(get(&f, "date"), &FieldValue::found("1403/02/01"));
        assert_eq!(get(&f, "time"), &FieldValue::found("14:30"));
    }

    #[test]
    fn numeric_literals_keep_every_digit() {
        let f = normalize(r#"{"reference_id": 140302011234567890123, "amount": 0.50}"#).unwrap();
        assert_eq!(
            get(&f, "reference_id"),
            &FieldValue::found("140302011234567890123")
        );
        assert_eq!(get(&f, "amount"), &FieldValue::found("0.50"));
    }

    #[test]
    fn trailing_comma_is_repaired() {
        let f = normalize("{\"amount\": \"1000\",\n}").unwrap();
        assert_eq!(get(&f, "amount"), &FieldValue::found("1000"));
    }

    #[test]
    fn envelope_is_unwrapped() {
        let f = normalize(r#"{"data": {"amount": "7", "bank_name": "ملت"}}"#).unwrap();
        assert_eq!(get(&f, "amount"), &FieldValue::found("7"));
        assert_eq!(get(&f, "bank_name"), &FieldValue::found("ملت"));
    }

    #[test]
    fn placeholders_and_scalars() {
        let f = normalize(r#"{"depositId": true, "bank": "N/A", "ids": ["123", null, 456]}"#)
            .unwrap();
        assert_eq!(get(&f, "depositId"), &FieldValue::found("true"));
        assert_eq!(get(&f, "bank"), &FieldValue::Absent);
        assert_eq!(get(&f, "ids"), &FieldValue::found("123, 456"));
    }

    #[test]
    fn label_fallback() {
        let raw = "I could not produce JSON.\nAMOUNT: 250000\nTRACKING: 5451018865\nBANK: NONE";
        let n = normalize_detailed(raw).unwrap();
        assert_eq!(n.strategy, Strategy::Labels);
        assert_eq!(get(&n.fields, "amount"), &FieldValue::found("250000"));
        assert_eq!(get(&n.fields, "trackingCode"), &FieldValue::found("5451018865"));
        assert_eq!(get(&n.fields, "bankName"), &FieldValue::Absent);
        assert_eq!(get(&n.fields, "referenceNumber"), &FieldValue::Absent);
        assert_eq!(n.fields.len(), 7);
    }

    #[test]
    fn label_markdown_and_persian() {
        let raw = "- **Amount:** 1,500,000\n* مبلغ: 9\n**تاریخ**: ۱۴۰۳/۰۲/۰۱\nساعت: 09:05";
        let f = normalize(raw).unwrap();
        assert_eq!(get(&f, "amount"), &FieldValue::found("1,500,000"));
        assert_eq!(get(&f, "date"), &FieldValue::found("۱۴۰۳/۰۲/۰۱"));
        assert_eq!(get(&f, "time"), &FieldValue::found("09:05"));
    }

    #[test]
    fn broken_json_falls_back_to_quoted_labels() {
        let raw = "{\n\"amount\": \"250000\",\n\"tracking_code\": \"5451018865\"\n";
        let n = normalize_detailed(raw).unwrap();
        assert_eq!(n.strategy, Strategy::Labels);
        assert_eq!(get(&n.fields, "amount"), &FieldValue::found("250000"));
        assert_eq!(get(&n.fields, "trackingCode"), &FieldValue::found("5451018865"));
    }

    #[test]
    fn ambiguous_labels_are_collected() {
        let f = normalize("ID: 5451018865\nID: 140302011234567890").unwrap();
        assert_eq!(
            get(&f, AMBIGUOUS_IDENTIFIER_KEY),
            &FieldValue::found("5451018865, 140302011234567890")
        );
    }

    #[test]
    fn bidi_marks_do_not_split_digits() {
        let f = normalize("TRACKING: \u{200F}5451\u{200E}018865").unwrap();
        assert_eq!(get(&f, "trackingCode"), &FieldValue::found("5451018865"));
    }

    #[test]
    fn empty_and_unstructured_replies_fail() {
        for raw in ["", "   \n\t", "Sorry, I cannot read this image."] {
            assert!(
                matches!(normalize(raw), Err(ReceiptError::Normalization { .. })),
                "expected failure for {raw:?}"
            );
        }
    }

    #[test]
    fn empty_object_is_not_success() {
        assert!(matches!(
            normalize("{}"),
            Err(ReceiptError::Normalization { .. })
        ));
    }

    #[test]
    fn object_without_receipt_keys_is_not_success() {
        let err = normalize(r#"{"error": "image too blurry to read"}"#).unwrap_err();
        match err {
            ReceiptError::Normalization { excerpt, .. } => assert!(excerpt.contains("blurry")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(normalize(r#"{"result": {"status": "failed"}}"#).is_err());
    }

    #[test]
    fn unrelated_object_falls_through_to_labels() {
        let n = normalize_detailed("{\"note\": \"see below\"}\nAMOUNT: 5").unwrap();
        assert_eq!(n.strategy, Strategy::Labels);
        assert_eq!(get(&n.fields, "amount"), &FieldValue::found("5"));
    }

    #[test]
    fn all_null_receipt_keys_are_still_json() {
        let n = normalize_detailed(r#"{"amount": null, "trackingCode": null}"#).unwrap();
        assert_eq!(n.strategy, Strategy::Json);
        assert!(n.fields.values().all(FieldValue::is_absent));
    }
}
