//! Tolerant JSON Extraction
//!
//! Turns noisy model text into a JSON value through a fixed sequence of
//! strategies. Every stage but the last fails silently into the next one:
//!
//! 1. Drop everything up to the last `</think>`
//! 2. Strict parse of the remainder
//! 3. Slice from the first opening to the last closing bracket of the shape
//! 4. Permissive repair of that candidate
//! 5. JSON5 parse of that candidate
//! 6. Strip code fences, normalise quotes and control characters, strict parse
//!
//! The shape only guides stage 3; callers check [`JsonShape::matches`] on the
//! result themselves.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use super::json_repair::{JsonRepairer, normalize_smart_quotes};
use crate::constants::engine::REASONING_CLOSE;
use crate::types::{ChaplinError, Result};

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?").expect("valid fence pattern"));

/// Expected top-level JSON shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Array,
    Object,
}

impl JsonShape {
    /// Whether `value` has this shape
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn brackets(&self) -> (char, char) {
        match self {
            Self::Array => ('[', ']'),
            Self::Object => ('{', '}'),
        }
    }
}

impl fmt::Display for JsonShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Parse model output into JSON, trying each recovery stage in order
pub fn try_parse_json(text: &str, shape: JsonShape) -> Result<Value> {
    let remainder = strip_reasoning(text).trim();

    if let Ok(value) = serde_json::from_str::<Value>(remainder) {
        return Ok(value);
    }
    trace!("strict parse failed");

    let candidate = bracket_candidate(remainder, shape).unwrap_or(remainder);

    if let Ok((value, _)) = JsonRepairer::new().parse_or_repair(candidate) {
        trace!("recovered by repair");
        return Ok(value);
    }

    if let Ok(value) = json5::from_str::<Value>(candidate) {
        trace!("recovered by json5");
        return Ok(value);
    }

    let sanitized = sanitize(remainder);
    serde_json::from_str::<Value>(sanitized.trim())
        .map_err(|e| ChaplinError::parse(format!("no JSON {} found: {}", shape, e), text))
}

/// Text after the last reasoning delimiter, or the whole text
pub fn strip_reasoning(text: &str) -> &str {
    match text.rfind(REASONING_CLOSE) {
        Some(pos) => &text[pos + REASONING_CLOSE.len()..],
        None => text,
    }
}

/// First opening to last closing bracket of `shape`
fn bracket_candidate(text: &str, shape: JsonShape) -> Option<&str> {
    let (open, close) = shape.brackets();
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn sanitize(text: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(text, "");
    normalize_smart_quotes(&unfenced)
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let value = try_parse_json(r#"{"a": 1}"#, JsonShape::Object).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_reasoning_prefix_dropped() {
        let text = "<think>maybe {\"wrong\": 1}</think>\n[{\"name\": \"x\"}]";
        let value = try_parse_json(text, JsonShape::Array).unwrap();
        assert_eq!(value, json!([{"name": "x"}]));
    }

    #[test]
    fn test_last_reasoning_delimiter_wins() {
        let text = "a</think>b</think>{\"ok\": true}";
        assert_eq!(strip_reasoning(text), "{\"ok\": true}");
    }

    #[test]
    fn test_surrounding_prose() {
        let text = "Sure! Here is the team:\n[{\"name\": \"Writer\"}]\nLet me know.";
        let value = try_parse_json(text, JsonShape::Array).unwrap();
        assert_eq!(value[0]["name"], "Writer");
    }

    #[test]
    fn test_fenced_with_trailing_comma() {
        let text = "```json\n{\"title\": \"T\", \"tags\": [\"a\", \"b\",],}\n```";
        let value = try_parse_json(text, JsonShape::Object).unwrap();
        assert_eq!(value, json!({"title": "T", "tags": ["a", "b"]}));
    }

    #[test]
    fn test_smart_quotes_recovered() {
        let text = "Result: {\u{201C}answer\u{201D}: \u{201C}42\u{201D}}";
        let value = try_parse_json(text, JsonShape::Object).unwrap();
        assert_eq!(value["answer"], "42");
    }

    #[test]
    fn test_json5_comments() {
        let text = "{\n  // the answer\n  answer: 42,\n}";
        let value = try_parse_json(text, JsonShape::Object).unwrap();
        assert_eq!(value["answer"].as_f64(), Some(42.0));
    }

    #[test]
    fn test_shape_not_enforced() {
        let value = try_parse_json(r#"{"a": 1}"#, JsonShape::Array).unwrap();
        assert!(!JsonShape::Array.matches(&value));
        assert!(JsonShape::Object.matches(&value));
    }

    #[test]
    fn test_failure_carries_snippet() {
        let err = try_parse_json("no json here", JsonShape::Object).unwrap_err();
        match err {
            ChaplinError::Parse { snippet, .. } => assert_eq!(snippet, "no json here"),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9 ,:{}\\[\\]\"'\\\\]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_valid_object_round_trips(
            map in prop::collection::btree_map("[a-z_]{1,6}", arb_json(), 0..4)
        ) {
            let value = Value::Object(map.into_iter().collect());
            let text = serde_json::to_string_pretty(&value).unwrap();
            prop_assert_eq!(try_parse_json(&text, JsonShape::Object).unwrap(), value);
        }

        #[test]
        fn prop_valid_array_round_trips(items in prop::collection::vec(arb_json(), 0..4)) {
            let value = Value::Array(items);
            let text = serde_json::to_string(&value).unwrap();
            prop_assert_eq!(try_parse_json(&text, JsonShape::Array).unwrap(), value);
        }
    }
}
