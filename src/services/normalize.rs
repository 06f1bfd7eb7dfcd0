//! Field extraction from workflow payloads of unknown shape.
//!
//! Different workflow revisions answer with flat keys, nested objects,
//! JSON documents encoded inside string fields, or markdown-ish free text.
//! A field is described by an ordered list of [`Rule`]s; [`resolve`] tries
//! them top to bottom and the first one that yields a non-empty value wins.
//! Nothing here fails: a field is either found or absent.

use crate::utils::text::{looks_like_json, strip_code_blocks};
use regex::Regex;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Flattens to a single string, joining list entries with `sep`.
    pub fn into_text(self, sep: &str) -> String {
        match self {
            FieldValue::Text(s) => s,
            FieldValue::List(items) => items.join(sep),
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            FieldValue::Text(s) => vec![s],
            FieldValue::List(items) => items,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Strategy<'a> {
    /// Pre-order search of the parsed document for a matching key,
    /// descending into JSON embedded in string values.
    DeepKey,
    /// `"key": "value"` literal anywhere in the raw payload.
    JsonLiteral,
    /// `**key**: value` label, value up to end of line.
    LabeledLine,
    /// `**key**: value` label, value up to the next line starting with a
    /// bullet or heading marker.
    LabeledBlock,
    /// Dump the parsed object (or its `container` child) minus `exclude`.
    WholeObject {
        container: Option<&'a str>,
        exclude: &'a [&'a str],
    },
    /// The raw payload itself.
    RawText,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule<'a> {
    pub keys: &'a [&'a str],
    pub strategy: Strategy<'a>,
}

impl<'a> Rule<'a> {
    pub const fn new(keys: &'a [&'a str], strategy: Strategy<'a>) -> Self {
        Self { keys, strategy }
    }
}

/// A payload parsed once and shared across all field lookups.
#[derive(Debug, Clone)]
pub struct Payload<'a> {
    raw: &'a str,
    json: Option<Value>,
}

impl<'a> Payload<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let json = serde_json::from_str::<Value>(raw.trim())
            .ok()
            .or_else(|| serde_json::from_str::<Value>(&strip_code_blocks(raw)).ok());
        Self { raw, json }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }
}

/// Evaluates `rules` in order; first non-empty result wins.
pub fn resolve(payload: &Payload<'_>, rules: &[Rule<'_>]) -> Option<FieldValue> {
    rules.iter().find_map(|rule| apply(payload, rule))
}

/// Default extraction for an ad hoc key set: deep key match, then the two
/// regex forms.
pub fn extract(payload: &str, keys: &[&str]) -> Option<FieldValue> {
    let rules = [
        Rule::new(keys, Strategy::DeepKey),
        Rule::new(keys, Strategy::JsonLiteral),
        Rule::new(keys, Strategy::LabeledLine),
    ];
    resolve(&Payload::parse(payload), &rules)
}

fn apply(payload: &Payload<'_>, rule: &Rule<'_>) -> Option<FieldValue> {
    match rule.strategy {
        Strategy::DeepKey => payload
            .json()
            .and_then(|json| deep_find(json, rule.keys))
            .and_then(value_to_field),
        Strategy::JsonLiteral => json_literal(payload.raw(), rule.keys).map(repair_escapes).map(FieldValue::Text),
        Strategy::LabeledLine => labeled_line(payload.raw(), rule.keys).map(repair_escapes).map(FieldValue::Text),
        Strategy::LabeledBlock => labeled_block(payload.raw(), rule.keys).map(repair_escapes).map(FieldValue::Text),
        Strategy::WholeObject { container, exclude } => payload
            .json()
            .and_then(|json| whole_object(json, container, exclude))
            .map(FieldValue::Text),
        Strategy::RawText => non_empty(payload.raw().trim()).map(|s| FieldValue::Text(s.to_string())),
    }
}

fn key_matches(key: &str, candidates: &[&str]) -> bool {
    let key = key.to_lowercase();
    candidates.iter().any(|c| c.to_lowercase() == key)
}

/// Parses a string value that itself holds a (possibly code-fenced) JSON
/// document.
pub fn embedded_json(s: &str) -> Option<Value> {
    let cleaned = strip_code_blocks(s);
    if !looks_like_json(&cleaned) {
        return None;
    }
    serde_json::from_str(&cleaned).ok()
}

/// Pre-order key search: an object's own keys are checked before any of its
/// children are entered, so shallow matches shadow nested ones.
pub fn deep_find(value: &Value, keys: &[&str]) -> Option<Value> {
    match value {
        Value::Object(map) => {
            if let Some((_, found)) = map.iter().find(|(k, _)| key_matches(k, keys)) {
                return Some(found.clone());
            }
            map.values().find_map(|child| deep_find(child, keys))
        }
        Value::Array(items) => items.iter().find_map(|child| deep_find(child, keys)),
        Value::String(s) => embedded_json(s).and_then(|inner| deep_find(&inner, keys)),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<&str> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => non_empty(s).map(str::to_string),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => serde_json::to_string_pretty(value).ok(),
    }
}

pub fn value_to_field(value: Value) -> Option<FieldValue> {
    match value {
        Value::Array(items) => {
            let list: Vec<String> = items.iter().filter_map(scalar_text).collect();
            if list.is_empty() {
                None
            } else {
                Some(FieldValue::List(list))
            }
        }
        other => scalar_text(&other).map(FieldValue::Text),
    }
}

/// First non-empty value among `keys`, checked in key order on a single
/// record (no descent).
pub fn first_present(record: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find_map(scalar_text)
}

fn key_alternation(keys: &[&str]) -> String {
    keys.iter().map(|k| regex::escape(k)).collect::<Vec<_>>().join("|")
}

fn json_literal(raw: &str, keys: &[&str]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let pattern = format!(r#""(?:{})"\s*:\s*"((?:[^"\\]|\\.)*)""#, key_alternation(keys));
    let re = Regex::new(&pattern).ok()?;
    let found = re
        .captures_iter(raw)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| non_empty(m.as_str()).map(str::to_string));
    found
}

fn label_pattern(keys: &[&str]) -> Option<Regex> {
    if keys.is_empty() {
        return None;
    }
    let pattern = format!(
        r"(?:^|\n|[*#-]\s*)(?:\*\*)?(?:{})(?:\*\*)?\s*[:：]\s*",
        key_alternation(keys)
    );
    Regex::new(&pattern).ok()
}

fn labeled_line(raw: &str, keys: &[&str]) -> Option<String> {
    let re = label_pattern(keys)?;
    let m = re.find(raw)?;
    let rest = &raw[m.end()..];
    let line = rest.split('\n').next().unwrap_or_default();
    non_empty(line.trim()).map(str::to_string)
}

fn labeled_block(raw: &str, keys: &[&str]) -> Option<String> {
    let re = label_pattern(keys)?;
    let m = re.find(raw)?;
    let rest = &raw[m.end()..];

    let end = rest
        .match_indices('\n')
        .map(|(i, _)| i)
        .find(|&i| matches!(rest[i + 1..].chars().next(), Some('*' | '#' | '-')))
        .unwrap_or(rest.len());
    non_empty(rest[..end].trim()).map(str::to_string)
}

/// Decodes escape sequences left in a value that was cut out of a JSON
/// document by regex. Leaves the value untouched if it does not decode.
pub fn repair_escapes(value: String) -> String {
    if !value.contains('\\') {
        return value;
    }
    match serde_json::from_str::<String>(&format!("\"{}\"", value)) {
        Ok(decoded) => decoded,
        Err(_) => value,
    }
}

fn whole_object(json: &Value, container: Option<&str>, exclude: &[&str]) -> Option<String> {
    let root = json.as_object()?;
    let target: Map<String, Value> = match container.and_then(|c| root.get(c)) {
        Some(Value::Object(inner)) => inner.clone(),
        Some(Value::String(s)) => match embedded_json(s) {
            Some(Value::Object(inner)) => inner,
            _ => root.clone(),
        },
        _ => root.clone(),
    };

    let display: Map<String, Value> = target
        .into_iter()
        .filter(|(k, _)| !key_matches(k, exclude))
        .collect();
    if display.is_empty() {
        return None;
    }
    serde_json::to_string_pretty(&Value::Object(display)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: Option<FieldValue>) -> Option<String> {
        value.map(|v| v.into_text("\n"))
    }

    #[test]
    fn test_nested_key() {
        assert_eq!(text(extract(r#"{"a": {"b": "X"}}"#, &["b"])), Some("X".to_string()));
    }

    #[test]
    fn test_json_encoded_string_is_transparent() {
        let payload = r#"{"output": "{\"b\":\"Y\"}"}"#;
        assert_eq!(text(extract(payload, &["b"])), Some("Y".to_string()));
    }

    #[test]
    fn test_code_fenced_string_is_transparent() {
        let payload = r#"{"output": "```json\n{\"b\": \"Z\"}\n```"}"#;
        assert_eq!(text(extract(payload, &["b"])), Some("Z".to_string()));
    }

    #[test]
    fn test_shallow_match_wins() {
        let payload = r#"{"outer": {"name": "inner"}, "name": "top"}"#;
        assert_eq!(text(extract(payload, &["name"])), Some("top".to_string()));
    }

    #[test]
    fn test_key_match_is_case_insensitive() {
        let payload = r#"{"Style_Name": "水墨"}"#;
        assert_eq!(text(extract(payload, &["style_name"])), Some("水墨".to_string()));
    }

    #[test]
    fn test_list_elements_are_searched() {
        let payload = r#"{"items": [{"other": 1}, {"painting_style": "厚涂"}]}"#;
        assert_eq!(text(extract(payload, &["painting_style"])), Some("厚涂".to_string()));
    }

    #[test]
    fn test_array_value_becomes_list() {
        let payload = r#"{"content": ["第一行", "第二行"]}"#;
        assert_eq!(
            extract(payload, &["content"]),
            Some(FieldValue::List(vec!["第一行".to_string(), "第二行".to_string()]))
        );
    }

    #[test]
    fn test_markdown_label_without_json() {
        let payload = "**风格名称**: 赛博朋克\n";
        assert_eq!(text(extract(payload, &["风格名称"])), Some("赛博朋克".to_string()));
    }

    #[test]
    fn test_markdown_label_with_bullet_and_fullwidth_colon() {
        let payload = "一些介绍\n- **画风**：水彩质感\n- 其他：无";
        assert_eq!(text(extract(payload, &["画风"])), Some("水彩质感".to_string()));
    }

    #[test]
    fn test_json_literal_in_broken_json() {
        let payload = r#"{"风格名称": "国风", "视觉画风": "水墨", oops"#;
        assert_eq!(text(extract(payload, &["视觉画风"])), Some("水墨".to_string()));
    }

    #[test]
    fn test_empty_deep_match_falls_through_to_regex() {
        let payload = "{\"name\": \"\"}\n**name**: fallback";
        // Not valid JSON as a whole, so only the regex forms can answer.
        assert_eq!(text(extract(payload, &["name"])), Some("fallback".to_string()));
    }

    #[test]
    fn test_absent_field() {
        assert_eq!(extract(r#"{"a": 1}"#, &["b"]), None);
        assert_eq!(extract("plain text", &["b"]), None);
    }

    #[test]
    fn test_labeled_block_stops_at_next_marker() {
        let payload = "**风格内容**: 第一段\n继续第一段\n**视觉画风**: 水彩";
        let rules = [Rule::new(&["风格内容"], Strategy::LabeledBlock)];
        assert_eq!(
            text(resolve(&Payload::parse(payload), &rules)),
            Some("第一段\n继续第一段".to_string())
        );
    }

    #[test]
    fn test_whole_object_fallback_drops_consumed_keys() {
        let payload = r#"{"style": "{\"风格名称\": \"A\", \"色调\": \"冷\"}"}"#;
        let rules = [Rule::new(
            &[],
            Strategy::WholeObject {
                container: Some("style"),
                exclude: &["风格名称"],
            },
        )];
        let dumped = text(resolve(&Payload::parse(payload), &rules)).unwrap();
        assert!(dumped.contains("色调"));
        assert!(!dumped.contains("风格名称"));
    }

    #[test]
    fn test_first_successful_rule_wins() {
        let payload = r#"{"a": "", "b": "from-b"}"#;
        let rules = [
            Rule::new(&["a"], Strategy::DeepKey),
            Rule::new(&["b"], Strategy::DeepKey),
            Rule::new(&[], Strategy::RawText),
        ];
        assert_eq!(text(resolve(&Payload::parse(payload), &rules)), Some("from-b".to_string()));
    }

    #[test]
    fn test_repair_escapes_keeps_undecodable_value() {
        assert_eq!(repair_escapes(r"\u4e2d\u56fd".to_string()), "中国");
        assert_eq!(repair_escapes("plain".to_string()), "plain");
        assert_eq!(repair_escapes(r"bad \x escape".to_string()), r"bad \x escape");
    }

    #[test]
    fn test_first_present_respects_key_order() {
        let record: Value = serde_json::from_str(r#"{"姓名": "B", "name": "A"}"#).unwrap();
        assert_eq!(first_present(&record, &["name", "姓名"]), Some("A".to_string()));
        assert_eq!(first_present(&record, &["missing"]), None);
    }
}
