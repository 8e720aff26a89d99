//! Lenient decoding of structured values embedded in model replies.
//!
//! Model replies wrap JSON in prose, markdown fences, Python literals,
//! trailing commas, or get cut off mid-stream. Decoding walks a fixed
//! sequence of stages and stops at the first one that yields a value of the
//! requested shape:
//!
//! 1. strict JSON on the first balanced bracket pair
//! 2. Python literal (`'quotes'`, `True`/`None`, tuples) converted to JSON
//! 3. trailing-comma repair
//! 4. partial parse up to the last complete top-level element
//! 5. line-by-line salvage
//! 6. empty result
//!
//! Decoding never fails; callers inspect [`Decoded::stage`] when they care
//! how much was recovered.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").unwrap());

/// Cap on truncation points tried by the partial stage.
const MAX_PARTIAL_ATTEMPTS: usize = 64;

/// Which stage produced a decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    Strict,
    Literal,
    Repaired,
    Partial,
    LineSalvage,
    Empty,
}

/// Expected top-level shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Array,
    Object,
}

impl Shape {
    fn open(self) -> char {
        match self {
            Shape::Array => '[',
            Shape::Object => '{',
        }
    }

    fn close(self) -> char {
        match self {
            Shape::Array => ']',
            Shape::Object => '}',
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Shape::Array => value.is_array(),
            Shape::Object => value.is_object(),
        }
    }

    fn empty(self) -> Value {
        match self {
            Shape::Array => Value::Array(Vec::new()),
            Shape::Object => Value::Object(Map::new()),
        }
    }
}

/// A decoded value and the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    pub stage: DecodeStage,
}

impl Decoded {
    /// True when nothing could be recovered.
    pub fn is_empty(&self) -> bool {
        self.stage == DecodeStage::Empty
    }

    /// Array elements (empty for objects).
    pub fn into_items(self) -> Vec<Value> {
        match self.value {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }
}

/// Decode a reply expected to hold an array.
pub fn decode_array(text: &str) -> Decoded {
    decode(text, Shape::Array)
}

/// Decode a reply expected to hold an object.
///
/// The object is located by the brace pair balancing its first opening
/// brace, so prose before and after it is ignored.
pub fn decode_object(text: &str) -> Decoded {
    decode(text, Shape::Object)
}

/// Decode `text` into a value of `shape`, falling back stage by stage.
pub fn decode(text: &str, shape: Shape) -> Decoded {
    let cleaned = strip_code_fences(text);
    let bodies = candidate_bodies(cleaned, shape);

    let parsers: [(DecodeStage, fn(&str) -> Option<Value>); 3] = [
        (DecodeStage::Strict, parse_strict),
        (DecodeStage::Literal, parse_literal),
        (DecodeStage::Repaired, parse_repaired),
    ];
    for (stage, parse) in parsers {
        for body in &bodies {
            if let Some(value) = parse(body).filter(|v| shape.matches(v)) {
                if stage != DecodeStage::Strict {
                    debug!(?stage, "Decoded reply after fallback");
                }
                return Decoded { value, stage };
            }
        }
    }

    if let Some(value) = parse_partial(cleaned, shape) {
        debug!("Decoded truncated reply up to last complete element");
        return Decoded {
            value,
            stage: DecodeStage::Partial,
        };
    }

    if let Some(value) = salvage_lines(cleaned, shape) {
        debug!("Salvaged reply line by line");
        return Decoded {
            value,
            stage: DecodeStage::LineSalvage,
        };
    }

    debug!(reply_len = text.len(), "Reply could not be decoded");
    Decoded {
        value: shape.empty(),
        stage: DecodeStage::Empty,
    }
}

/// Decode a single value of any shape (used for boundary files).
pub fn parse_value(text: &str) -> Option<Value> {
    parse_strict(text)
        .or_else(|| parse_literal(text))
        .or_else(|| parse_repaired(text))
}

fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest.trim_start_matches("json"),
        };
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Spans worth parsing, most specific first: the bracket pair balancing the
/// first opening bracket, then first opening to last closing bracket, then
/// the whole text.
fn candidate_bodies(text: &str, shape: Shape) -> Vec<&str> {
    let mut bodies = Vec::with_capacity(3);
    if let Some(start) = text.find(shape.open()) {
        if let Some(len) = balanced_len(&text[start..]) {
            bodies.push(&text[start..start + len]);
        }
        if let Some(end) = text.rfind(shape.close()).filter(|&end| end > start) {
            bodies.push(&text[start..=end]);
        }
    }
    bodies.push(text);
    bodies.dedup();
    bodies
}

/// Byte length of the bracketed value `body` starts with, found by a depth
/// scan that skips quoted strings. `None` when the value never closes.
fn balanced_len(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_strict(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn parse_literal(text: &str) -> Option<Value> {
    literal_to_json(text).and_then(|json| parse_strict(&json))
}

fn parse_repaired(text: &str) -> Option<Value> {
    let base = literal_to_json(text).unwrap_or_else(|| text.to_string());
    parse_strict(&TRAILING_COMMA.replace_all(&base, "$1"))
}

/// Rewrite Python literal syntax as JSON.
///
/// Returns `None` when nothing needed rewriting or a string is unterminated.
fn literal_to_json(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut changed = false;

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                changed |= c == '\'';
                out.push('"');
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => {
                            let escaped = chars.next()?;
                            if escaped == '\'' {
                                out.push('\'');
                            } else {
                                out.push('\\');
                                out.push(escaped);
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        '"' => out.push_str("\\\""),
                        '\n' => out.push_str("\\n"),
                        other => out.push(other),
                    }
                }
                if !closed {
                    return None;
                }
                out.push('"');
            }
            '(' => {
                changed = true;
                out.push('[');
            }
            ')' => {
                changed = true;
                out.push(']');
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let replacement = match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => {
                        out.push_str(other);
                        continue;
                    }
                };
                changed = true;
                out.push_str(replacement);
            }
            other => out.push(other),
        }
    }

    changed.then_some(out)
}

/// Byte offsets of commas separating top-level elements of `body`.
///
/// `body` must start with the opening bracket. Scanning stops when the
/// outermost bracket closes.
fn top_level_commas(body: &str) -> Vec<usize> {
    let mut commas = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in body.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            ',' if depth == 1 => commas.push(i),
            _ => {}
        }
    }
    commas
}

fn parse_partial(text: &str, shape: Shape) -> Option<Value> {
    let start = text.find(shape.open())?;
    let body = &text[start..];

    let mut cuts = vec![body.len()];
    cuts.extend(top_level_commas(body).into_iter().rev());

    cuts.into_iter().take(MAX_PARTIAL_ATTEMPTS).find_map(|cut| {
        let prefix = body[..cut].trim_end().trim_end_matches(',');
        let candidate = format!("{}{}", prefix, shape.close());
        parse_value(&candidate).filter(|v| shape.matches(v))
    })
}

fn salvage_lines(text: &str, shape: Shape) -> Option<Value> {
    let lines = text
        .lines()
        .map(|line| line.trim().trim_end_matches(',').trim_end())
        .filter(|line| !line.is_empty());

    match shape {
        Shape::Array => {
            let items: Vec<Value> = lines
                .filter(|line| line.starts_with(['{', '[', '(']))
                .filter_map(parse_value)
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        Shape::Object => {
            let mut merged = Map::new();
            for line in lines {
                let candidate = if line.starts_with('{') {
                    parse_value(line)
                } else {
                    parse_value(&format!("{{{}}}", line))
                };
                if let Some(Value::Object(fields)) = candidate {
                    merged.extend(fields);
                }
            }
            (!merged.is_empty()).then_some(Value::Object(merged))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strict_array() {
        let decoded = decode_array(r#"[{"id": 1, "label": "Person"}]"#);
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(decoded.value, json!([{"id": 1, "label": "Person"}]));
    }

    #[test]
    fn test_fenced_array() {
        let reply = "```json\n[{\"id\": 2, \"label\": \"City\"}]\n```";
        let decoded = decode_array(reply);
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(decoded.into_items().len(), 1);
    }

    #[test]
    fn test_object_inside_prose() {
        let reply = r#"Sure! {"duplicates": ["United States"], "canonical": "USA"} Hope that helps."#;
        let decoded = decode_object(reply);
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(decoded.value["canonical"], "USA");
    }

    #[test]
    fn test_object_followed_by_braced_prose() {
        let reply = r#"{"duplicates": ["United States"], "canonical": "USA"} Note: I treated {USA} as the item."#;
        let decoded = decode_object(reply);
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(
            decoded.value,
            json!({"duplicates": ["United States"], "canonical": "USA"})
        );
    }

    #[test]
    fn test_array_followed_by_bracketed_prose() {
        let reply = "[{\"id\": 1, \"label\": \"Person\"}, {\"id\": 2, \"label\": \"City\"}]\nIds used: [1, 2]";
        let decoded = decode_array(reply);
        assert_eq!(decoded.stage, DecodeStage::Strict);
        assert_eq!(decoded.into_items().len(), 2);
    }

    #[test]
    fn test_balanced_scan_skips_quoted_brackets() {
        assert_eq!(balanced_len(r#"{"a": "}{"} tail"#), Some(11));
        assert_eq!(balanced_len("['x]', ('y',)] rest"), Some(14));
        assert_eq!(balanced_len(r#"{"a": [1, 2"#), None);
    }

    #[test]
    fn test_python_literal() {
        let decoded = decode_array("[{'id': 1, 'label': 'Person', 'ok': True, 'x': None}]");
        assert_eq!(decoded.stage, DecodeStage::Literal);
        assert_eq!(
            decoded.value,
            json!([{"id": 1, "label": "Person", "ok": true, "x": null}])
        );

        let rows = decode_array(r#"[('Trane', 'location', "Swords, Dublin")]"#);
        assert_eq!(rows.value, json!([["Trane", "location", "Swords, Dublin"]]));
    }

    #[test]
    fn test_literal_keeps_apostrophes_and_quotes() {
        let decoded = decode_array(r#"['it\'s', 'say "hi"']"#);
        assert_eq!(decoded.value, json!(["it's", "say \"hi\""]));
    }

    #[test]
    fn test_trailing_comma_repair() {
        let decoded = decode_array(r#"[{"id": 1, "label": "A",}, {"id": 2, "label": "B"},]"#);
        assert_eq!(decoded.stage, DecodeStage::Repaired);
        assert_eq!(decoded.into_items().len(), 2);
    }

    #[test]
    fn test_truncated_reply_keeps_complete_elements() {
        let decoded = decode_array(r#"[{"id": 1, "label": "A"}, {"id": 2, "lab"#);
        assert_eq!(decoded.stage, DecodeStage::Partial);
        assert_eq!(decoded.value, json!([{"id": 1, "label": "A"}]));

        let decoded = decode_object(r#"{"duplicates": ["a", "b"], "canonical": "a"#);
        assert_eq!(decoded.stage, DecodeStage::Partial);
        assert_eq!(decoded.value, json!({"duplicates": ["a", "b"]}));
    }

    #[test]
    fn test_line_salvage() {
        let reply = "Here you go:\n{\"id\": 1, \"label\": \"A\"},\n{\"id\": 2, \"label\": \"B\"}\nDone.";
        let decoded = decode_array(reply);
        assert_eq!(decoded.stage, DecodeStage::LineSalvage);
        assert_eq!(decoded.into_items().len(), 2);

        let reply = "\"duplicates\": [\"a\"],\n\"canonical\": \"a\"";
        let decoded = decode_object(reply);
        assert_eq!(decoded.stage, DecodeStage::LineSalvage);
        assert_eq!(decoded.value, json!({"duplicates": ["a"], "canonical": "a"}));
    }

    #[test]
    fn test_garbage_yields_empty() {
        let decoded = decode_object("sure, here: [oops");
        assert!(decoded.is_empty());
        assert_eq!(decoded.value, json!({}));

        let decoded = decode_array("sure, here: [oops");
        assert!(decoded.is_empty());
        assert!(decoded.into_items().is_empty());

        assert!(decode_array("").is_empty());
    }

    #[test]
    fn test_wrong_shape_is_not_accepted() {
        let decoded = decode_object("[1, 2, 3]");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_parse_value_any_shape() {
        assert_eq!(parse_value("[]"), Some(json!([])));
        assert_eq!(parse_value("[['a', 'b', 'c'],]"), Some(json!([["a", "b", "c"]])));
        assert_eq!(parse_value("not json"), None);
    }
}
