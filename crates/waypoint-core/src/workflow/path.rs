//! Reference paths into the execution context (`$`, `$.a.b`, `$.items[0]`,
//! `$['key with.dots']`).
//!
//! Paths are parsed once at load time into a list of segments and resolved
//! structurally against a `serde_json::Value`; they are never rebuilt by
//! string concatenation.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from parsing a path or writing through one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path '{0}' must start with '$'")]
    MissingRoot(String),

    #[error("malformed path '{path}' at offset {offset}: {reason}")]
    Malformed {
        path: String,
        offset: usize,
        reason: String,
    },

    #[error("cannot write through '{path}': index {index} does not exist")]
    IndexOutOfRange { path: String, index: usize },
}

// ---------------------------------------------------------------------------
// JsonPath
// ---------------------------------------------------------------------------

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed reference path. The empty segment list is the root `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// The root path `$`.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a path string.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let rest = path
            .strip_prefix('$')
            .ok_or_else(|| PathError::MissingRoot(path.to_string()))?;

        let malformed = |offset: usize, reason: &str| PathError::Malformed {
            path: path.to_string(),
            offset: offset + 1,
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut chars = rest.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '.' => {
                    let start = pos + 1;
                    let mut end = start;
                    while let Some(&(i, ch)) = chars.peek() {
                        if ch == '.' || ch == '[' {
                            break;
                        }
                        end = i + ch.len_utf8();
                        chars.next();
                    }
                    let name = &rest[start..end];
                    if name.is_empty() {
                        return Err(malformed(pos, "empty key"));
                    }
                    if name == "*" {
                        return Err(malformed(pos, "wildcards are not supported"));
                    }
                    if let Some(bad) = name.chars().find(|&ch| !is_dot_key_char(ch)) {
                        return Err(malformed(
                            pos,
                            &format!("character {bad:?} needs the ['...'] key form"),
                        ));
                    }
                    segments.push(PathSegment::Key(name.to_string()));
                }
                '[' => match chars.peek().map(|&(_, ch)| ch) {
                    Some(quote @ ('\'' | '"')) => {
                        chars.next();
                        let mut key = String::new();
                        let mut closed = false;
                        for (_, ch) in chars.by_ref() {
                            if ch == quote {
                                closed = true;
                                break;
                            }
                            key.push(ch);
                        }
                        if !closed {
                            return Err(malformed(pos, "unterminated quoted key"));
                        }
                        match chars.next() {
                            Some((_, ']')) => {}
                            _ => return Err(malformed(pos, "expected ']' after quoted key")),
                        }
                        segments.push(PathSegment::Key(key));
                    }
                    _ => {
                        let mut digits = String::new();
                        while let Some(&(_, ch)) = chars.peek() {
                            if !ch.is_ascii_digit() {
                                break;
                            }
                            digits.push(ch);
                            chars.next();
                        }
                        match chars.next() {
                            Some((_, ']')) if !digits.is_empty() => {}
                            _ => return Err(malformed(pos, "expected a non-negative array index")),
                        }
                        let index = digits
                            .parse::<usize>()
                            .map_err(|_| malformed(pos, "array index is too large"))?;
                        segments.push(PathSegment::Index(index));
                    }
                },
                other => {
                    return Err(malformed(pos, &format!("unexpected character '{other}'")));
                }
            }
        }

        Ok(Self { segments })
    }

    /// True for `$`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Resolve the path against a document.
    ///
    /// Missing keys, out-of-range indices, and stepping into a scalar all
    /// yield `None`.
    pub fn get<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| match segment {
                PathSegment::Key(key) => current.as_object()?.get(key),
                PathSegment::Index(index) => current.as_array()?.get(*index),
            })
    }

    /// Write `value` at this path, replacing whatever was there.
    ///
    /// Missing intermediate keys are created as objects and non-object
    /// intermediates reached by a key are replaced with objects. Array
    /// indices must already exist. Writing to `$` replaces the whole
    /// document. Sibling keys are never touched.
    pub fn set(&self, document: &mut Value, value: Value) -> Result<(), PathError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *document = value;
            return Ok(());
        };

        let mut current = document;
        for segment in parents {
            current = match segment {
                PathSegment::Key(key) => ensure_object(current)
                    .entry(key.clone())
                    .or_insert(Value::Null),
                PathSegment::Index(index) => current
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*index))
                    .ok_or_else(|| self.out_of_range(*index))?,
            };
        }

        match last {
            PathSegment::Key(key) => {
                ensure_object(current).insert(key.clone(), value);
            }
            PathSegment::Index(index) => {
                let slot = current
                    .as_array_mut()
                    .and_then(|items| items.get_mut(*index))
                    .ok_or_else(|| self.out_of_range(*index))?;
                *slot = value;
            }
        }
        Ok(())
    }

    fn out_of_range(&self, index: usize) -> PathError {
        PathError::IndexOutOfRange {
            path: self.to_string(),
            index,
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) if is_plain_key(key) => write!(f, ".{key}")?,
                PathSegment::Key(key) if key.contains('\'') => write!(f, "[\"{key}\"]")?,
                PathSegment::Key(key) => write!(f, "['{key}']")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && key != "*" && !key.contains(['.', '[']) && key.chars().all(is_dot_key_char)
}

fn is_dot_key_char(ch: char) -> bool {
    !matches!(ch, ']' | '\'' | '"') && !ch.is_whitespace()
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> JsonPath {
        JsonPath::parse(s).unwrap()
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_root() {
        assert!(path("$").is_root());
    }

    #[test]
    fn test_parse_dotted_and_indexed() {
        let p = path("$.LambdaResult.body[2]");
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Key("LambdaResult".to_string()),
                PathSegment::Key("body".to_string()),
                PathSegment::Index(2),
            ]
        );
    }

    #[test]
    fn test_parse_quoted_key_keeps_separators() {
        let p = path("$['a.b']['c[0]']");
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Key("a.b".to_string()),
                PathSegment::Key("c[0]".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_missing_root() {
        assert!(matches!(
            JsonPath::parse("LambdaResult.body"),
            Err(PathError::MissingRoot(_))
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["$.", "$..a", "$[x]", "$[1", "$['a'", "$.a[*]", "$.*", "$$", "$a"] {
            let err = JsonPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, PathError::Malformed { .. }),
                "{bad} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_quotes_and_spaces_in_dot_keys() {
        for bad in ["$.a]", "$.a'b", "$.a\"b", "$.a b", "$.x.a\tb"] {
            let err = JsonPath::parse(bad).unwrap_err();
            assert!(
                matches!(err, PathError::Malformed { .. }),
                "{bad} should be malformed, got {err:?}"
            );
        }
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for raw in ["$['a b']", "$[\"a'b\"]", "$['a]']", "$['*']", "$.a*", "$.x[0]['y.z']"] {
            let parsed = path(raw);
            let reparsed = path(&parsed.to_string());
            assert_eq!(reparsed, parsed, "{raw} rendered as {parsed}");
        }
        assert_eq!(path("$[\"a'b\"]").to_string(), "$[\"a'b\"]");
        assert_eq!(path("$['a b']").to_string(), "$['a b']");
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(path("$").to_string(), "$");
        assert_eq!(path("$.a['b'][3]").to_string(), "$.a.b[3]");
        assert_eq!(path("$['x.y']").to_string(), "$['x.y']");
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_nested_value() {
        let doc = json!({ "LambdaResult": { "body": "No gp2 volumes found" } });
        assert_eq!(
            path("$.LambdaResult.body").get(&doc),
            Some(&json!("No gp2 volumes found"))
        );
    }

    #[test]
    fn test_get_missing_is_none() {
        let doc = json!({ "a": { "b": 1 }, "list": [1, 2] });
        assert_eq!(path("$.a.c").get(&doc), None);
        assert_eq!(path("$.a.b.c").get(&doc), None);
        assert_eq!(path("$.list[5]").get(&doc), None);
        assert_eq!(path("$.a[0]").get(&doc), None);
    }

    #[test]
    fn test_get_root_returns_document() {
        let doc = json!("scalar");
        assert_eq!(path("$").get(&doc), Some(&doc));
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({});
        path("$.a.b.c").set(&mut doc, json!(1)).unwrap();
        assert_eq!(doc, json!({ "a": { "b": { "c": 1 } } }));
    }

    #[test]
    fn test_set_overwrites_exact_path_only() {
        let mut doc = json!({ "result": { "old": true, "keep": 1 }, "sibling": "x" });
        path("$.result").set(&mut doc, json!({ "new": true })).unwrap();
        assert_eq!(doc, json!({ "result": { "new": true }, "sibling": "x" }));
    }

    #[test]
    fn test_set_root_replaces_document() {
        let mut doc = json!({ "a": 1 });
        path("$").set(&mut doc, json!("done")).unwrap();
        assert_eq!(doc, json!("done"));
    }

    #[test]
    fn test_set_replaces_scalar_intermediate() {
        let mut doc = json!({ "a": "text" });
        path("$.a.b").set(&mut doc, json!(2)).unwrap();
        assert_eq!(doc, json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn test_set_into_existing_array_slot() {
        let mut doc = json!({ "items": [1, 2, 3] });
        path("$.items[1]").set(&mut doc, json!("two")).unwrap();
        assert_eq!(doc, json!({ "items": [1, "two", 3] }));
    }

    #[test]
    fn test_set_out_of_range_index_fails() {
        let mut doc = json!({ "items": [] });
        let err = path("$.items[0]").set(&mut doc, json!(1)).unwrap_err();
        assert_eq!(
            err,
            PathError::IndexOutOfRange {
                path: "$.items[0]".to_string(),
                index: 0
            }
        );
    }
}
