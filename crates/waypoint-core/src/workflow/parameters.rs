//! Task `Parameters` templates.
//!
//! A key ending in `.$` takes its value from the execution context at the
//! path it names; the suffix is stripped from the output key. Every other
//! value is copied literally. Templates are compiled once when the state
//! machine is loaded.

use serde_json::{Map, Value};

use super::path::JsonPath;

/// A compiled parameter template node.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Literal(Value),
    PathRef(JsonPath),
    Object(Vec<(String, ParameterValue)>),
    Array(Vec<ParameterValue>),
}

/// A `.$` reference that did not resolve against the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPath {
    /// Output key the reference was feeding.
    pub key: String,
    pub path: String,
}

impl ParameterValue {
    /// Compile a `Parameters` object.
    pub fn compile(template: &Map<String, Value>) -> Result<Self, String> {
        compile_object(template)
    }

    /// Build the task input from the context.
    pub fn resolve(&self, document: &Value) -> Result<Value, UnresolvedPath> {
        self.resolve_at("", document)
    }

    fn resolve_at(&self, key: &str, document: &Value) -> Result<Value, UnresolvedPath> {
        match self {
            ParameterValue::Literal(value) => Ok(value.clone()),
            ParameterValue::PathRef(path) => {
                path.get(document)
                    .cloned()
                    .ok_or_else(|| UnresolvedPath {
                        key: key.to_string(),
                        path: path.to_string(),
                    })
            }
            ParameterValue::Object(fields) => {
                let mut out = Map::with_capacity(fields.len());
                for (name, value) in fields {
                    out.insert(name.clone(), value.resolve_at(name, document)?);
                }
                Ok(Value::Object(out))
            }
            ParameterValue::Array(items) => items
                .iter()
                .map(|item| item.resolve_at(key, document))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    /// All context paths this template reads.
    pub fn referenced_paths(&self) -> Vec<&JsonPath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a JsonPath>) {
        match self {
            ParameterValue::Literal(_) => {}
            ParameterValue::PathRef(path) => out.push(path),
            ParameterValue::Object(fields) => {
                for (_, value) in fields {
                    value.collect_paths(out);
                }
            }
            ParameterValue::Array(items) => {
                for item in items {
                    item.collect_paths(out);
                }
            }
        }
    }
}

fn compile_object(template: &Map<String, Value>) -> Result<ParameterValue, String> {
    let mut fields: Vec<(String, ParameterValue)> = Vec::with_capacity(template.len());
    for (key, value) in template {
        let (name, compiled) = match key.strip_suffix(".$") {
            Some(name) => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| format!("'{key}' must be a path string, got {value}"))?;
                let path = JsonPath::parse(raw).map_err(|e| format!("'{key}': {e}"))?;
                (name, ParameterValue::PathRef(path))
            }
            None => (key.as_str(), compile_value(value)?),
        };
        if name.is_empty() {
            return Err(format!("'{key}' has an empty field name"));
        }
        if fields.iter().any(|(existing, _)| existing == name) {
            return Err(format!("field '{name}' is defined more than once"));
        }
        fields.push((name.to_string(), compiled));
    }
    Ok(ParameterValue::Object(fields))
}

fn compile_value(value: &Value) -> Result<ParameterValue, String> {
    match value {
        Value::Object(map) => compile_object(map),
        Value::Array(items) => items
            .iter()
            .map(compile_value)
            .collect::<Result<Vec<_>, _>>()
            .map(ParameterValue::Array),
        other => Ok(ParameterValue::Literal(other.clone())),
    }
}
