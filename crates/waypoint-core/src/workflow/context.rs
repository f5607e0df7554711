//! The mutable JSON document threaded through an execution.

use serde_json::Value;

use super::path::{JsonPath, PathError};

/// Why a merge into the context was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    Path(PathError),
    TooLarge { size: usize, max: usize },
}

/// Execution context. Owned by one execution; the caller's input is copied
/// in and never mutated.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    document: Value,
    max_bytes: usize,
}

impl ExecutionContext {
    pub fn new(input: &Value, max_bytes: usize) -> Self {
        Self {
            document: input.clone(),
            max_bytes,
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn into_document(self) -> Value {
        self.document
    }

    /// Select the effective input for a state (`InputPath`). A missing
    /// path yields `None`.
    pub fn select(&self, path: Option<&JsonPath>) -> Option<&Value> {
        match path {
            Some(path) => path.get(&self.document),
            None => Some(&self.document),
        }
    }

    /// Write `result` at `result_path`; `None` discards it. On failure the
    /// context is left unchanged.
    pub fn merge(&mut self, result_path: Option<&JsonPath>, result: Value) -> Result<(), MergeError> {
        let Some(path) = result_path else {
            return Ok(());
        };

        let mut updated = self.document.clone();
        path.set(&mut updated, result).map_err(MergeError::Path)?;

        let size = serialized_len(&updated);
        if size > self.max_bytes {
            return Err(MergeError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        self.document = updated;
        Ok(())
    }
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAX: usize = 1024 * 1024;

    fn path(s: &str) -> JsonPath {
        JsonPath::parse(s).unwrap()
    }

    #[test]
    fn test_new_copies_input() {
        let input = json!({ "a": 1 });
        let mut ctx = ExecutionContext::new(&input, MAX);
        ctx.merge(Some(&path("$.b")), json!(2)).unwrap();
        assert_eq!(input, json!({ "a": 1 }));
        assert_eq!(ctx.document(), &json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn test_merge_preserves_siblings() {
        let mut ctx = ExecutionContext::new(&json!({ "keep": true }), MAX);
        ctx.merge(Some(&path("$.LambdaResult")), json!({ "body": "ok" }))
            .unwrap();
        assert_eq!(
            ctx.document(),
            &json!({ "keep": true, "LambdaResult": { "body": "ok" } })
        );
    }

    #[test]
    fn test_merge_none_discards() {
        let mut ctx = ExecutionContext::new(&json!({ "a": 1 }), MAX);
        ctx.merge(None, json!({ "ignored": true })).unwrap();
        assert_eq!(ctx.into_document(), json!({ "a": 1 }));
    }

    #[test]
    fn test_merge_root_replaces() {
        let mut ctx = ExecutionContext::new(&json!({ "a": 1 }), MAX);
        ctx.merge(Some(&JsonPath::root()), json!({ "b": 2 })).unwrap();
        assert_eq!(ctx.document(), &json!({ "b": 2 }));
    }

    #[test]
    fn test_merge_over_limit_leaves_context_unchanged() {
        let mut ctx = ExecutionContext::new(&json!({}), 32);
        let err = ctx
            .merge(Some(&path("$.big")), json!("x".repeat(64)))
            .unwrap_err();
        assert!(matches!(err, MergeError::TooLarge { max: 32, .. }));
        assert_eq!(ctx.document(), &json!({}));
    }

    #[test]
    fn test_select() {
        let ctx = ExecutionContext::new(&json!({ "a": { "b": 1 } }), MAX);
        assert_eq!(ctx.select(Some(&path("$.a"))), Some(&json!({ "b": 1 })));
        assert_eq!(ctx.select(Some(&path("$.z"))), None);
        assert_eq!(ctx.select(None), Some(ctx.document()));
    }
}
