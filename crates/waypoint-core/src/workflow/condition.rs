//! Choice rule predicates.
//!
//! Rules are compiled from `ChoiceRuleDefinition` at load time into a closed
//! `Predicate` tree and evaluated against the execution context by Choice
//! states. Evaluation never fails: a rule whose `Variable` (or `...Path`
//! operand) does not resolve, or resolves to a value of the wrong type,
//! evaluates to `false`, so absent fields fall through to later rules or the
//! Choice `Default`.

use std::cmp::Ordering;

use serde_json::Value;
use waypoint_types::workflow::ChoiceRuleDefinition;

use super::path::JsonPath;

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

/// A compiled choice rule.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `Variable` compared against a literal or another path.
    Compare {
        variable: JsonPath,
        comparison: Comparison,
        operand: Operand,
    },
    /// `StringMatches`: glob over a string `Variable`.
    Matches {
        variable: JsonPath,
        pattern: GlobPattern,
    },
    /// `IsPresent`, `IsNull`, `IsString`, `IsNumeric`, `IsBoolean`.
    TypeTest {
        variable: JsonPath,
        test: TypeTest,
        expected: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

/// Comparison operators that take an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    StringEquals,
    StringLessThan,
    StringGreaterThan,
    StringLessThanEquals,
    StringGreaterThanEquals,
    NumericEquals,
    NumericLessThan,
    NumericGreaterThan,
    NumericLessThanEquals,
    NumericGreaterThanEquals,
    BooleanEquals,
}

const COMPARISONS: &[(&str, Comparison)] = &[
    ("StringEquals", Comparison::StringEquals),
    ("StringLessThan", Comparison::StringLessThan),
    ("StringGreaterThan", Comparison::StringGreaterThan),
    ("StringLessThanEquals", Comparison::StringLessThanEquals),
    ("StringGreaterThanEquals", Comparison::StringGreaterThanEquals),
    ("NumericEquals", Comparison::NumericEquals),
    ("NumericLessThan", Comparison::NumericLessThan),
    ("NumericGreaterThan", Comparison::NumericGreaterThan),
    ("NumericLessThanEquals", Comparison::NumericLessThanEquals),
    ("NumericGreaterThanEquals", Comparison::NumericGreaterThanEquals),
    ("BooleanEquals", Comparison::BooleanEquals),
];

const TYPE_TESTS: &[(&str, TypeTest)] = &[
    ("IsPresent", TypeTest::IsPresent),
    ("IsNull", TypeTest::IsNull),
    ("IsString", TypeTest::IsString),
    ("IsNumeric", TypeTest::IsNumeric),
    ("IsBoolean", TypeTest::IsBoolean),
];

impl Comparison {
    fn is_string(self) -> bool {
        matches!(
            self,
            Comparison::StringEquals
                | Comparison::StringLessThan
                | Comparison::StringGreaterThan
                | Comparison::StringLessThanEquals
                | Comparison::StringGreaterThanEquals
        )
    }

    fn operand_matches(self, value: &Value) -> bool {
        match self {
            Comparison::BooleanEquals => value.is_boolean(),
            _ if self.is_string() => value.is_string(),
            _ => value.is_number(),
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Comparison::StringEquals | Comparison::NumericEquals | Comparison::BooleanEquals => {
                ordering == Ordering::Equal
            }
            Comparison::StringLessThan | Comparison::NumericLessThan => ordering == Ordering::Less,
            Comparison::StringGreaterThan | Comparison::NumericGreaterThan => {
                ordering == Ordering::Greater
            }
            Comparison::StringLessThanEquals | Comparison::NumericLessThanEquals => {
                ordering != Ordering::Greater
            }
            Comparison::StringGreaterThanEquals | Comparison::NumericGreaterThanEquals => {
                ordering != Ordering::Less
            }
        }
    }

    /// Order `actual` against `expected`, or `None` when either side has the
    /// wrong type for this operator.
    fn order(self, actual: &Value, expected: &Value) -> Option<Ordering> {
        match self {
            Comparison::BooleanEquals => {
                let (a, b) = (actual.as_bool()?, expected.as_bool()?);
                Some(if a == b { Ordering::Equal } else { Ordering::Less })
            }
            _ if self.is_string() => Some(actual.as_str()?.cmp(expected.as_str()?)),
            _ => compare_numbers(actual, expected),
        }
    }
}

/// Integers compare exactly; anything involving a float compares as `f64`.
fn compare_numbers(actual: &Value, expected: &Value) -> Option<Ordering> {
    if !actual.is_number() || !expected.is_number() {
        return None;
    }
    match (
        actual.as_i64(),
        expected.as_i64(),
        actual.as_u64(),
        expected.as_u64(),
    ) {
        (Some(a), Some(b), _, _) => Some(a.cmp(&b)),
        (_, _, Some(a), Some(b)) => Some(a.cmp(&b)),
        // A negative integer against one above i64::MAX.
        (Some(_), None, None, Some(_)) => Some(Ordering::Less),
        (None, Some(_), Some(_), None) => Some(Ordering::Greater),
        _ => actual.as_f64()?.partial_cmp(&expected.as_f64()?),
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// From a `...Path` operator: read from the context at evaluation time.
    Path(JsonPath),
}

/// Type-test operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTest {
    IsPresent,
    IsNull,
    IsString,
    IsNumeric,
    IsBoolean,
}

impl Predicate {
    /// Evaluate against a document. Never fails; see the module docs.
    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            Predicate::Compare {
                variable,
                comparison,
                operand,
            } => {
                let Some(actual) = variable.get(document) else {
                    return false;
                };
                let expected = match operand {
                    Operand::Literal(value) => value,
                    Operand::Path(path) => match path.get(document) {
                        Some(value) => value,
                        None => return false,
                    },
                };
                comparison
                    .order(actual, expected)
                    .is_some_and(|ordering| comparison.accepts(ordering))
            }
            Predicate::Matches { variable, pattern } => variable
                .get(document)
                .and_then(Value::as_str)
                .is_some_and(|text| pattern.matches(text)),
            Predicate::TypeTest {
                variable,
                test,
                expected,
            } => {
                let resolved = variable.get(document);
                match (test, resolved) {
                    (TypeTest::IsPresent, found) => found.is_some() == *expected,
                    (_, None) => false,
                    (TypeTest::IsNull, Some(value)) => value.is_null() == *expected,
                    (TypeTest::IsString, Some(value)) => value.is_string() == *expected,
                    (TypeTest::IsNumeric, Some(value)) => value.is_number() == *expected,
                    (TypeTest::IsBoolean, Some(value)) => value.is_boolean() == *expected,
                }
            }
            Predicate::And(rules) => rules.iter().all(|rule| rule.evaluate(document)),
            Predicate::Or(rules) => rules.iter().any(|rule| rule.evaluate(document)),
            Predicate::Not(rule) => !rule.evaluate(document),
        }
    }

    /// Compile a rule definition. `nested` rules (inside `And`/`Or`/`Not`)
    /// must not carry `Next`; the caller handles `Next` for top-level rules.
    pub fn compile(rule: &ChoiceRuleDefinition, nested: bool) -> Result<Self, String> {
        if nested && rule.next.is_some() {
            return Err("nested rules must not have 'Next'".to_string());
        }

        let combinators = [rule.and.is_some(), rule.or.is_some(), rule.not.is_some()]
            .iter()
            .filter(|set| **set)
            .count();

        if combinators > 0 {
            if combinators > 1 || rule.variable.is_some() || !rule.operators.is_empty() {
                return Err(
                    "a rule must use exactly one of And, Or, Not, or Variable with an operator"
                        .to_string(),
                );
            }
            if let Some(rules) = &rule.and {
                return compile_all(rules, "And").map(Predicate::And);
            }
            if let Some(rules) = &rule.or {
                return compile_all(rules, "Or").map(Predicate::Or);
            }
            if let Some(inner) = &rule.not {
                return Predicate::compile(inner, true).map(|p| Predicate::Not(Box::new(p)));
            }
        }

        let variable = rule
            .variable
            .as_deref()
            .ok_or_else(|| "rule has no 'Variable'".to_string())?;
        let variable = JsonPath::parse(variable).map_err(|e| format!("Variable: {e}"))?;

        let mut operators = rule.operators.iter();
        let (name, operand) = match (operators.next(), operators.next()) {
            (Some(op), None) => op,
            (None, _) => return Err("rule has no comparison operator".to_string()),
            (Some(_), Some(_)) => {
                let names: Vec<&str> = rule.operators.keys().map(String::as_str).collect();
                return Err(format!(
                    "rule has more than one operator or unknown field: {}",
                    names.join(", ")
                ));
            }
        };

        compile_operator(variable, name, operand)
    }

    /// Number of leaf comparisons, for diagnostics.
    pub fn leaf_count(&self) -> usize {
        match self {
            Predicate::And(rules) | Predicate::Or(rules) => {
                rules.iter().map(Predicate::leaf_count).sum()
            }
            Predicate::Not(rule) => rule.leaf_count(),
            _ => 1,
        }
    }
}

fn compile_all(rules: &[ChoiceRuleDefinition], combinator: &str) -> Result<Vec<Predicate>, String> {
    if rules.is_empty() {
        return Err(format!("'{combinator}' must contain at least one rule"));
    }
    rules.iter().map(|rule| Predicate::compile(rule, true)).collect()
}

fn compile_operator(variable: JsonPath, name: &str, operand: &Value) -> Result<Predicate, String> {
    if name == "StringMatches" {
        let pattern = operand
            .as_str()
            .ok_or_else(|| "StringMatches requires a string pattern".to_string())?;
        return Ok(Predicate::Matches {
            variable,
            pattern: GlobPattern::parse(pattern)?,
        });
    }

    if let Some(&(_, test)) = TYPE_TESTS.iter().find(|(op, _)| *op == name) {
        let expected = operand
            .as_bool()
            .ok_or_else(|| format!("{name} requires a boolean"))?;
        return Ok(Predicate::TypeTest {
            variable,
            test,
            expected,
        });
    }

    if let Some(&(_, comparison)) = COMPARISONS.iter().find(|(op, _)| *op == name) {
        if !comparison.operand_matches(operand) {
            return Err(format!("{name} operand has the wrong type: {operand}"));
        }
        return Ok(Predicate::Compare {
            variable,
            comparison,
            operand: Operand::Literal(operand.clone()),
        });
    }

    if let Some(base) = name.strip_suffix("Path") {
        if let Some(&(_, comparison)) = COMPARISONS.iter().find(|(op, _)| *op == base) {
            let path = operand
                .as_str()
                .ok_or_else(|| format!("{name} requires a path string"))?;
            let path = JsonPath::parse(path).map_err(|e| format!("{name}: {e}"))?;
            return Ok(Predicate::Compare {
                variable,
                comparison,
                operand: Operand::Path(path),
            });
        }
    }

    Err(format!("unknown comparison operator '{name}'"))
}

// ---------------------------------------------------------------------------
// GlobPattern
// ---------------------------------------------------------------------------

/// A `StringMatches` pattern: `*` matches any run of characters (including
/// none), anchored at both ends. `\*` and `\\` are literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    source: String,
    /// Literal pieces between wildcards; never empty.
    parts: Vec<String>,
}

impl GlobPattern {
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let mut parts = vec![String::new()];
        let mut chars = pattern.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => parts.push(String::new()),
                '\\' => match chars.next() {
                    Some(escaped @ ('*' | '\\')) => push_char(&mut parts, escaped),
                    Some(other) => {
                        return Err(format!(
                            "invalid escape '\\{other}' in pattern '{pattern}'"
                        ));
                    }
                    None => return Err(format!("dangling '\\' in pattern '{pattern}'")),
                },
                other => push_char(&mut parts, other),
            }
        }
        Ok(Self {
            source: pattern.to_string(),
            parts,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, text: &str) -> bool {
        let Some((first, rest)) = self.parts.split_first() else {
            return text.is_empty();
        };
        let Some((last, middle)) = rest.split_last() else {
            return text == first;
        };

        let Some(mut remaining) = text.strip_prefix(first.as_str()) else {
            return false;
        };
        for piece in middle {
            match remaining.find(piece.as_str()) {
                Some(at) => remaining = &remaining[at + piece.len()..],
                None => return false,
            }
        }
        remaining.ends_with(last.as_str())
    }
}

fn push_char(parts: &mut [String], c: char) {
    if let Some(current) = parts.last_mut() {
        current.push(c);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> ChoiceRuleDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn compile(value: Value) -> Predicate {
        Predicate::compile(&rule(value), false).unwrap()
    }

    // -------------------------------------------------------------------
    // Glob matching
    // -------------------------------------------------------------------

    #[test]
    fn test_glob_contains_substring() {
        let glob = GlobPattern::parse("*No gp2 volumes*").unwrap();
        assert!(glob.matches("No gp2 volumes found"));
        assert!(glob.matches("Result: No gp2 volumes found in us-east-1"));
        assert!(glob.matches("No gp2 volumes"));
        assert!(!glob.matches("Converted 3 volumes: vol-1, vol-2, vol-3"));
        assert!(!glob.matches("no gp2 volumes"));
    }

    #[test]
    fn test_glob_is_anchored() {
        let glob = GlobPattern::parse("log-*.txt").unwrap();
        assert!(glob.matches("log-2024.txt"));
        assert!(glob.matches("log-.txt"));
        assert!(!glob.matches("xlog-2024.txt"));
        assert!(!glob.matches("log-2024.txt.bak"));
    }

    #[test]
    fn test_glob_without_wildcard_is_equality() {
        let glob = GlobPattern::parse("exact").unwrap();
        assert!(glob.matches("exact"));
        assert!(!glob.matches("exactly"));
    }

    #[test]
    fn test_glob_middle_pieces_in_order() {
        let glob = GlobPattern::parse("a*b*c").unwrap();
        assert!(glob.matches("abc"));
        assert!(glob.matches("a-b-c"));
        assert!(!glob.matches("a-c-b"));
        // Suffix must not reuse characters consumed by a middle piece.
        let glob = GlobPattern::parse("*ab*b").unwrap();
        assert!(!glob.matches("ab"));
        assert!(glob.matches("abb"));
    }

    #[test]
    fn test_glob_star_alone_matches_everything() {
        let glob = GlobPattern::parse("*").unwrap();
        assert!(glob.matches(""));
        assert!(glob.matches("anything"));
    }

    #[test]
    fn test_glob_escaped_star_is_literal() {
        let glob = GlobPattern::parse(r"*\**").unwrap();
        assert!(glob.matches("a*b"));
        assert!(!glob.matches("ab"));
        assert!(GlobPattern::parse(r"bad\q").is_err());
        assert!(GlobPattern::parse("trailing\\").is_err());
    }

    // -------------------------------------------------------------------
    // Compilation
    // -------------------------------------------------------------------

    #[test]
    fn test_compile_string_matches() {
        let p = compile(json!({ "Variable": "$.body", "StringMatches": "*x*", "Next": "A" }));
        assert!(matches!(p, Predicate::Matches { .. }));
    }

    #[test]
    fn test_compile_path_operand() {
        let p = compile(json!({ "Variable": "$.a", "NumericGreaterThanPath": "$.b" }));
        match p {
            Predicate::Compare {
                comparison,
                operand,
                ..
            } => {
                assert_eq!(comparison, Comparison::NumericGreaterThan);
                assert_eq!(operand, Operand::Path(JsonPath::parse("$.b").unwrap()));
            }
            other => panic!("expected Compare, got {other:?}"),
        }
    }

    #[test]
    fn test_compile_rejects_unknown_operator() {
        let err = Predicate::compile(&rule(json!({ "Variable": "$.a", "Equals": 1 })), false)
            .unwrap_err();
        assert!(err.contains("unknown comparison operator"), "got: {err}");
    }

    #[test]
    fn test_compile_rejects_two_operators() {
        let err = Predicate::compile(
            &rule(json!({ "Variable": "$.a", "StringEquals": "x", "StringMatches": "*" })),
            false,
        )
        .unwrap_err();
        assert!(err.contains("more than one operator"), "got: {err}");
    }

    #[test]
    fn test_compile_rejects_missing_operator_and_variable() {
        let err = Predicate::compile(&rule(json!({ "Variable": "$.a" })), false).unwrap_err();
        assert!(err.contains("no comparison operator"), "got: {err}");
        let err = Predicate::compile(&rule(json!({ "StringEquals": "x" })), false).unwrap_err();
        assert!(err.contains("no 'Variable'"), "got: {err}");
    }

    #[test]
    fn test_compile_rejects_wrong_operand_type() {
        let err = Predicate::compile(
            &rule(json!({ "Variable": "$.a", "NumericEquals": "3" })),
            false,
        )
        .unwrap_err();
        assert!(err.contains("wrong type"), "got: {err}");
    }

    #[test]
    fn test_compile_rejects_next_in_nested_rule() {
        let err = Predicate::compile(
            &rule(json!({
                "Not": { "Variable": "$.a", "IsPresent": true, "Next": "X" },
                "Next": "Y"
            })),
            false,
        )
        .unwrap_err();
        assert!(err.contains("nested rules"), "got: {err}");
    }

    #[test]
    fn test_compile_rejects_empty_and() {
        let err = Predicate::compile(&rule(json!({ "And": [], "Next": "A" })), false).unwrap_err();
        assert!(err.contains("at least one rule"), "got: {err}");
    }

    // -------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------

    #[test]
    fn test_missing_variable_is_false() {
        let doc = json!({ "other": 1 });
        let rules = [
            json!({ "Variable": "$.LambdaResult.body", "StringMatches": "*No gp2 volumes*" }),
            json!({ "Variable": "$.missing", "StringEquals": "x" }),
            json!({ "Variable": "$.missing", "NumericLessThan": 10 }),
            json!({ "Variable": "$.missing", "BooleanEquals": false }),
            json!({ "Variable": "$.missing", "IsNull": false }),
            json!({ "Variable": "$.other", "NumericEqualsPath": "$.missing" }),
        ];
        for r in rules {
            assert!(!compile(r.clone()).evaluate(&doc), "{r} should be false");
        }
    }

    #[test]
    fn test_is_present_false_on_missing_is_true() {
        let doc = json!({});
        let p = compile(json!({ "Variable": "$.a", "IsPresent": false }));
        assert!(p.evaluate(&doc));
    }

    #[test]
    fn test_wrong_type_is_false() {
        let doc = json!({ "count": "3", "name": 7 });
        assert!(!compile(json!({ "Variable": "$.count", "NumericEquals": 3 })).evaluate(&doc));
        assert!(!compile(json!({ "Variable": "$.name", "StringMatches": "*" })).evaluate(&doc));
    }

    #[test]
    fn test_numeric_comparisons() {
        let doc = json!({ "n": 5, "limit": 5.0 });
        let check = |op: &str, operand: Value| {
            let mut r = serde_json::Map::new();
            r.insert("Variable".to_string(), json!("$.n"));
            r.insert(op.to_string(), operand);
            compile(Value::Object(r)).evaluate(&doc)
        };
        assert!(check("NumericEquals", json!(5)));
        assert!(check("NumericGreaterThan", json!(4)));
        assert!(!check("NumericGreaterThan", json!(5)));
        assert!(check("NumericLessThan", json!(5.5)));
        assert!(check("NumericLessThanEquals", json!(5)));
        assert!(check("NumericGreaterThanEquals", json!(5)));
        assert!(check("NumericEqualsPath", json!("$.limit")));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let doc = json!({ "big": 9_007_199_254_740_993_u64, "huge": u64::MAX, "neg": -1 });
        let check = |variable: &str, op: &str, operand: Value| {
            let mut r = serde_json::Map::new();
            r.insert("Variable".to_string(), json!(variable));
            r.insert(op.to_string(), operand);
            compile(Value::Object(r)).evaluate(&doc)
        };
        assert!(!check("$.big", "NumericEquals", json!(9_007_199_254_740_992_u64)));
        assert!(check("$.big", "NumericGreaterThan", json!(9_007_199_254_740_992_u64)));
        assert!(check("$.big", "NumericEquals", json!(9_007_199_254_740_993_u64)));
        assert!(check("$.huge", "NumericGreaterThan", json!(-1)));
        assert!(check("$.neg", "NumericLessThanPath", json!("$.huge")));
        assert!(check("$.big", "NumericLessThan", json!(1e300)));
    }

    #[test]
    fn test_string_and_boolean_comparisons() {
        let doc = json!({ "s": "beta", "flag": true });
        assert!(compile(json!({ "Variable": "$.s", "StringEquals": "beta" })).evaluate(&doc));
        assert!(compile(json!({ "Variable": "$.s", "StringGreaterThan": "alpha" })).evaluate(&doc));
        assert!(compile(json!({ "Variable": "$.s", "StringLessThanEquals": "beta" })).evaluate(&doc));
        assert!(compile(json!({ "Variable": "$.flag", "BooleanEquals": true })).evaluate(&doc));
        assert!(!compile(json!({ "Variable": "$.flag", "BooleanEquals": false })).evaluate(&doc));
    }

    #[test]
    fn test_combinators() {
        let doc = json!({ "count": 3, "status": "active" });
        let p = compile(json!({
            "And": [
                { "Variable": "$.count", "NumericGreaterThan": 0 },
                { "Not": { "Variable": "$.status", "StringEquals": "skipped" } }
            ]
        }));
        assert!(p.evaluate(&doc));
        assert_eq!(p.leaf_count(), 2);

        let p = compile(json!({
            "Or": [
                { "Variable": "$.missing", "IsPresent": true },
                { "Variable": "$.status", "StringMatches": "act*" }
            ]
        }));
        assert!(p.evaluate(&doc));
    }

    #[test]
    fn test_not_over_missing_path_is_true() {
        let p = compile(json!({ "Not": { "Variable": "$.missing", "StringEquals": "x" } }));
        assert!(p.evaluate(&json!({})));
    }
}
