//! State-machine definition wire format.
//!
//! These types mirror the JSON/YAML document a workflow author writes
//! (`StartAt`, `States`, per-state `Type`). They are deliberately loose:
//! structural rules such as "exactly one of `Next` or `End`" and referential
//! integrity are enforced when the definition is compiled by
//! `waypoint-core`, so that errors can name the offending state.

use std::collections::BTreeMap;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete state-machine definition as written by the author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Name of the first state to execute.
    pub start_at: String,
    /// States keyed by name. A name declared twice is a decode error.
    #[serde(deserialize_with = "unique_states")]
    pub states: BTreeMap<String, StateDefinition>,
    /// Deadline for the whole execution, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Author-supplied version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A single state, internally tagged by `Type`.
///
/// ```json
/// { "Type": "Pass", "Result": "done", "End": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum StateDefinition {
    /// Invoke an external resource.
    Task(TaskDefinition),
    /// Branch on the execution context.
    Choice(ChoiceDefinition),
    /// Write a constant (or pass the context through).
    Pass(PassDefinition),
}

impl StateDefinition {
    /// The `Type` tag as written in the definition.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateDefinition::Task(_) => "Task",
            StateDefinition::Choice(_) => "Choice",
            StateDefinition::Pass(_) => "Pass",
        }
    }
}

/// `Type: Task` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Opaque identifier routed to a task invoker.
    pub resource: String,
    /// Input template. Keys ending in `.$` hold context paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
    /// Selects the task input when no `Parameters` are given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    /// Where the result is written. Absent means `$`, `null` discards.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    /// Per-task deadline in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Captured only so the compiler can reject it; retries are configured
    /// per invoker route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Value>,
    /// Captured only so the compiler can reject it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

/// `Type: Pass` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PassDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Constant to write. Absent passes the context through; `null` is a
    /// literal null.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Where the result is written. Absent means `$`, `null` discards.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
}

/// `Type: Choice` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Rules evaluated in declaration order.
    #[serde(default)]
    pub choices: Vec<ChoiceRuleDefinition>,
    /// Target when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// One choice rule: either `Variable` plus a single comparison operator, or
/// a boolean combinator (`And`, `Or`, `Not`). Only top-level rules carry
/// `Next`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRuleDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<ChoiceRuleDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<ChoiceRuleDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ChoiceRuleDefinition>>,
    /// Comparison operators (`StringMatches`, `NumericGreaterThan`, ...)
    /// and any unrecognized keys, checked at compile time.
    #[serde(flatten)]
    pub operators: BTreeMap<String, Value>,
}

/// Keeps an explicit `null` distinguishable from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Decode `States`, failing on a repeated state name instead of letting the
/// last body win.
fn unique_states<'de, D>(deserializer: D) -> Result<BTreeMap<String, StateDefinition>, D::Error>
where
    D: Deserializer<'de>,
{
    struct UniqueStates;

    impl<'de> Visitor<'de> for UniqueStates {
        type Value = BTreeMap<String, StateDefinition>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a map of state names to states")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut states = BTreeMap::new();
            while let Some(name) = map.next_key::<String>()? {
                if states.contains_key(&name) {
                    return Err(de::Error::custom(format!("duplicate state name '{name}'")));
                }
                let state = map.next_value::<StateDefinition>()?;
                states.insert(name, state);
            }
            Ok(states)
        }
    }

    deserializer.deserialize_map(UniqueStates)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EBS_WORKFLOW: &str = r#"{
      "Comment": "EBS Volume Conversion Workflow",
      "StartAt": "InvokeEBSConversionLambda",
      "States": {
        "InvokeEBSConversionLambda": {
          "Type": "Task",
          "Resource": "arn:aws:lambda:us-east-1:123456789012:function:ConvertEBSVolume",
          "ResultPath": "$.LambdaResult",
          "Next": "CheckVolumes"
        },
        "CheckVolumes": {
          "Type": "Choice",
          "Choices": [
            {
              "Variable": "$.LambdaResult.body",
              "StringMatches": "*No gp2 volumes*",
              "Next": "NoVolumesFound"
            }
          ],
          "Default": "SendNotification"
        },
        "NoVolumesFound": {
          "Type": "Pass",
          "Result": "No gp2 volumes found. Skipping SNS.",
          "End": true
        },
        "SendNotification": {
          "Type": "Task",
          "Resource": "arn:aws:states:::sns:publish",
          "Parameters": {
            "TopicArn": "arn:aws:sns:us-east-1:123456789012:EBSVolumeConverted",
            "Message.$": "$.LambdaResult.body",
            "Subject": "EBS Volume Conversion Notification"
          },
          "ResultPath": "$.SNSResult",
          "End": true
        }
      }
    }"#;

    #[test]
    fn test_parse_ebs_workflow() {
        let def: WorkflowDefinition = serde_json::from_str(EBS_WORKFLOW).unwrap();
        assert_eq!(def.start_at, "InvokeEBSConversionLambda");
        assert_eq!(def.states.len(), 4);

        match &def.states["InvokeEBSConversionLambda"] {
            StateDefinition::Task(task) => {
                assert_eq!(task.result_path, Some(Some("$.LambdaResult".to_string())));
                assert_eq!(task.next.as_deref(), Some("CheckVolumes"));
                assert!(task.parameters.is_none());
            }
            other => panic!("expected Task, got {other:?}"),
        }

        match &def.states["CheckVolumes"] {
            StateDefinition::Choice(choice) => {
                assert_eq!(choice.choices.len(), 1);
                let rule = &choice.choices[0];
                assert_eq!(rule.variable.as_deref(), Some("$.LambdaResult.body"));
                assert_eq!(rule.next.as_deref(), Some("NoVolumesFound"));
                assert_eq!(
                    rule.operators.get("StringMatches"),
                    Some(&json!("*No gp2 volumes*"))
                );
                assert_eq!(choice.default.as_deref(), Some("SendNotification"));
            }
            other => panic!("expected Choice, got {other:?}"),
        }

        match &def.states["NoVolumesFound"] {
            StateDefinition::Pass(pass) => {
                assert_eq!(pass.result, Some(json!("No gp2 volumes found. Skipping SNS.")));
                assert_eq!(pass.result_path, None);
                assert_eq!(pass.end, Some(true));
            }
            other => panic!("expected Pass, got {other:?}"),
        }
    }

    #[test]
    fn test_result_path_null_is_distinct_from_absent() {
        let task: StateDefinition = serde_json::from_value(json!({
            "Type": "Task",
            "Resource": "r",
            "ResultPath": null,
            "End": true
        }))
        .unwrap();
        match task {
            StateDefinition::Task(t) => assert_eq!(t.result_path, Some(None)),
            other => panic!("expected Task, got {other:?}"),
        }
    }

    #[test]
    fn test_pass_result_null_is_literal() {
        let pass: StateDefinition = serde_json::from_value(json!({
            "Type": "Pass",
            "Result": null,
            "End": true
        }))
        .unwrap();
        match pass {
            StateDefinition::Pass(p) => assert_eq!(p.result, Some(Value::Null)),
            other => panic!("expected Pass, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_state_type_rejected() {
        let result: Result<StateDefinition, _> = serde_json::from_value(json!({
            "Type": "Parallel",
            "Branches": []
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_state_name_rejected() {
        let result: Result<WorkflowDefinition, _> = serde_json::from_str(
            r#"{
                "StartAt": "A",
                "States": {
                    "A": { "Type": "Pass", "End": true },
                    "B": { "Type": "Pass", "End": true },
                    "A": { "Type": "Pass", "Result": 1, "End": true }
                }
            }"#,
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate state name 'A'"), "got: {err}");
    }

    #[test]
    fn test_nested_choice_rules() {
        let rule: ChoiceRuleDefinition = serde_json::from_value(json!({
            "And": [
                { "Variable": "$.count", "NumericGreaterThan": 0 },
                { "Not": { "Variable": "$.status", "StringEquals": "skipped" } }
            ],
            "Next": "Work"
        }))
        .unwrap();
        let and = rule.and.as_ref().unwrap();
        assert_eq!(and.len(), 2);
        assert!(and[1].not.is_some());
        assert!(rule.operators.is_empty());
    }

    #[test]
    fn test_yaml_definition() {
        let yaml = r#"
StartAt: Hello
States:
  Hello:
    Type: Pass
    Result:
      greeting: hi
    ResultPath: $.out
    End: true
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.start_at, "Hello");
        assert_eq!(def.states["Hello"].type_name(), "Pass");
    }

    #[test]
    fn test_serde_roundtrip_preserves_null_result_path() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "StartAt": "A",
            "States": {
                "A": { "Type": "Task", "Resource": "r", "ResultPath": null, "End": true }
            }
        }))
        .unwrap();
        let text = serde_json::to_string(&def).unwrap();
        let parsed: WorkflowDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, def);
    }
}
