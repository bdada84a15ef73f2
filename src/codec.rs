//! Action codec.
//!
//! Planner output, opaque execution results and captured page events all
//! arrive as loosely shaped JSON. Everything is normalized here into
//! [`ActionRecord`] and [`ActResult`] so the engine and store never branch
//! on raw shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("action is not a JSON object")]
    NotAnObject,

    #[error("action has no selector")]
    MissingSelector,

    #[error("unknown action method '{0}'")]
    UnknownMethod(String),
}

/// Replay method of an [`ActionRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionMethod {
    Click,
    Fill,
    Type,
    #[serde(alias = "selectOption", alias = "selectOptionFromDropdown")]
    Select,
    Check,
    Uncheck,
    Hover,
    Press,
}

impl ActionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionMethod::Click => "click",
            ActionMethod::Fill => "fill",
            ActionMethod::Type => "type",
            ActionMethod::Select => "select",
            ActionMethod::Check => "check",
            ActionMethod::Uncheck => "uncheck",
            ActionMethod::Hover => "hover",
            ActionMethod::Press => "press",
        }
    }

    /// Parse a method name, accepting the spellings planners and capture scripts emit
    pub fn parse(name: &str) -> CodecResult<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "click" | "tap" => Ok(ActionMethod::Click),
            "fill" | "input" | "settext" => Ok(ActionMethod::Fill),
            "type" | "typetext" => Ok(ActionMethod::Type),
            "select" | "selectoption" | "selectoptionfromdropdown" | "change" => {
                Ok(ActionMethod::Select)
            }
            "check" => Ok(ActionMethod::Check),
            "uncheck" => Ok(ActionMethod::Uncheck),
            "hover" => Ok(ActionMethod::Hover),
            "press" | "keypress" | "presskey" => Ok(ActionMethod::Press),
            _ => Err(CodecError::UnknownMethod(name.to_string())),
        }
    }
}

impl std::fmt::Display for ActionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic, selector-addressed, replayable browser operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub selector: String,
    #[serde(default)]
    pub description: String,
    pub method: ActionMethod,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl ActionRecord {
    pub fn new(selector: impl Into<String>, method: ActionMethod) -> Self {
        Self {
            selector: selector.into(),
            description: String::new(),
            method,
            arguments: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// One-line form used in case logs
    pub fn summary(&self) -> String {
        if self.arguments.is_empty() {
            format!("{} {}", self.method, self.selector)
        } else {
            format!("{} {} {:?}", self.method, self.selector, self.arguments)
        }
    }
}

/// Canonical step execution result, also the persisted per-step wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub action_description: String,
    #[serde(default)]
    pub actions: Vec<ActionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load_wait_attempted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_load_wait_timed_out: Option<bool>,
}

/// Normalized planner response
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerOutput {
    /// Selector-addressed candidates, executed like a replay
    Actions(Vec<ActionRecord>),
    /// Anything else; the step falls back to opaque execution
    Opaque(Value),
}

impl PlannerOutput {
    pub fn is_empty(&self) -> bool {
        matches!(self, PlannerOutput::Actions(actions) if actions.is_empty())
    }
}

/// Normalize whatever a planner returned into a [`PlannerOutput`].
///
/// Accepts a bare array of actions, an object carrying an `actions` array, or
/// a single action object. If any entry cannot be decoded the raw value is
/// kept as opaque, so a partial plan is never executed or cached.
pub fn normalize_planner_output(raw: &Value) -> PlannerOutput {
    let candidates: Option<&Vec<Value>> = match raw {
        Value::Array(items) => Some(items),
        Value::Object(map) => match map.get("actions") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    };

    if let Some(items) = candidates {
        // One undecodable candidate makes the whole plan untrustworthy
        return match items.iter().map(parse_action).collect::<CodecResult<Vec<_>>>() {
            Ok(actions) => PlannerOutput::Actions(actions),
            Err(e) => {
                tracing::debug!("planner candidates not executable as given: {}", e);
                PlannerOutput::Opaque(raw.clone())
            }
        };
    }

    if raw.get("selector").is_some() || raw.get("xpath").is_some() {
        if let Ok(action) = parse_action(raw) {
            return PlannerOutput::Actions(vec![action]);
        }
    }

    PlannerOutput::Opaque(raw.clone())
}

/// Decode one action from any of the supported shapes
pub fn parse_action(raw: &Value) -> CodecResult<ActionRecord> {
    let map = raw.as_object().ok_or(CodecError::NotAnObject)?;

    let selector = first_str(map, &["selector", "xpath", "locator"])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CodecError::MissingSelector)?;

    let method_name = first_str(map, &["method", "action", "type"]).unwrap_or("click");
    let method = ActionMethod::parse(method_name)?;

    let description = first_str(map, &["description", "desc", "label"])
        .unwrap_or_default()
        .to_string();

    let arguments = ["arguments", "args", "value", "key"]
        .iter()
        .find_map(|key| map.get(*key))
        .map(value_to_arguments)
        .unwrap_or_default();

    Ok(ActionRecord {
        selector: selector.to_string(),
        description,
        method,
        arguments,
    })
}

/// Normalize the result of an opaque natural-language execution call
pub fn normalize_act_result(raw: &Value, instruction: &str) -> ActResult {
    let Some(map) = raw.as_object() else {
        return ActResult {
            success: !raw.is_null() && raw != &Value::Bool(false),
            message: value_to_string(raw),
            action_description: instruction.to_string(),
            ..Default::default()
        };
    };

    let success = map.get("success").and_then(Value::as_bool).unwrap_or(true);
    let message = first_str(map, &["message", "error"])
        .unwrap_or_default()
        .to_string();
    let action_description = first_str(map, &["actionDescription", "action", "description"])
        .unwrap_or(instruction)
        .to_string();
    let actions = match normalize_planner_output(raw) {
        PlannerOutput::Actions(actions) => actions,
        PlannerOutput::Opaque(_) => Vec::new(),
    };

    ActResult {
        success,
        message,
        action_description,
        actions,
        ..Default::default()
    }
}

fn first_str<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_str))
}

fn value_to_arguments(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        other => vec![value_to_string(other)],
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_aliases() {
        assert_eq!(ActionMethod::parse("selectOption").unwrap(), ActionMethod::Select);
        assert_eq!(ActionMethod::parse("select_option").unwrap(), ActionMethod::Select);
        assert_eq!(ActionMethod::parse("Press").unwrap(), ActionMethod::Press);
        assert_eq!(ActionMethod::parse("input").unwrap(), ActionMethod::Fill);
        assert!(matches!(
            ActionMethod::parse("teleport"),
            Err(CodecError::UnknownMethod(_))
        ));
        // a double click is not a click; left to direct execution
        assert!(matches!(
            ActionMethod::parse("dblclick"),
            Err(CodecError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_normalize_bare_array() {
        let raw = json!([
            {"selector": "#user", "method": "fill", "arguments": ["a"], "description": "username"},
            {"selector": "#go", "method": "click"}
        ]);
        let PlannerOutput::Actions(actions) = normalize_planner_output(&raw) else {
            panic!("expected actions");
        };
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].arguments, vec!["a".to_string()]);
        assert_eq!(actions[1].method, ActionMethod::Click);
    }

    #[test]
    fn test_normalize_object_with_actions_and_scalar_value() {
        let raw = json!({
            "success": true,
            "actions": [{"xpath": "/html/body/input[1]", "action": "type", "value": 42}]
        });
        let PlannerOutput::Actions(actions) = normalize_planner_output(&raw) else {
            panic!("expected actions");
        };
        assert_eq!(actions[0].selector, "/html/body/input[1]");
        assert_eq!(actions[0].method, ActionMethod::Type);
        assert_eq!(actions[0].arguments, vec!["42".to_string()]);
    }

    #[test]
    fn test_normalize_opaque_and_empty() {
        assert!(matches!(
            normalize_planner_output(&json!("done")),
            PlannerOutput::Opaque(_)
        ));
        assert!(normalize_planner_output(&json!([])).is_empty());
        // every candidate undecodable -> opaque, not an empty plan
        assert!(matches!(
            normalize_planner_output(&json!([{"method": "click"}])),
            PlannerOutput::Opaque(_)
        ));
    }

    #[test]
    fn test_partly_undecodable_plan_is_opaque() {
        let raw = json!([
            {"selector": "#username", "method": "fill", "arguments": ["alice"]},
            {"selector": "#login", "method": "doubleTapSubmit"}
        ]);
        assert_eq!(normalize_planner_output(&raw), PlannerOutput::Opaque(raw.clone()));

        let wrapped = json!({"actions": [{"selector": "#go"}, {"description": "no selector"}]});
        assert!(matches!(
            normalize_planner_output(&wrapped),
            PlannerOutput::Opaque(_)
        ));
    }

    #[test]
    fn test_normalize_act_result_shapes() {
        let result = normalize_act_result(
            &json!({"success": false, "message": "no such element", "action": "click login"}),
            "click login",
        );
        assert!(!result.success);
        assert_eq!(result.message, "no such element");
        assert_eq!(result.action_description, "click login");

        let result = normalize_act_result(&json!("clicked"), "click login");
        assert!(result.success);
        assert_eq!(result.message, "clicked");
        assert!(result.actions.is_empty());
    }

    #[test]
    fn test_act_result_wire_names() {
        let result = ActResult {
            success: true,
            page_load_wait_attempted: Some(true),
            ..Default::default()
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["pageLoadWaitAttempted"], json!(true));
        assert!(value.get("pageLoadWaitTimedOut").is_none());
        assert_eq!(value["actionDescription"], json!(""));
    }
}
