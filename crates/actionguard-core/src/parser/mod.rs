pub mod action;
pub mod extract;
pub mod workflow;

pub use action::{parse_action, ActionDescriptor, ActionInput, ActionRuns, RunsUsing};
pub use extract::{extract_action_dependencies, extract_actions, is_action_reference, is_remote_action, walk_uses};
pub use workflow::{
    parse_workflow, JobSpec, Permissions, StepSpec, TriggerEvent, Triggers, WorkflowDescriptor,
};

use crate::error::ParseError;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Parse YAML text into a generic value, classifying syntax errors.
pub(crate) fn load_yaml(content: &str) -> Result<Value, ParseError> {
    serde_yaml::from_str(content).map_err(|e| ParseError::Yaml(e.to_string()))
}

/// Render a scalar the way it appears in a workflow; nested structures are
/// re-serialised so pattern rules can still see their text.
pub(crate) fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

pub(crate) fn get_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub(crate) fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if let Some(mapping) = value.and_then(|v| v.as_mapping()) {
        for (k, v) in mapping {
            if let Some(key) = k.as_str() {
                map.insert(key.to_string(), scalar_to_string(v));
            }
        }
    }
    map
}

/// `true`, `"true"`; expressions and everything else count as false.
pub(crate) fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
