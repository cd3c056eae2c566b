use super::workflow::StepSpec;
use super::{get_str, load_yaml, scalar_to_string, string_map, truthy};
use crate::error::ParseError;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// `runs.using` of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunsUsing {
    Composite,
    Docker,
    /// `node12`, `node16`, `node20`, ...
    Node(String),
    #[default]
    Unknown,
    Other(String),
}

impl RunsUsing {
    fn parse(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            None | Some("") => RunsUsing::Unknown,
            Some("composite") => RunsUsing::Composite,
            Some("docker") => RunsUsing::Docker,
            Some(node) if node.starts_with("node") => RunsUsing::Node(node.to_string()),
            Some(other) => RunsUsing::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunsUsing::Composite => "composite",
            RunsUsing::Docker => "docker",
            RunsUsing::Node(version) => version,
            RunsUsing::Unknown => "unknown",
            RunsUsing::Other(other) => other,
        }
    }

    pub fn is_javascript(&self) -> bool {
        matches!(self, RunsUsing::Node(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionInput {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionRuns {
    pub using: RunsUsing,
    pub steps: Vec<StepSpec>,
    pub image: Option<String>,
    pub main: Option<String>,
    pub pre: Option<String>,
    pub post: Option<String>,
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Parsed `action.yml`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionDescriptor {
    pub name: Option<String>,
    pub description: Option<String>,
    pub inputs: Vec<ActionInput>,
    pub runs: ActionRuns,
    pub raw: Value,
}

impl ActionDescriptor {
    pub fn is_composite(&self) -> bool {
        self.runs.using == RunsUsing::Composite
    }

    pub fn is_docker(&self) -> bool {
        self.runs.using == RunsUsing::Docker
    }

    /// `runs.image` refers to a Dockerfile in the action repository rather
    /// than a registry image.
    pub fn dockerfile_path(&self) -> Option<&str> {
        let image = self.runs.image.as_deref()?.trim();
        if image.is_empty() || image.starts_with("docker://") || image.contains(':') {
            return None;
        }
        Some(image)
    }
}

pub fn parse_action(content: &str) -> Result<ActionDescriptor, ParseError> {
    let yaml = load_yaml(content)?;
    if !yaml.is_mapping() {
        return Ok(ActionDescriptor::default());
    }

    let inputs = yaml
        .get("inputs")
        .and_then(|v| v.as_mapping())
        .map(|inputs| {
            inputs
                .iter()
                .filter_map(|(name, spec)| {
                    Some(ActionInput {
                        name: name.as_str()?.to_string(),
                        description: get_str(spec, "description"),
                        required: truthy(spec.get("required")),
                        default: spec.get("default").map(scalar_to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let runs_value = yaml.get("runs").cloned().unwrap_or(Value::Null);
    let steps = runs_value
        .get("steps")
        .and_then(|v| v.as_sequence())
        .map(|seq| {
            seq.iter()
                .enumerate()
                .map(|(i, step)| StepSpec::parse(i, step))
                .collect()
        })
        .unwrap_or_default();

    let args = match runs_value.get("args") {
        Some(Value::Sequence(seq)) => seq.iter().map(scalar_to_string).collect(),
        Some(other) => vec![scalar_to_string(other)],
        None => Vec::new(),
    };

    let runs = ActionRuns {
        using: RunsUsing::parse(get_str(&runs_value, "using")),
        steps,
        image: get_str(&runs_value, "image"),
        main: get_str(&runs_value, "main"),
        pre: get_str(&runs_value, "pre"),
        post: get_str(&runs_value, "post"),
        entrypoint: get_str(&runs_value, "entrypoint"),
        args,
        env: string_map(runs_value.get("env")),
    };

    Ok(ActionDescriptor {
        name: get_str(&yaml, "name"),
        description: get_str(&yaml, "description"),
        inputs,
        runs,
        raw: yaml,
    })
}
