use super::{get_str, load_yaml, scalar_to_string, string_map, truthy};
use crate::error::ParseError;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// A trigger event and whatever configuration followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub name: String,
    pub config: Value,
}

/// The `on:` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triggers {
    pub events: Vec<TriggerEvent>,
}

impl Triggers {
    fn parse(on: Option<&Value>) -> Self {
        let mut events = Vec::new();
        match on {
            Some(Value::String(event)) => events.push(TriggerEvent {
                name: event.clone(),
                config: Value::Null,
            }),
            Some(Value::Sequence(seq)) => {
                for event in seq {
                    if let Some(name) = event.as_str() {
                        events.push(TriggerEvent {
                            name: name.to_string(),
                            config: Value::Null,
                        });
                    }
                }
            }
            Some(Value::Mapping(map)) => {
                for (event, config) in map {
                    if let Some(name) = event.as_str() {
                        events.push(TriggerEvent {
                            name: name.to_string(),
                            config: config.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
        Self { events }
    }

    pub fn has(&self, event: &str) -> bool {
        self.events.iter().any(|e| e.name == event)
    }

    pub fn names(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn is_pull_request_triggered(&self) -> bool {
        self.has("pull_request") || self.has("pull_request_target")
    }

    pub fn is_issue_triggered(&self) -> bool {
        self.has("issues") || self.has("issue_comment")
    }
}

/// `permissions:` at workflow or job level.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Permissions {
    #[default]
    Unset,
    WriteAll,
    ReadAll,
    Scopes(BTreeMap<String, String>),
    /// A string that is neither `write-all` nor `read-all`.
    Other(String),
}

impl Permissions {
    fn parse(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Permissions::Unset,
            Some(Value::String(s)) => match s.trim() {
                "write-all" => Permissions::WriteAll,
                "read-all" => Permissions::ReadAll,
                other => Permissions::Other(other.to_string()),
            },
            Some(Value::Mapping(map)) => {
                let scopes = map
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_to_string(v))))
                    .collect();
                Permissions::Scopes(scopes)
            }
            Some(other) => Permissions::Other(scalar_to_string(other)),
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Permissions::Unset)
    }

    /// Literal `write-all`, or a non-empty mapping where every scope is `write`.
    pub fn is_write_all(&self) -> bool {
        match self {
            Permissions::WriteAll => true,
            Permissions::Scopes(scopes) => {
                !scopes.is_empty() && scopes.values().all(|v| v == "write")
            }
            _ => false,
        }
    }

    pub fn grants_write(&self, scope: &str) -> bool {
        match self {
            Permissions::WriteAll => true,
            Permissions::Scopes(scopes) => scopes.get(scope).is_some_and(|v| v == "write"),
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Permissions::Unset => "unset".to_string(),
            Permissions::WriteAll => "write-all".to_string(),
            Permissions::ReadAll => "read-all".to_string(),
            Permissions::Scopes(scopes) => scopes
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", "),
            Permissions::Other(s) => s.clone(),
        }
    }
}

/// One entry under `steps:`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepSpec {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub uses: Option<String>,
    pub run: Option<String>,
    pub shell: Option<String>,
    pub with: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub continue_on_error: bool,
    pub condition: Option<String>,
}

impl StepSpec {
    pub(crate) fn parse(index: usize, step: &Value) -> Self {
        Self {
            index,
            id: get_str(step, "id"),
            name: get_str(step, "name"),
            uses: get_str(step, "uses"),
            run: step.get("run").map(scalar_to_string),
            shell: get_str(step, "shell"),
            with: string_map(step.get("with")),
            env: string_map(step.get("env")),
            continue_on_error: truthy(step.get("continue-on-error")),
            condition: step.get("if").map(scalar_to_string),
        }
    }

    /// Human-readable label used in evidence.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return uses.clone();
        }
        if let Some(run) = &self.run {
            let first = run.lines().next().unwrap_or_default().trim();
            if !first.is_empty() {
                return first.chars().take(60).collect();
            }
        }
        format!("step {}", self.index + 1)
    }

    /// The action name this step uses, without version, lowercased.
    pub fn action_name(&self) -> Option<String> {
        self.uses
            .as_deref()
            .map(|u| crate::action_ref::name_without_version(u).to_lowercase())
    }

    pub fn uses_action(&self, name: &str) -> bool {
        self.action_name().is_some_and(|n| n == name)
    }

    pub fn is_powershell(&self) -> bool {
        self.shell
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("pwsh") || s.eq_ignore_ascii_case("powershell"))
    }

    /// `with`, `env`, and `run` concatenated; used by text-pattern rules.
    pub fn text(&self) -> String {
        let mut text = String::new();
        if let Some(run) = &self.run {
            text.push_str(run);
            text.push('\n');
        }
        for (k, v) in self.with.iter().chain(self.env.iter()) {
            text.push_str(k);
            text.push_str(": ");
            text.push_str(v);
            text.push('\n');
        }
        text
    }
}

/// One entry under `jobs:`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSpec {
    pub id: String,
    pub name: Option<String>,
    pub runs_on: Vec<String>,
    pub permissions: Permissions,
    pub environment: Option<String>,
    pub continue_on_error: bool,
    pub matrix: Option<Value>,
    pub steps: Vec<StepSpec>,
    /// Reusable workflow call (`jobs.<id>.uses`).
    pub uses: Option<String>,
    pub with: BTreeMap<String, String>,
    pub secrets_inherit: bool,
    pub env: BTreeMap<String, String>,
    pub condition: Option<String>,
    pub timeout_minutes: Option<u64>,
    pub raw: Value,
}

impl JobSpec {
    fn parse(id: &str, config: &Value) -> Self {
        let steps = config
            .get("steps")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .enumerate()
                    .map(|(i, step)| StepSpec::parse(i, step))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: id.to_string(),
            name: get_str(config, "name"),
            runs_on: parse_runs_on(config.get("runs-on")),
            permissions: Permissions::parse(config.get("permissions")),
            environment: parse_environment(config.get("environment")),
            continue_on_error: truthy(config.get("continue-on-error")),
            matrix: config
                .get("strategy")
                .and_then(|s| s.get("matrix"))
                .cloned(),
            steps,
            uses: get_str(config, "uses"),
            with: string_map(config.get("with")),
            secrets_inherit: config
                .get("secrets")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.trim() == "inherit"),
            env: string_map(config.get("env")),
            condition: config.get("if").map(scalar_to_string),
            timeout_minutes: config.get("timeout-minutes").and_then(|v| v.as_u64()),
            raw: config.clone(),
        }
    }

    pub fn is_self_hosted(&self) -> bool {
        self.runs_on
            .iter()
            .any(|label| label.to_lowercase().contains("self-hosted"))
    }

    /// Every `run:` script in the job, paired with its step.
    pub fn run_steps(&self) -> impl Iterator<Item = (&StepSpec, &str)> {
        self.steps
            .iter()
            .filter_map(|s| s.run.as_deref().map(|run| (s, run)))
    }

    /// Serialised job body, for substring scans that must see every field.
    pub fn text(&self) -> String {
        serde_yaml::to_string(&self.raw).unwrap_or_default()
    }
}

fn parse_runs_on(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Sequence(seq)) => seq.iter().map(scalar_to_string).collect(),
        Some(Value::Mapping(_)) => {
            let mut labels = Vec::new();
            if let Some(v) = value.and_then(|v| v.get("group")) {
                labels.push(scalar_to_string(v));
            }
            labels.extend(parse_runs_on(value.and_then(|v| v.get("labels"))));
            labels
        }
        Some(other @ Value::Tagged(_)) => vec![scalar_to_string(other)],
        _ => Vec::new(),
    }
}

fn parse_environment(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Mapping(_) => value.and_then(|v| get_str(v, "name")),
        Value::Null => None,
        other => Some(scalar_to_string(other)),
    }
}

/// Structured form of a workflow file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowDescriptor {
    pub name: Option<String>,
    pub on: Triggers,
    pub permissions: Permissions,
    pub env: BTreeMap<String, String>,
    pub jobs: Vec<JobSpec>,
    pub raw: Value,
}

impl WorkflowDescriptor {
    /// False when both `on` and `jobs` are absent.
    pub fn is_workflow(&self) -> bool {
        self.raw.get("on").is_some() || self.raw.get("jobs").is_some()
    }

    pub fn job(&self, id: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Every step across every job.
    pub fn steps(&self) -> impl Iterator<Item = (&JobSpec, &StepSpec)> {
        self.jobs
            .iter()
            .flat_map(|job| job.steps.iter().map(move |step| (job, step)))
    }

    /// Distinct action references used anywhere in the workflow.
    pub fn actions(&self) -> Vec<String> {
        super::extract_actions(&self.raw)
    }

    /// Job permissions, falling back to the workflow-level block.
    pub fn effective_permissions<'a>(&'a self, job: &'a JobSpec) -> &'a Permissions {
        if job.permissions.is_set() {
            &job.permissions
        } else {
            &self.permissions
        }
    }
}

/// Parse workflow YAML.
///
/// A syntax error is returned as [`ParseError`]; a document whose top level is
/// not a mapping yields an empty descriptor for which
/// [`WorkflowDescriptor::is_workflow`] is false.
pub fn parse_workflow(content: &str) -> Result<WorkflowDescriptor, ParseError> {
    let yaml = load_yaml(content)?;
    if !yaml.is_mapping() {
        return Ok(WorkflowDescriptor::default());
    }

    let jobs = yaml
        .get("jobs")
        .and_then(|v| v.as_mapping())
        .map(|jobs| {
            jobs.iter()
                .filter_map(|(id, config)| Some(JobSpec::parse(id.as_str()?, config)))
                .collect()
        })
        .unwrap_or_default();

    Ok(WorkflowDescriptor {
        name: get_str(&yaml, "name"),
        on: Triggers::parse(yaml.get("on")),
        permissions: Permissions::parse(yaml.get("permissions")),
        env: string_map(yaml.get("env")),
        jobs,
        raw: yaml,
    })
}
