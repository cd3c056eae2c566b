use crate::finding::{Finding, Severity};
use crate::parser::WorkflowDescriptor;
use crate::rules::RuleContext;
use serde_yaml::Value;

const MAX_COMBINATIONS: usize = 100;

/// Keys under `matrix:` that are not axes.
const NON_AXIS_KEYS: &[&str] = &["include", "exclude"];

/// Product of every list-valued axis. `None` when the matrix has no list
/// axes, e.g. when it is produced by an expression.
pub fn matrix_combinations(matrix: &Value) -> Option<usize> {
    let axes = matrix.as_mapping()?;
    let mut total: Option<usize> = None;
    for (key, values) in axes {
        if key.as_str().is_some_and(|k| NON_AXIS_KEYS.contains(&k)) {
            continue;
        }
        if let Some(values) = values.as_sequence() {
            total = Some(total.unwrap_or(1).saturating_mul(values.len()));
        }
    }
    total
}

/// Secrets referenced from the matrix are handed to every expanded job.
pub fn check_matrix_secrets(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .jobs
        .iter()
        .filter_map(|job| {
            let text = serde_yaml::to_string(job.matrix.as_ref()?).ok()?;
            (text.contains("secrets") && text.contains("${{")).then(|| {
                Finding::new(
                    "matrix_secret_exposure",
                    Severity::Critical,
                    format!(
                        "Job '{}' references secrets inside its matrix; every matrix job receives them",
                        job.id
                    ),
                )
                .located(&job.id, None)
                .recommend("Reference secrets in step env only where they are used, not in strategy.matrix")
            })
        })
        .collect()
}

pub fn check_matrix_size(workflow: &WorkflowDescriptor, _ctx: &RuleContext) -> Vec<Finding> {
    workflow
        .jobs
        .iter()
        .filter_map(|job| {
            let combinations = matrix_combinations(job.matrix.as_ref()?)?;
            (combinations > MAX_COMBINATIONS).then(|| {
                Finding::new(
                    "large_matrix",
                    Severity::Low,
                    format!(
                        "Job '{}' expands to {} matrix combinations",
                        job.id, combinations
                    ),
                )
                .located(&job.id, None)
                .evidence("combinations", combinations)
                .recommend("Trim the matrix or split it across workflows to reduce runner time")
            })
        })
        .collect()
}
