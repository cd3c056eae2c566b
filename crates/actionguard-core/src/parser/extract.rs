use super::action::ActionDescriptor;
use crate::action_ref::{is_workflow_path, name_without_version};
use serde_yaml::Value;

/// Visit every string `uses:` value anywhere in `value`.
pub fn walk_uses<'a>(value: &'a Value, visit: &mut impl FnMut(&'a str)) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                if key.as_str() == Some("uses") {
                    if let Some(uses) = child.as_str() {
                        visit(uses);
                    }
                }
                walk_uses(child, visit);
            }
        }
        Value::Sequence(seq) => {
            for child in seq {
                walk_uses(child, visit);
            }
        }
        Value::Tagged(tagged) => walk_uses(&tagged.value, visit),
        _ => {}
    }
}

/// True for `uses:` values that point at a remote action repository, with or
/// without a version.
///
/// Local actions (`./`), Docker images, URLs and reusable workflow calls are
/// not remote actions.
pub fn is_remote_action(uses: &str) -> bool {
    let uses = uses.trim();
    if uses.starts_with("./")
        || uses.starts_with("docker://")
        || uses.starts_with("http://")
        || uses.starts_with("https://")
    {
        return false;
    }
    if is_workflow_path(name_without_version(uses)) {
        return false;
    }
    name_without_version(uses)
        .split_once('/')
        .is_some_and(|(owner, rest)| !owner.is_empty() && !rest.is_empty())
}

/// True for `owner/repo[/path]@ref` references to a remote action.
pub fn is_action_reference(uses: &str) -> bool {
    let uses = uses.trim();
    if !is_remote_action(uses) {
        return false;
    }
    let mut parts = uses.split('@');
    let (Some(_), Some(git_ref), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !git_ref.is_empty()
}

/// Distinct action references in a workflow (or any YAML tree), in first-seen
/// order.
pub fn extract_actions(root: &Value) -> Vec<String> {
    let mut actions: Vec<String> = Vec::new();
    walk_uses(root, &mut |uses| {
        let uses = uses.trim();
        if is_action_reference(uses) && !actions.iter().any(|a| a == uses) {
            actions.push(uses.to_string());
        }
    });
    actions
}

/// Action references a composite action depends on, including unversioned
/// `owner/repo` steps (the resolver defaults their ref). Docker and
/// JavaScript actions have none.
pub fn extract_action_dependencies(action: &ActionDescriptor) -> Vec<String> {
    if !action.is_composite() {
        return Vec::new();
    }
    action
        .runs
        .steps
        .iter()
        .filter_map(|step| step.uses.as_deref())
        .map(str::trim)
        .filter(|uses| is_remote_action(uses))
        .map(String::from)
        .collect()
}
