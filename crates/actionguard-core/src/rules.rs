use crate::action_ref::ActionReference;
use crate::best_practice;
use crate::config::TrustedPublishers;
use crate::finding::Finding;
use crate::parser::{ActionDescriptor, WorkflowDescriptor};
use crate::security;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

pub use crate::best_practice::versions::{check_inconsistent_action_versions, check_older_version};

/// Facts about the audit that rules may consult.
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// The audited repository is public.
    pub is_public: bool,
    pub trusted: TrustedPublishers,
    /// `owner/repo` of the audited repository, when there is one.
    pub repository: Option<String>,
}

impl RuleContext {
    pub fn new(is_public: bool, trusted: TrustedPublishers) -> Self {
        Self {
            is_public,
            trusted,
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSubset {
    BestPractice,
    Security,
}

pub type WorkflowCheck = fn(&WorkflowDescriptor, &RuleContext) -> Vec<Finding>;

/// A registered workflow-level rule.
#[derive(Clone, Copy)]
pub struct Rule {
    pub id: &'static str,
    pub subset: RuleSubset,
    pub check: WorkflowCheck,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("subset", &self.subset)
            .finish()
    }
}

/// Every workflow-level rule, best-practice rules first.
pub fn workflow_rules() -> Vec<Rule> {
    best_practice::RULES
        .iter()
        .chain(security::RULES.iter())
        .copied()
        .collect()
}

/// Run one rule; a panicking rule is logged and contributes nothing.
pub fn run_rule(rule: &Rule, workflow: &WorkflowDescriptor, ctx: &RuleContext) -> Vec<Finding> {
    match catch_unwind(AssertUnwindSafe(|| (rule.check)(workflow, ctx))) {
        Ok(findings) => findings,
        Err(_) => {
            warn!(rule = rule.id, "rule failed, skipping");
            Vec::new()
        }
    }
}

pub fn run_rules(rules: &[Rule], workflow: &WorkflowDescriptor, ctx: &RuleContext) -> Vec<Finding> {
    rules
        .iter()
        .flat_map(|rule| run_rule(rule, workflow, ctx))
        .collect()
}

/// Run the whole workflow catalog.
pub fn run_workflow_rules(workflow: &WorkflowDescriptor, ctx: &RuleContext) -> Vec<Finding> {
    run_rules(&workflow_rules(), workflow, ctx)
}

/// Everything fetched for one resolved action.
#[derive(Debug, Clone, Copy)]
pub struct ActionSubject<'a> {
    pub reference: &'a ActionReference,
    pub metadata: Option<&'a ActionDescriptor>,
    /// JavaScript entry point source.
    pub script: Option<&'a str>,
    pub dockerfile: Option<&'a str>,
}

impl<'a> ActionSubject<'a> {
    pub fn new(reference: &'a ActionReference) -> Self {
        Self {
            reference,
            metadata: None,
            script: None,
            dockerfile: None,
        }
    }
}

type ActionCheck = fn(&ActionSubject<'_>, &RuleContext) -> Vec<Finding>;

fn untrusted_action(subject: &ActionSubject<'_>, ctx: &RuleContext) -> Vec<Finding> {
    security::supply_chain::check_untrusted_action(&subject.reference.to_string(), ctx)
}

fn typosquatting(subject: &ActionSubject<'_>, ctx: &RuleContext) -> Vec<Finding> {
    security::supply_chain::check_typosquatting(&subject.reference.to_string(), ctx)
}

fn deprecated_action(subject: &ActionSubject<'_>, _ctx: &RuleContext) -> Vec<Finding> {
    best_practice::deprecation::check_deprecated_reference(&subject.reference.to_string())
}

fn docker_action(subject: &ActionSubject<'_>, _ctx: &RuleContext) -> Vec<Finding> {
    security::unpinnable::check_docker_action(subject)
}

fn composite_action(subject: &ActionSubject<'_>, _ctx: &RuleContext) -> Vec<Finding> {
    security::unpinnable::check_composite_action(subject)
}

fn javascript_action(subject: &ActionSubject<'_>, _ctx: &RuleContext) -> Vec<Finding> {
    security::unpinnable::check_javascript_action(subject)
}

fn action_input_injection(subject: &ActionSubject<'_>, _ctx: &RuleContext) -> Vec<Finding> {
    subject
        .metadata
        .map(security::injection::check_action_input_injection)
        .unwrap_or_default()
}

const ACTION_CHECKS: &[(&str, ActionCheck)] = &[
    ("untrusted-action", untrusted_action),
    ("typosquatting", typosquatting),
    ("deprecated-action", deprecated_action),
    ("unpinnable-docker", docker_action),
    ("unpinnable-composite", composite_action),
    ("unpinnable-javascript", javascript_action),
    ("action-input-injection", action_input_injection),
];

/// Action-level checks run by the resolver for every resolved node.
pub fn check_action(subject: &ActionSubject<'_>, ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (id, check) in ACTION_CHECKS {
        match catch_unwind(AssertUnwindSafe(|| check(subject, ctx))) {
            Ok(found) => findings.extend(found),
            Err(_) => warn!(rule = *id, action = %subject.reference, "rule failed, skipping"),
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::parser::parse_workflow;
    use std::collections::HashSet;

    fn panicking(_: &WorkflowDescriptor, _: &RuleContext) -> Vec<Finding> {
        panic!("unexpected shape")
    }

    fn constant(_: &WorkflowDescriptor, _: &RuleContext) -> Vec<Finding> {
        vec![Finding::new("constant", Severity::Low, "always")]
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let rules = workflow_rules();
        let ids: HashSet<_> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), rules.len());
        assert!(rules.iter().any(|r| r.subset == RuleSubset::BestPractice));
        assert!(rules.iter().any(|r| r.subset == RuleSubset::Security));
    }

    #[test]
    fn test_failing_rule_is_isolated() {
        let rules = [
            Rule {
                id: "boom",
                subset: RuleSubset::Security,
                check: panicking,
            },
            Rule {
                id: "ok",
                subset: RuleSubset::Security,
                check: constant,
            },
        ];
        let wf = parse_workflow("on: push\njobs: {}\n").unwrap();
        let findings = run_rules(&rules, &wf, &RuleContext::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, "constant");
    }

    #[test]
    fn test_catalog_on_clean_workflow() {
        let yaml = r#"
on: push
permissions:
  contents: read
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@a5ac7e51b41094c92402da3b24376905380afc29
        with:
          persist-credentials: false
      - run: make test
"#;
        let wf = parse_workflow(yaml).unwrap();
        let findings = run_workflow_rules(&wf, &RuleContext::default());
        assert!(findings.is_empty(), "{findings:?}");
    }

    #[test]
    fn test_action_checks_for_untrusted_reference() {
        let reference = ActionReference::parse("someone/tool@main").unwrap();
        let findings = check_action(&ActionSubject::new(&reference), &RuleContext::default());
        assert!(findings.iter().any(|f| f.kind == "untrusted_unpinned_action"));
    }
}
