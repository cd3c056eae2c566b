pub mod action_ref;
pub mod audit;
pub mod best_practice;
pub mod config;
pub mod error;
pub mod finding;
pub mod graph;
pub mod parser;
pub mod providers;
pub mod resolver;
pub mod rules;
pub mod sarif;
pub mod security;
pub mod store;

pub use action_ref::{parse_action_reference, ActionReference, RefKind};
pub use audit::{AuditReport, Auditor};
pub use config::{Config, TrustedPublishers};
pub use error::{AuditError, ParseError, ProviderError, StoreError};
pub use finding::{Finding, Severity};
pub use graph::{AuditGraph, EdgeKind, GraphExport, GraphStatistics, NodeKind};
pub use parser::{parse_action, parse_workflow, ActionDescriptor, WorkflowDescriptor};
pub use providers::{AnalysisMethod, ContentProvider, GitCloneProvider, GitHubApiProvider};
pub use resolver::DependencyResolver;
pub use rules::RuleContext;
pub use store::{AnalysisRecord, RecordStore};
