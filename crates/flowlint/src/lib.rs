//! flowlint: a static analyzer for WorkflowSpec CI/CD workflow files.
//!
//! Analysis runs in three stages: the error-accumulating parser lowers
//! YAML into a typed workflow model, the visitor fans the model out to
//! every registered rule, and the orchestrator filters and sorts what
//! the rules reported. Rules may also register deferred autofixes, which
//! [`fix::apply_fixes`] applies as comment-preserving patches against
//! the original source.

#![forbid(unsafe_code)]

pub mod availability;
pub mod catalog;
pub mod config;
pub mod finding;
pub mod fix;
pub mod linter;
pub mod models;
pub mod output;
pub mod parse;
pub mod reusable;
pub mod rules;
pub mod state;
pub mod visitor;

pub use config::Config;
pub use finding::{Diagnostic, Fix, Kind};
pub use linter::{CancelToken, Linter, ValidateResult};
pub use state::LintState;
