//! The linter orchestrator: per-file analysis and the bounded worker
//! pool over many files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use tracing::instrument;

use crate::finding::{Diagnostic, Fix};
use crate::models::Workflow;
use crate::parse::parse_workflow;
use crate::rules::default_rules;
use crate::state::LintState;
use crate::visitor::walk_workflow;

/// The analysis outcome for one input file.
pub struct ValidateResult {
    pub path: Utf8PathBuf,
    pub source: String,
    pub workflow: Workflow,
    pub diagnostics: Vec<Diagnostic>,
    pub fixes: Vec<Fix>,
}

/// Cooperative cancellation, checked between files.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Linter {
    state: LintState,
}

impl Linter {
    pub fn new(state: LintState) -> Self {
        Self { state }
    }

    /// Analyzes one input. Every file gets fresh rule instances; only the
    /// caches inside [`LintState`] are shared.
    ///
    /// Returns `Err` only for fatal conditions; everything recoverable
    /// lands in `diagnostics`.
    #[instrument(skip(self, source), fields(path = %path))]
    pub fn lint_source(&self, path: &Utf8Path, source: &str) -> anyhow::Result<ValidateResult> {
        let outcome = parse_workflow(path, source);
        let mut rules = default_rules(&self.state);
        walk_workflow(&outcome.workflow, &mut rules)
            .with_context(|| format!("rule walk failed for {path}"))?;

        let mut diagnostics = outcome.diagnostics;
        let mut fixes = Vec::new();
        for rule in &mut rules {
            diagnostics.extend(rule.take_diagnostics());
            fixes.extend(rule.take_fixes());
        }

        diagnostics.retain(|diagnostic| !self.state.config.ignores_rule(diagnostic.rule));
        fixes.retain(|fix| !self.state.config.ignores_rule(fix.rule));

        for diagnostic in &mut diagnostics {
            diagnostic.path = path.to_path_buf();
        }
        diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        Ok(ValidateResult {
            path: path.to_path_buf(),
            source: source.to_string(),
            workflow: outcome.workflow,
            diagnostics,
            fixes,
        })
    }

    /// Analyzes many files on the rayon pool. Files are independent;
    /// results come back ordered by path, with diagnostics stable-sorted
    /// by `(path, line, column)`.
    pub fn lint_files(
        &self,
        paths: &[Utf8PathBuf],
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<ValidateResult>> {
        let mut results: Vec<ValidateResult> = paths
            .par_iter()
            .filter_map(|path| {
                if cancel.is_cancelled() {
                    return None;
                }
                let source = match std::fs::read_to_string(path) {
                    Ok(source) => source,
                    Err(err) => {
                        return Some(Err(anyhow::anyhow!("could not read {path}: {err}")));
                    }
                };
                Some(self.lint_source(path, &source))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }
}
