//! The `cache-poisoning` rule: a job triggered by an unsafe event checks
//! out an attacker-influenced ref, then populates a cache. The poisoned
//! cache entry outlives the run and is restored into trusted runs.
//!
//! A later safe checkout in the same job resets the tainted state.

use flowlint_expressions::context::ContextPattern;
use flowlint_expressions::Expr;
use yamlcst::{Op, Patch, Route};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Position, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

const UNSAFE_TRIGGERS: &[&str] = &["issue_comment", "pull_request_target", "workflow_run"];

/// Refs an unsafe trigger may still check out safely.
const SAFE_REF_CONTEXTS: &[&str] = &[
    "github.ref",
    "github.sha",
    "github.base_ref",
    "github.event.repository.default_branch",
];

/// Whether a checkout `ref:` value is attacker-influenced.
pub(crate) fn checkout_ref_is_unsafe(value: &StringNode) -> bool {
    if !value.contains_expression() {
        // A literal ref names a fixed branch/tag/commit of the repository.
        return false;
    }
    for raw in value.expressions() {
        let Ok(parsed) = Expr::parse(&raw.source) else {
            return true;
        };
        for (ctx, _) in parsed.dataflow_contexts() {
            let safe = SAFE_REF_CONTEXTS
                .iter()
                .any(|pattern| ctx.matches(&ContextPattern::new(pattern)));
            if !safe {
                return true;
            }
        }
    }
    false
}

/// Whether a step restores or populates a cache.
pub(crate) fn is_cache_step(step: &Step) -> bool {
    let Some(action) = step.action_ref() else {
        return false;
    };
    if action.matches("actions/cache") || action.matches("Swatinem/rust-cache") {
        return true;
    }
    if action.owner.eq_ignore_ascii_case("actions") && action.repo.starts_with("setup-") {
        return step
            .input("cache")
            .is_some_and(|value| !value.value.is_empty() && value.value != "false");
    }
    false
}

pub(crate) struct CachePoisoningRule {
    base: RuleBase,
    unsafe_trigger: bool,
    current_job: String,
    /// The unsafe checkout's `ref:` route and position, if tainted.
    tainted: Option<(Route, Position)>,
}

rule_meta!(
    CachePoisoningRule,
    "cache-poisoning",
    "caches are not populated from unsafely checked out refs"
);

impl CachePoisoningRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            unsafe_trigger: false,
            current_job: String::new(),
            tainted: None,
        }
    }
}

impl Visitor for CachePoisoningRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.unsafe_trigger = UNSAFE_TRIGGERS
            .iter()
            .any(|trigger| workflow.has_trigger(trigger));
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        self.tainted = None;
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if !self.unsafe_trigger {
            return Ok(());
        }

        if step
            .action_ref()
            .is_some_and(|action| action.matches("actions/checkout"))
        {
            match step.input("ref") {
                Some(value) if checkout_ref_is_unsafe(value) => {
                    self.tainted = Some((step.route.with("with").with("ref"), value.pos));
                }
                // A safe checkout resets whatever an earlier step tainted.
                _ => self.tainted = None,
            }
            return Ok(());
        }

        if is_cache_step(step) {
            if let Some((ref_route, _)) = self.tainted.clone() {
                self.base.report(
                    step.pos,
                    Kind::SecurityMedium,
                    "this cache is populated from an unsafely checked out ref and can poison runs of trusted branches",
                );
                self.base.fix(Fix {
                    rule: Self::NAME,
                    title: "check out the trusted ref instead".to_string(),
                    scope: FixScope::Step(self.current_job.clone(), step.index),
                    patches: vec![Patch {
                        route: ref_route,
                        op: Op::Remove,
                    }],
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::{apply_fixes, lint_rule};

    const POISONED: &str = "on:\n  issue_comment:\n    types: [created]\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n        with: { ref: \"${{ steps.x.outputs.head_sha }}\" }\n      - uses: actions/setup-python@v5\n        with: { python-version: \"3.11\", cache: \"pip\" }\n";

    #[test]
    fn test_unsafe_checkout_then_cache() {
        let (diagnostics, fixes) = lint_rule(CachePoisoningRule::new(), POISONED);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityMedium);
        // Reported at the cache-enabling step.
        assert_eq!(diagnostics[0].line, 10);

        let patched = apply_fixes(POISONED, &fixes);
        assert!(!patched.contains("ref:"), "{patched}");

        let (diagnostics, _) = lint_rule(CachePoisoningRule::new(), &patched);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_safe_trigger_is_quiet() {
        let source = POISONED.replace("issue_comment", "pull_request");
        let (diagnostics, _) = lint_rule(CachePoisoningRule::new(), &source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_safe_ref_is_quiet() {
        let source = POISONED.replace("${{ steps.x.outputs.head_sha }}", "${{ github.sha }}");
        let (diagnostics, _) = lint_rule(CachePoisoningRule::new(), &source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_later_safe_checkout_resets_taint() {
        let source = "on: workflow_run\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with: { ref: \"${{ github.event.workflow_run.head_branch }}\" }\n      - uses: actions/checkout@v4\n      - uses: actions/cache@v4\n        with: { path: ~/.cargo, key: test }\n";
        let (diagnostics, _) = lint_rule(CachePoisoningRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_cache_disabled_setup_is_quiet() {
        let source = POISONED.replace("cache: \"pip\"", "cache: \"\"");
        let (diagnostics, _) = lint_rule(CachePoisoningRule::new(), &source);
        assert_eq!(diagnostics.len(), 0);
    }
}
