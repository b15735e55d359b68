//! The `improper-access-control` rule: label-based gating combined with
//! the `synchronize` event. The label is reviewed once; `synchronize`
//! re-runs the workflow for every later push without re-review.

use flowlint_expressions::context::ContextPattern;
use flowlint_expressions::Expr;
use std::sync::LazyLock;

use crate::finding::Kind;
use crate::models::{Job, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static PR_LABELS: LazyLock<ContextPattern<'static>> =
    LazyLock::new(|| ContextPattern::new("github.event.pull_request.labels"));

pub(crate) struct ImproperAccessControlRule {
    base: RuleBase,
    vulnerable_trigger: bool,
}

rule_meta!(
    ImproperAccessControlRule,
    "improper-access-control",
    "label gates are not re-run without re-review"
);

impl ImproperAccessControlRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            vulnerable_trigger: false,
        }
    }

    fn gates_on_labels(cond: &StringNode) -> bool {
        let exprs = cond.expressions();
        let sources: Vec<String> = if exprs.is_empty() {
            vec![cond.value.clone()]
        } else {
            exprs.into_iter().map(|raw| raw.source).collect()
        };
        sources.iter().any(|source| {
            let Ok(parsed) = Expr::parse(source) else {
                return false;
            };
            fn any_label_context(expr: &Expr<'_>) -> bool {
                match expr {
                    Expr::Context(ctx) => ctx.child_of(&PR_LABELS),
                    Expr::Call { args, .. } => args.iter().any(|a| any_label_context(a)),
                    Expr::BinOp { lhs, rhs, .. } => {
                        any_label_context(lhs) || any_label_context(rhs)
                    }
                    Expr::UnOp { expr, .. } => any_label_context(expr),
                    Expr::Index(index) => any_label_context(index),
                    _ => false,
                }
            }
            any_label_context(&parsed)
        })
    }

    fn check_condition(&mut self, cond: &StringNode) {
        if self.vulnerable_trigger && Self::gates_on_labels(cond) {
            self.base.report(
                cond.pos,
                Kind::SecurityHigh,
                "label-gated access control is bypassable: \"synchronize\" re-runs this workflow for new pushes without re-review",
            );
        }
    }
}

impl Visitor for ImproperAccessControlRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.vulnerable_trigger = ["pull_request", "pull_request_target"]
            .iter()
            .filter_map(|name| workflow.webhook(name))
            .any(|hook| hook.has_type("labeled") && hook.has_type("synchronize"));
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if let Some(cond) = &job.if_cond {
            self.check_condition(cond);
        }
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(cond) = &step.if_cond {
            self.check_condition(cond);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::lint_rule;

    #[test]
    fn test_labeled_with_synchronize() {
        let source = "on:\n  pull_request_target:\n    types: [labeled, synchronize]\njobs:\n  t:\n    runs-on: x\n    if: contains(github.event.pull_request.labels.*.name, 'safe-to-test')\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(ImproperAccessControlRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityHigh);
    }

    #[test]
    fn test_labeled_only_is_fine() {
        let source = "on:\n  pull_request_target:\n    types: [labeled]\njobs:\n  t:\n    runs-on: x\n    if: contains(github.event.pull_request.labels.*.name, 'safe-to-test')\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(ImproperAccessControlRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
