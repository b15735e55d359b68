//! The `untrusted-checkout` rule: a privileged workflow checks out the
//! pull request head. The attacker's code then runs with access to
//! secrets and a write token.

use flowlint_expressions::context::ContextPattern;
use flowlint_expressions::Expr;
use std::sync::LazyLock;
use yamlcst::{Op, Patch};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static PR_HEAD: LazyLock<ContextPattern<'static>> =
    LazyLock::new(|| ContextPattern::new("github.event.pull_request.head"));
static HEAD_REF: LazyLock<ContextPattern<'static>> =
    LazyLock::new(|| ContextPattern::new("github.head_ref"));

/// Whether `value` resolves to the pull request's head ref.
pub(crate) fn is_pr_head_ref(value: &StringNode) -> bool {
    for raw in value.expressions() {
        let Ok(parsed) = Expr::parse(&raw.source) else {
            continue;
        };
        for (ctx, _) in parsed.dataflow_contexts() {
            if ctx.child_of(&PR_HEAD) || ctx.matches(&HEAD_REF) {
                return true;
            }
        }
    }
    false
}

pub(crate) struct UntrustedCheckoutRule {
    base: RuleBase,
    privileged: bool,
    current_job: String,
}

rule_meta!(
    UntrustedCheckoutRule,
    "untrusted-checkout",
    "privileged workflows do not check out the pull request head"
);

impl UntrustedCheckoutRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            privileged: false,
            current_job: String::new(),
        }
    }
}

impl Visitor for UntrustedCheckoutRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.privileged = workflow.has_privileged_trigger();
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if !self.privileged {
            return Ok(());
        }
        if !step
            .action_ref()
            .is_some_and(|action| action.matches("actions/checkout"))
        {
            return Ok(());
        }
        let Some(ref_value) = step.input("ref") else {
            return Ok(());
        };
        if !is_pr_head_ref(ref_value) {
            return Ok(());
        }
        self.base.report(
            ref_value.pos,
            Kind::SecurityCritical,
            "privileged workflow checks out the untrusted pull request head; its code runs with secrets available",
        );
        self.base.fix(Fix {
            rule: Self::NAME,
            title: "check out the trusted base commit instead".to_string(),
            scope: FixScope::Step(self.current_job.clone(), step.index),
            patches: vec![Patch {
                route: step.route.with("with").with("ref"),
                op: Op::Replace {
                    value: serde_yaml::Value::String("${{ github.sha }}".to_string()),
                    line_comment: None,
                },
            }],
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::{apply_fixes, lint_rule};

    #[test]
    fn test_privileged_head_checkout() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.event.pull_request.head.ref }}\n";
        let (diagnostics, fixes) = lint_rule(UntrustedCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityCritical);

        let patched = apply_fixes(source, &fixes);
        assert!(patched.contains("ref: \"${{ github.sha }}\""));

        let (diagnostics, _) = lint_rule(UntrustedCheckoutRule::new(), &patched);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_head_ref_context_is_case_insensitive() {
        let source = "on: workflow_run\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ GITHUB.HEAD_REF }}\n";
        let (diagnostics, _) = lint_rule(UntrustedCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_unprivileged_trigger_is_quiet() {
        let source = "on: pull_request\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.event.pull_request.head.ref }}\n";
        let (diagnostics, _) = lint_rule(UntrustedCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
