//! The TOCTOU checkout rules: label-gated (or environment-gated)
//! pull_request_target workflows that check out a mutable head ref.
//!
//! The gate reviews one commit; the mutable ref lets the attacker push a
//! different one between approval and execution. Critical when the
//! trigger fires on `labeled`, high when a protected environment is the
//! gate.

use crate::finding::{Diagnostic, Fix, FixScope, Kind};
use crate::models::{Job, Step, Workflow};
use crate::rules::untrusted_checkout::is_pr_head_ref;
use crate::rules::{Rule, RuleBase};
use crate::visitor::Visitor;
use yamlcst::{Op, Patch};

pub(crate) struct ToctouCheckoutRule {
    base: RuleBase,
    label_gated: bool,
    privileged: bool,
    current_job: String,
    environment_gated: bool,
}

impl ToctouCheckoutRule {
    pub(crate) const CRITICAL: &'static str = "untrusted-checkout-toctou-critical";
    pub(crate) const HIGH: &'static str = "untrusted-checkout-toctou-high";

    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::CRITICAL),
            label_gated: false,
            privileged: false,
            current_job: String::new(),
            environment_gated: false,
        }
    }
}

impl Visitor for ToctouCheckoutRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.privileged = workflow.has_privileged_trigger();
        self.label_gated = workflow
            .webhook("pull_request_target")
            .is_some_and(|hook| hook.has_type("labeled"));
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        self.environment_gated = job.environment.is_some();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if !self.privileged || !(self.label_gated || self.environment_gated) {
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

        let (ident, kind, gate) = if self.label_gated {
            (
                Self::CRITICAL,
                Kind::SecurityCritical,
                "the label approval",
            )
        } else {
            (Self::HIGH, Kind::SecurityHigh, "the environment approval")
        };
        self.base.report_as(
            ident,
            ref_value.pos,
            kind,
            format!(
                "mutable head ref is checked out after {gate}; the branch can change between review and execution"
            ),
        );
        self.base.fix(Fix {
            rule: ident,
            title: "pin the checkout to the reviewed commit".to_string(),
            scope: FixScope::Step(self.current_job.clone(), step.index),
            patches: vec![Patch {
                route: step.route.with("with").with("ref"),
                op: Op::Replace {
                    value: serde_yaml::Value::String(
                        "${{ github.event.pull_request.head.sha }}".to_string(),
                    ),
                    line_comment: None,
                },
            }],
        });
        Ok(())
    }
}

impl Rule for ToctouCheckoutRule {
    fn name(&self) -> &'static str {
        Self::CRITICAL
    }

    fn description(&self) -> &'static str {
        "approval gates are not bypassable through mutable checkout refs"
    }

    fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.base.diagnostics)
    }

    fn take_fixes(&mut self) -> Vec<Fix> {
        std::mem::take(&mut self.base.fixes)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::lint_rule;

    #[test]
    fn test_labeled_gate_is_critical() {
        let source = "on:\n  pull_request_target:\n    types: [labeled]\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.event.pull_request.head.ref }}\n";
        let (diagnostics, fixes) = lint_rule(ToctouCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "untrusted-checkout-toctou-critical");
        assert_eq!(fixes.len(), 1);
    }

    #[test]
    fn test_environment_gate_is_high() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    environment: deploy\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.head_ref }}\n";
        let (diagnostics, _) = lint_rule(ToctouCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "untrusted-checkout-toctou-high");
        assert_eq!(diagnostics[0].kind, Kind::SecurityHigh);
    }

    #[test]
    fn test_ungated_workflow_is_quiet() {
        let source = "on:\n  pull_request_target:\n    types: [opened]\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.head_ref }}\n";
        let (diagnostics, _) = lint_rule(ToctouCheckoutRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
