//! The `cache-poisoning-poisonable-step` rule: a mutation step sits
//! between an unsafe checkout and a cache-enabling step. Even when the
//! cache key looks safe, the intervening step runs attacker-influenced
//! files and can rewrite what gets cached.

use crate::finding::Kind;
use crate::models::{Exec, Job, Position, Step, Workflow};
use crate::rules::cache_poisoning::{checkout_ref_is_unsafe, is_cache_step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

const UNSAFE_TRIGGERS: &[&str] = &["issue_comment", "pull_request_target", "workflow_run"];

pub(crate) struct PoisonableStepRule {
    base: RuleBase,
    unsafe_trigger: bool,
    tainted: bool,
    poisonable: Option<Position>,
}

rule_meta!(
    PoisonableStepRule,
    "cache-poisoning-poisonable-step",
    "no mutation step runs between an unsafe checkout and a cache"
);

impl PoisonableStepRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            unsafe_trigger: false,
            tainted: false,
            poisonable: None,
        }
    }

    /// A step that can modify the checked out tree: any script, or a
    /// local action living in the tree itself.
    fn is_mutation_step(step: &Step) -> bool {
        match &step.exec {
            Exec::Run { .. } => true,
            Exec::Action { uses, .. } => uses.value.starts_with("./"),
            Exec::Missing => false,
        }
    }
}

impl Visitor for PoisonableStepRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.unsafe_trigger = UNSAFE_TRIGGERS
            .iter()
            .any(|trigger| workflow.has_trigger(trigger));
        Ok(())
    }

    fn visit_job_pre(&mut self, _job: &Job) -> anyhow::Result<()> {
        self.tainted = false;
        self.poisonable = None;
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
            self.tainted = step
                .input("ref")
                .is_some_and(checkout_ref_is_unsafe);
            self.poisonable = None;
            return Ok(());
        }

        if is_cache_step(step) {
            if self.tainted {
                if let Some(pos) = self.poisonable.take() {
                    self.base.report(
                        pos,
                        Kind::SecurityMedium,
                        "this step runs attacker-influenced files between an unsafe checkout and a cache write",
                    );
                }
            }
            return Ok(());
        }

        if self.tainted && self.poisonable.is_none() && Self::is_mutation_step(step) {
            self.poisonable = Some(step.pos);
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
    fn test_mutation_between_checkout_and_cache() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.event.pull_request.head.ref }}\n      - run: npm install\n      - uses: actions/cache@v4\n        with:\n          path: ~/.npm\n          key: npm\n";
        let (diagnostics, _) = lint_rule(PoisonableStepRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        // Reported at the mutation step.
        assert_eq!(diagnostics[0].line, 9);
    }

    #[test]
    fn test_no_mutation_step() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.event.pull_request.head.ref }}\n      - uses: actions/cache@v4\n        with:\n          path: ~/.npm\n          key: npm\n";
        let (diagnostics, _) = lint_rule(PoisonableStepRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
