//! The `conditional` rule: `if:` conditions that cannot do what they say.
//!
//! Two classic foot-guns: extra characters around a `${{ }}` make the
//! condition a non-empty string, which is always truthy; and constant
//! expressions that always take the same branch.

use flowlint_expressions::Expr;

use crate::finding::Kind;
use crate::models::{Job, Step, StringNode};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct ConditionalRule {
    base: RuleBase,
}

rule_meta!(
    ConditionalRule,
    "conditional",
    "if conditions are neither vacuous nor constant"
);

impl ConditionalRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn check_condition(&mut self, cond: &StringNode) {
        let exprs = cond.expressions();
        if !exprs.is_empty() && !cond.is_expression() {
            self.base.report(
                cond.pos,
                Kind::Semantic,
                "this condition is always true; characters outside ${{ }} make the condition a non-empty string",
            );
            return;
        }

        let source = if cond.is_expression() {
            exprs[0].source.clone()
        } else {
            cond.value.clone()
        };
        if let Ok(parsed) = Expr::parse(&source) {
            if parsed.constant_reducible() {
                self.base.report(
                    cond.pos,
                    Kind::Semantic,
                    "\"if\" condition is constant and always evaluates to the same branch",
                );
            }
        }
    }
}

impl Visitor for ConditionalRule {
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
