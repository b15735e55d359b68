//! The `bot-conditions` rule: actor checks that a human can spoof.
//!
//! `github.actor` is whoever last touched the trigger, and display-name
//! bots can be imitated. Trusting `github.actor == 'dependabot[bot]'`
//! without verifying the account type lets anyone named convincingly
//! enough through the gate.

use flowlint_expressions::context::ContextPattern;
use flowlint_expressions::{BinOp, Expr, Literal, SpannedExpr};
use std::sync::LazyLock;

use crate::finding::Kind;
use crate::models::{Job, Step, StringNode};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static ACTOR_CONTEXTS: LazyLock<Vec<ContextPattern<'static>>> = LazyLock::new(|| {
    vec![
        ContextPattern::new("github.actor"),
        ContextPattern::new("github.triggering_actor"),
        ContextPattern::new("github.event.pull_request.sender.login"),
    ]
});

static USER_TYPE: LazyLock<ContextPattern<'static>> =
    LazyLock::new(|| ContextPattern::new("github.event.pull_request.user.type"));

pub(crate) struct BotConditionsRule {
    base: RuleBase,
}

rule_meta!(
    BotConditionsRule,
    "bot-conditions",
    "bot actor checks verify the account type"
);

struct Scan {
    bot_comparison: Option<usize>,
    verifies_user_type: bool,
}

fn scan(expr: &SpannedExpr<'_>, state: &mut Scan) {
    if let Expr::BinOp { lhs, op, rhs } = &expr.inner {
        if matches!(op, BinOp::Eq | BinOp::Neq) {
            let sides = [(&**lhs, &**rhs), (&**rhs, &**lhs)];
            for (context_side, literal_side) in sides {
                let Expr::Context(ctx) = &context_side.inner else {
                    continue;
                };
                if let Expr::Literal(Literal::String(value)) = &literal_side.inner {
                    if ACTOR_CONTEXTS.iter().any(|pattern| ctx.matches(pattern))
                        && value.ends_with("[bot]")
                    {
                        state.bot_comparison.get_or_insert(expr.span.start);
                    }
                    if ctx.matches(&USER_TYPE) && value.as_ref() == "Bot" {
                        state.verifies_user_type = true;
                    }
                }
            }
        }
        scan(lhs, state);
        scan(rhs, state);
    } else if let Expr::UnOp { expr, .. } = &expr.inner {
        scan(expr, state);
    } else if let Expr::Call { args, .. } = &expr.inner {
        for arg in args {
            scan(arg, state);
        }
    }
}

impl BotConditionsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn check_condition(&mut self, cond: &StringNode) {
        let exprs = cond.expressions();
        let sources: Vec<(String, usize)> = if exprs.is_empty() {
            vec![(cond.value.clone(), 0)]
        } else {
            exprs
                .into_iter()
                .map(|raw| (raw.source, raw.offset))
                .collect()
        };
        for (source, offset) in sources {
            let Ok(parsed) = Expr::parse(&source) else {
                continue;
            };
            let mut state = Scan {
                bot_comparison: None,
                verifies_user_type: false,
            };
            scan(&parsed, &mut state);
            if let Some(at) = state.bot_comparison {
                if !state.verifies_user_type {
                    self.base.report(
                        cond.position_at(offset + at),
                        Kind::SecurityMedium,
                        "actor name comparison is spoofable; also verify \"github.event.pull_request.user.type == 'Bot'\"",
                    );
                }
            }
        }
    }
}

impl Visitor for BotConditionsRule {
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
    fn test_spoofable_actor_check() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    if: github.actor == 'dependabot[bot]'\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(BotConditionsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityMedium);
    }

    #[test]
    fn test_verified_actor_check() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    if: github.actor == 'dependabot[bot]' && github.event.pull_request.user.type == 'Bot'\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(BotConditionsRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_human_actor_comparison_is_fine() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    if: github.actor == 'octocat'\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(BotConditionsRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
