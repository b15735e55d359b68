//! The `unsound-contains` rule: `contains('a b c', user-value)` is a
//! substring check, not membership. `contains('refs/heads/main',
//! 'refs/heads/mai')` is true, so an attacker-picked value can slip
//! through. Membership needs a real list: `contains(fromJSON('[...]'),
//! value)`.

use flowlint_expressions::{Expr, Literal, SpannedExpr};
use yamlcst::{Op, Patch, Route};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Step, StringNode};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct UnsoundContainsRule {
    base: RuleBase,
    current_job_id: String,
}

rule_meta!(
    UnsoundContainsRule,
    "unsound-contains",
    "contains() is not used as a membership test on delimited strings"
);

struct UnsoundCall {
    /// Span of the whole `contains(...)` call within the expression.
    start: usize,
    end: usize,
    /// The literal haystack items.
    items: Vec<String>,
    /// Span of the needle argument.
    needle: (usize, usize),
}

fn find_unsound_calls(expr: &SpannedExpr<'_>, out: &mut Vec<UnsoundCall>) {
    match &expr.inner {
        Expr::Call { func, args } => {
            if func == "contains" && args.len() == 2 {
                if let (Expr::Literal(Literal::String(haystack)), Expr::Context(_)) =
                    (&args[0].inner, &args[1].inner)
                {
                    let items: Vec<String> = haystack
                        .split([' ', ','])
                        .filter(|item| !item.is_empty())
                        .map(str::to_string)
                        .collect();
                    if items.len() > 1 {
                        out.push(UnsoundCall {
                            start: expr.span.start,
                            end: expr.span.end,
                            items,
                            needle: (args[1].span.start, args[1].span.end),
                        });
                    }
                }
            }
            for arg in args {
                find_unsound_calls(arg, out);
            }
        }
        Expr::BinOp { lhs, rhs, .. } => {
            find_unsound_calls(lhs, out);
            find_unsound_calls(rhs, out);
        }
        Expr::UnOp { expr, .. } => find_unsound_calls(expr, out),
        Expr::Index(index) => find_unsound_calls(index, out),
        Expr::Context(ctx) => {
            for part in &ctx.parts {
                if let Expr::Index(index) = &part.inner {
                    find_unsound_calls(index, out);
                }
            }
        }
        _ => {}
    }
}

impl UnsoundContainsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            current_job_id: String::new(),
        }
    }

    fn check_condition(&mut self, cond: &StringNode, route: Route, job_id: &str, step: Option<usize>) {
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
            let mut calls = Vec::new();
            find_unsound_calls(&parsed, &mut calls);
            for call in calls {
                self.base.report(
                    cond.position_at(offset + call.start),
                    Kind::SecurityMedium,
                    "contains() on a delimited string matches substrings; a crafted value can bypass this check",
                );

                let from = source[call.start..call.end].to_string();
                let needle = &source[call.needle.0..call.needle.1];
                let quoted: Vec<String> = call
                    .items
                    .iter()
                    .map(|item| format!("\"{item}\""))
                    .collect();
                let to = format!("contains(fromJSON('[{}]'), {needle})", quoted.join(", "));
                let scope = match step {
                    Some(index) => FixScope::Step(job_id.to_string(), index),
                    None => FixScope::Job(job_id.to_string()),
                };
                self.base.fix(Fix {
                    rule: Self::NAME,
                    title: "use a JSON list for the membership test".to_string(),
                    scope,
                    patches: vec![Patch {
                        route: route.clone(),
                        op: Op::RewriteFragment { from, to },
                    }],
                });
            }
        }
    }
}

impl Visitor for UnsoundContainsRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job_id = job.id.value.clone();
        if let Some(cond) = &job.if_cond {
            let cond = cond.clone();
            let route = job.route().with("if");
            self.check_condition(&cond, route, &job.id.value.clone(), None);
        }
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(cond) = &step.if_cond {
            let cond = cond.clone();
            let route = step.route.with("if");
            let job_id = self.current_job_id.clone();
            self.check_condition(&cond, route, &job_id, Some(step.index));
        }
        Ok(())
    }
}
