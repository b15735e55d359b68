//! The `unmasked-secret-exposure` rule: `fromJSON(secrets.X).y` patterns.
//!
//! Log masking covers the secret's exact value. Parsing a JSON secret and
//! extracting a field produces a value the masker has never seen, so it
//! lands in logs in the clear.

use flowlint_expressions::context::ContextPattern;
use flowlint_expressions::{Expr, SpannedExpr};
use std::sync::LazyLock;

use crate::finding::Kind;
use crate::models::{Env, Job, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static SECRETS: LazyLock<ContextPattern<'static>> =
    LazyLock::new(|| ContextPattern::new("secrets"));

pub(crate) struct UnmaskedSecretExposureRule {
    base: RuleBase,
}

rule_meta!(
    UnmaskedSecretExposureRule,
    "unmasked-secret-exposure",
    "secrets are not laundered out of log masking"
);

fn find_laundering(expr: &SpannedExpr<'_>, out: &mut Vec<usize>) {
    match &expr.inner {
        Expr::Context(ctx) => {
            // A context headed by fromJSON(secrets...) with trailing parts
            // extracts an unmasked fragment of the secret.
            if ctx.parts.len() > 1 {
                if let Expr::Call { func, args } = &ctx.parts[0].inner {
                    if func == "fromJSON"
                        && args.iter().any(|arg| match &arg.inner {
                            Expr::Context(inner) => inner.child_of(&SECRETS),
                            _ => false,
                        })
                    {
                        out.push(expr.span.start);
                    }
                }
            }
            for part in &ctx.parts {
                if let Expr::Index(index) = &part.inner {
                    find_laundering(index, out);
                }
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                find_laundering(arg, out);
            }
        }
        Expr::BinOp { lhs, rhs, .. } => {
            find_laundering(lhs, out);
            find_laundering(rhs, out);
        }
        Expr::UnOp { expr, .. } => find_laundering(expr, out),
        Expr::Index(index) => find_laundering(index, out),
        _ => {}
    }
}

impl UnmaskedSecretExposureRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn scan(&mut self, node: &StringNode) {
        for raw in node.expressions() {
            let Ok(parsed) = Expr::parse(&raw.source) else {
                continue;
            };
            let mut found = Vec::new();
            find_laundering(&parsed, &mut found);
            for offset in found {
                self.base.report(
                    node.position_at(raw.offset + offset),
                    Kind::SecurityHigh,
                    "a field extracted from a JSON secret is not covered by log masking",
                );
            }
        }
    }

    fn scan_env(&mut self, env: &Env) {
        match env {
            Env::Vars(vars) => {
                for var in vars.values() {
                    self.scan(&var.value);
                }
            }
            Env::Expression(node) => self.scan(node),
        }
    }
}

impl Visitor for UnmaskedSecretExposureRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        if let Some(env) = &workflow.env {
            self.scan_env(env);
        }
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if let Some(env) = &job.env {
            self.scan_env(env);
        }
        for output in job.outputs.values() {
            self.scan(output);
        }
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(script) = step.run() {
            self.scan(script);
        }
        if let Some(inputs) = step.with() {
            for input in inputs.values() {
                self.scan(input);
            }
        }
        if let Some(env) = &step.env {
            self.scan_env(env);
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
    fn test_fromjson_secret_field() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: echo ${{ fromJSON(secrets.DEPLOY_CONFIG).api_key }}\n";
        let (diagnostics, _) = lint_rule(UnmaskedSecretExposureRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("masking"));
    }

    #[test]
    fn test_whole_fromjson_is_fine() {
        // Without a field access, the value equals the masked secret.
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: deploy\n        env:\n          CONFIG: ${{ fromJSON(secrets.DEPLOY_CONFIG) }}\n          OTHER: ${{ fromJSON(github.event.inputs.data).x }}\n";
        let (diagnostics, _) = lint_rule(UnmaskedSecretExposureRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
