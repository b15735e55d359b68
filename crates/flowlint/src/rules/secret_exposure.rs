//! The `secret-exposure` rule: expressions that spill the whole secret
//! store. `toJSON(secrets)` serializes every secret, and a dynamic
//! `secrets[...]` index cannot be audited statically.

use flowlint_expressions::{Expr, Literal, SpannedExpr};

use crate::finding::Kind;
use crate::models::{Env, Job, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct SecretExposureRule {
    base: RuleBase,
}

rule_meta!(
    SecretExposureRule,
    "secret-exposure",
    "the secret store is not exposed wholesale"
);

enum Exposure {
    ToJson,
    DynamicIndex,
}

fn find_exposures(expr: &SpannedExpr<'_>, out: &mut Vec<(Exposure, usize)>) {
    match &expr.inner {
        Expr::Call { func, args } => {
            if func == "toJSON" && args.len() == 1 {
                if let Expr::Context(ctx) = &args[0].inner {
                    if ctx.parts.len() == 1 && ctx.head().is_some_and(|h| h.eq_ignore_ascii_case("secrets")) {
                        out.push((Exposure::ToJson, expr.span.start));
                    }
                }
            }
            for arg in args {
                find_exposures(arg, out);
            }
        }
        Expr::Context(ctx) => {
            if ctx.head().is_some_and(|h| h.eq_ignore_ascii_case("secrets")) {
                if let Some(part) = ctx.parts.get(1) {
                    if let Expr::Index(index) = &part.inner {
                        if !matches!(index.inner, Expr::Literal(Literal::String(_))) {
                            out.push((Exposure::DynamicIndex, part.span.start));
                        }
                    }
                }
            }
            for part in &ctx.parts {
                if let Expr::Index(index) = &part.inner {
                    find_exposures(index, out);
                }
            }
        }
        Expr::BinOp { lhs, rhs, .. } => {
            find_exposures(lhs, out);
            find_exposures(rhs, out);
        }
        Expr::UnOp { expr, .. } => find_exposures(expr, out),
        Expr::Index(index) => find_exposures(index, out),
        _ => {}
    }
}

impl SecretExposureRule {
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
            let mut exposures = Vec::new();
            find_exposures(&parsed, &mut exposures);
            for (exposure, offset) in exposures {
                let message = match exposure {
                    Exposure::ToJson => {
                        "toJSON(secrets) serializes every secret in the repository into the evaluation"
                    }
                    Exposure::DynamicIndex => {
                        "dynamic secrets[...] access cannot be audited statically and may exfiltrate arbitrary secrets"
                    }
                };
                self.base.report(
                    node.position_at(raw.offset + offset),
                    Kind::SecurityHigh,
                    message,
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

impl Visitor for SecretExposureRule {
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
        if let Some(cond) = &job.if_cond {
            self.scan(cond);
        }
        for output in job.outputs.values() {
            self.scan(output);
        }
        if let Some(call) = &job.workflow_call {
            for input in call.inputs.values() {
                self.scan(input);
            }
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
        if let Some(cond) = &step.if_cond {
            self.scan(cond);
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
    fn test_tojson_secrets() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: echo '${{ toJSON(secrets) }}' > dump.json\n";
        let (diagnostics, _) = lint_rule(SecretExposureRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("toJSON(secrets)"));
    }

    #[test]
    fn test_dynamic_index() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: deploy\n        env:\n          TOKEN: ${{ secrets[format('TOKEN_{0}', matrix.env)] }}\n";
        let (diagnostics, _) = lint_rule(SecretExposureRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("dynamic"));
    }

    #[test]
    fn test_static_access_is_fine() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: deploy\n        env:\n          A: ${{ secrets.DEPLOY_TOKEN }}\n          B: ${{ secrets['OTHER_TOKEN'] }}\n          C: ${{ toJSON(github.event) }}\n";
        let (diagnostics, _) = lint_rule(SecretExposureRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
