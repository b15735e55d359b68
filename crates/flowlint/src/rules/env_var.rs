//! The `env-var` rule: environment variable names must be settable.

use crate::finding::Kind;
use crate::models::{Env, Job, Step, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct EnvVarRule {
    base: RuleBase,
}

rule_meta!(
    EnvVarRule,
    "env-var",
    "environment variable names are well-formed"
);

impl EnvVarRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn check_env(&mut self, env: &Env) {
        let Some(vars) = env.vars() else {
            return;
        };
        for var in vars.values() {
            // A name that is itself an expression is resolved at runtime.
            if var.name.is_expression() {
                continue;
            }
            let name = &var.name.value;
            if name.contains('&') || name.contains('=') || name.chars().any(char::is_whitespace) {
                self.base.report(
                    var.name.pos,
                    Kind::Semantic,
                    format!(
                        "environment variable name {name:?} must not contain '&', '=' or whitespace"
                    ),
                );
            }
        }
    }
}

impl Visitor for EnvVarRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        if let Some(env) = &workflow.env {
            self.check_env(env);
        }
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if let Some(env) = &job.env {
            self.check_env(env);
        }
        if let Some(container) = &job.container {
            if let Some(env) = &container.env {
                self.check_env(env);
            }
        }
        for service in job.services.values() {
            if let Some(env) = &service.env {
                self.check_env(env);
            }
        }
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(env) = &step.env {
            self.check_env(env);
        }
        Ok(())
    }
}
