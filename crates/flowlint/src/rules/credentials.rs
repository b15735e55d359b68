//! The `credentials` rule: container registry passwords must not be
//! written down in the workflow.

use crate::finding::Kind;
use crate::models::{Container, Job};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct CredentialsRule {
    base: RuleBase,
}

rule_meta!(
    CredentialsRule,
    "credentials",
    "container credentials are not hardcoded"
);

impl CredentialsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn check_container(&mut self, what: &str, container: &Container) {
        let Some(credentials) = &container.credentials else {
            return;
        };
        if let Some(password) = &credentials.password {
            if !password.contains_expression() {
                self.base.report(
                    password.pos,
                    Kind::SecurityHigh,
                    format!(
                        "{what} password is hardcoded; use a secret like \"${{{{ secrets.REGISTRY_PASSWORD }}}}\" instead"
                    ),
                );
            }
        }
    }
}

impl Visitor for CredentialsRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if let Some(container) = &job.container {
            self.check_container("container registry", container);
        }
        for (name, service) in &job.services {
            self.check_container(&format!("service {name:?} registry"), service);
        }
        Ok(())
    }
}
