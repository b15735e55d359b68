//! The `artipacked` rule: checkout credentials leaked through uploaded
//! artifacts. `actions/checkout` persists its token into `.git/config`,
//! and a later broad artifact upload ships that file to anyone who can
//! download run artifacts.

use crate::finding::Kind;
use crate::models::{Job, Step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct ArtipackedRule {
    base: RuleBase,
    persisted_checkout: bool,
}

rule_meta!(
    ArtipackedRule,
    "artipacked",
    "checkout credentials cannot leak through artifacts"
);

impl ArtipackedRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            persisted_checkout: false,
        }
    }

    fn upload_covers_git_dir(step: &Step) -> bool {
        let Some(path) = step.input("path") else {
            // Uploading with no path is an uploader error, not a leak.
            return false;
        };
        path.value
            .lines()
            .map(str::trim)
            .any(|line| matches!(line, "." | "./" | "**" | "**/*") || line.starts_with(".git"))
    }
}

impl Visitor for ArtipackedRule {
    fn visit_job_pre(&mut self, _job: &Job) -> anyhow::Result<()> {
        self.persisted_checkout = false;
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        if action.matches("actions/checkout") {
            let persists = step
                .input("persist-credentials")
                .map(|value| value.value != "false")
                .unwrap_or(true);
            if persists {
                self.persisted_checkout = true;
            }
            return Ok(());
        }
        if action.matches("actions/upload-artifact")
            && self.persisted_checkout
            && Self::upload_covers_git_dir(step)
        {
            let uses = step.uses().expect("action step has uses");
            self.base.report(
                uses.pos,
                Kind::SecurityMedium,
                "artifact includes .git/config with the persisted checkout token; set \"persist-credentials: false\" on the checkout",
            );
        }
        Ok(())
    }
}
