//! The PATH injection rules: untrusted values written to `$GITHUB_PATH`.
//! A poisoned PATH entry shadows every binary later steps invoke.

use std::sync::LazyLock;

use regex::Regex;

use crate::finding::{Diagnostic, Fix, Kind};
use crate::models::{Job, Step, Workflow};
use crate::rules::envvar_injection::untrusted_writes;
use crate::rules::injection::{inputs_untrusted, lift_to_env_fix};
use crate::rules::{Rule, RuleBase};
use crate::visitor::Visitor;

static GITHUB_PATH_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#">>\s*["']?\$\{?GITHUB_PATH\}?["']?"#).unwrap());

pub(crate) struct EnvPathInjectionRule {
    base: RuleBase,
    privileged: bool,
    inputs_untrusted: bool,
    current_job: String,
}

impl EnvPathInjectionRule {
    pub(crate) const CRITICAL: &'static str = "envpath-injection-critical";
    pub(crate) const MEDIUM: &'static str = "envpath-injection-medium";

    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::CRITICAL),
            privileged: false,
            inputs_untrusted: false,
            current_job: String::new(),
        }
    }

    fn ident(&self) -> &'static str {
        if self.privileged {
            Self::CRITICAL
        } else {
            Self::MEDIUM
        }
    }
}

impl Visitor for EnvPathInjectionRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.privileged = workflow.has_privileged_trigger();
        self.inputs_untrusted = inputs_untrusted(workflow);
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(script) = step.run() else {
            return Ok(());
        };
        let uses = untrusted_writes(script, &GITHUB_PATH_WRITE, self.inputs_untrusted);
        let kind = if self.privileged {
            Kind::SecurityCritical
        } else {
            Kind::SecurityMedium
        };
        for usage in &uses {
            self.base.report_as(
                self.ident(),
                usage.expr.pos,
                kind,
                format!(
                    "untrusted input {:?} is written to $GITHUB_PATH; it can shadow binaries for every later step",
                    usage.path
                ),
            );
        }
        if !uses.is_empty() {
            // Resolve through realpath so a relative segment cannot smuggle
            // in a directory outside the workspace.
            let fix = lift_to_env_fix(
                self.ident(),
                &self.current_job,
                step,
                step.route.with("run"),
                &uses,
                |name| format!("$(realpath \"${name}\")"),
            );
            self.base.fix(fix);
        }
        Ok(())
    }
}

impl Rule for EnvPathInjectionRule {
    fn name(&self) -> &'static str {
        self.ident()
    }

    fn description(&self) -> &'static str {
        "untrusted inputs are not appended to $GITHUB_PATH"
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
    use crate::rules::testsupport::{apply_fixes, lint_rule};

    #[test]
    fn test_untrusted_path_write() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: echo \"${{ github.event.pull_request.head.ref }}/bin\" >> \"$GITHUB_PATH\"\n";
        let (diagnostics, fixes) = lint_rule(EnvPathInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "envpath-injection-critical");

        let patched = apply_fixes(source, &fixes);
        assert!(patched.contains("$(realpath \"$PR_REF\")/bin"));
        assert!(patched.contains("PR_REF: \"${{ github.event.pull_request.head.ref }}\""));
    }

    #[test]
    fn test_trusted_path_write() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: echo \"$HOME/.cargo/bin\" >> \"$GITHUB_PATH\"\n";
        let (diagnostics, _) = lint_rule(EnvPathInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
