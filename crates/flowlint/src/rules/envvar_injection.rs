//! The environment variable injection rules: untrusted values written to
//! the `$GITHUB_ENV` append stream. A poisoned `GITHUB_ENV` write can
//! define variables like `LD_PRELOAD` for every later step in the job.

use std::sync::LazyLock;

use regex::Regex;

use crate::finding::{Diagnostic, Fix, Kind};
use crate::models::{Job, Step, StringNode, Workflow};
use crate::rules::injection::{inputs_untrusted, lift_to_env_fix, untrusted_uses, UntrustedUse};
use crate::rules::{Rule, RuleBase};
use crate::visitor::Visitor;

static GITHUB_ENV_WRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#">>\s*["']?\$\{?GITHUB_ENV\}?["']?"#).unwrap());

/// Finds untrusted expressions on script lines that append to the stream
/// matched by `pattern`.
pub(crate) fn untrusted_writes(
    script: &StringNode,
    pattern: &Regex,
    inputs_untrusted: bool,
) -> Vec<UntrustedUse> {
    let all = untrusted_uses(script, inputs_untrusted);
    if all.is_empty() {
        return all;
    }

    let mut ranges = Vec::new();
    let mut offset = 0;
    for line in script.value.split_inclusive('\n') {
        if pattern.is_match(line) {
            ranges.push(offset..offset + line.len());
        }
        offset += line.len();
    }

    all.into_iter()
        .filter(|usage| ranges.iter().any(|range| range.contains(&usage.expr.offset)))
        .collect()
}

pub(crate) struct EnvVarInjectionRule {
    base: RuleBase,
    privileged: bool,
    inputs_untrusted: bool,
    current_job: String,
}

impl EnvVarInjectionRule {
    pub(crate) const CRITICAL: &'static str = "envvar-injection-critical";
    pub(crate) const MEDIUM: &'static str = "envvar-injection-medium";

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

impl Visitor for EnvVarInjectionRule {
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
        let uses = untrusted_writes(script, &GITHUB_ENV_WRITE, self.inputs_untrusted);
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
                    "untrusted input {:?} is written to $GITHUB_ENV; it can define variables for every later step",
                    usage.path
                ),
            );
        }
        if !uses.is_empty() {
            let fix = lift_to_env_fix(
                self.ident(),
                &self.current_job,
                step,
                step.route.with("run"),
                &uses,
                |name| format!("\"${name}\""),
            );
            self.base.fix(fix);
        }
        Ok(())
    }
}

impl Rule for EnvVarInjectionRule {
    fn name(&self) -> &'static str {
        self.ident()
    }

    fn description(&self) -> &'static str {
        "untrusted inputs are not appended to $GITHUB_ENV"
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
    use crate::rules::testsupport::lint_rule;

    #[test]
    fn test_untrusted_env_write() {
        let source = "on: issues\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: |\n          echo \"TITLE=${{ github.event.issue.title }}\" >> $GITHUB_ENV\n";
        let (diagnostics, fixes) = lint_rule(EnvVarInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "envvar-injection-critical");
        assert_eq!(fixes.len(), 1);
    }

    #[test]
    fn test_untrusted_expr_on_other_line_is_ignored() {
        let source = "on: issues\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: |\n          echo ${{ github.event.issue.title }}\n          echo \"X=1\" >> $GITHUB_ENV\n";
        let (diagnostics, _) = lint_rule(EnvVarInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_write_pattern_variants() {
        for target in ["$GITHUB_ENV", "\"$GITHUB_ENV\"", "${GITHUB_ENV}", "'$GITHUB_ENV'"] {
            let line = format!("echo \"X=${{{{ github.head_ref }}}}\" >> {target}");
            let source = format!(
                "on: pull_request\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: {line}\n"
            );
            let (diagnostics, _) = lint_rule(EnvVarInjectionRule::new(), &source);
            assert_eq!(diagnostics.len(), 1, "{target}");
            assert_eq!(diagnostics[0].rule, "envvar-injection-medium");
        }
    }
}
