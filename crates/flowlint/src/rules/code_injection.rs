//! The code injection rules: untrusted context values expanded directly
//! into `run:` scripts or `actions/github-script` bodies.
//!
//! Exactly one of the two idents fires per workflow: workflows with any
//! privileged trigger report `code-injection-critical`, everything else
//! reports `code-injection-medium`.

use crate::finding::{Diagnostic, Fix, Kind};
use crate::models::{Job, Step, Workflow};
use crate::rules::injection::{inputs_untrusted, lift_to_env_fix, untrusted_uses};
use crate::rules::{Rule, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct CodeInjectionRule {
    base: RuleBase,
    privileged: bool,
    inputs_untrusted: bool,
    current_job: String,
}

impl CodeInjectionRule {
    pub(crate) const CRITICAL: &'static str = "code-injection-critical";
    pub(crate) const MEDIUM: &'static str = "code-injection-medium";

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

    fn kind(&self) -> Kind {
        if self.privileged {
            Kind::SecurityCritical
        } else {
            Kind::SecurityMedium
        }
    }
}

impl Visitor for CodeInjectionRule {
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
        if let Some(script) = step.run() {
            let uses = untrusted_uses(script, self.inputs_untrusted);
            for usage in &uses {
                self.base.report_as(
                    self.ident(),
                    usage.expr.pos,
                    self.kind(),
                    format!(
                        "untrusted input {:?} is expanded directly into a shell script; an attacker controls its value",
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
            return Ok(());
        }

        // `actions/github-script` evaluates its `script:` input as code.
        let is_github_script = step
            .action_ref()
            .is_some_and(|action| action.matches("actions/github-script"));
        if is_github_script {
            if let Some(script) = step.input("script") {
                let uses = untrusted_uses(script, self.inputs_untrusted);
                for usage in &uses {
                    self.base.report_as(
                        self.ident(),
                        usage.expr.pos,
                        self.kind(),
                        format!(
                            "untrusted input {:?} is expanded directly into a github-script body",
                            usage.path
                        ),
                    );
                }
                if !uses.is_empty() {
                    let fix = lift_to_env_fix(
                        self.ident(),
                        &self.current_job,
                        step,
                        step.route.with("with").with("script"),
                        &uses,
                        |name| format!("process.env.{name}"),
                    );
                    self.base.fix(fix);
                }
            }
        }
        Ok(())
    }
}

impl Rule for CodeInjectionRule {
    fn name(&self) -> &'static str {
        self.ident()
    }

    fn description(&self) -> &'static str {
        "untrusted inputs are not expanded into executable code"
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
    fn test_privileged_trigger_is_critical() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ github.event.pull_request.title }}\n";
        let (diagnostics, fixes) = lint_rule(CodeInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "code-injection-critical");
        assert_eq!(diagnostics[0].kind, Kind::SecurityCritical);

        let patched = apply_fixes(source, &fixes);
        assert_eq!(
            patched,
            "on: pull_request_target\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo \"$PR_TITLE\"\n        env:\n          PR_TITLE: \"${{ github.event.pull_request.title }}\"\n"
        );

        // The fix output is quiet.
        let (diagnostics, _) = lint_rule(CodeInjectionRule::new(), &patched);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_normal_trigger_is_medium() {
        let source = "on: pull_request\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ github.event.pull_request.title }}\n";
        let (diagnostics, _) = lint_rule(CodeInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "code-injection-medium");
        assert_eq!(diagnostics[0].kind, Kind::SecurityMedium);
    }

    #[test]
    fn test_github_script_body() {
        let source = "on: issue_comment\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/github-script@v7\n        with:\n          script: console.log(`${{ github.event.comment.body }}`)\n";
        let (diagnostics, fixes) = lint_rule(CodeInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].rule, "code-injection-critical");

        let patched = apply_fixes(source, &fixes);
        assert!(patched.contains("console.log(`process.env.COMMENT_BODY`)"));
        assert!(patched.contains("COMMENT_BODY: \"${{ github.event.comment.body }}\""));
    }

    #[test]
    fn test_trusted_expressions_are_quiet() {
        let source = "on: pull_request_target\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ github.sha }} ${{ github.event.pull_request.number }}\n";
        let (diagnostics, _) = lint_rule(CodeInjectionRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
