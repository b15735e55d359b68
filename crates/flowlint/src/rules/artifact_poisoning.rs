//! The artifact poisoning rules: `download-artifact` steps that unpack
//! where they can overwrite the checked out workspace.

use indexmap::IndexMap;
use yamlcst::{Op, Patch};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Step, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

const SAFE_DOWNLOAD_PATH: &str = "${{ runner.temp }}/artifacts";

fn is_download_artifact(step: &Step) -> bool {
    step.action_ref()
        .is_some_and(|action| action.matches("actions/download-artifact"))
}

/// `artifact-poisoning-critical`: no explicit `path:` at all, so the
/// artifact unpacks straight into the workspace.
pub(crate) struct ArtifactPoisoningCriticalRule {
    base: RuleBase,
    current_job: String,
}

rule_meta!(
    ArtifactPoisoningCriticalRule,
    "artifact-poisoning-critical",
    "downloaded artifacts cannot overwrite the workspace"
);

impl ArtifactPoisoningCriticalRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            current_job: String::new(),
        }
    }
}

impl Visitor for ArtifactPoisoningCriticalRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if !is_download_artifact(step) || step.input("path").is_some() {
            return Ok(());
        }
        let uses = step.uses().expect("download-artifact step has uses");
        self.base.report(
            uses.pos,
            Kind::SecurityCritical,
            "download-artifact without an explicit \"path:\" unpacks into the workspace and can overwrite checked-out files",
        );
        self.base.fix(Fix {
            rule: Self::NAME,
            title: "download the artifact into a scratch directory".to_string(),
            scope: FixScope::Step(self.current_job.clone(), step.index),
            patches: vec![Patch {
                route: step.route.clone(),
                op: Op::MergeInto {
                    key: "with".to_string(),
                    updates: IndexMap::from([(
                        "path".to_string(),
                        serde_yaml::Value::String(SAFE_DOWNLOAD_PATH.to_string()),
                    )]),
                },
            }],
        });
        Ok(())
    }
}

/// `artifact-poisoning-medium`: an explicit `path:` that still lands in
/// the workspace root, in workflows without privileged triggers.
pub(crate) struct ArtifactPoisoningMediumRule {
    base: RuleBase,
    privileged: bool,
    current_job: String,
}

rule_meta!(
    ArtifactPoisoningMediumRule,
    "artifact-poisoning-medium",
    "downloaded artifacts land outside the workspace root"
);

impl ArtifactPoisoningMediumRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            privileged: false,
            current_job: String::new(),
        }
    }
}

impl Visitor for ArtifactPoisoningMediumRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.privileged = workflow.has_privileged_trigger();
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if self.privileged || !is_download_artifact(step) {
            return Ok(());
        }
        let Some(path) = step.input("path") else {
            return Ok(());
        };
        let value = path.value.trim();
        if matches!(value, "." | "./") || value == "${{ github.workspace }}" {
            self.base.report(
                path.pos,
                Kind::SecurityMedium,
                format!("artifact path {value:?} is the workspace root; downloaded files can shadow repository files"),
            );
            self.base.fix(Fix {
                rule: Self::NAME,
                title: "download the artifact into a scratch directory".to_string(),
                scope: FixScope::Step(self.current_job.clone(), step.index),
                patches: vec![Patch {
                    route: step.route.with("with").with("path"),
                    op: Op::Replace {
                        value: serde_yaml::Value::String(SAFE_DOWNLOAD_PATH.to_string()),
                        line_comment: None,
                    },
                }],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::{apply_fixes, lint_rule};

    #[test]
    fn test_missing_path_is_critical() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/download-artifact@v4\n        with:\n          name: dist\n";
        let (diagnostics, fixes) = lint_rule(ArtifactPoisoningCriticalRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityCritical);

        let patched = apply_fixes(source, &fixes);
        assert_eq!(
            patched,
            "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/download-artifact@v4\n        with:\n          name: dist\n          path: \"${{ runner.temp }}/artifacts\"\n"
        );

        let (diagnostics, _) = lint_rule(ArtifactPoisoningCriticalRule::new(), &patched);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_explicit_path_is_not_critical() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/download-artifact@v4\n        with:\n          path: out\n";
        let (diagnostics, _) = lint_rule(ArtifactPoisoningCriticalRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_workspace_root_path_is_medium() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/download-artifact@v4\n        with:\n          path: .\n";
        let (diagnostics, fixes) = lint_rule(ArtifactPoisoningMediumRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityMedium);
        assert_eq!(fixes.len(), 1);
    }
}
