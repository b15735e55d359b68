//! The `commit-sha` rule: `uses:` references should be pinned to a full
//! commit SHA. Symbolic refs (tags, branches) are mutable and can be
//! repointed at malicious code after review.

use std::sync::Arc;

use yamlcst::{Op, Patch};

use crate::catalog::RepoCatalog;
use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct CommitShaRule {
    base: RuleBase,
    catalog: Option<Arc<dyn RepoCatalog>>,
    current_job: String,
}

rule_meta!(
    CommitShaRule,
    "commit-sha",
    "action references are pinned to full commit SHAs"
);

impl CommitShaRule {
    pub(crate) fn new(catalog: Option<Arc<dyn RepoCatalog>>) -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            catalog,
            current_job: String::new(),
        }
    }
}

impl Visitor for CommitShaRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        let Some(git_ref) = action.git_ref.as_deref() else {
            return Ok(());
        };
        if action.ref_is_commit_sha() {
            return Ok(());
        }
        let uses = step.uses().expect("action step has a uses node");
        self.base.report(
            uses.pos,
            Kind::SecurityLow,
            format!(
                "action ref {git_ref:?} is not pinned to a full commit SHA; a mutable ref can be repointed after review"
            ),
        );

        if let Some(catalog) = &self.catalog {
            match catalog.resolve_ref_to_sha(&action.owner, &action.repo, git_ref) {
                Ok(Some(sha)) => {
                    let path = match &action.subpath {
                        Some(subpath) => format!("{}/{subpath}", action.slug()),
                        None => action.slug(),
                    };
                    self.base.fix(Fix {
                        rule: Self::NAME,
                        title: format!("pin {} to commit {}", action.slug(), &sha[..12.min(sha.len())]),
                        scope: FixScope::Step(self.current_job.clone(), step.index),
                        patches: vec![Patch {
                            route: step.route.with("uses"),
                            op: Op::Replace {
                                value: serde_yaml::Value::String(format!("{path}@{sha}")),
                                line_comment: Some(git_ref.to_string()),
                            },
                        }],
                    });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(action = %action.raw, "ref resolution failed: {err}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::{apply_fixes, lint_rule};

    struct FakeRepos;

    impl RepoCatalog for FakeRepos {
        fn branch_exists(&self, _: &str, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn tag_exists(&self, _: &str, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn resolve_ref_to_sha(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("8f4b7f84864484a7bf31766abe9204da3cbe65b3".to_string()))
        }

        fn tags_for_sha(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_symbolic_ref_flagged_and_pinned() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@v4\n";
        let (diagnostics, fixes) =
            lint_rule(CommitShaRule::new(Some(Arc::new(FakeRepos))), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityLow);

        let patched = apply_fixes(source, &fixes);
        assert_eq!(
            patched,
            "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3 # v4\n"
        );
    }

    #[test]
    fn test_pinned_ref_is_clean() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - uses: actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3\n";
        let (diagnostics, fixes) = lint_rule(CommitShaRule::new(None), source);
        assert_eq!(diagnostics.len(), 0);
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_offline_reports_without_fix() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - uses: actions/cache@v4\n";
        let (diagnostics, fixes) = lint_rule(CommitShaRule::new(None), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(fixes.is_empty());
    }
}
