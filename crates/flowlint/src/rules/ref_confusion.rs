//! The `ref-confusion` rule: a symbolic ref that names both a branch and
//! a tag. Which one the runner picks is an implementation detail, and an
//! attacker who can push one of the two can swap the resolved code.

use std::sync::Arc;

use yamlcst::{Op, Patch};

use crate::catalog::RepoCatalog;
use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct RefConfusionRule {
    base: RuleBase,
    catalog: Option<Arc<dyn RepoCatalog>>,
    current_job: String,
}

rule_meta!(
    RefConfusionRule,
    "ref-confusion",
    "action refs are not ambiguous between branches and tags"
);

impl RefConfusionRule {
    pub(crate) fn new(catalog: Option<Arc<dyn RepoCatalog>>) -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            catalog,
            current_job: String::new(),
        }
    }
}

impl Visitor for RefConfusionRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(catalog) = self.catalog.clone() else {
            return Ok(());
        };
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        let Some(git_ref) = action.git_ref.as_deref() else {
            return Ok(());
        };
        if action.ref_is_commit_sha() {
            return Ok(());
        }

        let ambiguous = match (
            catalog.branch_exists(&action.owner, &action.repo, git_ref),
            catalog.tag_exists(&action.owner, &action.repo, git_ref),
        ) {
            (Ok(branch), Ok(tag)) => branch && tag,
            (branch, tag) => {
                if let Err(err) = branch.and(tag) {
                    tracing::debug!(action = %action.raw, "ref lookup failed: {err}");
                }
                false
            }
        };
        if !ambiguous {
            return Ok(());
        }

        let uses = step.uses().expect("action step has uses");
        self.base.report(
            uses.pos,
            Kind::SecurityMedium,
            format!("ref {git_ref:?} is both a branch and a tag; which one runs is ambiguous"),
        );

        match catalog.resolve_ref_to_sha(&action.owner, &action.repo, git_ref) {
            Ok(Some(sha)) => {
                let path = match &action.subpath {
                    Some(subpath) => format!("{}/{subpath}", action.slug()),
                    None => action.slug(),
                };
                self.base.fix(Fix {
                    rule: Self::NAME,
                    title: "pin the ambiguous ref to a commit".to_string(),
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::lint_rule;

    struct Ambiguous;

    impl RepoCatalog for Ambiguous {
        fn branch_exists(&self, _: &str, _: &str, name: &str) -> anyhow::Result<bool> {
            Ok(name == "main" || name == "v2")
        }

        fn tag_exists(&self, _: &str, _: &str, name: &str) -> anyhow::Result<bool> {
            Ok(name == "v2" || name == "v2.1.0")
        }

        fn resolve_ref_to_sha(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Option<String>> {
            Ok(Some("1111111111111111111111111111111111111111".to_string()))
        }

        fn tags_for_sha(&self, _: &str, _: &str, _: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_ambiguous_ref() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: octo/tool@v2\n      - uses: octo/tool@v2.1.0\n";
        let (diagnostics, fixes) = lint_rule(RefConfusionRule::new(Some(Arc::new(Ambiguous))), source);
        // Only `v2` is both a branch and a tag.
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 6);
        assert_eq!(fixes.len(), 1);
    }

    #[test]
    fn test_offline_is_silent() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: octo/tool@v2\n";
        let (diagnostics, _) = lint_rule(RefConfusionRule::new(None), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
