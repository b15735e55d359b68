//! The `secrets-in-artifacts` rule: artifact uploads that sweep up
//! credentials. Broad paths on pre-v4 uploaders include hidden files
//! (`.git/config` carries the checkout token), and v4+ uploads opt back
//! in with `include-hidden-files: true`.

use indexmap::IndexMap;
use yamlcst::{Op, Patch};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{ActionRef, Job, Step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

const BROAD_PATHS: &[&str] = &[".", "./", "*", "**", "**/*"];
const SENSITIVE_PREFIXES: &[&str] = &[".git", ".env", ".npmrc", ".aws", ".kube", ".ssh"];

pub(crate) struct SecretsInArtifactsRule {
    base: RuleBase,
    current_job: String,
}

rule_meta!(
    SecretsInArtifactsRule,
    "secrets-in-artifacts",
    "artifact uploads do not capture credentials"
);

impl SecretsInArtifactsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            current_job: String::new(),
        }
    }

    /// The major version of the uploader, when the ref is a version tag.
    fn major_version(action: &ActionRef) -> Option<u32> {
        let git_ref = action.git_ref.as_deref()?;
        let digits = git_ref.strip_prefix('v')?;
        digits
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
    }

    fn is_sensitive(path: &str) -> bool {
        let name = path.trim_start_matches("./");
        SENSITIVE_PREFIXES
            .iter()
            .any(|prefix| name == *prefix || name.starts_with(&format!("{prefix}/")))
            || name.starts_with(".env")
            || name.starts_with("credentials.")
            || name.starts_with("secrets.")
    }
}

impl Visitor for SecretsInArtifactsRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        if !action.matches("actions/upload-artifact") {
            return Ok(());
        }
        let Some(path) = step.input("path") else {
            return Ok(());
        };

        let pre_v4 = Self::major_version(&action).is_some_and(|major| major < 4);
        let hidden_files_opt_in = step
            .input("include-hidden-files")
            .is_some_and(|value| value.value == "true");

        for line in path.value.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if BROAD_PATHS.contains(&line) {
                if pre_v4 {
                    self.base.report(
                        path.pos,
                        Kind::SecurityHigh,
                        format!(
                            "uploading {line:?} with a pre-v4 uploader includes hidden files such as .git/config credentials"
                        ),
                    );
                    self.base.fix(Fix {
                        rule: Self::NAME,
                        title: "exclude hidden files from the uploaded artifact".to_string(),
                        scope: FixScope::Step(self.current_job.clone(), step.index),
                        patches: vec![Patch {
                            route: step.route.clone(),
                            op: Op::MergeInto {
                                key: "with".to_string(),
                                updates: IndexMap::from([(
                                    "include-hidden-files".to_string(),
                                    serde_yaml::Value::Bool(false),
                                )]),
                            },
                        }],
                    });
                } else if hidden_files_opt_in {
                    self.base.report(
                        path.pos,
                        Kind::SecurityHigh,
                        format!(
                            "uploading {line:?} with \"include-hidden-files: true\" captures dotfiles such as .git/config credentials"
                        ),
                    );
                    self.base.fix(Fix {
                        rule: Self::NAME,
                        title: "exclude hidden files from the uploaded artifact".to_string(),
                        scope: FixScope::Step(self.current_job.clone(), step.index),
                        patches: vec![Patch {
                            route: step.route.with("with").with("include-hidden-files"),
                            op: Op::Replace {
                                value: serde_yaml::Value::Bool(false),
                                line_comment: None,
                            },
                        }],
                    });
                }
            } else if Self::is_sensitive(line) {
                self.base.report(
                    path.pos,
                    Kind::SecurityHigh,
                    format!("artifact explicitly uploads the sensitive path {line:?}"),
                );
            }
        }
        Ok(())
    }
}
