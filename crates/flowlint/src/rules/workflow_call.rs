//! The `workflow-call` rule: local reusable workflow calls resolve, and
//! the provided inputs match the callee's declared interface.

use std::sync::Arc;

use crate::finding::Kind;
use crate::models::{CallSecrets, InputType, Job};
use crate::reusable::ReusableWorkflowCache;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct WorkflowCallRule {
    base: RuleBase,
    cache: Arc<ReusableWorkflowCache>,
}

rule_meta!(
    WorkflowCallRule,
    "workflow-call",
    "reusable workflow calls match the callee's interface"
);

impl WorkflowCallRule {
    pub(crate) fn new(cache: Arc<ReusableWorkflowCache>) -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            cache,
        }
    }
}

impl Visitor for WorkflowCallRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        let Some(call) = &job.workflow_call else {
            return Ok(());
        };
        if !call.uses.value.starts_with("./") {
            // Remote reusable workflows are not resolvable here.
            return Ok(());
        }
        let Some(metadata) = self.cache.metadata_for(&call.uses.value) else {
            self.base.report(
                call.uses.pos,
                Kind::Semantic,
                format!(
                    "reusable workflow {:?} could not be resolved as a local workflow with \"on: workflow_call\"",
                    call.uses.value
                ),
            );
            return Ok(());
        };

        for (name, value) in &call.inputs {
            let folded = name.to_ascii_lowercase();
            let Some(declared) = metadata.inputs.get(&folded) else {
                self.base.report(
                    value.pos,
                    Kind::Semantic,
                    format!(
                        "input {name:?} is not declared by the reusable workflow {:?}",
                        call.uses.value
                    ),
                );
                continue;
            };
            if value.contains_expression() {
                continue;
            }
            let compatible = match declared.ty {
                Some(InputType::Boolean) => matches!(value.value.as_str(), "true" | "false"),
                Some(InputType::Number) => value.value.parse::<f64>().is_ok(),
                _ => true,
            };
            if !compatible {
                let expected = match declared.ty {
                    Some(InputType::Boolean) => "bool",
                    Some(InputType::Number) => "number",
                    _ => "string",
                };
                self.base.report(
                    value.pos,
                    Kind::Semantic,
                    format!(
                        "input {name:?} must be {expected} but got {:?}",
                        value.value
                    ),
                );
            }
        }

        for (name, declared) in &metadata.inputs {
            if declared.required
                && !call
                    .inputs
                    .keys()
                    .any(|provided| provided.eq_ignore_ascii_case(name))
            {
                self.base.report(
                    call.uses.pos,
                    Kind::Semantic,
                    format!("required input {name:?} is missing from this workflow call"),
                );
            }
        }

        if !matches!(call.secrets, CallSecrets::Inherit(_)) {
            let provided: Vec<String> = match &call.secrets {
                CallSecrets::Map(map) => map.keys().map(|k| k.to_ascii_lowercase()).collect(),
                _ => Vec::new(),
            };
            for (name, required) in &metadata.secrets {
                if *required && !provided.contains(&name.to_ascii_lowercase()) {
                    self.base.report(
                        call.uses.pos,
                        Kind::Semantic,
                        format!("required secret {name:?} is missing from this workflow call"),
                    );
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
    use crate::rules::testsupport::lint_rule;

    fn rule_with_missing_root() -> WorkflowCallRule {
        WorkflowCallRule::new(Arc::new(ReusableWorkflowCache::new(
            "/nonexistent-root".into(),
        )))
    }

    #[test]
    fn test_unresolvable_local_workflow() {
        let source = "on: push\njobs:\n  call:\n    uses: ./.github/workflows/missing.yml\n";
        let (diagnostics, _) = lint_rule(rule_with_missing_root(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("could not be resolved"));
    }

    #[test]
    fn test_remote_uses_is_skipped() {
        let source = "on: push\njobs:\n  call:\n    uses: octo/workflows/.github/workflows/ci.yml@v1\n";
        let (diagnostics, _) = lint_rule(rule_with_missing_root(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_interface_checks_against_real_file() {
        let dir = std::env::temp_dir().join("flowlint-workflow-call-test");
        let workflows = dir.join(".github/workflows");
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(
            workflows.join("reuse.yml"),
            "on:\n  workflow_call:\n    inputs:\n      version:\n        type: number\n        required: true\n      flag:\n        type: boolean\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n",
        )
        .unwrap();

        let cache = Arc::new(ReusableWorkflowCache::new(
            camino::Utf8PathBuf::from_path_buf(dir).unwrap(),
        ));
        let source = "on: push\njobs:\n  call:\n    uses: ./.github/workflows/reuse.yml\n    with:\n      flag: nope\n      unknown: 1\n";
        let (diagnostics, _) = lint_rule(WorkflowCallRule::new(cache), source);
        let messages: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(diagnostics.len(), 3, "{messages:?}");
        assert!(messages.iter().any(|m| m.contains("\"unknown\" is not declared")));
        assert!(messages.iter().any(|m| m.contains("\"flag\" must be bool")));
        assert!(messages.iter().any(|m| m.contains("required input \"version\"")));
    }
}
