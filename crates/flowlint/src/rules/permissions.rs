//! The `permissions` rule: scope names and values are valid, `write-all`
//! is flagged, and non-reusable workflows must pin down a top-level
//! `permissions:` block.

use yamlcst::{Op, Patch, Route};

use crate::finding::{Fix, FixScope, Kind};
use crate::models::{Job, Permissions, Workflow, PERMISSION_SCOPES};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct PermissionsRule {
    base: RuleBase,
}

rule_meta!(
    PermissionsRule,
    "permissions",
    "workflow permissions are explicit and well-formed"
);

impl PermissionsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }

    fn check_permissions(&mut self, permissions: &Permissions) {
        match permissions {
            Permissions::All(node) => match node.value.as_str() {
                "write-all" => self.base.report(
                    node.pos,
                    Kind::Style,
                    "\"write-all\" grants every scope write access; prefer per-scope permissions",
                ),
                "read-all" | "read" | "write" | "none" => {}
                other => self.base.report(
                    node.pos,
                    Kind::Semantic,
                    format!(
                        "unknown permissions value {other:?}; expected read-all, write-all, read, write or none"
                    ),
                ),
            },
            Permissions::Scopes { scopes, .. } => {
                for (scope, value) in scopes {
                    if !PERMISSION_SCOPES.contains(&scope.as_str()) {
                        self.base.report(
                            value.pos,
                            Kind::Semantic,
                            format!("unknown permission scope {scope:?}"),
                        );
                    }
                    if !matches!(value.value.as_str(), "read" | "write" | "none") {
                        self.base.report(
                            value.pos,
                            Kind::Semantic,
                            format!(
                                "unknown permission value {:?} for scope {scope:?}; expected read, write or none",
                                value.value
                            ),
                        );
                    }
                }
            }
        }
    }
}

impl Visitor for PermissionsRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        match &workflow.permissions {
            Some(permissions) => self.check_permissions(permissions),
            // Reusable workflows inherit the caller's token.
            None if workflow.is_reusable() => {}
            None => {
                self.base.report(
                    workflow.pos,
                    Kind::Style,
                    "top-level \"permissions\" is not set; the default token grants broad access",
                );
                self.base.fix(Fix {
                    rule: Self::NAME,
                    title: "add an empty top-level permissions block".to_string(),
                    scope: FixScope::Workflow,
                    patches: vec![Patch {
                        route: Route::new(),
                        op: Op::Add {
                            key: "permissions".to_string(),
                            value: serde_yaml::Value::Mapping(Default::default()),
                            head_comment: Some(
                                "TODO: grant the minimal scopes this workflow needs".to_string(),
                            ),
                        },
                    }],
                });
            }
        }
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if let Some(permissions) = &job.permissions {
            self.check_permissions(permissions);
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
    fn test_missing_top_level_permissions() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n";
        let (diagnostics, fixes) = lint_rule(PermissionsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::Style);

        let patched = apply_fixes(source, &fixes);
        assert_eq!(
            patched,
            "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n# TODO: grant the minimal scopes this workflow needs\npermissions: {}\n"
        );

        // The fix output no longer triggers the rule.
        let (diagnostics, _) = lint_rule(PermissionsRule::new(), &patched);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_reusable_workflows_are_exempt() {
        let source = "on: workflow_call\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(PermissionsRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_scope_validation() {
        let source = "on: push\npermissions:\n  contents: read\n  typo-scope: read\n  id-token: admin\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(PermissionsRule::new(), source);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].message.contains("typo-scope"));
        assert!(diagnostics[1].message.contains("admin"));
    }

    #[test]
    fn test_write_all_warning() {
        let source = "on: push\npermissions: write-all\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(PermissionsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::Style);
    }
}
