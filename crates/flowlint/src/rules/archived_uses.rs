//! The `archived-uses` rule: actions whose repositories are archived.
//! Archived repositories receive no fixes, including security fixes.

use crate::finding::Kind;
use crate::models::Step;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

/// Repositories known to be archived upstream.
const ARCHIVED_REPOSITORIES: &[&str] = &[
    "actions/create-release",
    "actions/upload-release-asset",
    "actions/setup-ruby",
    "atomist-skills/tag-action",
    "paambaati/codeclimate-action",
];

pub(crate) struct ArchivedUsesRule {
    base: RuleBase,
}

rule_meta!(
    ArchivedUsesRule,
    "archived-uses",
    "actions do not come from archived repositories"
);

impl ArchivedUsesRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }
}

impl Visitor for ArchivedUsesRule {
    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        if ARCHIVED_REPOSITORIES
            .iter()
            .any(|archived| action.matches(archived))
        {
            let uses = step.uses().expect("action step has uses");
            self.base.report(
                uses.pos,
                Kind::SecurityLow,
                format!(
                    "repository {} is archived and receives no fixes, including security fixes",
                    action.slug()
                ),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::lint_rule;

    #[test]
    fn test_archived_action() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: actions/create-release@v1\n      - uses: actions/checkout@v4\n";
        let (diagnostics, _) = lint_rule(ArchivedUsesRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("actions/create-release"));
        assert_eq!(diagnostics[0].kind, Kind::SecurityLow);
    }
}
