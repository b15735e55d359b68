//! The `deprecated-commands` rule: workflow commands that were disabled
//! for security reasons (`set-output`, `save-state`, `set-env`,
//! `add-path`) still show up in scripts copied from old documentation.

use std::sync::LazyLock;

use regex::Regex;

use crate::finding::Kind;
use crate::models::Step;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static DEPRECATED_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::(set-output|save-state|set-env|add-path)\b").unwrap());

pub(crate) struct DeprecatedCommandsRule {
    base: RuleBase,
}

rule_meta!(
    DeprecatedCommandsRule,
    "deprecated-commands",
    "deprecated workflow commands are not used"
);

impl DeprecatedCommandsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }
}

impl Visitor for DeprecatedCommandsRule {
    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(script) = step.run() else {
            return Ok(());
        };
        for found in DEPRECATED_COMMAND.find_iter(&script.value) {
            let command = &script.value[found.start() + 2..found.end()];
            let replacement = match command {
                "set-output" => "write to $GITHUB_OUTPUT",
                "save-state" => "write to $GITHUB_STATE",
                "set-env" => "write to $GITHUB_ENV",
                _ => "write to $GITHUB_PATH",
            };
            self.base.report(
                script.position_at(found.start()),
                Kind::Deprecation,
                format!("workflow command \"::{command}\" is deprecated; {replacement} instead"),
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
    fn test_detects_commands_in_block_scalars() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: |\n          echo hello\n          echo \"::set-output name=x::1\"\n";
        let (diagnostics, _) = lint_rule(DeprecatedCommandsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::Deprecation);
        assert!(diagnostics[0].message.contains("::set-output"));
        // The command sits on the second content line of the block.
        assert_eq!(diagnostics[0].line, 8);
    }

    #[test]
    fn test_clean_script() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: echo \"x=1\" >> \"$GITHUB_OUTPUT\"\n";
        let (diagnostics, _) = lint_rule(DeprecatedCommandsRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
