//! The `id` rule: job and step ids are well-formed and unique.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::finding::Kind;
use crate::models::{Job, Position, Step, StringNode, Workflow};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

pub(crate) struct IdRule {
    base: RuleBase,
    job_ids: HashMap<String, Position>,
    step_ids: HashMap<String, Position>,
}

rule_meta!(IdRule, "id", "job and step ids are well-formed and unique");

impl IdRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            job_ids: HashMap::new(),
            step_ids: HashMap::new(),
        }
    }

    fn check_id(&mut self, what: &str, node: &StringNode) {
        if node.is_expression() {
            return;
        }
        if !ID_PATTERN.is_match(&node.value) {
            self.base.report(
                node.pos,
                Kind::Semantic,
                format!(
                    "invalid {what} {:?}; ids must start with a letter or '_' and contain only alphanumeric characters, '-' or '_'",
                    node.value
                ),
            );
        }
    }

    fn check_unique(
        base: &mut RuleBase,
        seen: &mut HashMap<String, Position>,
        what: &str,
        node: &StringNode,
    ) {
        let folded = node.value.to_ascii_lowercase();
        match seen.get(&folded) {
            Some(first) => base.report(
                node.pos,
                Kind::Semantic,
                format!(
                    "{what} {:?} duplicates the id at line {}, column {} (ids are case-insensitive)",
                    node.value, first.line, first.column
                ),
            ),
            None => {
                seen.insert(folded, node.pos);
            }
        }
    }
}

impl Visitor for IdRule {
    fn visit_workflow_pre(&mut self, _workflow: &Workflow) -> anyhow::Result<()> {
        self.job_ids.clear();
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.step_ids.clear();
        let id = job.id.clone();
        self.check_id("job id", &id);
        Self::check_unique(&mut self.base, &mut self.job_ids, "job id", &id);
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(id) = &step.id {
            let id = id.clone();
            self.check_id("step id", &id);
            Self::check_unique(&mut self.base, &mut self.step_ids, "step id", &id);
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
    fn test_invalid_and_duplicate_ids() {
        let source = "on: push\njobs:\n  1bad:\n    runs-on: x\n    steps:\n      - id: setup\n        run: a\n      - id: SETUP\n        run: b\n";
        let (diagnostics, _) = lint_rule(IdRule::new(), source);
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics[0].message.contains("invalid job id \"1bad\""));
        assert!(diagnostics[1].message.contains("duplicates the id"));
    }

    #[test]
    fn test_step_ids_reset_per_job() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - id: build\n        run: a\n  b:\n    runs-on: x\n    steps:\n      - id: build\n        run: b\n";
        let (diagnostics, _) = lint_rule(IdRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
