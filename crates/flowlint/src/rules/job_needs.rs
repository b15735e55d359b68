//! The `job-needs` rule: every `needs` target exists, is not repeated,
//! and the dependency graph is acyclic.

use std::collections::{HashMap, HashSet};

use crate::finding::Kind;
use crate::models::Workflow;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct JobNeedsRule {
    base: RuleBase,
}

rule_meta!(
    JobNeedsRule,
    "job-needs",
    "needs targets exist and form no cycles"
);

impl JobNeedsRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }
}

impl Visitor for JobNeedsRule {
    fn visit_workflow_post(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        let ids: HashMap<String, &str> = workflow
            .jobs
            .keys()
            .map(|id| (id.to_ascii_lowercase(), id.as_str()))
            .collect();

        // Edges: job -> the jobs it needs, lowercased ids.
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for (id, job) in &workflow.jobs {
            let mut seen: HashSet<String> = HashSet::new();
            let mut targets = Vec::new();
            for needed in &job.needs {
                let folded = needed.value.to_ascii_lowercase();
                if !seen.insert(folded.clone()) {
                    self.base.report(
                        needed.pos,
                        Kind::Semantic,
                        format!("job {:?} is listed in \"needs\" more than once", needed.value),
                    );
                    continue;
                }
                if !ids.contains_key(&folded) {
                    self.base.report(
                        needed.pos,
                        Kind::Semantic,
                        format!(
                            "job {:?} required by job {:?} does not exist in this workflow",
                            needed.value, id
                        ),
                    );
                    continue;
                }
                targets.push(folded);
            }
            edges.insert(id.to_ascii_lowercase(), targets);
        }

        // Kahn's algorithm; whatever cannot be scheduled is part of a cycle.
        let mut in_degree: HashMap<&str, usize> =
            edges.keys().map(|id| (id.as_str(), 0)).collect();
        for targets in edges.values() {
            for target in targets {
                if let Some(count) = in_degree.get_mut(target.as_str()) {
                    *count += 1;
                }
            }
        }
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut scheduled = 0;
        while let Some(id) = queue.pop() {
            scheduled += 1;
            for target in &edges[id] {
                let count = in_degree.get_mut(target.as_str()).expect("known job id");
                *count -= 1;
                if *count == 0 {
                    queue.push(target.as_str());
                }
            }
        }

        if scheduled < edges.len() {
            let mut cyclic: Vec<&str> = in_degree
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(id, _)| ids[*id])
                .collect();
            cyclic.sort_unstable();
            let first = cyclic
                .first()
                .and_then(|id| workflow.jobs.get(*id))
                .map(|job| job.pos)
                .unwrap_or(workflow.pos);
            self.base.report(
                first,
                Kind::Semantic,
                format!(
                    "cyclic dependency detected in \"needs\" among jobs: {}",
                    cyclic.join(", ")
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
    fn test_missing_target() {
        let source = "on: push\njobs:\n  deploy:\n    runs-on: x\n    needs: [build]\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(JobNeedsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("\"build\""));
        assert_eq!(diagnostics[0].kind, Kind::Semantic);
    }

    #[test]
    fn test_cycle() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    needs: [b]\n    steps:\n      - run: ok\n  b:\n    runs-on: x\n    needs: [a]\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(JobNeedsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("cyclic dependency"));
        assert!(diagnostics[0].message.contains("a, b"));
    }

    #[test]
    fn test_case_insensitive_targets() {
        let source = "on: push\njobs:\n  Build:\n    runs-on: x\n    steps:\n      - run: ok\n  test:\n    runs-on: x\n    needs: [build]\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(JobNeedsRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }

    #[test]
    fn test_duplicate_needs_entry() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: ok\n  b:\n    runs-on: x\n    needs: [a, A]\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(JobNeedsRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("more than once"));
    }
}
