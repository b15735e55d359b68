//! The `timeout-minutes` rule: jobs that run steps should bound their
//! runtime. The platform default of 360 minutes burns runner time and
//! widens the window of any compromised run.

use crate::finding::Kind;
use crate::models::Job;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct TimeoutMinutesRule {
    base: RuleBase,
}

rule_meta!(
    TimeoutMinutesRule,
    "timeout-minutes",
    "jobs set an explicit timeout"
);

impl TimeoutMinutesRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
        }
    }
}

impl Visitor for TimeoutMinutesRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        if job.is_reusable_call() || job.steps.is_empty() {
            return Ok(());
        }
        if job.timeout_minutes.is_none() {
            self.base.report(
                job.pos,
                Kind::Style,
                format!(
                    "job {:?} has no \"timeout-minutes\"; the default of 360 minutes is dangerously long",
                    job.id.value
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
    fn test_missing_timeout() {
        let source = "on: push\njobs:\n  slow:\n    runs-on: x\n    steps:\n      - run: make\n  bounded:\n    runs-on: x\n    timeout-minutes: 15\n    steps:\n      - run: make\n";
        let (diagnostics, _) = lint_rule(TimeoutMinutesRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("\"slow\""));
        assert_eq!(diagnostics[0].kind, Kind::Style);
    }

    #[test]
    fn test_reusable_call_jobs_are_exempt() {
        let source = "on: push\njobs:\n  call:\n    uses: ./.github/workflows/reuse.yml\n";
        let (diagnostics, _) = lint_rule(TimeoutMinutesRule::new(), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
