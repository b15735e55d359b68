//! The `known-vulnerable-actions` rule: actions with published security
//! advisories. Advisory and repository lookups are remote; when offline
//! the rule is silent rather than wrong.

use std::sync::Arc;

use yamlcst::{Op, Patch};

use crate::catalog::{longest_tag, Advisory, AdvisoryCatalog, RepoCatalog};
use crate::finding::{Fix, FixScope, Kind};
use crate::models::{ActionRef, Job, Step};
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct KnownVulnerableActionsRule {
    base: RuleBase,
    advisories: Option<Arc<dyn AdvisoryCatalog>>,
    repos: Option<Arc<dyn RepoCatalog>>,
    current_job: String,
}

rule_meta!(
    KnownVulnerableActionsRule,
    "known-vulnerable-actions",
    "actions have no published security advisories"
);

/// A dotted version like `3` or `3.5.1`, for range comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Version(u64, u64, u64);

impl Version {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('v');
        let mut parts = s.split('.').map(|part| part.parse::<u64>());
        let major = parts.next()?.ok()?;
        let minor = parts.next().transpose().ok()?.unwrap_or(0);
        let patch = parts.next().transpose().ok()?.unwrap_or(0);
        Some(Self(major, minor, patch))
    }
}

/// Whether `version` satisfies a comma-separated advisory range such as
/// `>= 3.0.0, < 3.5.1` or `<= 2.3`. Unparseable clauses fail open to
/// `false` (inconclusive, no diagnostic).
fn version_in_range(version: Version, range: &str) -> bool {
    if range.trim().is_empty() {
        return false;
    }
    range.split(',').all(|clause| {
        let clause = clause.trim();
        let (op, rest) = if let Some(rest) = clause.strip_prefix(">=") {
            (">=", rest)
        } else if let Some(rest) = clause.strip_prefix("<=") {
            ("<=", rest)
        } else if let Some(rest) = clause.strip_prefix('<') {
            ("<", rest)
        } else if let Some(rest) = clause.strip_prefix('>') {
            (">", rest)
        } else if let Some(rest) = clause.strip_prefix('=') {
            ("=", rest)
        } else {
            ("=", clause)
        };
        let Some(bound) = Version::parse(rest) else {
            return false;
        };
        match op {
            ">=" => version >= bound,
            "<=" => version <= bound,
            "<" => version < bound,
            ">" => version > bound,
            _ => version == bound,
        }
    })
}

fn severity_kind(severity: &str) -> Kind {
    match severity.to_ascii_lowercase().as_str() {
        "critical" => Kind::SecurityCritical,
        "high" => Kind::SecurityHigh,
        "low" => Kind::SecurityLow,
        _ => Kind::SecurityMedium,
    }
}

impl KnownVulnerableActionsRule {
    pub(crate) fn new(
        advisories: Option<Arc<dyn AdvisoryCatalog>>,
        repos: Option<Arc<dyn RepoCatalog>>,
    ) -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            advisories,
            repos,
            current_job: String::new(),
        }
    }

    /// Determines the action's version: directly from a version-shaped
    /// ref, or by resolving a SHA back to its longest tag.
    fn action_version(&self, action: &ActionRef) -> Option<Version> {
        let git_ref = action.git_ref.as_deref()?;
        if let Some(version) = Version::parse(git_ref) {
            return Some(version);
        }
        if action.ref_is_commit_sha() {
            let repos = self.repos.as_ref()?;
            match repos.tags_for_sha(&action.owner, &action.repo, git_ref) {
                Ok(tags) => return longest_tag(&tags).and_then(Version::parse),
                Err(err) => {
                    tracing::debug!(action = %action.raw, "tag lookup failed: {err}");
                    return None;
                }
            }
        }
        None
    }

    fn upgrade_fix(&self, step: &Step, action: &ActionRef, advisory: &Advisory) -> Option<Fix> {
        let repos = self.repos.as_ref()?;
        let patched = advisory.first_patched_version.as_deref()?;
        let tag = if patched.starts_with('v') {
            patched.to_string()
        } else {
            format!("v{patched}")
        };
        let sha = match repos.resolve_ref_to_sha(&action.owner, &action.repo, &tag) {
            Ok(Some(sha)) => sha,
            Ok(None) => return None,
            Err(err) => {
                tracing::debug!(action = %action.raw, "patched ref resolution failed: {err}");
                return None;
            }
        };
        let path = match &action.subpath {
            Some(subpath) => format!("{}/{subpath}", action.slug()),
            None => action.slug(),
        };
        Some(Fix {
            rule: Self::NAME,
            title: format!("upgrade {} to {tag}", action.slug()),
            scope: FixScope::Step(self.current_job.clone(), step.index),
            patches: vec![Patch {
                route: step.route.with("uses"),
                op: Op::Replace {
                    value: serde_yaml::Value::String(format!("{path}@{sha}")),
                    line_comment: Some(tag),
                },
            }],
        })
    }
}

impl Visitor for KnownVulnerableActionsRule {
    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.current_job = job.id.value.clone();
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        let Some(catalog) = self.advisories.clone() else {
            return Ok(());
        };
        let Some(action) = step.action_ref() else {
            return Ok(());
        };
        let Some(version) = self.action_version(&action) else {
            return Ok(());
        };

        let advisories = match catalog.advisories_for("actions", &action.slug()) {
            Ok(advisories) => advisories,
            Err(err) => {
                tracing::debug!(action = %action.raw, "advisory lookup failed: {err}");
                return Ok(());
            }
        };

        let uses_pos = step.uses().expect("action step has uses").pos;
        for advisory in advisories {
            if !version_in_range(version, &advisory.vulnerable_range) {
                continue;
            }
            self.base.report(
                uses_pos,
                severity_kind(&advisory.severity),
                format!(
                    "{}: {} ({})",
                    advisory.ghsa_id, advisory.summary, advisory.url
                ),
            );
            if let Some(fix) = self.upgrade_fix(step, &action, &advisory) {
                self.base.fix(fix);
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

    #[test]
    fn test_version_in_range() {
        let version = Version::parse("v3.5.0").unwrap();
        assert!(version_in_range(version, "< 3.5.1"));
        assert!(version_in_range(version, ">= 3.0.0, < 3.5.1"));
        assert!(!version_in_range(version, "< 3.0.0"));
        assert!(version_in_range(version, "<= 3.5.0"));
        assert!(version_in_range(Version::parse("1").unwrap(), "= 1.0.0"));
        assert!(!version_in_range(version, ""));
        assert!(!version_in_range(version, "garbage"));
    }

    struct OneAdvisory;

    impl AdvisoryCatalog for OneAdvisory {
        fn advisories_for(&self, _: &str, slug: &str) -> anyhow::Result<Vec<Advisory>> {
            if slug == "octo/vulnerable" {
                Ok(vec![Advisory {
                    ghsa_id: "GHSA-xxxx-yyyy-zzzz".to_string(),
                    severity: "high".to_string(),
                    summary: "command injection in inputs".to_string(),
                    vulnerable_range: "< 2.0.0".to_string(),
                    first_patched_version: Some("2.0.0".to_string()),
                    url: "https://example.invalid/ghsa".to_string(),
                }])
            } else {
                Ok(vec![])
            }
        }
    }

    #[test]
    fn test_advisory_match() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: octo/vulnerable@v1.4.0\n      - uses: octo/vulnerable@v2.1.0\n      - uses: octo/other@v1\n";
        let (diagnostics, fixes) = lint_rule(
            KnownVulnerableActionsRule::new(Some(Arc::new(OneAdvisory)), None),
            source,
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, Kind::SecurityHigh);
        assert!(diagnostics[0].message.contains("GHSA-xxxx-yyyy-zzzz"));
        // No repo catalog, so no upgrade fix.
        assert!(fixes.is_empty());
    }

    #[test]
    fn test_offline_is_silent() {
        let source = "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - uses: octo/vulnerable@v1.4.0\n";
        let (diagnostics, _) = lint_rule(KnownVulnerableActionsRule::new(None, None), source);
        assert_eq!(diagnostics.len(), 0);
    }
}
