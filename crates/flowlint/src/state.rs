//! Per-run state shared across files: configuration, catalogs, caches.

use std::sync::Arc;

use crate::catalog::{AdvisoryCatalog, RepoCatalog};
use crate::config::Config;
use crate::reusable::ReusableWorkflowCache;

/// Everything a per-file analysis needs from the surrounding run.
///
/// Rule instances are never shared between files; this state is.
#[derive(Clone)]
pub struct LintState {
    pub config: Arc<Config>,
    /// Repository metadata lookups (branches, tags, ref resolution).
    /// `None` disables the catalog-backed rules' online behavior.
    pub repo_catalog: Option<Arc<dyn RepoCatalog>>,
    /// Security advisory lookups.
    pub advisory_catalog: Option<Arc<dyn AdvisoryCatalog>>,
    /// Reusable-workflow metadata, keyed by project-relative path.
    pub reusable_workflows: Arc<ReusableWorkflowCache>,
}

impl LintState {
    pub fn offline(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            repo_catalog: None,
            advisory_catalog: None,
            reusable_workflows: Arc::new(ReusableWorkflowCache::new(".".into())),
        }
    }
}

impl Default for LintState {
    fn default() -> Self {
        Self::offline(Config::default())
    }
}
