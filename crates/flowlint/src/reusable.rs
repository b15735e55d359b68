//! Metadata caches for local reusable workflows and actions.
//!
//! Shared across worker threads; misses read and parse the referenced
//! file, and failures are cached as negative entries so the same broken
//! reference is reported once, not once per caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

use crate::models::{InputType, Workflow};
use crate::parse::parse_workflow;

/// The callable surface of a reusable workflow.
#[derive(Debug, Clone)]
pub struct WorkflowCallMetadata {
    pub inputs: IndexMap<String, CallInputMeta>,
    pub outputs: Vec<String>,
    pub secrets: IndexMap<String, bool>,
}

#[derive(Debug, Clone)]
pub struct CallInputMeta {
    pub ty: Option<InputType>,
    pub required: bool,
}

/// Maps normalized project-relative workflow paths to parsed call
/// metadata. `None` entries record resolution or parse failures.
pub struct ReusableWorkflowCache {
    root: Utf8PathBuf,
    entries: RwLock<HashMap<String, Option<Arc<WorkflowCallMetadata>>>>,
}

impl ReusableWorkflowCache {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a `./path/to/workflow.yml` reference.
    ///
    /// Returns `None` when the path escapes the project root, the file is
    /// unreadable, or it is not a reusable workflow.
    pub fn metadata_for(&self, uses: &str) -> Option<Arc<WorkflowCallMetadata>> {
        let relative = uses.strip_prefix("./")?;
        // A resolved path must stay under the project root.
        if Utf8Path::new(relative)
            .components()
            .any(|c| matches!(c, camino::Utf8Component::ParentDir))
        {
            return None;
        }

        if let Some(cached) = self.entries.read().ok()?.get(relative) {
            return cached.clone();
        }

        let loaded = self.load(relative);
        self.entries
            .write()
            .ok()?
            .insert(relative.to_string(), loaded.clone());
        loaded
    }

    fn load(&self, relative: &str) -> Option<Arc<WorkflowCallMetadata>> {
        let path = self.root.join(relative);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => {
                tracing::debug!(%path, "could not read reusable workflow: {err}");
                return None;
            }
        };
        let outcome = parse_workflow(&path, &source);
        metadata_from(&outcome.workflow).map(Arc::new)
    }
}

fn metadata_from(workflow: &Workflow) -> Option<WorkflowCallMetadata> {
    let call = workflow.workflow_call()?;
    Some(WorkflowCallMetadata {
        inputs: call
            .inputs
            .iter()
            .map(|(name, input)| {
                (
                    name.clone(),
                    CallInputMeta {
                        ty: input.ty,
                        required: input.is_required(),
                    },
                )
            })
            .collect(),
        outputs: call.outputs.keys().cloned().collect(),
        secrets: call
            .secrets
            .iter()
            .map(|(name, secret)| {
                (
                    name.clone(),
                    secret.required.as_ref().and_then(|r| r.value).unwrap_or(false),
                )
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_is_rejected() {
        let cache = ReusableWorkflowCache::new("/tmp/project".into());
        assert!(cache.metadata_for("./../outside.yml").is_none());
        assert!(cache.metadata_for("./a/../../outside.yml").is_none());
        assert!(cache.metadata_for("not-local.yml").is_none());
    }

    #[test]
    fn test_negative_entries_are_cached() {
        let cache = ReusableWorkflowCache::new("/nonexistent-root".into());
        assert!(cache.metadata_for("./missing.yml").is_none());
        assert!(
            cache
                .entries
                .read()
                .unwrap()
                .get("missing.yml")
                .is_some_and(|entry| entry.is_none())
        );
    }
}
