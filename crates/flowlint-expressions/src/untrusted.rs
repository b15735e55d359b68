//! The closed set of untrusted context paths.
//!
//! These are the workflow contexts whose values an external contributor
//! controls: issue and pull-request titles and bodies, comment and review
//! bodies, commit messages and author fields, head refs and labels, and
//! page names. An expression that expands one of these into a shell script
//! or sensitive input is an injection sink.

use std::sync::LazyLock;

use crate::context::{Context, ContextPattern};

/// Context patterns whose values are attacker-controlled.
pub static UNTRUSTED_CONTEXTS: LazyLock<Vec<ContextPattern<'static>>> = LazyLock::new(|| {
    [
        "github.event.issue.title",
        "github.event.issue.body",
        "github.event.pull_request.title",
        "github.event.pull_request.body",
        "github.event.pull_request.head.ref",
        "github.event.pull_request.head.label",
        "github.event.pull_request.head.repo.*",
        "github.event.comment.body",
        "github.event.review.body",
        "github.event.review_comment.body",
        "github.event.pages.*.page_name",
        "github.event.commits.*.message",
        "github.event.commits.*.author.email",
        "github.event.commits.*.author.name",
        "github.event.head_commit.message",
        "github.event.head_commit.author.email",
        "github.event.head_commit.author.name",
        "github.event.workflow_run.head_branch",
        "github.event.workflow_run.head_commit.message",
        "github.event.workflow_run.pull_requests.*.head.ref",
        "github.head_ref",
    ]
    .into_iter()
    .map(ContextPattern::new)
    .collect()
});

static INPUTS: LazyLock<ContextPattern<'static>> = LazyLock::new(|| ContextPattern::new("inputs"));

/// Returns the dotted path of `ctx` when it reaches an untrusted context.
///
/// `inputs.*` is only untrusted when the surrounding workflow is reusable
/// or dispatchable, signalled by `inputs_untrusted`.
pub fn untrusted_path(ctx: &Context<'_>, inputs_untrusted: bool) -> Option<String> {
    let matched = UNTRUSTED_CONTEXTS
        .iter()
        .any(|pattern| pattern.parent_of(ctx));
    let matched = matched
        || (inputs_untrusted && ctx.parts.len() > 1 && INPUTS.parent_of(ctx));
    if matched { ctx.as_pattern() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Expr;

    fn context(src: &str) -> Context<'static> {
        // Leak: test-only convenience for building 'static contexts.
        let src: &'static str = Box::leak(src.to_string().into_boxed_str());
        match Expr::parse(src).unwrap().inner {
            Expr::Context(ctx) => ctx,
            other => panic!("expected a context, got {other:?}"),
        }
    }

    #[test]
    fn test_untrusted_paths() {
        for src in [
            "github.event.issue.title",
            "github.event.pull_request.head.ref",
            "github.event.pull_request.head.repo.name",
            "github.event.commits[0].message",
            "github.event.pages.*.page_name",
            "github.head_ref",
            // Case-insensitivity.
            "GITHUB.HEAD_REF",
            "github.event.PULL_REQUEST.title",
        ] {
            assert!(untrusted_path(&context(src), false).is_some(), "{src}");
        }
    }

    #[test]
    fn test_trusted_paths() {
        for src in [
            "github.event.pull_request.number",
            "github.ref",
            "github.sha",
            "github.event.pull_request.head.sha",
            "matrix.os",
        ] {
            assert!(untrusted_path(&context(src), false).is_none(), "{src}");
        }
    }

    #[test]
    fn test_inputs_gated_by_flag() {
        let ctx = context("inputs.name");
        assert!(untrusted_path(&ctx, false).is_none());
        assert_eq!(untrusted_path(&ctx, true).as_deref(), Some("inputs.name"));
    }

    #[test]
    fn test_reported_path_is_lowercased_dotted() {
        let ctx = context("github.event.commits[0].message");
        assert_eq!(
            untrusted_path(&ctx, false).as_deref(),
            Some("github.event.commits.*.message")
        );
    }
}
