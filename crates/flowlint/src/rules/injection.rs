//! Shared helpers for the injection rule family.
//!
//! Code, `$GITHUB_ENV` and `$GITHUB_PATH` injection all share the same
//! skeleton: find expressions whose evaluation expands an untrusted
//! context, classify the workflow as privileged or not, and fix by
//! lifting the expression into the step's `env:` and referencing the
//! variable from the script instead.

use flowlint_expressions::check::{Checker, IssueKind};
use flowlint_expressions::Expr;
use indexmap::IndexMap;
use yamlcst::{Op, Patch, Route};

use crate::finding::{Fix, FixScope};
use crate::models::{Env, RawExpression, Step, StringNode, Workflow};

/// One untrusted expression found in a string value.
#[derive(Debug, Clone)]
pub(crate) struct UntrustedUse {
    pub(crate) expr: RawExpression,
    /// The dotted untrusted path, e.g. `github.event.pull_request.title`.
    pub(crate) path: String,
}

/// Finds expressions in `node` whose evaluation expands an untrusted
/// context path.
pub(crate) fn untrusted_uses(node: &StringNode, inputs_untrusted: bool) -> Vec<UntrustedUse> {
    let mut out = Vec::new();
    for raw in node.expressions() {
        let Ok(parsed) = Expr::parse(&raw.source) else {
            // The expression rule reports parse failures.
            continue;
        };
        let checker = Checker {
            check_untrusted: true,
            inputs_untrusted,
            ..Default::default()
        };
        let (_, issues) = checker.check(&parsed);
        for issue in issues {
            if issue.kind == IssueKind::UntrustedInput {
                if let Some(path) = issue.path {
                    out.push(UntrustedUse {
                        expr: raw.clone(),
                        path,
                    });
                }
            }
        }
    }
    out
}

/// Whether `inputs.*` should be treated as untrusted for this workflow.
pub(crate) fn inputs_untrusted(workflow: &Workflow) -> bool {
    workflow.is_reusable() || workflow.workflow_dispatch().is_some()
}

/// Synthesizes a stable environment variable name for an untrusted path.
///
/// The category is abbreviated (`pull_request` becomes `PR`) and joined
/// with the final field: `github.event.pull_request.title` -> `PR_TITLE`.
/// Single-segment paths keep just the field (`github.head_ref` ->
/// `HEAD_REF`), and `inputs.foo` becomes `INPUT_FOO`.
pub(crate) fn env_var_name(path: &str) -> String {
    fn upper(segment: &str) -> String {
        segment
            .chars()
            .map(|c| match c {
                '-' | '.' | '*' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect()
    }

    let parts: Vec<&str> = path.split('.').collect();
    let rest: &[&str] = match parts.as_slice() {
        ["github", "event", rest @ ..] => rest,
        ["github", rest @ ..] => rest,
        ["inputs", rest @ ..] => {
            let field = rest.last().copied().unwrap_or("input");
            return format!("INPUT_{}", upper(field));
        }
        rest => rest,
    };

    match rest {
        [] => "UNTRUSTED_INPUT".to_string(),
        [single] => upper(single),
        [category, .., field] => {
            let category = match *category {
                "pull_request" => "PR".to_string(),
                other => upper(other),
            };
            let field = if *field == "*" { "VALUE" } else { field };
            format!("{category}_{}", upper(field))
        }
    }
}

/// Returns the name of an existing step env var that already holds the
/// given expression, if any.
pub(crate) fn existing_env_var(step: &Step, expr_text: &str) -> Option<String> {
    let Some(Env::Vars(vars)) = &step.env else {
        return None;
    };
    let normalized = normalize_expr(expr_text);
    vars.values()
        .find(|var| normalize_expr(&var.value.value) == normalized)
        .map(|var| var.name.value.clone())
}

fn normalize_expr(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Builds the shared "lift to env" fix: merge the expression into the
/// step's `env:` and rewrite the script to reference the variable.
///
/// `reference` renders the replacement text for a variable name (e.g.
/// shell `"$VAR"` or `$(realpath "$VAR")`).
pub(crate) fn lift_to_env_fix(
    rule: &'static str,
    job_id: &str,
    step: &Step,
    script_route: Route,
    uses: &[UntrustedUse],
    reference: impl Fn(&str) -> String,
) -> Fix {
    let mut env_updates: IndexMap<String, serde_yaml::Value> = IndexMap::new();
    let mut patches = Vec::new();

    for usage in uses {
        let existing = existing_env_var(step, &usage.expr.text);
        let name = existing
            .clone()
            .unwrap_or_else(|| env_var_name(&usage.path));
        if existing.is_none() {
            env_updates.insert(
                name.clone(),
                serde_yaml::Value::String(usage.expr.text.clone()),
            );
        }
        patches.push(Patch {
            route: script_route.clone(),
            op: Op::RewriteFragment {
                from: usage.expr.text.clone(),
                to: reference(&name),
            },
        });
    }

    if !env_updates.is_empty() {
        // Register the env merge first so the script rewrite cannot
        // invalidate the expression we are lifting.
        patches.insert(
            0,
            Patch {
                route: step.route.clone(),
                op: Op::MergeInto {
                    key: "env".to_string(),
                    updates: env_updates,
                },
            },
        );
    }

    Fix {
        rule,
        title: "move the untrusted expression into an environment variable".to_string(),
        scope: FixScope::Step(job_id.to_string(), step.index),
        patches,
    }
}
