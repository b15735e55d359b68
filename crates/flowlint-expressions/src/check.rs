//! The expression semantic checker.
//!
//! Given a type environment and (optionally) the availability constraints
//! of the surrounding workflow key, the checker computes a type for each
//! node and collects issues: undefined contexts and properties, bad call
//! arity or argument types, forbidden contexts/functions, operand type
//! mismatches, and — when enabled — uses of untrusted context paths.

use indexmap::IndexMap;
use itertools::Itertools as _;

use crate::context::Context;
use crate::funcs::{FUNCTIONS, SPECIAL_FUNCTIONS};
use crate::types::{ArrayType, ExprType, ObjectType};
use crate::untrusted::untrusted_path;
use crate::{BinOp, Expr, Literal, Span, SpannedExpr};

/// Maps context names (lowercased) to their types.
#[derive(Debug, Clone, Default)]
pub struct TypeEnv {
    contexts: IndexMap<String, ExprType>,
}

impl TypeEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in environment: static types for the standard contexts.
    ///
    /// Workflow-dependent contexts (`matrix`, `needs`, `steps`, `inputs`,
    /// `jobs`) default to permissive types here and are narrowed by the
    /// surrounding analysis.
    pub fn builtin() -> Self {
        let mut env = Self::new();
        env.insert("github", github_context());
        env.insert("runner", runner_context());
        env.insert("job", job_context());
        env.insert("strategy", strategy_context());
        env.insert("env", ExprType::any_object());
        env.insert("vars", ExprType::any_object());
        env.insert("secrets", ExprType::any_object());
        env.insert("inputs", ExprType::any_object());
        env.insert("matrix", ExprType::any_object());
        env.insert("needs", ExprType::any_object());
        env.insert("steps", ExprType::any_object());
        env.insert("jobs", ExprType::any_object());
        env
    }

    pub fn insert(&mut self, name: &str, ty: ExprType) {
        self.contexts.insert(name.to_ascii_lowercase(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&ExprType> {
        self.contexts.get(&name.to_ascii_lowercase())
    }
}

/// What kind of problem an issue reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A typing or availability violation.
    Semantic,
    /// An expression reaches an untrusted context path.
    UntrustedInput,
}

/// A problem found while checking an expression.
#[derive(Debug, Clone)]
pub struct Issue {
    pub span: Span,
    pub kind: IssueKind,
    pub message: String,
    /// For untrusted-input issues, the dotted context path.
    pub path: Option<String>,
}

impl Issue {
    fn semantic(span: Span, message: String) -> Self {
        Self {
            span,
            kind: IssueKind::Semantic,
            message,
            path: None,
        }
    }
}

/// The checker's configuration for a single expression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checker<'a> {
    pub env: Option<&'a TypeEnv>,
    /// Contexts legal at the current workflow key. `None` or an empty list
    /// means any context is allowed.
    pub allowed_contexts: Option<&'a [&'a str]>,
    /// Special functions legal at the current workflow key. `None` means
    /// any; an empty list means none.
    pub allowed_functions: Option<&'a [&'a str]>,
    /// Whether to report untrusted context paths.
    pub check_untrusted: bool,
    /// Whether `inputs.*` counts as untrusted (reusable or dispatchable
    /// workflows).
    pub inputs_untrusted: bool,
}

impl Checker<'_> {
    /// Checks `expr`, returning its type and all issues found.
    pub fn check(&self, expr: &SpannedExpr<'_>) -> (ExprType, Vec<Issue>) {
        let mut issues = Vec::new();
        if self.check_untrusted {
            for (ctx, span) in expr.dataflow_contexts() {
                if let Some(path) = untrusted_path(ctx, self.inputs_untrusted) {
                    issues.push(Issue {
                        span,
                        kind: IssueKind::UntrustedInput,
                        message: format!(
                            "\"{path}\" is potentially untrusted; avoid expanding it directly"
                        ),
                        path: Some(path),
                    });
                }
            }
        }
        let ty = self.type_of(expr, &mut issues);
        (ty, issues)
    }

    fn type_of(&self, expr: &SpannedExpr<'_>, issues: &mut Vec<Issue>) -> ExprType {
        match &expr.inner {
            Expr::Literal(lit) => match lit {
                Literal::Number(_) => ExprType::Number,
                Literal::String(_) => ExprType::String,
                Literal::Boolean(_) => ExprType::Bool,
                Literal::Null => ExprType::Null,
            },
            Expr::Context(ctx) => self.context_type(ctx, issues),
            Expr::Call { func, args } => self.call_type(func.as_str(), args, expr.span, issues),
            Expr::BinOp { lhs, op, rhs } => {
                let lt = self.type_of(lhs, issues);
                let rt = self.type_of(rhs, issues);
                match op {
                    BinOp::And | BinOp::Or => ExprType::join(&lt, &rt),
                    BinOp::Eq | BinOp::Neq => ExprType::Bool,
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        for (side, ty) in [(&**lhs, &lt), (&**rhs, &rt)] {
                            if matches!(ty, ExprType::Object(_) | ExprType::Array(_)) {
                                issues.push(Issue::semantic(
                                    side.span,
                                    format!("operator {op} cannot be applied to {ty}"),
                                ));
                            }
                        }
                        ExprType::Bool
                    }
                }
            }
            Expr::UnOp { expr: operand, .. } => {
                self.type_of(operand, issues);
                ExprType::Bool
            }
            // The parser only produces these inside contexts.
            Expr::Star | Expr::Identifier(_) | Expr::Index(_) => ExprType::Unknown,
        }
    }

    fn context_type(&self, ctx: &Context<'_>, issues: &mut Vec<Issue>) -> ExprType {
        let mut parts = ctx.parts.iter();
        let Some(head) = parts.next() else {
            return ExprType::Unknown;
        };

        let mut ty = match &head.inner {
            Expr::Identifier(ident) => {
                let name = ident.as_str();
                if let Some(allowed) = self.allowed_contexts {
                    if !allowed.is_empty()
                        && !allowed.iter().any(|a| a.eq_ignore_ascii_case(name))
                    {
                        issues.push(Issue::semantic(
                            head.span,
                            format!(
                                "context \"{}\" is not allowed here; available contexts are: {}",
                                name.to_ascii_lowercase(),
                                allowed.iter().join(", ")
                            ),
                        ));
                    }
                }
                match self.env.and_then(|env| env.get(name)) {
                    Some(ty) => ty.clone(),
                    None if self.env.is_some() => {
                        issues.push(Issue::semantic(
                            head.span,
                            format!("undefined context \"{}\"", name.to_ascii_lowercase()),
                        ));
                        ExprType::Unknown
                    }
                    None => ExprType::Unknown,
                }
            }
            Expr::Call { func, args } => self.call_type(func.as_str(), args, head.span, issues),
            _ => ExprType::Unknown,
        };

        for part in parts {
            ty = match &part.inner {
                Expr::Identifier(ident) => self.prop_type(&ty, ident.as_str(), part.span, issues),
                Expr::Star => self.star_type(&ty, part.span, issues),
                Expr::Index(index) => match &index.inner {
                    Expr::Star => self.star_type(&ty, part.span, issues),
                    _ => self.index_type(&ty, index, part.span, issues),
                },
                _ => ExprType::Unknown,
            };
        }

        ty
    }

    fn prop_type(
        &self,
        receiver: &ExprType,
        name: &str,
        span: Span,
        issues: &mut Vec<Issue>,
    ) -> ExprType {
        match receiver {
            ExprType::Object(_) | ExprType::Unknown => match receiver.prop(name) {
                Some(ty) => ty,
                None => {
                    issues.push(Issue::semantic(
                        span,
                        format!(
                            "property \"{}\" is not defined in {receiver}",
                            name.to_ascii_lowercase()
                        ),
                    ));
                    ExprType::Unknown
                }
            },
            ExprType::Array(arr) if arr.deref => ExprType::Array(ArrayType {
                elem: Box::new(self.prop_type(&arr.elem, name, span, issues)),
                deref: true,
            }),
            other => {
                issues.push(Issue::semantic(
                    span,
                    format!("receiver of property access \"{name}\" must be an object but got {other}"),
                ));
                ExprType::Unknown
            }
        }
    }

    fn star_type(&self, receiver: &ExprType, span: Span, issues: &mut Vec<Issue>) -> ExprType {
        match receiver {
            ExprType::Array(arr) => ExprType::Array(ArrayType {
                elem: arr.elem.clone(),
                deref: true,
            }),
            ExprType::Object(obj) => {
                let elem = if obj.loose || obj.props.is_empty() {
                    ExprType::Unknown
                } else {
                    let mut values = obj.props.values();
                    let first = values.next().cloned().unwrap_or(ExprType::Unknown);
                    values.fold(first, |acc, ty| ExprType::join(&acc, ty))
                };
                ExprType::Array(ArrayType {
                    elem: Box::new(elem),
                    deref: true,
                })
            }
            ExprType::Unknown => ExprType::Array(ArrayType {
                elem: Box::new(ExprType::Unknown),
                deref: true,
            }),
            other => {
                issues.push(Issue::semantic(
                    span,
                    format!("receiver of the '*' filter must be an array or object but got {other}"),
                ));
                ExprType::Unknown
            }
        }
    }

    fn index_type(
        &self,
        receiver: &ExprType,
        index: &SpannedExpr<'_>,
        span: Span,
        issues: &mut Vec<Issue>,
    ) -> ExprType {
        let index_ty = self.type_of(index, issues);
        match receiver {
            ExprType::Array(arr) => {
                if !index_ty.assignable_to(&ExprType::Number) {
                    issues.push(Issue::semantic(
                        span,
                        format!("array index must be a number but got {index_ty}"),
                    ));
                }
                (*arr.elem).clone()
            }
            ExprType::Object(_) => {
                if let Expr::Literal(Literal::String(name)) = &index.inner {
                    self.prop_type(receiver, name, span, issues)
                } else if index_ty.assignable_to(&ExprType::String)
                    || index_ty.assignable_to(&ExprType::Number)
                {
                    ExprType::Unknown
                } else {
                    issues.push(Issue::semantic(
                        span,
                        format!("object index must be a string but got {index_ty}"),
                    ));
                    ExprType::Unknown
                }
            }
            ExprType::Unknown => ExprType::Unknown,
            other => {
                issues.push(Issue::semantic(
                    span,
                    format!("cannot index into a value of type {other}"),
                ));
                ExprType::Unknown
            }
        }
    }

    fn call_type(
        &self,
        name: &str,
        args: &[SpannedExpr<'_>],
        span: Span,
        issues: &mut Vec<Issue>,
    ) -> ExprType {
        let lower = name.to_ascii_lowercase();
        let Some(sig) = FUNCTIONS.get(lower.as_str()) else {
            issues.push(Issue::semantic(
                span,
                format!("undefined function \"{name}\""),
            ));
            for arg in args {
                self.type_of(arg, issues);
            }
            return ExprType::Unknown;
        };

        if SPECIAL_FUNCTIONS.contains(&lower.as_str()) {
            if let Some(allowed) = self.allowed_functions {
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&lower)) {
                    let available = if allowed.is_empty() {
                        "no special functions are available here".to_string()
                    } else {
                        format!("available functions are: {}", allowed.iter().join(", "))
                    };
                    issues.push(Issue::semantic(
                        span,
                        format!("calling function \"{}\" is not allowed here; {available}", sig.name),
                    ));
                }
            }
        }

        if args.len() < sig.required {
            issues.push(Issue::semantic(
                span,
                format!(
                    "function \"{}\" requires at least {} argument(s) but got {}",
                    sig.name,
                    sig.required,
                    args.len()
                ),
            ));
        }
        if let Some(max) = sig.max_args() {
            if args.len() > max {
                issues.push(Issue::semantic(
                    span,
                    format!(
                        "function \"{}\" takes at most {} argument(s) but got {}",
                        sig.name,
                        max,
                        args.len()
                    ),
                ));
            }
        }

        for (i, arg) in args.iter().enumerate() {
            let arg_ty = self.type_of(arg, issues);
            if let Some(param) = sig.param_at(i) {
                if !arg_ty.assignable_to(param) {
                    issues.push(Issue::semantic(
                        arg.span,
                        format!(
                            "argument {} of function \"{}\" must be {param} but got {arg_ty}",
                            i + 1,
                            sig.name
                        ),
                    ));
                }
            }
        }

        if lower == "format" {
            if let Some(Expr::Literal(Literal::String(fmt))) =
                args.first().map(|arg| &arg.inner)
            {
                for placeholder in format_placeholders(fmt) {
                    if placeholder + 1 >= args.len() {
                        issues.push(Issue::semantic(
                            span,
                            format!(
                                "format string references argument {{{placeholder}}} but only {} argument(s) follow",
                                args.len().saturating_sub(1)
                            ),
                        ));
                    }
                }
            }
        }

        sig.ret.clone()
    }
}

/// Extracts `{n}` placeholder indices from a format string; `{{` escapes.
fn format_placeholders(fmt: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let bytes = fmt.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if bytes.get(i + 1) == Some(&b'{') {
                i += 2;
                continue;
            }
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end > start && bytes.get(end) == Some(&b'}') {
                if let Ok(index) = fmt[start..end].parse() {
                    out.push(index);
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    out
}

fn github_context() -> ExprType {
    let props = [
        "action",
        "action_path",
        "action_ref",
        "action_repository",
        "action_status",
        "actor",
        "actor_id",
        "api_url",
        "base_ref",
        "env",
        "event_name",
        "event_path",
        "graphql_url",
        "head_ref",
        "job",
        "path",
        "ref",
        "ref_name",
        "ref_type",
        "repository",
        "repository_id",
        "repository_owner",
        "repository_owner_id",
        "repositoryurl",
        "retention_days",
        "run_attempt",
        "run_id",
        "run_number",
        "secret_source",
        "server_url",
        "sha",
        "token",
        "triggering_actor",
        "workflow",
        "workflow_ref",
        "workflow_sha",
        "workspace",
    ];
    let mut object = ObjectType::default();
    for prop in props {
        object.props.insert(prop.to_string(), ExprType::String);
    }
    object
        .props
        .insert("ref_protected".to_string(), ExprType::Bool);
    // The event payload's shape depends on the trigger.
    object.props.insert("event".to_string(), ExprType::any_object());
    ExprType::Object(object)
}

fn runner_context() -> ExprType {
    ExprType::strict_object([
        ("name", ExprType::String),
        ("os", ExprType::String),
        ("arch", ExprType::String),
        ("temp", ExprType::String),
        ("tool_cache", ExprType::String),
        ("debug", ExprType::String),
        ("environment", ExprType::String),
    ])
}

fn job_context() -> ExprType {
    ExprType::strict_object([
        (
            "container",
            ExprType::strict_object([("id", ExprType::String), ("network", ExprType::String)]),
        ),
        ("services", ExprType::any_object()),
        ("status", ExprType::String),
    ])
}

fn strategy_context() -> ExprType {
    ExprType::strict_object([
        ("fail-fast", ExprType::Bool),
        ("job-index", ExprType::Number),
        ("job-total", ExprType::Number),
        ("max-parallel", ExprType::Number),
    ])
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Expr;

    fn check(src: &str) -> (ExprType, Vec<Issue>) {
        let env = TypeEnv::builtin();
        let expr = Expr::parse(src).unwrap();
        let checker = Checker {
            env: Some(&env),
            ..Default::default()
        };
        checker.check(&expr)
    }

    fn messages(issues: &[Issue]) -> Vec<&str> {
        issues.iter().map(|i| i.message.as_str()).collect()
    }

    #[test]
    fn test_well_typed() {
        for src in [
            "github.ref == 'refs/heads/main'",
            "github.event.issue.number",
            "runner.os",
            "format('{0} {1}', github.sha, runner.arch)",
            "contains(github.ref, 'release')",
            "fromJSON(env.DATA).anything.goes",
            "github['event']['inputs']",
            "!startsWith(github.ref, 'refs/tags/')",
            "strategy.job-index < strategy.job-total",
        ] {
            let (_, issues) = check(src);
            assert_eq!(messages(&issues), Vec::<&str>::new(), "{src}");
        }
    }

    #[test]
    fn test_types() {
        assert_eq!(check("github.ref").0, ExprType::String);
        assert_eq!(check("github.ref == 'x'").0, ExprType::Bool);
        assert_eq!(check("fromJSON(env.X)").0, ExprType::Unknown);
        assert_eq!(check("toJSON(github)").0, ExprType::String);
        assert_eq!(check("github.ref_protected").0, ExprType::Bool);
    }

    #[test]
    fn test_undefined_context_and_property() {
        let (_, issues) = check("gihub.ref");
        assert_eq!(messages(&issues), vec!["undefined context \"gihub\""]);

        let (_, issues) = check("runner.cpu");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.starts_with("property \"cpu\" is not defined"));

        // Case-insensitive lookups do not trip the checker.
        let (_, issues) = check("RUNNER.OS");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_call_issues() {
        let (_, issues) = check("fromJSON()");
        assert_eq!(
            messages(&issues),
            vec!["function \"fromJSON\" requires at least 1 argument(s) but got 0"]
        );

        let (_, issues) = check("join(github.ref, ',', 'extra')");
        assert_eq!(
            messages(&issues),
            vec!["function \"join\" takes at most 2 argument(s) but got 3"]
        );

        let (_, issues) = check("startsWith(github, 'x')");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.starts_with("argument 1 of function \"startsWith\""));

        let (_, issues) = check("frobnicate(1)");
        assert_eq!(messages(&issues), vec!["undefined function \"frobnicate\""]);
    }

    #[test]
    fn test_format_placeholders() {
        let (_, issues) = check("format('{0} {1}', github.sha)");
        assert_eq!(
            messages(&issues),
            vec!["format string references argument {1} but only 1 argument(s) follow"]
        );

        // `{{` escapes.
        let (_, issues) = check("format('{{0}}')");
        assert!(issues.is_empty());
    }

    #[test]
    fn test_availability() {
        let env = TypeEnv::builtin();
        let expr = Expr::parse("secrets.TOKEN").unwrap();
        let checker = Checker {
            env: Some(&env),
            allowed_contexts: Some(&["github", "inputs", "vars"]),
            allowed_functions: Some(&[]),
            ..Default::default()
        };
        let (_, issues) = checker.check(&expr);
        assert_eq!(issues.len(), 1);
        assert!(
            issues[0]
                .message
                .starts_with("context \"secrets\" is not allowed here")
        );

        let expr = Expr::parse("hashFiles('**/lock')").unwrap();
        let (_, issues) = checker.check(&expr);
        assert_eq!(issues.len(), 1);
        assert!(
            issues[0]
                .message
                .starts_with("calling function \"hashFiles\" is not allowed here")
        );

        // Non-special functions are unaffected by the allow-list.
        let expr = Expr::parse("contains(github.ref, 'x')").unwrap();
        let (_, issues) = checker.check(&expr);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_comparison_operands() {
        let (_, issues) = check("github < 5");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("operator <"));
    }

    #[test]
    fn test_untrusted_tracking() {
        let env = TypeEnv::builtin();
        let checker = Checker {
            env: Some(&env),
            check_untrusted: true,
            ..Default::default()
        };

        let expr = Expr::parse("github.event.pull_request.title").unwrap();
        let (_, issues) = checker.check(&expr);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::UntrustedInput);
        assert_eq!(
            issues[0].path.as_deref(),
            Some("github.event.pull_request.title")
        );

        // Boolean uses do not expand the value.
        let expr = Expr::parse("github.event.pull_request.title == 'x'").unwrap();
        let (_, issues) = checker.check(&expr);
        assert!(issues.is_empty());

        // Flow through format().
        let expr = Expr::parse("format('pr: {0}', github.head_ref)").unwrap();
        let (_, issues) = checker.check(&expr);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path.as_deref(), Some("github.head_ref"));
    }
}
