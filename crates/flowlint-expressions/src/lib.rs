//! WorkflowSpec expression parsing and analysis.
//!
//! Expressions are the `${{ … }}` bodies embedded in workflow files. This
//! crate parses them into a spanned AST, models their value types, and
//! checks them semantically: context/function availability, call signatures,
//! operand types, and tracking of untrusted (externally controllable)
//! context paths.

#![forbid(unsafe_code)]

use std::borrow::Cow;

use crate::context::Context;
use crate::lexer::Lexer;
use crate::parser::Parser;

pub mod check;
pub mod context;
pub mod funcs;
mod lexer;
mod parser;
pub mod types;
pub mod untrusted;

/// A half-open byte range into the expression source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub(crate) fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

/// An expression parse error, positioned by byte offset into the source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// An [`Expr`] together with the source span it was parsed from.
#[derive(Debug)]
pub struct SpannedExpr<'src> {
    pub inner: Expr<'src>,
    pub span: Span,
}

impl<'src> SpannedExpr<'src> {
    pub(crate) fn new(inner: Expr<'src>, span: Span) -> Self {
        Self { inner, span }
    }
}

impl<'src> std::ops::Deref for SpannedExpr<'src> {
    type Target = Expr<'src>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Spans are presentation detail; expression equality ignores them.
impl PartialEq for SpannedExpr<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

/// A literal value.
#[derive(Debug, PartialEq)]
pub enum Literal<'src> {
    Number(f64),
    String(Cow<'src, str>),
    Boolean(bool),
    Null,
}

impl Literal<'_> {
    /// The literal's value as a string, without surrounding quotes.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Literal::String(s) => Cow::Borrowed(s.as_ref()),
            Literal::Number(n) => Cow::Owned(n.to_string()),
            Literal::Boolean(b) => Cow::Owned(b.to_string()),
            Literal::Null => Cow::Borrowed("null"),
        }
    }
}

/// A single context component, e.g. `github` in `github.actor`.
///
/// Identifiers are case-insensitive.
#[derive(Debug)]
pub struct Identifier<'src>(pub(crate) &'src str);

impl Identifier<'_> {
    /// The identifier as written; do not use for comparisons.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Identifier<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Identifier<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// A function name. Function names are case-insensitive.
#[derive(Debug)]
pub struct Function<'src>(pub(crate) &'src str);

impl Function<'_> {
    /// The function name as written; do not use for comparisons.
    pub fn as_str(&self) -> &str {
        self.0
    }
}

impl PartialEq for Function<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl PartialEq<str> for Function<'_> {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

/// Binary operators, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Neq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
        })
    }
}

/// Unary operators. Negation is the only one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
}

/// A parsed WorkflowSpec expression.
#[derive(Debug, PartialEq)]
pub enum Expr<'src> {
    /// A literal value.
    Literal(Literal<'src>),
    /// The `*` inside a context part or index.
    Star,
    /// A context component identifier.
    Identifier(Identifier<'src>),
    /// An index component, e.g. `[0]` or `['name']`.
    Index(Box<SpannedExpr<'src>>),
    /// A full context reference, e.g. `github.event.issue.title`.
    Context(Context<'src>),
    /// A function call.
    Call {
        func: Function<'src>,
        args: Vec<SpannedExpr<'src>>,
    },
    BinOp {
        lhs: Box<SpannedExpr<'src>>,
        op: BinOp,
        rhs: Box<SpannedExpr<'src>>,
    },
    UnOp {
        op: UnOp,
        expr: Box<SpannedExpr<'src>>,
    },
}

impl<'src> Expr<'src> {
    /// Parses `src` into a single expression.
    ///
    /// The whole input must be consumed: trailing tokens are an error, since
    /// a `${{ … }}` holds exactly one expression.
    pub fn parse(src: &'src str) -> Result<SpannedExpr<'src>, ParseError> {
        let tokens = Lexer::new(src).tokenize()?;
        Parser::new(tokens).parse()
    }

    /// Whether this expression is a literal.
    fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// Whether the expression reduces to a constant at evaluation time.
    ///
    /// Literals are constant; operators over constants are constant; a
    /// handful of pure functions are constant when all their arguments are.
    pub fn constant_reducible(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::BinOp { lhs, rhs, .. } => lhs.constant_reducible() && rhs.constant_reducible(),
            Expr::UnOp { expr, .. } => expr.constant_reducible(),
            Expr::Call { func, args } => {
                if func == "format"
                    || func == "contains"
                    || func == "startsWith"
                    || func == "endsWith"
                {
                    args.iter().all(|arg| arg.constant_reducible())
                } else {
                    false
                }
            }
            _ => false,
        }
    }

}

impl<'src> SpannedExpr<'src> {
    /// Returns the contexts whose values flow into this expression's
    /// evaluation (as opposed to flowing into a boolean decision).
    ///
    /// `${{ foo.bar }}` expands the value of `foo.bar`; `${{ foo.bar ==
    /// 'abc' }}` expands a boolean. With `&&` only the right side can
    /// expand; with `||` either side can.
    pub fn dataflow_contexts(&self) -> Vec<(&Context<'src>, Span)> {
        fn walk<'a, 'src>(
            expr: &'a SpannedExpr<'src>,
            out: &mut Vec<(&'a Context<'src>, Span)>,
        ) {
            match &expr.inner {
                Expr::Context(ctx) => out.push((ctx, expr.span)),
                Expr::Call { func, args } => {
                    if func == "toJSON" || func == "format" || func == "join" {
                        for arg in args {
                            walk(arg, out);
                        }
                    }
                }
                Expr::BinOp { lhs, op, rhs } => match op {
                    BinOp::And => walk(rhs, out),
                    BinOp::Or => {
                        walk(lhs, out);
                        walk(rhs, out);
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        let mut out = vec![];
        walk(self, &mut out);
        out
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::borrow::Cow;

    use super::*;

    pub(crate) fn spanned(expr: Expr<'_>) -> SpannedExpr<'_> {
        SpannedExpr::new(expr, Span::default())
    }

    pub(crate) fn string(s: &str) -> Expr<'_> {
        Expr::Literal(Literal::String(Cow::Borrowed(s)))
    }

    pub(crate) fn number(n: f64) -> Expr<'static> {
        Expr::Literal(Literal::Number(n))
    }

    pub(crate) fn boolean(b: bool) -> Expr<'static> {
        Expr::Literal(Literal::Boolean(b))
    }

    pub(crate) fn ident(name: &str) -> Expr<'_> {
        Expr::Identifier(Identifier(name))
    }

    pub(crate) fn context<'src>(parts: Vec<Expr<'src>>) -> Expr<'src> {
        Expr::Context(Context::new(parts.into_iter().map(spanned).collect()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::testutil::*;
    use super::*;

    #[test]
    fn test_function_eq() {
        let func = Function("fromJSON");
        assert_eq!(&func, "fromjson");
        assert_eq!(&func, "FROMJSON");
        assert_eq!(func, Function("FromJson"));
    }

    #[test]
    fn test_constant_reducible() {
        for (src, reducible) in [
            ("'foo'", true),
            ("1", true),
            ("true", true),
            ("null", true),
            ("!true", true),
            ("true && false", true),
            ("format('{0} {1}', 'foo', 'bar')", true),
            ("contains('foo', 'bar')", true),
            ("startsWith(some.context, 'bar')", false),
            ("foo.bar", false),
            ("foo.bar == 'bar'", false),
        ] {
            let expr = Expr::parse(src).unwrap();
            assert_eq!(expr.constant_reducible(), reducible, "{src}");
        }
    }

    #[test]
    fn test_dataflow_contexts() {
        let cases: &[(&str, &[&str])] = &[
            ("foo.bar", &["foo.bar"]),
            ("foo.bar == 'bar'", &[]),
            ("foo.bar || abc || d.e.f", &["foo.bar", "abc", "d.e.f"]),
            ("foo.bar && abc && d.e.f", &["d.e.f"]),
            ("format('{0}', github.head_ref)", &["github.head_ref"]),
            ("toJSON(github.event)", &["github.event"]),
            ("!foo.bar", &[]),
        ];

        for (src, expected) in cases {
            let expr = Expr::parse(src).unwrap();
            let patterns: Vec<String> = expr
                .dataflow_contexts()
                .into_iter()
                .filter_map(|(ctx, _)| ctx.as_pattern())
                .collect();
            assert_eq!(&patterns, expected, "{src}");
        }
    }

    #[test]
    fn test_parse_smoke() {
        let expr = Expr::parse("!true || false").unwrap();
        assert_eq!(
            expr,
            spanned(Expr::BinOp {
                lhs: Box::new(spanned(Expr::UnOp {
                    op: UnOp::Not,
                    expr: Box::new(spanned(boolean(true))),
                })),
                op: BinOp::Or,
                rhs: Box::new(spanned(boolean(false))),
            })
        );
    }
}
