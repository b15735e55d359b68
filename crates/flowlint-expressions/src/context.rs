//! Context references (e.g. `github.event.issue.title`) and the patterns
//! that match them.

use crate::{Expr, Literal, SpannedExpr};

/// A context reference in an expression.
///
/// Usually a dotted identifier chain, possibly with indices and `*` parts.
/// The head may also be a function call, as in `fromJSON(x).foo`.
#[derive(Debug, PartialEq)]
pub struct Context<'src> {
    /// The individual parts of the context, head first.
    pub parts: Vec<SpannedExpr<'src>>,
}

impl<'src> Context<'src> {
    pub(crate) fn new(parts: Vec<SpannedExpr<'src>>) -> Self {
        Self { parts }
    }

    /// The head identifier's name, if the head is an identifier.
    pub fn head(&self) -> Option<&str> {
        match self.parts.first().map(|p| &p.inner) {
            Some(Expr::Identifier(ident)) => Some(ident.as_str()),
            _ => None,
        }
    }

    /// This context's single tail part, for two-part contexts like
    /// `env.FOO` or `inputs['bar']`.
    ///
    /// Returns `None` unless the context is exactly `identifier.tail` with
    /// a statically known tail.
    pub fn single_tail(&self) -> Option<&str> {
        if self.parts.len() != 2 || !matches!(self.parts[0].inner, Expr::Identifier(_)) {
            return None;
        }
        match &self.parts[1].inner {
            Expr::Identifier(ident) => Some(ident.as_str()),
            Expr::Index(index) => match &index.inner {
                Expr::Literal(Literal::String(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Lowercased dotted form of this context, with computed or numeric
    /// indices rendered as `*`.
    ///
    /// Returns `None` when the context has no pattern form (a call head).
    pub fn as_pattern(&self) -> Option<String> {
        let mut pattern = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                pattern.push('.');
            }
            match &part.inner {
                Expr::Identifier(ident) => pattern.push_str(ident.as_str()),
                Expr::Star => pattern.push('*'),
                Expr::Index(index) => match &index.inner {
                    Expr::Literal(Literal::String(s)) => pattern.push_str(s),
                    _ => pattern.push('*'),
                },
                _ => return None,
            }
        }
        pattern.make_ascii_lowercase();
        Some(pattern)
    }

    /// Whether this context exactly matches `pattern`.
    pub fn matches(&self, pattern: &ContextPattern) -> bool {
        pattern.matches(self)
    }

    /// Whether this context is `pattern` itself or a child of it.
    pub fn child_of(&self, pattern: &ContextPattern) -> bool {
        pattern.parent_of(self)
    }
}

/// A pattern over contexts: dotted identifiers and `*` wildcards.
///
/// Patterns match case-insensitively, and treat string indices as dotted
/// parts (`foo['bar']` matches `foo.bar`) and numeric or computed indices
/// as wildcards (`foo[0]` matches `foo.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPattern<'src> {
    parts: Vec<&'src str>,
}

impl<'src> ContextPattern<'src> {
    /// Parses a pattern, panicking when it is malformed. Intended for
    /// static tables.
    pub fn new(pattern: &'src str) -> Self {
        Self::try_new(pattern).unwrap_or_else(|| panic!("malformed context pattern: {pattern:?}"))
    }

    /// Parses a pattern, returning `None` when it is malformed.
    pub fn try_new(pattern: &'src str) -> Option<Self> {
        if pattern.is_empty() {
            return None;
        }
        let parts: Vec<&str> = pattern.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            let valid = if *part == "*" {
                // The head of a pattern names a context, never a wildcard.
                i != 0
            } else {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            };
            if !valid {
                return None;
            }
        }
        Some(Self { parts })
    }

    fn part_matches(pattern: &str, part: &Expr<'_>) -> bool {
        if pattern == "*" {
            return true;
        }
        match part {
            Expr::Identifier(ident) => ident == pattern,
            Expr::Index(index) => match &index.inner {
                Expr::Literal(Literal::String(s)) => s.eq_ignore_ascii_case(pattern),
                _ => false,
            },
            _ => false,
        }
    }

    /// Compares against `ctx`: `Some(true)` for an exact match,
    /// `Some(false)` when the context extends past the pattern, `None` when
    /// they diverge.
    fn compare(&self, ctx: &Context<'_>) -> Option<bool> {
        if ctx.parts.len() < self.parts.len() {
            return None;
        }
        for (pattern, part) in self.parts.iter().zip(ctx.parts.iter()) {
            if !Self::part_matches(pattern, &part.inner) {
                return None;
            }
        }
        Some(ctx.parts.len() == self.parts.len())
    }

    /// Whether `ctx` exactly matches this pattern.
    pub fn matches(&self, ctx: &Context<'_>) -> bool {
        self.compare(ctx) == Some(true)
    }

    /// Whether `ctx` is this pattern or one of its children.
    ///
    /// `foo` is a parent of `foo`, `foo.bar`, and `foo.bar.baz`.
    pub fn parent_of(&self, ctx: &Context<'_>) -> bool {
        self.compare(ctx).is_some()
    }

    /// The dotted source form of this pattern.
    pub fn as_str(&self) -> String {
        self.parts.join(".")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn context(src: &str) -> Context<'_> {
        match Expr::parse(src).unwrap().inner {
            Expr::Context(ctx) => ctx,
            other => panic!("expected a context, got {other:?}"),
        }
    }

    #[test]
    fn test_try_new() {
        for ok in ["foo", "foo.bar", "foo.*", "foo.*.baz", "foo-bar.a_b"] {
            assert!(ContextPattern::try_new(ok).is_some(), "{ok}");
        }
        for bad in ["", "*", ".", "foo.", ".foo", "foo..bar", "foo.**", "f☃"] {
            assert!(ContextPattern::try_new(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn test_matches() {
        for (pattern, ctx, expected) in [
            ("foo", "foo", true),
            ("foo.bar", "foo.bar", true),
            ("foo.bar", "FOO.BAR", true),
            ("foo.*", "foo.bar", true),
            ("foo.*.baz", "foo.bar.baz", true),
            ("foo.bar", "foo['bar']", true),
            ("foo.bar", "foo['BAR']", true),
            ("foo.*", "foo[0]", true),
            ("foo.*", "foo[anything]", true),
            ("foo.*.name", "foo.*.name", true),
            ("foo.bar", "foo.baz", false),
            ("foo.bar.baz", "foo.bar", false),
            ("foo.bar", "foo.bar.baz", false),
            ("foo.1", "foo[1]", false),
        ] {
            let pattern = ContextPattern::new(pattern);
            assert_eq!(pattern.matches(&context(ctx)), expected, "{ctx}");
        }
    }

    #[test]
    fn test_parent_of() {
        for (pattern, ctx, expected) in [
            ("foo", "foo", true),
            ("foo", "foo.bar.baz", true),
            ("foo.bar", "foo.bar.baz", true),
            ("github.head_ref", "GITHUB.HEAD_REF", true),
            ("foo.*", "foo.bar.baz.qux", true),
            ("foo.bar", "foo", false),
            ("foo.bar", "qux.bar", false),
        ] {
            let pattern = ContextPattern::new(pattern);
            assert_eq!(pattern.parent_of(&context(ctx)), expected, "{ctx}");
        }
    }

    #[test]
    fn test_as_pattern() {
        for (src, expected) in [
            ("foo.bar", Some("foo.bar")),
            ("FOO.BAR", Some("foo.bar")),
            ("foo.*.baz", Some("foo.*.baz")),
            ("foo['bar']", Some("foo.bar")),
            ("foo[0].name", Some("foo.*.name")),
            ("foo[github.x]", Some("foo.*")),
        ] {
            assert_eq!(context(src).as_pattern().as_deref(), expected, "{src}");
        }
        let call = Expr::parse("fromJSON(x).foo").unwrap();
        let Expr::Context(ctx) = call.inner else {
            panic!("expected context");
        };
        assert_eq!(ctx.as_pattern(), None);
    }

    #[test]
    fn test_single_tail() {
        for (src, expected) in [
            ("env.FOO", Some("FOO")),
            ("inputs['bar']", Some("bar")),
            ("foo.bar.baz", None),
            ("foo[0]", None),
        ] {
            assert_eq!(context(src).single_tail(), expected, "{src}");
        }
    }
}
