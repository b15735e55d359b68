//! Diagnostics and deferred fixes.

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::models::Position;

/// The closed set of diagnostic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Kind {
    #[serde(rename = "syntax")]
    Syntax,
    #[serde(rename = "semantic")]
    Semantic,
    #[serde(rename = "style")]
    Style,
    #[serde(rename = "security-critical")]
    SecurityCritical,
    #[serde(rename = "security-high")]
    SecurityHigh,
    #[serde(rename = "security-medium")]
    SecurityMedium,
    #[serde(rename = "security-low")]
    SecurityLow,
    #[serde(rename = "deprecation")]
    Deprecation,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Syntax => "syntax",
            Kind::Semantic => "semantic",
            Kind::Style => "style",
            Kind::SecurityCritical => "security-critical",
            Kind::SecurityHigh => "security-high",
            Kind::SecurityMedium => "security-medium",
            Kind::SecurityLow => "security-low",
            Kind::Deprecation => "deprecation",
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Kind::SecurityCritical | Kind::SecurityHigh | Kind::SecurityMedium | Kind::SecurityLow
        )
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported problem. Every diagnostic carries a 1-based position.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: &'static str,
    pub message: String,
    pub path: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    pub kind: Kind,
}

impl Diagnostic {
    pub fn new(rule: &'static str, pos: Position, kind: Kind, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
            path: Utf8PathBuf::new(),
            line: pos.line,
            column: pos.column,
            kind,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// The stable output ordering: `(path, line, column)`.
    pub fn sort_key(&self) -> (&Utf8PathBuf, u32, u32) {
        (&self.path, self.line, self.column)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{path}:{line}:{col}: {msg} [{rule}]",
            path = self.path,
            line = self.line,
            col = self.column,
            msg = self.message,
            rule = self.rule
        )
    }
}

/// What a fix is bound to, for reporting.
#[derive(Debug, Clone)]
pub enum FixScope {
    Workflow,
    Job(String),
    Step(String, usize),
}

/// A deferred autofix: a titled set of patches registered by a rule and
/// applied by the driver on demand.
#[derive(Debug, Clone)]
pub struct Fix {
    pub rule: &'static str,
    pub title: String,
    pub scope: FixScope,
    pub patches: Vec<yamlcst::Patch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut diagnostic = Diagnostic::new(
            "timeout-minutes",
            Position { line: 4, column: 3 },
            Kind::Style,
            "job runs without a timeout",
        );
        diagnostic.path = Utf8PathBuf::from("ci.yml");
        assert_eq!(
            diagnostic.to_string(),
            "ci.yml:4:3: job runs without a timeout [timeout-minutes]"
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Kind::SecurityCritical.as_str(), "security-critical");
        assert_eq!(Kind::Deprecation.as_str(), "deprecation");
        assert!(Kind::SecurityLow.is_security());
        assert!(!Kind::Style.is_security());
    }
}
