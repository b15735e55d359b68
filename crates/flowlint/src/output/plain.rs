//! Human-readable output: one `<path>:<line>:<col>: <message> [<rule>]`
//! headline per diagnostic, optionally followed by an annotated source
//! snippet.

use annotate_snippets::{Level, Renderer, Snippet};
use line_index::{LineCol, LineIndex};
use owo_colors::OwoColorize;

use crate::finding::{Diagnostic, Kind};
use crate::linter::ValidateResult;

impl From<Kind> for Level {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Syntax | Kind::Semantic | Kind::SecurityCritical | Kind::SecurityHigh => {
                Level::Error
            }
            Kind::SecurityMedium | Kind::Deprecation => Level::Warning,
            Kind::SecurityLow | Kind::Style => Level::Help,
        }
    }
}

fn headline(diagnostic: &Diagnostic, color: bool) -> String {
    let tag = format!("[{}]", diagnostic.rule);
    let tag = if color {
        match diagnostic.kind {
            Kind::SecurityCritical | Kind::SecurityHigh => tag.red().to_string(),
            Kind::Syntax | Kind::Semantic => tag.red().to_string(),
            Kind::SecurityMedium | Kind::Deprecation => tag.yellow().to_string(),
            Kind::SecurityLow | Kind::Style => tag.cyan().to_string(),
        }
    } else {
        tag
    };
    format!(
        "{path}:{line}:{col}: {message} {tag}",
        path = diagnostic.path,
        line = diagnostic.line,
        col = diagnostic.column,
        message = diagnostic.message,
    )
}

/// Renders every diagnostic of `results`.
pub fn render(results: &[ValidateResult], color: bool, snippets: bool) -> String {
    let mut out = String::new();
    for result in results {
        let index = LineIndex::new(&result.source);
        for diagnostic in &result.diagnostics {
            out.push_str(&headline(diagnostic, color));
            out.push('\n');

            if !snippets {
                continue;
            }
            let Some(offset) = index.offset(LineCol {
                line: diagnostic.line.saturating_sub(1),
                col: diagnostic.column.saturating_sub(1),
            }) else {
                continue;
            };
            let at = usize::from(offset);
            let end = (at + 1).min(result.source.len());
            let level = Level::from(diagnostic.kind);
            let message = level.title(diagnostic.rule).snippet(
                Snippet::source(&result.source)
                    .origin(result.path.as_str())
                    .line_start(1)
                    .fold(true)
                    .annotation(level.span(at..end).label(diagnostic.kind.as_str())),
            );
            let renderer = if color {
                Renderer::styled()
            } else {
                Renderer::plain()
            };
            out.push_str(&renderer.render(message).to_string());
            out.push('\n');
        }
    }
    out
}
