//! Comment-preserving patch operations.
//!
//! Patches address a node with a [`Route`] and splice the original source
//! text instead of re-serializing the tree, so everything the patch does not
//! touch — comments, quoting, key order, indentation — survives byte-for-byte.
//! Each operation re-parses the document before resolving its route, which
//! keeps spans honest when several patches are applied in sequence.

use std::ops::Range;

use indexmap::IndexMap;

use crate::{Document, Error, Mapping, Node, Route, Scalar};

/// A single patch operation against the node addressed by a route.
#[derive(Debug, Clone)]
pub enum Op {
    /// Replace a scalar value, optionally attaching a trailing `# comment`.
    Replace {
        value: serde_yaml::Value,
        line_comment: Option<String>,
    },
    /// Rewrite the first occurrence of `from` within the addressed feature.
    ///
    /// Works regardless of the feature's nesting or single/multi-line
    /// presentation, which makes it the tool of choice for rewriting
    /// expressions embedded in `run:` blocks.
    RewriteFragment { from: String, to: String },
    /// Insert a new entry into the addressed mapping, optionally preceded
    /// by a comment line. The key must not already exist.
    Add {
        key: String,
        value: serde_yaml::Value,
        head_comment: Option<String>,
    },
    /// Merge entries into the child mapping `key` of the addressed mapping,
    /// creating it if missing. Existing keys are overwritten, unrelated
    /// keys are untouched.
    MergeInto {
        key: String,
        updates: IndexMap<String, serde_yaml::Value>,
    },
    /// Remove the mapping entry addressed by the route's final key.
    Remove,
}

/// A deferred mutation: where, and what.
#[derive(Debug, Clone)]
pub struct Patch {
    pub route: Route,
    pub op: Op,
}

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error(transparent)]
    Parse(#[from] Error),
    #[error("no node at {0}")]
    RouteNotFound(String),
    #[error("expected {expected} at {route}, found {found}")]
    ExpectedKind {
        route: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("key {key:?} already exists at {route}")]
    KeyExists { route: String, key: String },
    #[error("fragment {fragment:?} not found at {route}")]
    FragmentNotFound { route: String, fragment: String },
}

/// Applies `patches` in order, re-parsing between operations.
pub fn apply_all(source: &str, patches: &[Patch]) -> Result<String, PatchError> {
    let mut current = source.to_string();
    for patch in patches {
        let document = Document::parse(current.as_str())?;
        current = apply_one(&document, patch)?;
    }
    Ok(current)
}

fn apply_one(document: &Document, patch: &Patch) -> Result<String, PatchError> {
    let source = document.source();
    let route_name = patch.route.to_string();

    match &patch.op {
        Op::Replace {
            value,
            line_comment,
        } => {
            let node = resolve(document, &patch.route)?;
            let scalar = node.as_scalar().ok_or_else(|| PatchError::ExpectedKind {
                route: route_name.clone(),
                expected: "scalar",
                found: node.kind_name(),
            })?;
            let mut text = render_scalar(value);
            let span = scalar.span;
            let mut end = span.end.index;
            if let Some(comment) = line_comment {
                // Only attach the comment when nothing but an existing
                // comment follows on the line; flow contexts keep the value
                // rewrite and drop the comment.
                let le = line_end(source, end);
                let rest = source[end..le].trim_start();
                if rest.is_empty() || rest.starts_with('#') {
                    text = format!("{text} # {comment}");
                    end = le;
                }
            }
            Ok(splice(source, span.start.index..end, &text))
        }
        Op::RewriteFragment { from, to } => {
            let node = resolve(document, &patch.route)?;
            let span = node.span();
            let feature = &source[span.start.index..span.end.index];
            let offset = memchr::memmem::find(feature.as_bytes(), from.as_bytes()).ok_or_else(
                || PatchError::FragmentNotFound {
                    route: route_name.clone(),
                    fragment: from.clone(),
                },
            )?;
            // Splicing into a quoted scalar must re-escape the replacement,
            // or a quote in it would terminate the scalar early.
            let to = match node.as_scalar().map(|scalar| scalar.style) {
                Some(crate::ScalarStyle::DoubleQuoted) => escape_double_quoted(to),
                Some(crate::ScalarStyle::SingleQuoted) => to.replace('\'', "''"),
                _ => to.clone(),
            };
            let start = span.start.index + offset;
            Ok(splice(source, start..start + from.len(), &to))
        }
        Op::Add {
            key,
            value,
            head_comment,
        } => {
            let node = resolve(document, &patch.route)?;
            let mapping = expect_mapping(node, &route_name)?;
            if mapping.get(key).is_some() {
                return Err(PatchError::KeyExists {
                    route: route_name,
                    key: key.clone(),
                });
            }
            Ok(insert_entry(
                source,
                mapping,
                key,
                value,
                head_comment.as_deref(),
            ))
        }
        Op::MergeInto { key, updates } => {
            let node = resolve(document, &patch.route)?;
            let mapping = expect_mapping(node, &route_name)?;
            merge_into(source, mapping, key, updates, &route_name)
        }
        Op::Remove => {
            let (key, value) = document
                .resolve_entry(&patch.route)
                .ok_or_else(|| PatchError::RouteNotFound(route_name.clone()))?;
            let (parent_route, _) = patch
                .route
                .split_last()
                .ok_or_else(|| PatchError::RouteNotFound(route_name.clone()))?;
            let parent = resolve(document, &parent_route)?;
            let parent = expect_mapping(parent, &route_name)?;
            Ok(remove_entry(source, parent, key, value))
        }
    }
}

fn resolve<'doc>(document: &'doc Document, route: &Route) -> Result<&'doc Node, PatchError> {
    document
        .resolve(route)
        .ok_or_else(|| PatchError::RouteNotFound(route.to_string()))
}

fn expect_mapping<'doc>(node: &'doc Node, route: &str) -> Result<&'doc Mapping, PatchError> {
    node.as_mapping().ok_or_else(|| PatchError::ExpectedKind {
        route: route.to_string(),
        expected: "mapping",
        found: node.kind_name(),
    })
}

/// Inserts `key: value` into `mapping`, after its last entry.
fn insert_entry(
    source: &str,
    mapping: &Mapping,
    key: &str,
    value: &serde_yaml::Value,
    head_comment: Option<&str>,
) -> String {
    if mapping.flow || mapping.entries.is_empty() {
        let rendered = format!("{key}: {}", render_scalar(value));
        return match mapping.entries.last() {
            Some((_, last)) => {
                let at = last.span().end.index;
                splice(source, at..at, &format!(", {rendered}"))
            }
            None => {
                // Empty mappings are flow mappings; rewrite the braces.
                let open = mapping.span.start.index;
                match source[open..].find('}') {
                    Some(off) => {
                        splice(source, open..open + off + 1, &format!("{{ {rendered} }}"))
                    }
                    None => splice(source, open..open, &format!("{{ {rendered} }}")),
                }
            }
        };
    }

    let indent = (mapping.entries[0].0.span.start.column - 1) as usize;
    let at = line_end(source, last_entry_end(mapping));
    let mut text = String::new();
    if let Some(comment) = head_comment {
        for line in comment.lines() {
            text.push('\n');
            text.push_str(&" ".repeat(indent));
            text.push_str("# ");
            text.push_str(line);
        }
    }
    text.push('\n');
    text.push_str(&render_block_entry(key, value, indent));
    splice(source, at..at, &text)
}

fn merge_into(
    source: &str,
    mapping: &Mapping,
    key: &str,
    updates: &IndexMap<String, serde_yaml::Value>,
    route: &str,
) -> Result<String, PatchError> {
    let Some((child_key, child)) = mapping.entry(key) else {
        let value =
            serde_yaml::Value::Mapping(updates.iter().fold(Default::default(), |mut m, (k, v)| {
                m.insert(serde_yaml::Value::String(k.clone()), v.clone());
                m
            }));
        return Ok(insert_entry(source, mapping, key, &value, None));
    };

    match child {
        Node::Mapping(child_map) => {
            let mut edits: Vec<(Range<usize>, String)> = Vec::new();
            let mut appended = String::new();
            for (update_key, update_value) in updates {
                match child_map.entry(update_key) {
                    Some((_, Node::Scalar(existing))) => {
                        edits.push((
                            existing.span.start.index..existing.span.end.index,
                            render_scalar(update_value),
                        ));
                    }
                    Some((_, other)) => {
                        return Err(PatchError::ExpectedKind {
                            route: format!("{route}/{key}/{update_key}"),
                            expected: "scalar",
                            found: other.kind_name(),
                        });
                    }
                    None => {
                        if child_map.flow || child_map.entries.is_empty() {
                            if !appended.is_empty() {
                                appended.push_str(", ");
                            }
                            appended
                                .push_str(&format!("{update_key}: {}", render_scalar(update_value)));
                        } else {
                            let indent = (child_map.entries[0].0.span.start.column - 1) as usize;
                            appended.push('\n');
                            appended.push_str(&render_block_entry(
                                update_key,
                                update_value,
                                indent,
                            ));
                        }
                    }
                }
            }
            if !appended.is_empty() {
                if child_map.flow || child_map.entries.is_empty() {
                    let at = match child_map.entries.last() {
                        Some((_, last)) => last.span().end.index,
                        None => {
                            let open = child_map.span.start.index;
                            source[open..]
                                .find('}')
                                .map(|off| open + off)
                                .unwrap_or(source.len())
                        }
                    };
                    let text = if child_map.entries.is_empty() {
                        format!(" {appended} ")
                    } else {
                        format!(", {appended}")
                    };
                    edits.push((at..at, text));
                } else {
                    let at = line_end(source, last_entry_end(child_map));
                    edits.push((at..at, appended));
                }
            }
            Ok(splice_all(source, edits))
        }
        scalar if scalar.is_null_scalar() => {
            // `env:` with no value: rewrite the (empty) value into a block
            // mapping anchored under the key.
            let key_indent = (child_key.span.start.column - 1) as usize;
            let indent = key_indent + 2;
            let colon = source[child_key.span.end.index..]
                .find(':')
                .map(|off| child_key.span.end.index + off)
                .unwrap_or(child_key.span.end.index);
            let le = line_end(source, colon);
            let mut text = String::new();
            for (update_key, update_value) in updates {
                text.push('\n');
                text.push_str(&render_block_entry(update_key, update_value, indent));
            }
            Ok(splice(source, colon + 1..le, &text))
        }
        other => Err(PatchError::ExpectedKind {
            route: format!("{route}/{key}"),
            expected: "mapping",
            found: other.kind_name(),
        }),
    }
}

fn remove_entry(source: &str, parent: &Mapping, key: &Scalar, value: &Node) -> String {
    let key_start = key.span.start.index;
    let value_end = value.span().end.index;

    if parent.flow {
        // Eat one separating comma, preferring the one that follows.
        let mut start = key_start;
        let mut end = value_end;
        let after = &source[value_end..];
        let trailing_comma = after
            .char_indices()
            .take_while(|(_, c)| *c == ',' || c.is_whitespace())
            .find(|(_, c)| *c == ',');
        if let Some((off, _)) = trailing_comma {
            end = value_end + off + 1;
            while source.as_bytes().get(end) == Some(&b' ') {
                end += 1;
            }
        } else {
            while start > 0 && source.as_bytes()[start - 1] == b' ' {
                start -= 1;
            }
            if start > 0 && source.as_bytes()[start - 1] == b',' {
                start -= 1;
            }
        }
        let mut patched = splice(source, start..end, "");
        // Collapse `{   }` leftovers into `{}`.
        if let Some(open) = find_empty_braces(&patched, parent.span.start.index) {
            patched = splice(&patched, open.clone(), "{}");
        }
        patched
    } else {
        let ls = line_start(source, key_start);
        let le = line_end(source, value_end);
        // Only delete whole lines when the key owns its line; otherwise we
        // would take a sequence dash or sibling text with us.
        if source[ls..key_start].trim().is_empty() {
            let end = if le < source.len() { le + 1 } else { le };
            splice(source, ls..end, "")
        } else {
            splice(source, key_start..value_end, "")
        }
    }
}

/// Finds a `{ ... }` group whose interior is only whitespace, starting the
/// search at `from`, and returns the byte range including both braces.
fn find_empty_braces(source: &str, from: usize) -> Option<Range<usize>> {
    let bytes = source.as_bytes();
    let from = from.min(bytes.len());
    let open = memchr::memchr(b'{', &bytes[from..])? + from;
    let close = memchr::memchr(b'}', &bytes[open..])? + open;
    if source[open + 1..close].trim().is_empty() && close > open + 1 {
        Some(open..close + 1)
    } else {
        None
    }
}

fn last_entry_end(mapping: &Mapping) -> usize {
    mapping
        .entries
        .last()
        .map(|(_, value)| value.span().end.index)
        .unwrap_or(mapping.span.start.index)
}

fn line_start(source: &str, index: usize) -> usize {
    source[..index].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

fn line_end(source: &str, index: usize) -> usize {
    source[index..]
        .find('\n')
        .map(|i| index + i)
        .unwrap_or(source.len())
}

fn splice(source: &str, range: Range<usize>, text: &str) -> String {
    let mut out = String::with_capacity(source.len() + text.len());
    out.push_str(&source[..range.start]);
    out.push_str(text);
    out.push_str(&source[range.end..]);
    out
}

/// Applies several non-overlapping edits in one pass.
fn splice_all(source: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = source.to_string();
    for (range, text) in edits {
        out = splice(&out, range, &text);
    }
    out
}

/// Renders a value as an inline YAML scalar (or flow collection).
///
/// Strings that are not plain-safe are double-quoted, which is also what the
/// fix output format expects for expression values.
fn render_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => {
            if plain_safe(s) {
                s.clone()
            } else {
                format!("\"{}\"", escape_double_quoted(s))
            }
        }
        serde_yaml::Value::Sequence(items) => {
            let rendered: Vec<String> = items.iter().map(render_scalar).collect();
            format!("[{}]", rendered.join(", "))
        }
        serde_yaml::Value::Mapping(map) => {
            if map.is_empty() {
                "{}".to_string()
            } else {
                let rendered: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", render_scalar(k), render_scalar(v)))
                    .collect();
                format!("{{ {} }}", rendered.join(", "))
            }
        }
        serde_yaml::Value::Tagged(tagged) => render_scalar(&tagged.value),
    }
}

fn plain_safe(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if matches!(
        s,
        "true" | "false" | "null" | "yes" | "no" | "on" | "off" | "~"
    ) {
        return false;
    }
    let first = s.chars().next().unwrap_or(' ');
    if first.is_ascii_digit() || first == '-' {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '@'))
}

fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Renders `key: value` as a block mapping entry at `indent` spaces,
/// recursing into nested mappings and sequences.
fn render_block_entry(key: &str, value: &serde_yaml::Value, indent: usize) -> String {
    let pad = " ".repeat(indent);
    match value {
        serde_yaml::Value::Mapping(map) if !map.is_empty() => {
            let mut out = format!("{pad}{key}:");
            for (k, v) in map {
                out.push('\n');
                out.push_str(&render_block_entry(&render_scalar(k), v, indent + 2));
            }
            out
        }
        serde_yaml::Value::Sequence(items) if !items.is_empty() => {
            let mut out = format!("{pad}{key}:");
            for item in items {
                out.push('\n');
                out.push_str(&format!("{pad}  - {}", render_scalar(item)));
            }
            out
        }
        other => format!("{pad}{key}: {}", render_scalar(other)),
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn string(s: &str) -> serde_yaml::Value {
        serde_yaml::Value::String(s.to_string())
    }

    #[test]
    fn test_merge_env_and_rewrite_run() {
        let source = "on: pull_request_target\njobs:\n  test:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ github.event.pull_request.title }}\n";

        let step = Route::new()
            .with("jobs")
            .with("test")
            .with("steps")
            .with(0usize);
        let patches = vec![
            Patch {
                route: step.clone(),
                op: Op::MergeInto {
                    key: "env".to_string(),
                    updates: IndexMap::from([(
                        "PR_TITLE".to_string(),
                        string("${{ github.event.pull_request.title }}"),
                    )]),
                },
            },
            Patch {
                route: step.with("run"),
                op: Op::RewriteFragment {
                    from: "${{ github.event.pull_request.title }}".to_string(),
                    to: "\"$PR_TITLE\"".to_string(),
                },
            },
        ];

        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "on: pull_request_target\njobs:\n  test:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo \"$PR_TITLE\"\n        env:\n          PR_TITLE: \"${{ github.event.pull_request.title }}\"\n"
        );
    }

    #[test]
    fn test_add_with_head_comment() {
        let source = "name: CI\non: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n";
        let patches = vec![Patch {
            route: Route::new(),
            op: Op::Add {
                key: "permissions".to_string(),
                value: serde_yaml::Value::Mapping(Default::default()),
                head_comment: Some("TODO: set minimal permissions".to_string()),
            },
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "name: CI\non: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n# TODO: set minimal permissions\npermissions: {}\n"
        );
    }

    #[test]
    fn test_remove_flow_entry() {
        let source = "jobs:\n  t:\n    steps:\n      - uses: actions/checkout@v4\n        with: { ref: \"${{ steps.x.outputs.head_sha }}\" }\n";
        let patches = vec![Patch {
            route: Route::new()
                .with("jobs")
                .with("t")
                .with("steps")
                .with(0usize)
                .with("with")
                .with("ref"),
            op: Op::Remove,
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "jobs:\n  t:\n    steps:\n      - uses: actions/checkout@v4\n        with: {}\n"
        );
    }

    #[test]
    fn test_remove_block_entry() {
        let source = "jobs:\n  t:\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: feature\n          fetch-depth: 0\n";
        let patches = vec![Patch {
            route: Route::new()
                .with("jobs")
                .with("t")
                .with("steps")
                .with(0usize)
                .with("with")
                .with("ref"),
            op: Op::Remove,
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "jobs:\n  t:\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          fetch-depth: 0\n"
        );
    }

    #[test]
    fn test_replace_with_line_comment() {
        let source = "steps:\n  - uses: actions/checkout@v3\n";
        let patches = vec![Patch {
            route: Route::new().with("steps").with(0usize).with("uses"),
            op: Op::Replace {
                value: string("actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3"),
                line_comment: Some("v3".to_string()),
            },
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "steps:\n  - uses: actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3 # v3\n"
        );
    }

    #[test]
    fn test_merge_into_existing_block_mapping() {
        let source = "step:\n  env:\n    FOO: bar\n  run: echo hi\n";
        let patches = vec![Patch {
            route: Route::new().with("step"),
            op: Op::MergeInto {
                key: "env".to_string(),
                updates: IndexMap::from([
                    ("FOO".to_string(), string("baz")),
                    ("NEW".to_string(), string("x")),
                ]),
            },
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "step:\n  env:\n    FOO: baz\n    NEW: x\n  run: echo hi\n"
        );
    }

    #[test]
    fn test_merge_into_flow_mapping_adds_key() {
        let source = "step:\n  with: { path: dist }\n";
        let patches = vec![Patch {
            route: Route::new().with("step"),
            op: Op::MergeInto {
                key: "with".to_string(),
                updates: IndexMap::from([(
                    "include-hidden-files".to_string(),
                    serde_yaml::Value::Bool(false),
                )]),
            },
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "step:\n  with: { path: dist, include-hidden-files: false }\n"
        );
    }

    #[test]
    fn test_rewrite_fragment_in_block_scalar() {
        let source =
            "step:\n  run: |\n    echo ${{ github.head_ref }}\n    echo done\n";
        let patches = vec![Patch {
            route: Route::new().with("step").with("run"),
            op: Op::RewriteFragment {
                from: "${{ github.head_ref }}".to_string(),
                to: "\"$HEAD_REF\"".to_string(),
            },
        }];
        let patched = apply_all(source, &patches).unwrap();
        assert_eq!(
            patched,
            "step:\n  run: |\n    echo \"$HEAD_REF\"\n    echo done\n"
        );
    }

    #[test]
    fn test_no_patches_is_identity() {
        let source = "a: 1 # keep\nb:\n  - x\n";
        assert_eq!(apply_all(source, &[]).unwrap(), source);
    }
}
