//! Position-preserving YAML concrete syntax trees.
//!
//! A [`Document`] keeps the original source text byte-for-byte and exposes a
//! tree of [`Node`]s, each annotated with the byte/line/column span it was
//! parsed from and (for scalars) its presentation style. Consumers address
//! nodes with symbolic [`Route`]s and rewrite documents with the patch
//! operations in [`patch`], which splice the source string rather than
//! re-serializing it, so comments, key order and quoting survive untouched.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use yaml_rust::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust::scanner::{Marker, TScalarStyle};

pub mod patch;

pub use patch::{Op, Patch, PatchError};

/// A single point in a document: byte offset plus 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub index: usize,
    pub line: u32,
    pub column: u32,
}

/// A half-open byte region of the document, with line/column endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Mark,
    pub end: Mark,
}

/// How a scalar was written down in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    Plain,
    SingleQuoted,
    DoubleQuoted,
    Literal,
    Folded,
}

impl ScalarStyle {
    /// Whether the scalar was quoted (single or double).
    pub fn is_quoted(self) -> bool {
        matches!(self, ScalarStyle::SingleQuoted | ScalarStyle::DoubleQuoted)
    }

    /// Whether the scalar was a block scalar (`|` or `>`).
    pub fn is_block(self) -> bool {
        matches!(self, ScalarStyle::Literal | ScalarStyle::Folded)
    }
}

/// A scalar node: its resolved value, presentation style and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub value: String,
    pub style: ScalarStyle,
    pub span: Span,
    /// For block scalars, the column (0-based) at which content lines start.
    pub block_indent: Option<u32>,
}

/// A mapping node. Entries appear in document order; duplicate keys are
/// preserved (rejecting them is the consumer's policy, not the CST's).
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub entries: Vec<(Scalar, Node)>,
    pub span: Span,
    pub flow: bool,
}

impl Mapping {
    /// Returns the first value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries
            .iter()
            .find(|(k, _)| k.value == key)
            .map(|(_, v)| v)
    }

    /// Returns the first `(key, value)` entry for `key`, if present.
    pub fn entry(&self, key: &str) -> Option<&(Scalar, Node)> {
        self.entries.iter().find(|(k, _)| k.value == key)
    }
}

/// A sequence node.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub items: Vec<Node>,
    pub span: Span,
    pub flow: bool,
}

/// A node in the concrete tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Mapping(Mapping),
    Sequence(Sequence),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Scalar(s) => s.span,
            Node::Mapping(m) => m.span,
            Node::Sequence(s) => s.span,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Node::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// A short human-readable name for the node's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Scalar(_) => "scalar",
            Node::Mapping(_) => "mapping",
            Node::Sequence(_) => "sequence",
        }
    }

    /// Whether this is an empty scalar (the value of a key with no content).
    pub fn is_null_scalar(&self) -> bool {
        matches!(self, Node::Scalar(s) if s.style == ScalarStyle::Plain
            && (s.value.is_empty() || s.value == "~" || s.value == "null"))
    }
}

/// One step of a [`Route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteComponent {
    Key(String),
    Index(usize),
}

impl From<&str> for RouteComponent {
    fn from(value: &str) -> Self {
        RouteComponent::Key(value.to_string())
    }
}

impl From<String> for RouteComponent {
    fn from(value: String) -> Self {
        RouteComponent::Key(value)
    }
}

impl From<usize> for RouteComponent {
    fn from(value: usize) -> Self {
        RouteComponent::Index(value)
    }
}

/// A symbolic path of keys and indices from the document root to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub components: Vec<RouteComponent>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new route with `tail` appended.
    pub fn with(&self, tail: impl Into<RouteComponent>) -> Route {
        let mut components = self.components.clone();
        components.push(tail.into());
        Route { components }
    }

    /// Returns the route without its final component, plus that component.
    pub fn split_last(&self) -> Option<(Route, &RouteComponent)> {
        let (last, init) = self.components.split_last()?;
        Some((
            Route {
                components: init.to_vec(),
            },
            last,
        ))
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            match component {
                RouteComponent::Key(k) => write!(f, "/{k}")?,
                RouteComponent::Index(i) => write!(f, "/{i}")?,
            }
        }
        Ok(())
    }
}

/// An error produced while loading a document.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid YAML: {0}")]
    Scan(#[from] yaml_rust::scanner::ScanError),
    #[error("document has no content")]
    Empty,
}

/// A parsed YAML document: the original source plus its concrete tree.
#[derive(Debug, Clone)]
pub struct Document {
    source: String,
    root: Node,
}

impl Document {
    /// Parses `source` into a document.
    ///
    /// Only the first document of a stream is considered; workflow files
    /// are single-document.
    pub fn parse(source: impl Into<String>) -> Result<Self, Error> {
        let source = source.into();
        let mut builder = TreeBuilder::new(&source);
        let mut parser = Parser::new(source.chars());
        parser.load(&mut builder, false)?;
        let root = builder.root.ok_or(Error::Empty)?;
        Ok(Self { source, root })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Walks `route` from the root, returning the addressed node.
    pub fn resolve(&self, route: &Route) -> Option<&Node> {
        let mut node = &self.root;
        for component in &route.components {
            node = match (component, node) {
                (RouteComponent::Key(key), Node::Mapping(map)) => map.get(key)?,
                (RouteComponent::Index(idx), Node::Sequence(seq)) => seq.items.get(*idx)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Resolves `route` to a `(key, value)` entry: the final component must
    /// be a key into a mapping.
    pub fn resolve_entry(&self, route: &Route) -> Option<(&Scalar, &Node)> {
        let (parent, last) = route.split_last()?;
        let RouteComponent::Key(key) = last else {
            return None;
        };
        let mapping = self.resolve(&parent)?.as_mapping()?;
        let (k, v) = mapping.entry(key)?;
        Some((k, v))
    }
}

/// Builds the concrete tree from yaml-rust's marked event stream.
///
/// yaml-rust markers are character offsets, so the builder keeps a
/// char-index -> byte-index table for the whole source. Scalar end offsets
/// are recovered by re-scanning the source with style-specific rules, since
/// the event stream only carries start markers.
struct TreeBuilder<'src> {
    source: &'src str,
    char_to_byte: Vec<usize>,
    stack: Vec<Frame>,
    anchors: HashMap<usize, Node>,
    root: Option<Node>,
}

enum Frame {
    Sequence {
        anchor: usize,
        start: Mark,
        items: Vec<Node>,
        flow: bool,
    },
    Mapping {
        anchor: usize,
        start: Mark,
        entries: Vec<(Scalar, Node)>,
        pending_key: Option<Scalar>,
        flow: bool,
    },
}

impl<'src> TreeBuilder<'src> {
    fn new(source: &'src str) -> Self {
        let mut char_to_byte: Vec<usize> = source.char_indices().map(|(i, _)| i).collect();
        char_to_byte.push(source.len());
        Self {
            source,
            char_to_byte,
            stack: Vec::new(),
            anchors: HashMap::new(),
            root: None,
        }
    }

    fn mark(&self, marker: Marker) -> Mark {
        let index = self
            .char_to_byte
            .get(marker.index())
            .copied()
            .unwrap_or(self.source.len());
        Mark {
            index,
            line: marker.line() as u32,
            column: marker.col() as u32 + 1,
        }
    }

    fn flow_depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|frame| match frame {
                Frame::Sequence { flow, .. } | Frame::Mapping { flow, .. } => *flow,
            })
            .count()
    }

    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            None => self.root = Some(node),
            Some(Frame::Sequence { items, .. }) => items.push(node),
            Some(Frame::Mapping {
                entries,
                pending_key,
                ..
            }) => match pending_key.take() {
                None => {
                    // Complex (non-scalar) keys are coerced to an empty
                    // scalar; the workflow parser rejects them by name.
                    let key = match node {
                        Node::Scalar(s) => s,
                        other => Scalar {
                            value: String::new(),
                            style: ScalarStyle::Plain,
                            span: other.span(),
                            block_indent: None,
                        },
                    };
                    *pending_key = Some(key);
                }
                Some(key) => entries.push((key, node)),
            },
        }
    }

    fn register_anchor(&mut self, anchor: usize, node: &Node) {
        if anchor != 0 {
            self.anchors.insert(anchor, node.clone());
        }
    }

    fn build_scalar(&self, value: String, style: TScalarStyle, start: Mark) -> Scalar {
        let style = match style {
            TScalarStyle::SingleQuoted => ScalarStyle::SingleQuoted,
            TScalarStyle::DoubleQuoted => ScalarStyle::DoubleQuoted,
            TScalarStyle::Literal => ScalarStyle::Literal,
            TScalarStyle::Foled => ScalarStyle::Folded,
            _ => ScalarStyle::Plain,
        };
        let (end_index, block_indent) =
            scalar_end(self.source, start.index, style, &value, self.flow_depth());
        let end = mark_at(self.source, start, end_index);
        Scalar {
            value,
            style,
            span: Span { start, end },
            block_indent,
        }
    }
}

impl MarkedEventReceiver for TreeBuilder<'_> {
    fn on_event(&mut self, ev: Event, marker: Marker) {
        let mark = self.mark(marker);
        match ev {
            Event::Scalar(value, style, anchor, _tag) => {
                let scalar = self.build_scalar(value, style, mark);
                let node = Node::Scalar(scalar);
                self.register_anchor(anchor, &node);
                self.push_node(node);
            }
            Event::SequenceStart(anchor) => {
                let flow = self.source.as_bytes().get(mark.index) == Some(&b'[');
                self.stack.push(Frame::Sequence {
                    anchor,
                    start: mark,
                    items: Vec::new(),
                    flow,
                });
            }
            Event::SequenceEnd => {
                let Some(Frame::Sequence {
                    anchor,
                    start,
                    items,
                    flow,
                }) = self.stack.pop()
                else {
                    return;
                };
                let end = items.last().map(|item| item.span().end).unwrap_or(start);
                let node = Node::Sequence(Sequence {
                    items,
                    span: Span { start, end },
                    flow,
                });
                self.register_anchor(anchor, &node);
                self.push_node(node);
            }
            Event::MappingStart(anchor) => {
                let flow = self.source.as_bytes().get(mark.index) == Some(&b'{');
                self.stack.push(Frame::Mapping {
                    anchor,
                    start: mark,
                    entries: Vec::new(),
                    pending_key: None,
                    flow,
                });
            }
            Event::MappingEnd => {
                let Some(Frame::Mapping {
                    anchor,
                    start,
                    entries,
                    flow,
                    ..
                }) = self.stack.pop()
                else {
                    return;
                };
                let end = entries
                    .last()
                    .map(|(_, value)| value.span().end)
                    .unwrap_or(start);
                let node = Node::Mapping(Mapping {
                    entries,
                    span: Span { start, end },
                    flow,
                });
                self.register_anchor(anchor, &node);
                self.push_node(node);
            }
            Event::Alias(anchor) => {
                let node = self.anchors.get(&anchor).cloned().unwrap_or_else(|| {
                    Node::Scalar(Scalar {
                        value: String::new(),
                        style: ScalarStyle::Plain,
                        span: Span {
                            start: mark,
                            end: mark,
                        },
                        block_indent: None,
                    })
                });
                self.push_node(node);
            }
            _ => {}
        }
    }
}

/// Computes a [`Mark`] for `index`, reusing `base` (which must not lie past
/// `index`) as the counting origin.
fn mark_at(source: &str, base: Mark, index: usize) -> Mark {
    let mut line = base.line;
    let mut column = base.column;
    for byte in source.as_bytes()[base.index..index].iter() {
        if *byte == b'\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    Mark {
        index,
        line,
        column,
    }
}

/// Recovers the end byte offset of a scalar that starts at `start`.
///
/// Returns the end offset and, for block scalars, the content indentation.
fn scalar_end(
    source: &str,
    start: usize,
    style: ScalarStyle,
    value: &str,
    flow_depth: usize,
) -> (usize, Option<u32>) {
    let bytes = source.as_bytes();
    match style {
        ScalarStyle::SingleQuoted => {
            let mut i = start + 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                        continue;
                    }
                    return (i + 1, None);
                }
                i += 1;
            }
            (bytes.len(), None)
        }
        ScalarStyle::DoubleQuoted => {
            let mut i = start + 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' => i += 2,
                    b'"' => return (i + 1, None),
                    _ => i += 1,
                }
            }
            (bytes.len(), None)
        }
        ScalarStyle::Literal | ScalarStyle::Folded => block_scalar_end(source, start),
        ScalarStyle::Plain => {
            // Single-line plain scalars appear verbatim in the source, which
            // covers keys and nearly every value. Multi-line plain scalars
            // fall back to the end of the first line.
            if source[start..].starts_with(value) && !value.is_empty() {
                return (start + value.len(), None);
            }
            // Synthesized empty scalars (a key with no value) point at the
            // next token; give them a zero-width span.
            if value.is_empty() || value == "~" {
                return (start, None);
            }
            let mut end = start;
            while end < bytes.len() && bytes[end] != b'\n' {
                if bytes[end] == b'#' && end > start && bytes[end - 1].is_ascii_whitespace() {
                    break;
                }
                if flow_depth > 0 && matches!(bytes[end], b',' | b'}' | b']') {
                    break;
                }
                end += 1;
            }
            while end > start && bytes[end - 1].is_ascii_whitespace() {
                end -= 1;
            }
            (end, None)
        }
    }
}

/// Finds the end of a block scalar whose `|`/`>` indicator sits at `start`.
fn block_scalar_end(source: &str, start: usize) -> (usize, Option<u32>) {
    let bytes = source.as_bytes();
    // Skip the header (indicator plus chomping/indentation modifiers).
    let mut i = start;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    if i >= bytes.len() {
        return (bytes.len(), None);
    }
    i += 1; // past the newline

    let mut indent: Option<usize> = None;
    let mut end = i;
    let mut cursor = i;
    while cursor < bytes.len() {
        let line_end = memchr::memchr(b'\n', &bytes[cursor..])
            .map(|off| cursor + off)
            .unwrap_or(bytes.len());
        let line = &source[cursor..line_end];
        let leading = line.len() - line.trim_start_matches(' ').len();
        if line.trim().is_empty() {
            // Blank lines are part of the block unless they end it; decided
            // by the next contentful line.
            cursor = line_end + 1;
            continue;
        }
        match indent {
            None => {
                if leading == 0 {
                    // First contentful line is at column zero: empty block.
                    return (i, Some(0));
                }
                indent = Some(leading);
                end = line_end;
            }
            Some(required) => {
                if leading < required {
                    break;
                }
                end = line_end;
            }
        }
        cursor = line_end + 1;
    }
    (end, indent.map(|i| i as u32))
}
