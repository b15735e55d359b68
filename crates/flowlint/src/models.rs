//! The typed workflow model.
//!
//! Built by the error-accumulating parser in [`crate::parse`]; every node
//! carries the source position it was lowered from, and jobs/steps carry
//! the symbolic route rules use to register fixes against the CST.

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::Serialize;
use yamlcst::{Route, Scalar};

/// A 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A string value with enough presentation detail to map embedded
/// expressions back to source positions: quoting shifts columns by one,
/// block scalars shift lines.
#[derive(Debug, Clone, PartialEq)]
pub struct StringNode {
    pub value: String,
    pub quoted: bool,
    pub literal_block: bool,
    pub block_indent: u32,
    pub pos: Position,
}

/// One `${{ … }}` occurrence inside a [`StringNode`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawExpression {
    /// The inner text between the delimiters.
    pub source: String,
    /// The full `${{ … }}` text, as it appears in the value.
    pub text: String,
    /// Byte offset of the inner text within the node's value.
    pub offset: usize,
    /// Mapped source position of the inner text.
    pub pos: Position,
}

impl StringNode {
    pub fn from_scalar(scalar: &Scalar) -> Self {
        Self {
            value: scalar.value.clone(),
            quoted: scalar.style.is_quoted(),
            literal_block: scalar.style.is_block(),
            block_indent: scalar.block_indent.unwrap_or(0),
            pos: Position {
                line: scalar.span.start.line,
                column: scalar.span.start.column,
            },
        }
    }

    pub fn synthetic(value: impl Into<String>, pos: Position) -> Self {
        Self {
            value: value.into(),
            quoted: false,
            literal_block: false,
            block_indent: 0,
            pos,
        }
    }

    /// Maps a byte offset within the value to a source position, honoring
    /// the quoting and block-scalar offset rules.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.value.len());
        let before = &self.value[..offset];
        let newlines = before.matches('\n').count() as u32;
        let column_in_line = match before.rfind('\n') {
            Some(nl) => (offset - nl - 1) as u32,
            None => offset as u32,
        };

        if self.literal_block {
            Position {
                line: self.pos.line + 1 + newlines,
                column: column_in_line + 1 + self.block_indent,
            }
        } else if newlines == 0 {
            let quote_shift = u32::from(self.quoted);
            Position {
                line: self.pos.line,
                column: self.pos.column + quote_shift + column_in_line,
            }
        } else {
            Position {
                line: self.pos.line + newlines,
                column: column_in_line + 1,
            }
        }
    }

    /// Scans the value for `${{ … }}` occurrences.
    pub fn expressions(&self) -> Vec<RawExpression> {
        let mut out = Vec::new();
        let mut search = 0;
        while let Some(open) = self.value[search..].find("${{") {
            let open = search + open;
            let inner_start = open + 3;
            let Some(close) = self.value[inner_start..].find("}}") else {
                break;
            };
            let close = inner_start + close;
            out.push(RawExpression {
                source: self.value[inner_start..close].to_string(),
                text: self.value[open..close + 2].to_string(),
                offset: inner_start,
                pos: self.position_at(inner_start),
            });
            search = close + 2;
        }
        out
    }

    /// Whether the value contains any `${{ … }}`.
    pub fn contains_expression(&self) -> bool {
        !self.expressions().is_empty()
    }

    /// Whether the whole value is exactly one `${{ … }}`.
    pub fn is_expression(&self) -> bool {
        let trimmed = self.value.trim();
        trimmed.starts_with("${{")
            && trimmed.ends_with("}}")
            && self.expressions().len() == 1
            && !trimmed[3..trimmed.len() - 2].contains("${{")
    }
}

/// A numeric field: either a literal or a single expression.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberNode {
    pub value: Option<f64>,
    pub expression: Option<StringNode>,
    pub pos: Position,
}

/// A boolean field: either a literal or a single expression.
#[derive(Debug, Clone, PartialEq)]
pub struct BoolNode {
    pub value: Option<bool>,
    pub expression: Option<StringNode>,
    pub pos: Position,
}

/// Triggers whose jobs run with write permissions and secret access.
pub const PRIVILEGED_TRIGGERS: &[&str] = &[
    "pull_request_target",
    "workflow_run",
    "issue_comment",
    "issues",
    "discussion_comment",
];

/// The recognized permission scope names.
pub const PERMISSION_SCOPES: &[&str] = &[
    "actions",
    "attestations",
    "checks",
    "contents",
    "deployments",
    "discussions",
    "id-token",
    "issues",
    "models",
    "packages",
    "pages",
    "pull-requests",
    "repository-projects",
    "security-events",
    "statuses",
];

#[derive(Debug, Clone)]
pub struct Workflow {
    pub path: Utf8PathBuf,
    pub name: Option<StringNode>,
    pub description: Option<StringNode>,
    pub run_name: Option<StringNode>,
    pub on: Vec<Event>,
    pub permissions: Option<Permissions>,
    pub env: Option<Env>,
    pub defaults: Option<Defaults>,
    pub concurrency: Option<Concurrency>,
    pub jobs: IndexMap<String, Job>,
    pub pos: Position,
}

impl Workflow {
    /// Whether the workflow declares `on: workflow_call`.
    pub fn is_reusable(&self) -> bool {
        self.on
            .iter()
            .any(|event| matches!(event, Event::WorkflowCall(_)))
    }

    /// Whether any trigger is in the privileged set.
    pub fn has_privileged_trigger(&self) -> bool {
        self.on
            .iter()
            .any(|event| PRIVILEGED_TRIGGERS.contains(&event.name()))
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.on.iter().any(|event| event.name() == name)
    }

    pub fn webhook(&self, name: &str) -> Option<&WebhookEvent> {
        self.on.iter().find_map(|event| match event {
            Event::Webhook(hook) if hook.name.value == name => Some(hook),
            _ => None,
        })
    }

    pub fn workflow_call(&self) -> Option<&WorkflowCallEvent> {
        self.on.iter().find_map(|event| match event {
            Event::WorkflowCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn workflow_dispatch(&self) -> Option<&WorkflowDispatchEvent> {
        self.on.iter().find_map(|event| match event {
            Event::WorkflowDispatch(dispatch) => Some(dispatch),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Webhook(WebhookEvent),
    Scheduled(ScheduledEvent),
    WorkflowDispatch(WorkflowDispatchEvent),
    RepositoryDispatch(RepositoryDispatchEvent),
    WorkflowCall(WorkflowCallEvent),
}

impl Event {
    /// The trigger name, as used in availability checks.
    pub fn name(&self) -> &str {
        match self {
            Event::Webhook(hook) => &hook.name.value,
            Event::Scheduled(_) => "schedule",
            Event::WorkflowDispatch(_) => "workflow_dispatch",
            Event::RepositoryDispatch(_) => "repository_dispatch",
            Event::WorkflowCall(_) => "workflow_call",
        }
    }

    pub fn pos(&self) -> Position {
        match self {
            Event::Webhook(hook) => hook.pos,
            Event::Scheduled(scheduled) => scheduled.pos,
            Event::WorkflowDispatch(dispatch) => dispatch.pos,
            Event::RepositoryDispatch(dispatch) => dispatch.pos,
            Event::WorkflowCall(call) => call.pos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub name: StringNode,
    pub types: Vec<StringNode>,
    pub branches: Vec<StringNode>,
    pub branches_ignore: Vec<StringNode>,
    pub tags: Vec<StringNode>,
    pub tags_ignore: Vec<StringNode>,
    pub paths: Vec<StringNode>,
    pub paths_ignore: Vec<StringNode>,
    pub pos: Position,
}

impl WebhookEvent {
    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t.value == ty)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub crons: Vec<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct WorkflowDispatchEvent {
    pub inputs: IndexMap<String, WorkflowInput>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct RepositoryDispatchEvent {
    pub types: Vec<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct WorkflowCallEvent {
    pub inputs: IndexMap<String, WorkflowInput>,
    pub outputs: IndexMap<String, CallOutput>,
    pub secrets: IndexMap<String, CallSecret>,
    pub pos: Position,
}

/// An input declaration, shared by `workflow_call` and `workflow_dispatch`.
#[derive(Debug, Clone)]
pub struct WorkflowInput {
    pub name: StringNode,
    pub ty: Option<InputType>,
    pub required: Option<BoolNode>,
    pub default: Option<StringNode>,
    pub options: Vec<StringNode>,
    pub pos: Position,
}

impl WorkflowInput {
    pub fn is_required(&self) -> bool {
        self.required
            .as_ref()
            .and_then(|required| required.value)
            .unwrap_or(false)
            && self.default.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Boolean,
    Number,
    String,
    Choice,
    Environment,
}

#[derive(Debug, Clone)]
pub struct CallOutput {
    pub name: StringNode,
    pub value: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct CallSecret {
    pub name: StringNode,
    pub required: Option<BoolNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum Permissions {
    /// The scalar form: `read-all`, `write-all`, `read`, `write`, `none`.
    All(StringNode),
    /// The mapping form: scope name to access value.
    Scopes {
        scopes: IndexMap<String, StringNode>,
        pos: Position,
    },
}

impl Permissions {
    pub fn pos(&self) -> Position {
        match self {
            Permissions::All(node) => node.pos,
            Permissions::Scopes { pos, .. } => *pos,
        }
    }
}

/// An `env:` block: either literal variables or a single expression that
/// evaluates to an object.
#[derive(Debug, Clone)]
pub enum Env {
    Vars(IndexMap<String, EnvVar>),
    Expression(StringNode),
}

impl Env {
    pub fn vars(&self) -> Option<&IndexMap<String, EnvVar>> {
        match self {
            Env::Vars(vars) => Some(vars),
            Env::Expression(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvVar {
    pub name: StringNode,
    pub value: StringNode,
}

#[derive(Debug, Clone)]
pub struct Defaults {
    pub shell: Option<StringNode>,
    pub working_directory: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Concurrency {
    pub group: Option<StringNode>,
    pub cancel_in_progress: Option<BoolNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: StringNode,
    pub name: Option<StringNode>,
    pub needs: Vec<StringNode>,
    pub runs_on: Option<RunsOn>,
    pub permissions: Option<Permissions>,
    pub environment: Option<Environment>,
    pub concurrency: Option<Concurrency>,
    pub outputs: IndexMap<String, StringNode>,
    pub env: Option<Env>,
    pub defaults: Option<Defaults>,
    pub if_cond: Option<StringNode>,
    pub steps: Vec<Step>,
    pub timeout_minutes: Option<NumberNode>,
    pub strategy: Option<Strategy>,
    pub continue_on_error: Option<BoolNode>,
    pub container: Option<Container>,
    pub services: IndexMap<String, Container>,
    pub workflow_call: Option<WorkflowCallUse>,
    pub pos: Position,
}

impl Job {
    /// The route to this job's mapping in the CST.
    pub fn route(&self) -> Route {
        Route::new().with("jobs").with(self.id.value.clone())
    }

    pub fn is_reusable_call(&self) -> bool {
        self.workflow_call.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RunsOn {
    pub labels: Vec<StringNode>,
    pub group: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub name: Option<StringNode>,
    pub url: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Strategy {
    pub matrix: Option<Matrix>,
    pub fail_fast: Option<BoolNode>,
    pub max_parallel: Option<NumberNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Matrix {
    pub rows: IndexMap<String, MatrixRow>,
    pub include: Vec<MatrixCombination>,
    pub exclude: Vec<MatrixCombination>,
    pub expression: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct MatrixRow {
    pub name: StringNode,
    pub values: Vec<MatrixValue>,
    pub expression: Option<StringNode>,
}

#[derive(Debug, Clone)]
pub struct MatrixCombination {
    pub values: IndexMap<String, MatrixValue>,
    pub pos: Position,
}

/// A matrix element, kept only as precisely as typing needs.
#[derive(Debug, Clone)]
pub enum MatrixValue {
    String(StringNode),
    Number(f64, Position),
    Bool(bool, Position),
    Other(Position),
}

#[derive(Debug, Clone)]
pub struct Container {
    pub image: Option<StringNode>,
    pub credentials: Option<Credentials>,
    pub env: Option<Env>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: Option<StringNode>,
    pub password: Option<StringNode>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct WorkflowCallUse {
    pub uses: StringNode,
    pub inputs: IndexMap<String, StringNode>,
    pub secrets: CallSecrets,
    pub pos: Position,
}

#[derive(Debug, Clone, Default)]
pub enum CallSecrets {
    #[default]
    None,
    Inherit(Position),
    Map(IndexMap<String, StringNode>),
}

#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub id: Option<StringNode>,
    pub name: Option<StringNode>,
    pub if_cond: Option<StringNode>,
    pub exec: Exec,
    pub env: Option<Env>,
    pub timeout_minutes: Option<NumberNode>,
    pub continue_on_error: Option<BoolNode>,
    /// The route to this step's mapping in the CST.
    pub route: Route,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub enum Exec {
    Run {
        script: StringNode,
        shell: Option<StringNode>,
        working_directory: Option<StringNode>,
    },
    Action {
        uses: StringNode,
        inputs: IndexMap<String, StringNode>,
    },
    /// The step was too malformed to classify; the parser has already
    /// reported it.
    Missing,
}

impl Step {
    pub fn run(&self) -> Option<&StringNode> {
        match &self.exec {
            Exec::Run { script, .. } => Some(script),
            _ => None,
        }
    }

    pub fn uses(&self) -> Option<&StringNode> {
        match &self.exec {
            Exec::Action { uses, .. } => Some(uses),
            _ => None,
        }
    }

    pub fn with(&self) -> Option<&IndexMap<String, StringNode>> {
        match &self.exec {
            Exec::Action { inputs, .. } => Some(inputs),
            _ => None,
        }
    }

    pub fn input(&self, name: &str) -> Option<&StringNode> {
        self.with().and_then(|inputs| inputs.get(name))
    }

    /// The parsed `owner/repo@ref` form of `uses:`, when the step is an
    /// action step with a repository reference.
    pub fn action_ref(&self) -> Option<ActionRef> {
        self.uses().and_then(|uses| ActionRef::parse(&uses.value))
    }
}

/// A parsed `uses:` reference to a repository-hosted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub owner: String,
    pub repo: String,
    pub subpath: Option<String>,
    pub git_ref: Option<String>,
    pub raw: String,
}

impl ActionRef {
    /// Parses `owner/repo[/subpath][@ref]`. Local (`./…`) and docker
    /// (`docker://…`) uses have no repository reference and return `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.starts_with("./") || raw.starts_with("docker://") {
            return None;
        }
        let (path, git_ref) = match raw.split_once('@') {
            Some((path, git_ref)) => (path, Some(git_ref.to_string())),
            None => (raw, None),
        };
        let mut segments = path.splitn(3, '/');
        let owner = segments.next()?;
        let repo = segments.next()?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            subpath: segments.next().map(|s| s.to_string()),
            git_ref,
            raw: raw.to_string(),
        })
    }

    /// `owner/repo`, the repository slug.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Whether the ref is a 40-character lowercase hex commit SHA.
    pub fn ref_is_commit_sha(&self) -> bool {
        self.git_ref.as_deref().is_some_and(is_commit_sha)
    }

    /// Case-insensitive match against an `owner/repo` pattern; a pattern
    /// with a subpath (`gradle/actions/setup-gradle`) must match it too.
    pub fn matches(&self, pattern: &str) -> bool {
        let mut parts = pattern.splitn(3, '/');
        let (Some(owner), Some(repo)) = (parts.next(), parts.next()) else {
            return false;
        };
        if !self.owner.eq_ignore_ascii_case(owner) || !self.repo.eq_ignore_ascii_case(repo) {
            return false;
        }
        match parts.next() {
            Some(subpath) => self
                .subpath
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case(subpath)),
            None => true,
        }
    }
}

/// Whether `s` is a 40-character lowercase hex string.
pub fn is_commit_sha(s: &str) -> bool {
    s.len() == 40
        && s.chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_expressions_plain() {
        let node = StringNode::synthetic(
            "echo ${{ github.sha }} and ${{ github.ref }}",
            Position::new(4, 14),
        );
        let exprs = node.expressions();
        assert_eq!(exprs.len(), 2);
        assert_eq!(exprs[0].source, " github.sha ");
        assert_eq!(exprs[0].text, "${{ github.sha }}");
        assert_eq!(exprs[0].offset, 8);
        // Offset 8 into a plain scalar starting at column 14.
        assert_eq!(exprs[0].pos, Position::new(4, 22));
    }

    #[test]
    fn test_position_quoted_shifts_column() {
        let mut node = StringNode::synthetic("a ${{ x }}", Position::new(2, 10));
        node.quoted = true;
        // The opening quote occupies the scalar's first column.
        assert_eq!(node.position_at(2), Position::new(2, 13));
    }

    #[test]
    fn test_position_literal_block_shifts_lines() {
        let mut node = StringNode::synthetic("echo one\necho ${{ x }}\n", Position::new(5, 12));
        node.literal_block = true;
        node.block_indent = 10;
        let exprs = node.expressions();
        assert_eq!(exprs.len(), 1);
        // Second content line of a block whose indicator is on line 5; the
        // inner text sits 8 bytes into a line indented by 10.
        assert_eq!(exprs[0].pos.line, 7);
        assert_eq!(exprs[0].pos.column, 8 + 1 + 10);
    }

    #[test]
    fn test_is_expression() {
        assert!(StringNode::synthetic("${{ secrets.TOKEN }}", Position::new(1, 1)).is_expression());
        assert!(
            !StringNode::synthetic("x${{ secrets.TOKEN }}", Position::new(1, 1)).is_expression()
        );
        assert!(!StringNode::synthetic("plain", Position::new(1, 1)).is_expression());
    }

    #[test]
    fn test_action_ref() {
        let parsed = ActionRef::parse("actions/checkout@v4").unwrap();
        assert_eq!(parsed.slug(), "actions/checkout");
        assert_eq!(parsed.git_ref.as_deref(), Some("v4"));
        assert!(!parsed.ref_is_commit_sha());
        assert!(parsed.matches("actions/checkout"));
        assert!(parsed.matches("Actions/Checkout"));
        assert!(!parsed.matches("actions/cache"));

        let pinned =
            ActionRef::parse("actions/checkout@8f4b7f84864484a7bf31766abe9204da3cbe65b3").unwrap();
        assert!(pinned.ref_is_commit_sha());

        let subpath = ActionRef::parse("gradle/actions/setup-gradle@v3").unwrap();
        assert_eq!(subpath.subpath.as_deref(), Some("setup-gradle"));
        assert!(subpath.matches("gradle/actions/setup-gradle"));
        assert!(!subpath.matches("gradle/actions/wrapper-validation"));

        assert!(ActionRef::parse("./local/action").is_none());
        assert!(ActionRef::parse("docker://alpine:3.19").is_none());
    }

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("8f4b7f84864484a7bf31766abe9204da3cbe65b3"));
        assert!(!is_commit_sha("8F4B7F84864484A7BF31766ABE9204DA3CBE65B3"));
        assert!(!is_commit_sha("v4"));
        assert!(!is_commit_sha("8f4b7f8"));
    }
}
