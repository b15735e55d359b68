//! Error-accumulating lowering from the YAML CST to the workflow model.
//!
//! The parser never aborts: anything malformed becomes a `syntax`
//! diagnostic and lowering continues with best-effort defaults, so rules
//! always receive a workflow to walk. The parser is the schema — there is
//! no external schema file.

use camino::Utf8Path;
use indexmap::IndexMap;
use yamlcst::{Document, Mapping, Node, Route, Scalar};

use crate::finding::{Diagnostic, Kind};
use crate::models::*;

/// The rule name stamped on parser diagnostics.
pub const SYNTAX_RULE: &str = "syntax-check";

pub struct ParseOutcome {
    pub workflow: Workflow,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses workflow source, accumulating diagnostics instead of failing.
pub fn parse_workflow(path: &Utf8Path, source: &str) -> ParseOutcome {
    let mut parser = Parser {
        diagnostics: Vec::new(),
    };
    let mut workflow = empty_workflow(path);

    match Document::parse(source) {
        Ok(document) => {
            parser.workflow(document.root(), &mut workflow);
        }
        Err(err) => {
            parser.report(Position::new(1, 1), format!("could not parse file: {err}"));
        }
    }

    ParseOutcome {
        workflow,
        diagnostics: parser.diagnostics,
    }
}

fn empty_workflow(path: &Utf8Path) -> Workflow {
    Workflow {
        path: path.to_path_buf(),
        name: None,
        description: None,
        run_name: None,
        on: Vec::new(),
        permissions: None,
        env: None,
        defaults: None,
        concurrency: None,
        jobs: IndexMap::new(),
        pos: Position::new(1, 1),
    }
}

struct Parser {
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn report(&mut self, pos: Position, message: String) {
        self.diagnostics
            .push(Diagnostic::new(SYNTAX_RULE, pos, Kind::Syntax, message));
    }

    fn node_pos(node: &Node) -> Position {
        let span = node.span();
        Position::new(span.start.line, span.start.column)
    }

    fn scalar_pos(scalar: &Scalar) -> Position {
        Position::new(scalar.span.start.line, scalar.span.start.column)
    }

    fn expect_mapping<'a>(&mut self, node: &'a Node, what: &str) -> Option<&'a Mapping> {
        match node.as_mapping() {
            Some(mapping) => Some(mapping),
            None => {
                self.report(
                    Self::node_pos(node),
                    format!("{what} must be a mapping but found {}", node.kind_name()),
                );
                None
            }
        }
    }

    fn expect_string(&mut self, node: &Node, what: &str) -> Option<StringNode> {
        match node.as_scalar() {
            Some(scalar) => Some(StringNode::from_scalar(scalar)),
            None => {
                self.report(
                    Self::node_pos(node),
                    format!("{what} must be a string but found {}", node.kind_name()),
                );
                None
            }
        }
    }

    /// A scalar or a sequence of scalars, flattened.
    fn string_seq(&mut self, node: &Node, what: &str) -> Vec<StringNode> {
        match node {
            Node::Scalar(scalar) => vec![StringNode::from_scalar(scalar)],
            Node::Sequence(seq) => seq
                .items
                .iter()
                .filter_map(|item| self.expect_string(item, what))
                .collect(),
            Node::Mapping(_) => {
                self.report(
                    Self::node_pos(node),
                    format!("{what} must be a string or a sequence of strings"),
                );
                Vec::new()
            }
        }
    }

    fn bool_node(&mut self, node: &Node, what: &str) -> Option<BoolNode> {
        let Some(scalar) = node.as_scalar() else {
            self.report(
                Self::node_pos(node),
                format!("{what} must be a boolean but found {}", node.kind_name()),
            );
            return None;
        };
        let string = StringNode::from_scalar(scalar);
        let pos = string.pos;
        if string.is_expression() {
            return Some(BoolNode {
                value: None,
                expression: Some(string),
                pos,
            });
        }
        match string.value.as_str() {
            "true" => Some(BoolNode {
                value: Some(true),
                expression: None,
                pos,
            }),
            "false" => Some(BoolNode {
                value: Some(false),
                expression: None,
                pos,
            }),
            other => {
                self.report(
                    pos,
                    format!("{what} must be \"true\", \"false\" or an expression but found {other:?}"),
                );
                None
            }
        }
    }

    fn number_node(&mut self, node: &Node, what: &str) -> Option<NumberNode> {
        let Some(scalar) = node.as_scalar() else {
            self.report(
                Self::node_pos(node),
                format!("{what} must be a number but found {}", node.kind_name()),
            );
            return None;
        };
        let string = StringNode::from_scalar(scalar);
        let pos = string.pos;
        if string.is_expression() {
            return Some(NumberNode {
                value: None,
                expression: Some(string),
                pos,
            });
        }
        match string.value.parse::<f64>() {
            Ok(value) => Some(NumberNode {
                value: Some(value),
                expression: None,
                pos,
            }),
            Err(_) => {
                self.report(
                    pos,
                    format!(
                        "{what} must be a number or an expression but found {:?}",
                        string.value
                    ),
                );
                None
            }
        }
    }

    /// Reports duplicate keys; ids in certain sections fold case.
    fn check_duplicates(&mut self, mapping: &Mapping, what: &str, case_insensitive: bool) {
        let mut seen: IndexMap<String, Position> = IndexMap::new();
        for (key, _) in &mapping.entries {
            let folded = if case_insensitive {
                key.value.to_ascii_lowercase()
            } else {
                key.value.clone()
            };
            let pos = Self::scalar_pos(key);
            match seen.get(&folded) {
                Some(first) => {
                    self.report(
                        pos,
                        format!(
                            "key {:?} is duplicated in {what}; previously defined at line {}, column {}",
                            key.value, first.line, first.column
                        ),
                    );
                }
                None => {
                    seen.insert(folded, pos);
                }
            }
        }
    }

    fn unexpected_key(&mut self, key: &Scalar, what: &str, expected: &[&str]) {
        self.report(
            Self::scalar_pos(key),
            format!(
                "unexpected key {:?} for {what}; expected one of {}",
                key.value,
                expected.join(", ")
            ),
        );
    }

    fn workflow(&mut self, root: &Node, workflow: &mut Workflow) {
        let Some(mapping) = self.expect_mapping(root, "workflow") else {
            return;
        };
        workflow.pos = Self::node_pos(root);
        self.check_duplicates(mapping, "workflow", false);

        let mut saw_on = false;
        let mut saw_jobs = false;
        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "name" => workflow.name = self.expect_string(value, "name"),
                "description" => workflow.description = self.expect_string(value, "description"),
                "run-name" => workflow.run_name = self.expect_string(value, "run-name"),
                "on" => {
                    saw_on = true;
                    workflow.on = self.events(value);
                }
                "permissions" => workflow.permissions = self.permissions(value),
                "env" => workflow.env = self.env(value),
                "defaults" => workflow.defaults = self.defaults(value),
                "concurrency" => workflow.concurrency = self.concurrency(value),
                "jobs" => {
                    saw_jobs = true;
                    workflow.jobs = self.jobs(value);
                }
                _ => self.unexpected_key(
                    key,
                    "workflow",
                    &[
                        "name",
                        "description",
                        "run-name",
                        "on",
                        "permissions",
                        "env",
                        "defaults",
                        "concurrency",
                        "jobs",
                    ],
                ),
            }
        }

        if !saw_on {
            self.report(workflow.pos, "\"on\" section is missing in workflow".into());
        }
        if !saw_jobs {
            self.report(workflow.pos, "\"jobs\" section is missing in workflow".into());
        }
    }

    fn events(&mut self, node: &Node) -> Vec<Event> {
        match node {
            Node::Scalar(scalar) => {
                if node.is_null_scalar() {
                    self.report(Self::node_pos(node), "\"on\" must not be empty".into());
                    return Vec::new();
                }
                let name = StringNode::from_scalar(scalar);
                self.bare_event(name).into_iter().collect()
            }
            Node::Sequence(seq) => {
                if seq.items.is_empty() {
                    self.report(Self::node_pos(node), "\"on\" must not be empty".into());
                }
                seq.items
                    .iter()
                    .filter_map(|item| {
                        let name = self.expect_string(item, "event name")?;
                        self.bare_event(name)
                    })
                    .collect()
            }
            Node::Mapping(mapping) => {
                if mapping.entries.is_empty() {
                    self.report(Self::node_pos(node), "\"on\" must not be empty".into());
                }
                self.check_duplicates(mapping, "\"on\" section", false);
                let mut events = Vec::new();
                for (key, value) in &mapping.entries {
                    let name = StringNode::from_scalar(key);
                    match key.value.as_str() {
                        "schedule" => events.push(self.schedule_event(name, value)),
                        "workflow_dispatch" => events.push(self.workflow_dispatch_event(name, value)),
                        "workflow_call" => events.push(self.workflow_call_event(name, value)),
                        "repository_dispatch" => {
                            events.push(self.repository_dispatch_event(name, value))
                        }
                        _ => events.push(self.webhook_event(name, Some(value))),
                    }
                }
                events
            }
        }
    }

    fn bare_event(&mut self, name: StringNode) -> Option<Event> {
        match name.value.as_str() {
            "schedule" => {
                self.report(
                    name.pos,
                    "\"schedule\" event must be configured with cron schedules".into(),
                );
                Some(Event::Scheduled(ScheduledEvent {
                    crons: Vec::new(),
                    pos: name.pos,
                }))
            }
            "workflow_dispatch" => Some(Event::WorkflowDispatch(WorkflowDispatchEvent {
                inputs: IndexMap::new(),
                pos: name.pos,
            })),
            "workflow_call" => Some(Event::WorkflowCall(WorkflowCallEvent {
                inputs: IndexMap::new(),
                outputs: IndexMap::new(),
                secrets: IndexMap::new(),
                pos: name.pos,
            })),
            "repository_dispatch" => Some(Event::RepositoryDispatch(RepositoryDispatchEvent {
                types: Vec::new(),
                pos: name.pos,
            })),
            _ => Some(self.webhook_event(name, None)),
        }
    }

    fn webhook_event(&mut self, name: StringNode, config: Option<&Node>) -> Event {
        let pos = name.pos;
        let mut hook = WebhookEvent {
            name,
            types: Vec::new(),
            branches: Vec::new(),
            branches_ignore: Vec::new(),
            tags: Vec::new(),
            tags_ignore: Vec::new(),
            paths: Vec::new(),
            paths_ignore: Vec::new(),
            pos,
        };

        if let Some(config) = config {
            if config.is_null_scalar() {
                return Event::Webhook(hook);
            }
            if let Some(mapping) = self.expect_mapping(config, "webhook event configuration") {
                self.check_duplicates(mapping, "webhook event configuration", false);
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "types" => hook.types = self.string_seq(value, "event type"),
                        "branches" => hook.branches = self.string_seq(value, "branch filter"),
                        "branches-ignore" => {
                            hook.branches_ignore = self.string_seq(value, "branch filter")
                        }
                        "tags" => hook.tags = self.string_seq(value, "tag filter"),
                        "tags-ignore" => hook.tags_ignore = self.string_seq(value, "tag filter"),
                        "paths" => hook.paths = self.string_seq(value, "path filter"),
                        "paths-ignore" => hook.paths_ignore = self.string_seq(value, "path filter"),
                        _ => self.unexpected_key(
                            key,
                            "webhook event configuration",
                            &[
                                "types",
                                "branches",
                                "branches-ignore",
                                "tags",
                                "tags-ignore",
                                "paths",
                                "paths-ignore",
                            ],
                        ),
                    }
                }
            }
        }
        Event::Webhook(hook)
    }

    fn schedule_event(&mut self, name: StringNode, node: &Node) -> Event {
        let mut crons = Vec::new();
        match node {
            Node::Sequence(seq) => {
                for item in &seq.items {
                    let Some(mapping) = self.expect_mapping(item, "schedule entry") else {
                        continue;
                    };
                    match mapping.entry("cron") {
                        Some((_, value)) => {
                            if let Some(cron) = self.expect_string(value, "cron") {
                                crons.push(cron);
                            }
                        }
                        None => self.report(
                            Self::node_pos(item),
                            "schedule entry must have a \"cron\" key".into(),
                        ),
                    }
                }
            }
            other => self.report(
                Self::node_pos(other),
                "\"schedule\" must be a sequence of cron entries".into(),
            ),
        }
        Event::Scheduled(ScheduledEvent {
            crons,
            pos: name.pos,
        })
    }

    fn workflow_dispatch_event(&mut self, name: StringNode, node: &Node) -> Event {
        let mut inputs = IndexMap::new();
        if !node.is_null_scalar() {
            if let Some(mapping) = self.expect_mapping(node, "workflow_dispatch configuration") {
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "inputs" => inputs = self.workflow_inputs(value),
                        _ => self.unexpected_key(key, "workflow_dispatch configuration", &["inputs"]),
                    }
                }
            }
        }
        Event::WorkflowDispatch(WorkflowDispatchEvent {
            inputs,
            pos: name.pos,
        })
    }

    fn repository_dispatch_event(&mut self, name: StringNode, node: &Node) -> Event {
        let mut types = Vec::new();
        if !node.is_null_scalar() {
            if let Some(mapping) = self.expect_mapping(node, "repository_dispatch configuration") {
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "types" => types = self.string_seq(value, "dispatch type"),
                        _ => {
                            self.unexpected_key(key, "repository_dispatch configuration", &["types"])
                        }
                    }
                }
            }
        }
        Event::RepositoryDispatch(RepositoryDispatchEvent {
            types,
            pos: name.pos,
        })
    }

    fn workflow_call_event(&mut self, name: StringNode, node: &Node) -> Event {
        let mut event = WorkflowCallEvent {
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            secrets: IndexMap::new(),
            pos: name.pos,
        };
        if !node.is_null_scalar() {
            if let Some(mapping) = self.expect_mapping(node, "workflow_call configuration") {
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "inputs" => event.inputs = self.workflow_inputs(value),
                        "outputs" => event.outputs = self.call_outputs(value),
                        "secrets" => event.secrets = self.call_secrets(value),
                        _ => self.unexpected_key(
                            key,
                            "workflow_call configuration",
                            &["inputs", "outputs", "secrets"],
                        ),
                    }
                }
            }
        }
        Event::WorkflowCall(event)
    }

    fn input_type(&mut self, node: &Node) -> Option<InputType> {
        let string = self.expect_string(node, "input type")?;
        match string.value.as_str() {
            "boolean" => Some(InputType::Boolean),
            "number" => Some(InputType::Number),
            "string" => Some(InputType::String),
            "choice" => Some(InputType::Choice),
            "environment" => Some(InputType::Environment),
            other => {
                self.report(
                    string.pos,
                    format!(
                        "input type must be one of boolean, number, string, choice, environment but found {other:?}"
                    ),
                );
                None
            }
        }
    }

    fn workflow_inputs(&mut self, node: &Node) -> IndexMap<String, WorkflowInput> {
        let mut inputs = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "inputs") else {
            return inputs;
        };
        self.check_duplicates(mapping, "inputs", true);
        for (key, value) in &mapping.entries {
            let name = StringNode::from_scalar(key);
            let pos = name.pos;
            let mut input = WorkflowInput {
                name,
                ty: None,
                required: None,
                default: None,
                options: Vec::new(),
                pos,
            };
            if !value.is_null_scalar() {
                if let Some(config) = self.expect_mapping(value, "input configuration") {
                    for (config_key, config_value) in &config.entries {
                        match config_key.value.as_str() {
                            "description" => {
                                let _ = self.expect_string(config_value, "description");
                            }
                            "type" => input.ty = self.input_type(config_value),
                            "required" => {
                                input.required = self.bool_node(config_value, "\"required\"")
                            }
                            "default" => {
                                input.default = self.expect_string(config_value, "default value")
                            }
                            "options" => input.options = self.string_seq(config_value, "option"),
                            "deprecationMessage" => {
                                let _ = self.expect_string(config_value, "deprecationMessage");
                            }
                            _ => self.unexpected_key(
                                config_key,
                                "input configuration",
                                &[
                                    "description",
                                    "type",
                                    "required",
                                    "default",
                                    "options",
                                    "deprecationMessage",
                                ],
                            ),
                        }
                    }
                }
            }
            inputs.insert(key.value.to_ascii_lowercase(), input);
        }
        inputs
    }

    fn call_outputs(&mut self, node: &Node) -> IndexMap<String, CallOutput> {
        let mut outputs = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "outputs") else {
            return outputs;
        };
        self.check_duplicates(mapping, "outputs", true);
        for (key, value) in &mapping.entries {
            let name = StringNode::from_scalar(key);
            let pos = name.pos;
            let mut output = CallOutput {
                name,
                value: None,
                pos,
            };
            if let Some(config) = value.as_mapping() {
                for (config_key, config_value) in &config.entries {
                    match config_key.value.as_str() {
                        "description" => {
                            let _ = self.expect_string(config_value, "description");
                        }
                        "value" => output.value = self.expect_string(config_value, "output value"),
                        _ => self.unexpected_key(
                            config_key,
                            "output configuration",
                            &["description", "value"],
                        ),
                    }
                }
            }
            outputs.insert(key.value.to_ascii_lowercase(), output);
        }
        outputs
    }

    fn call_secrets(&mut self, node: &Node) -> IndexMap<String, CallSecret> {
        let mut secrets = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "secrets") else {
            return secrets;
        };
        self.check_duplicates(mapping, "secrets", true);
        for (key, value) in &mapping.entries {
            let name = StringNode::from_scalar(key);
            let pos = name.pos;
            let mut secret = CallSecret {
                name,
                required: None,
                pos,
            };
            if let Some(config) = value.as_mapping() {
                for (config_key, config_value) in &config.entries {
                    match config_key.value.as_str() {
                        "description" => {
                            let _ = self.expect_string(config_value, "description");
                        }
                        "required" => secret.required = self.bool_node(config_value, "\"required\""),
                        _ => self.unexpected_key(
                            config_key,
                            "secret configuration",
                            &["description", "required"],
                        ),
                    }
                }
            }
            secrets.insert(key.value.to_ascii_lowercase(), secret);
        }
        secrets
    }

    fn permissions(&mut self, node: &Node) -> Option<Permissions> {
        match node {
            Node::Scalar(scalar) => Some(Permissions::All(StringNode::from_scalar(scalar))),
            Node::Mapping(mapping) => {
                self.check_duplicates(mapping, "permissions", false);
                let mut scopes = IndexMap::new();
                for (key, value) in &mapping.entries {
                    if let Some(value) = self.expect_string(value, "permission value") {
                        scopes.insert(key.value.clone(), value);
                    }
                }
                Some(Permissions::Scopes {
                    scopes,
                    pos: Self::node_pos(node),
                })
            }
            Node::Sequence(_) => {
                self.report(
                    Self::node_pos(node),
                    "permissions must be a scalar or a mapping of scopes".into(),
                );
                None
            }
        }
    }

    fn env(&mut self, node: &Node) -> Option<Env> {
        match node {
            Node::Scalar(scalar) => {
                let string = StringNode::from_scalar(scalar);
                if string.is_expression() {
                    Some(Env::Expression(string))
                } else {
                    if !node.is_null_scalar() {
                        self.report(
                            string.pos,
                            "env must be a mapping of variables or a single expression".into(),
                        );
                    }
                    None
                }
            }
            Node::Mapping(mapping) => {
                self.check_duplicates(mapping, "env", false);
                let mut vars = IndexMap::new();
                for (key, value) in &mapping.entries {
                    let name = StringNode::from_scalar(key);
                    if let Some(value) = self.expect_string(value, "environment variable value") {
                        vars.insert(key.value.clone(), EnvVar { name, value });
                    }
                }
                Some(Env::Vars(vars))
            }
            Node::Sequence(_) => {
                self.report(
                    Self::node_pos(node),
                    "env must be a mapping of variables or a single expression".into(),
                );
                None
            }
        }
    }

    fn defaults(&mut self, node: &Node) -> Option<Defaults> {
        let mapping = self.expect_mapping(node, "defaults")?;
        let mut defaults = Defaults {
            shell: None,
            working_directory: None,
            pos: Self::node_pos(node),
        };
        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "run" => {
                    if let Some(run) = self.expect_mapping(value, "defaults.run") {
                        for (run_key, run_value) in &run.entries {
                            match run_key.value.as_str() {
                                "shell" => defaults.shell = self.expect_string(run_value, "shell"),
                                "working-directory" => {
                                    defaults.working_directory =
                                        self.expect_string(run_value, "working-directory")
                                }
                                _ => self.unexpected_key(
                                    run_key,
                                    "defaults.run",
                                    &["shell", "working-directory"],
                                ),
                            }
                        }
                    }
                }
                _ => self.unexpected_key(key, "defaults", &["run"]),
            }
        }
        Some(defaults)
    }

    fn concurrency(&mut self, node: &Node) -> Option<Concurrency> {
        match node {
            Node::Scalar(scalar) => Some(Concurrency {
                group: Some(StringNode::from_scalar(scalar)),
                cancel_in_progress: None,
                pos: Self::scalar_pos(scalar),
            }),
            Node::Mapping(mapping) => {
                let mut concurrency = Concurrency {
                    group: None,
                    cancel_in_progress: None,
                    pos: Self::node_pos(node),
                };
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "group" => concurrency.group = self.expect_string(value, "group"),
                        "cancel-in-progress" => {
                            concurrency.cancel_in_progress =
                                self.bool_node(value, "\"cancel-in-progress\"")
                        }
                        _ => self.unexpected_key(
                            key,
                            "concurrency",
                            &["group", "cancel-in-progress"],
                        ),
                    }
                }
                Some(concurrency)
            }
            Node::Sequence(_) => {
                self.report(
                    Self::node_pos(node),
                    "concurrency must be a string or a mapping".into(),
                );
                None
            }
        }
    }

    fn jobs(&mut self, node: &Node) -> IndexMap<String, Job> {
        let mut jobs = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "jobs") else {
            return jobs;
        };
        if mapping.entries.is_empty() {
            self.report(Self::node_pos(node), "\"jobs\" must not be empty".into());
        }
        self.check_duplicates(mapping, "jobs", true);
        for (key, value) in &mapping.entries {
            let id = StringNode::from_scalar(key);
            if let Some(job) = self.job(id, value) {
                jobs.insert(key.value.clone(), job);
            }
        }
        jobs
    }

    fn job(&mut self, id: StringNode, node: &Node) -> Option<Job> {
        let mapping = self.expect_mapping(node, "job")?;
        self.check_duplicates(mapping, "job", false);

        let pos = id.pos;
        let job_route = Route::new().with("jobs").with(id.value.clone());
        let mut job = Job {
            id,
            name: None,
            needs: Vec::new(),
            runs_on: None,
            permissions: None,
            environment: None,
            concurrency: None,
            outputs: IndexMap::new(),
            env: None,
            defaults: None,
            if_cond: None,
            steps: Vec::new(),
            timeout_minutes: None,
            strategy: None,
            continue_on_error: None,
            container: None,
            services: IndexMap::new(),
            workflow_call: None,
            pos,
        };

        let mut with_inputs: IndexMap<String, StringNode> = IndexMap::new();
        let mut secrets = CallSecrets::None;
        let mut uses: Option<StringNode> = None;
        // Keys that may not be combined with a reusable workflow call.
        let mut step_only_keys: Vec<(String, Position)> = Vec::new();

        for (key, value) in &mapping.entries {
            let key_pos = Self::scalar_pos(key);
            match key.value.as_str() {
                "name" => job.name = self.expect_string(value, "job name"),
                "needs" => job.needs = self.string_seq(value, "needs entry"),
                "runs-on" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.runs_on = self.runs_on(value);
                }
                "permissions" => job.permissions = self.permissions(value),
                "environment" => job.environment = self.environment(value),
                "concurrency" => job.concurrency = self.concurrency(value),
                "outputs" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.outputs = self.job_outputs(value);
                }
                "env" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.env = self.env(value);
                }
                "defaults" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.defaults = self.defaults(value);
                }
                "if" => job.if_cond = self.expect_string(value, "if condition"),
                "steps" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.steps = self.steps(value, &job_route);
                }
                "timeout-minutes" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.timeout_minutes = self.number_node(value, "timeout-minutes");
                }
                "strategy" => job.strategy = self.strategy(value),
                "continue-on-error" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.continue_on_error = self.bool_node(value, "\"continue-on-error\"");
                }
                "container" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.container = self.container(value);
                }
                "services" => {
                    step_only_keys.push((key.value.clone(), key_pos));
                    job.services = self.services(value);
                }
                "uses" => uses = self.expect_string(value, "uses"),
                "with" => with_inputs = self.string_map(value, "with"),
                "secrets" => secrets = self.job_secrets(value),
                _ => self.unexpected_key(
                    key,
                    "job",
                    &[
                        "name",
                        "needs",
                        "runs-on",
                        "permissions",
                        "environment",
                        "concurrency",
                        "outputs",
                        "env",
                        "defaults",
                        "if",
                        "steps",
                        "timeout-minutes",
                        "strategy",
                        "continue-on-error",
                        "container",
                        "services",
                        "uses",
                        "with",
                        "secrets",
                    ],
                ),
            }
        }

        match uses {
            Some(uses) => {
                for (key, key_pos) in &step_only_keys {
                    self.report(
                        *key_pos,
                        format!("{key:?} is not available for a reusable workflow call job"),
                    );
                }
                let uses_pos = uses.pos;
                job.workflow_call = Some(WorkflowCallUse {
                    uses,
                    inputs: with_inputs,
                    secrets,
                    pos: uses_pos,
                });
            }
            None => {
                if job.steps.is_empty() && !step_only_keys.iter().any(|(k, _)| k == "steps") {
                    self.report(
                        pos,
                        format!("job {:?} must have \"steps\" or call a reusable workflow with \"uses\"", job.id.value),
                    );
                }
                if job.runs_on.is_none() {
                    self.report(pos, format!("job {:?} must set \"runs-on\"", job.id.value));
                }
                if !with_inputs.is_empty() {
                    self.report(
                        pos,
                        "\"with\" is only available for reusable workflow call jobs".into(),
                    );
                }
                if !matches!(secrets, CallSecrets::None) {
                    self.report(
                        pos,
                        "\"secrets\" is only available for reusable workflow call jobs".into(),
                    );
                }
            }
        }

        Some(job)
    }

    fn runs_on(&mut self, node: &Node) -> Option<RunsOn> {
        match node {
            Node::Scalar(_) | Node::Sequence(_) => Some(RunsOn {
                labels: self.string_seq(node, "runner label"),
                group: None,
                pos: Self::node_pos(node),
            }),
            Node::Mapping(mapping) => {
                let mut runs_on = RunsOn {
                    labels: Vec::new(),
                    group: None,
                    pos: Self::node_pos(node),
                };
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "group" => runs_on.group = self.expect_string(value, "runner group"),
                        "labels" => runs_on.labels = self.string_seq(value, "runner label"),
                        _ => self.unexpected_key(key, "runs-on", &["group", "labels"]),
                    }
                }
                Some(runs_on)
            }
        }
    }

    fn environment(&mut self, node: &Node) -> Option<Environment> {
        match node {
            Node::Scalar(scalar) => Some(Environment {
                name: Some(StringNode::from_scalar(scalar)),
                url: None,
                pos: Self::scalar_pos(scalar),
            }),
            Node::Mapping(mapping) => {
                let mut environment = Environment {
                    name: None,
                    url: None,
                    pos: Self::node_pos(node),
                };
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "name" => environment.name = self.expect_string(value, "environment name"),
                        "url" => environment.url = self.expect_string(value, "environment url"),
                        _ => self.unexpected_key(key, "environment", &["name", "url"]),
                    }
                }
                Some(environment)
            }
            Node::Sequence(_) => {
                self.report(
                    Self::node_pos(node),
                    "environment must be a string or a mapping".into(),
                );
                None
            }
        }
    }

    fn job_outputs(&mut self, node: &Node) -> IndexMap<String, StringNode> {
        let mut outputs = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "outputs") else {
            return outputs;
        };
        self.check_duplicates(mapping, "outputs", true);
        for (key, value) in &mapping.entries {
            if let Some(value) = self.expect_string(value, "output value") {
                outputs.insert(key.value.clone(), value);
            }
        }
        outputs
    }

    fn string_map(&mut self, node: &Node, what: &str) -> IndexMap<String, StringNode> {
        let mut map = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, what) else {
            return map;
        };
        self.check_duplicates(mapping, what, false);
        for (key, value) in &mapping.entries {
            if let Some(value) = self.expect_string(value, &format!("{what} value")) {
                map.insert(key.value.clone(), value);
            }
        }
        map
    }

    fn job_secrets(&mut self, node: &Node) -> CallSecrets {
        match node {
            Node::Scalar(scalar) if scalar.value == "inherit" => {
                CallSecrets::Inherit(Self::scalar_pos(scalar))
            }
            Node::Mapping(mapping) => {
                self.check_duplicates(mapping, "secrets", true);
                let mut map = IndexMap::new();
                for (key, value) in &mapping.entries {
                    if let Some(value) = self.expect_string(value, "secret value") {
                        map.insert(key.value.clone(), value);
                    }
                }
                CallSecrets::Map(map)
            }
            other => {
                self.report(
                    Self::node_pos(other),
                    "secrets must be \"inherit\" or a mapping".into(),
                );
                CallSecrets::None
            }
        }
    }

    fn strategy(&mut self, node: &Node) -> Option<Strategy> {
        let mapping = self.expect_mapping(node, "strategy")?;
        let mut strategy = Strategy {
            matrix: None,
            fail_fast: None,
            max_parallel: None,
            pos: Self::node_pos(node),
        };
        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "matrix" => strategy.matrix = self.matrix(value),
                "fail-fast" => strategy.fail_fast = self.bool_node(value, "\"fail-fast\""),
                "max-parallel" => strategy.max_parallel = self.number_node(value, "max-parallel"),
                _ => self.unexpected_key(key, "strategy", &["matrix", "fail-fast", "max-parallel"]),
            }
        }
        Some(strategy)
    }

    fn matrix(&mut self, node: &Node) -> Option<Matrix> {
        if let Some(scalar) = node.as_scalar() {
            let string = StringNode::from_scalar(scalar);
            if string.is_expression() {
                let pos = string.pos;
                return Some(Matrix {
                    rows: IndexMap::new(),
                    include: Vec::new(),
                    exclude: Vec::new(),
                    expression: Some(string),
                    pos,
                });
            }
        }
        let mapping = self.expect_mapping(node, "matrix")?;
        self.check_duplicates(mapping, "matrix", false);
        let mut matrix = Matrix {
            rows: IndexMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            expression: None,
            pos: Self::node_pos(node),
        };
        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "include" => matrix.include = self.matrix_combinations(value),
                "exclude" => matrix.exclude = self.matrix_combinations(value),
                _ => {
                    let name = StringNode::from_scalar(key);
                    let row = self.matrix_row(name, value);
                    matrix.rows.insert(key.value.clone(), row);
                }
            }
        }
        Some(matrix)
    }

    fn matrix_row(&mut self, name: StringNode, node: &Node) -> MatrixRow {
        match node {
            Node::Sequence(seq) => {
                if seq.items.is_empty() {
                    self.report(
                        Self::node_pos(node),
                        format!("matrix row {:?} must not be empty", name.value),
                    );
                }
                let values = seq.items.iter().map(|item| self.matrix_value(item)).collect();
                MatrixRow {
                    name,
                    values,
                    expression: None,
                }
            }
            Node::Scalar(scalar) => {
                let string = StringNode::from_scalar(scalar);
                if string.is_expression() {
                    MatrixRow {
                        name,
                        values: Vec::new(),
                        expression: Some(string),
                    }
                } else {
                    self.report(
                        string.pos,
                        format!(
                            "matrix row {:?} must be a sequence of values or an expression",
                            name.value
                        ),
                    );
                    MatrixRow {
                        name,
                        values: Vec::new(),
                        expression: None,
                    }
                }
            }
            Node::Mapping(_) => {
                self.report(
                    Self::node_pos(node),
                    format!(
                        "matrix row {:?} must be a sequence of values or an expression",
                        name.value
                    ),
                );
                MatrixRow {
                    name,
                    values: Vec::new(),
                    expression: None,
                }
            }
        }
    }

    fn matrix_value(&mut self, node: &Node) -> MatrixValue {
        match node {
            Node::Scalar(scalar) => {
                let string = StringNode::from_scalar(scalar);
                if !string.quoted {
                    if let Ok(number) = string.value.parse::<f64>() {
                        return MatrixValue::Number(number, string.pos);
                    }
                    if string.value == "true" || string.value == "false" {
                        return MatrixValue::Bool(string.value == "true", string.pos);
                    }
                }
                MatrixValue::String(string)
            }
            other => MatrixValue::Other(Self::node_pos(other)),
        }
    }

    fn matrix_combinations(&mut self, node: &Node) -> Vec<MatrixCombination> {
        let mut combinations = Vec::new();
        let Some(seq) = node.as_sequence() else {
            self.report(
                Self::node_pos(node),
                "matrix include/exclude must be a sequence of combinations".into(),
            );
            return combinations;
        };
        for item in &seq.items {
            let Some(mapping) = self.expect_mapping(item, "matrix combination") else {
                continue;
            };
            let mut values = IndexMap::new();
            for (key, value) in &mapping.entries {
                values.insert(key.value.clone(), self.matrix_value(value));
            }
            combinations.push(MatrixCombination {
                values,
                pos: Self::node_pos(item),
            });
        }
        combinations
    }

    fn container(&mut self, node: &Node) -> Option<Container> {
        match node {
            Node::Scalar(scalar) => Some(Container {
                image: Some(StringNode::from_scalar(scalar)),
                credentials: None,
                env: None,
                pos: Self::scalar_pos(scalar),
            }),
            Node::Mapping(mapping) => {
                let mut container = Container {
                    image: None,
                    credentials: None,
                    env: None,
                    pos: Self::node_pos(node),
                };
                for (key, value) in &mapping.entries {
                    match key.value.as_str() {
                        "image" => container.image = self.expect_string(value, "image"),
                        "credentials" => container.credentials = self.credentials(value),
                        "env" => container.env = self.env(value),
                        "ports" | "volumes" | "options" => {}
                        _ => self.unexpected_key(
                            key,
                            "container",
                            &["image", "credentials", "env", "ports", "volumes", "options"],
                        ),
                    }
                }
                Some(container)
            }
            Node::Sequence(_) => {
                self.report(
                    Self::node_pos(node),
                    "container must be a string or a mapping".into(),
                );
                None
            }
        }
    }

    fn credentials(&mut self, node: &Node) -> Option<Credentials> {
        let mapping = self.expect_mapping(node, "credentials")?;
        let mut credentials = Credentials {
            username: None,
            password: None,
            pos: Self::node_pos(node),
        };
        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "username" => credentials.username = self.expect_string(value, "username"),
                "password" => credentials.password = self.expect_string(value, "password"),
                _ => self.unexpected_key(key, "credentials", &["username", "password"]),
            }
        }
        Some(credentials)
    }

    fn services(&mut self, node: &Node) -> IndexMap<String, Container> {
        let mut services = IndexMap::new();
        let Some(mapping) = self.expect_mapping(node, "services") else {
            return services;
        };
        self.check_duplicates(mapping, "services", false);
        for (key, value) in &mapping.entries {
            if let Some(container) = self.container(value) {
                services.insert(key.value.clone(), container);
            }
        }
        services
    }

    fn steps(&mut self, node: &Node, job_route: &Route) -> Vec<Step> {
        let Some(seq) = node.as_sequence() else {
            self.report(
                Self::node_pos(node),
                "\"steps\" must be a sequence of steps".into(),
            );
            return Vec::new();
        };
        if seq.items.is_empty() {
            self.report(Self::node_pos(node), "\"steps\" must not be empty".into());
        }
        seq.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| self.step(index, item, job_route))
            .collect()
    }

    fn step(&mut self, index: usize, node: &Node, job_route: &Route) -> Option<Step> {
        let mapping = self.expect_mapping(node, "step")?;
        self.check_duplicates(mapping, "step", false);

        let pos = Self::node_pos(node);
        let route = job_route.with("steps").with(index);
        let mut step = Step {
            index,
            id: None,
            name: None,
            if_cond: None,
            exec: Exec::Missing,
            env: None,
            timeout_minutes: None,
            continue_on_error: None,
            route,
            pos,
        };

        let mut run: Option<StringNode> = None;
        let mut uses: Option<StringNode> = None;
        let mut shell: Option<StringNode> = None;
        let mut working_directory: Option<StringNode> = None;
        let mut with: IndexMap<String, StringNode> = IndexMap::new();
        let mut with_pos: Option<Position> = None;

        for (key, value) in &mapping.entries {
            match key.value.as_str() {
                "id" => step.id = self.expect_string(value, "step id"),
                "name" => step.name = self.expect_string(value, "step name"),
                "if" => step.if_cond = self.expect_string(value, "if condition"),
                "env" => step.env = self.env(value),
                "timeout-minutes" => {
                    step.timeout_minutes = self.number_node(value, "timeout-minutes")
                }
                "continue-on-error" => {
                    step.continue_on_error = self.bool_node(value, "\"continue-on-error\"")
                }
                "run" => run = self.expect_string(value, "run script"),
                "uses" => uses = self.expect_string(value, "uses"),
                "shell" => shell = self.expect_string(value, "shell"),
                "working-directory" => {
                    working_directory = self.expect_string(value, "working-directory")
                }
                "with" => {
                    with_pos = Some(Self::scalar_pos(key));
                    with = self.string_map(value, "with");
                }
                _ => self.unexpected_key(
                    key,
                    "step",
                    &[
                        "id",
                        "name",
                        "if",
                        "env",
                        "timeout-minutes",
                        "continue-on-error",
                        "run",
                        "uses",
                        "shell",
                        "working-directory",
                        "with",
                    ],
                ),
            }
        }

        step.exec = match (run, uses) {
            (Some(_), Some(uses)) => {
                self.report(
                    uses.pos,
                    "step cannot have both \"run\" and \"uses\"".into(),
                );
                Exec::Missing
            }
            (Some(script), None) => {
                if let Some(with_pos) = with_pos {
                    self.report(
                        with_pos,
                        "\"with\" is only available for steps that use an action".into(),
                    );
                }
                Exec::Run {
                    script,
                    shell,
                    working_directory,
                }
            }
            (None, Some(uses)) => {
                if let Some(shell) = &shell {
                    self.report(
                        shell.pos,
                        "\"shell\" is only available for \"run\" steps".into(),
                    );
                }
                Exec::Action { uses, inputs: with }
            }
            (None, None) => {
                self.report(pos, "step must have either \"run\" or \"uses\"".into());
                Exec::Missing
            }
        };

        Some(step)
    }
}
