//! The `expression` rule: parses and semantically checks every `${{ … }}`
//! in the workflow, threading workflow-derived types (`matrix`, `needs`,
//! `steps`, `inputs`, `secrets`, `jobs`) into the checker and verifying
//! that `if:` conditions evaluate to booleans.

use flowlint_expressions::check::{Checker, Issue, IssueKind, TypeEnv};
use flowlint_expressions::types::ExprType;
use flowlint_expressions::Expr;

use crate::availability::availability_for;
use crate::finding::Kind;
use crate::models::*;
use crate::rules::{rule_meta, RuleBase};
use crate::visitor::Visitor;

pub(crate) struct ExprRule {
    base: RuleBase,
    /// Workflow-level type environment, rebuilt per workflow.
    workflow_env: TypeEnv,
    /// Job-level environment: the workflow env plus `matrix`/`needs`,
    /// with `steps` narrowed incrementally as steps are visited.
    job_env: TypeEnv,
    /// Per-job result types (`{outputs, result}`), for `needs` typing.
    job_results: indexmap::IndexMap<String, ExprType>,
    step_ids: Vec<String>,
}

rule_meta!(
    ExprRule,
    "expression",
    "syntax and semantic validation of ${{ }} expressions"
);

impl ExprRule {
    pub(crate) fn new() -> Self {
        Self {
            base: RuleBase::new(Self::NAME),
            workflow_env: TypeEnv::builtin(),
            job_env: TypeEnv::builtin(),
            job_results: indexmap::IndexMap::new(),
            step_ids: Vec::new(),
        }
    }

    /// Checks every expression embedded in `node` under the availability
    /// row for `key`, using the current job environment.
    fn check_string(&mut self, node: &StringNode, key: &str) {
        for raw in node.expressions() {
            self.check_raw(node, &raw, key);
        }
    }

    fn checker<'a>(&'a self, key: &str) -> Checker<'a> {
        let availability = availability_for(key);
        Checker {
            env: Some(&self.job_env),
            allowed_contexts: availability.map(|row| row.contexts),
            allowed_functions: availability.map(|row| row.functions),
            check_untrusted: false,
            inputs_untrusted: false,
        }
    }

    fn check_raw(&mut self, node: &StringNode, raw: &RawExpression, key: &str) -> Option<ExprType> {
        match Expr::parse(&raw.source) {
            Ok(parsed) => {
                let (ty, issues) = self.checker(key).check(&parsed);
                self.report_issues(node, raw, issues);
                Some(ty)
            }
            Err(err) => {
                self.base.report(
                    node.position_at(raw.offset + err.offset),
                    Kind::Syntax,
                    format!("could not parse expression: {err}"),
                );
                None
            }
        }
    }

    fn report_issues(&mut self, node: &StringNode, raw: &RawExpression, issues: Vec<Issue>) {
        for issue in issues {
            if issue.kind == IssueKind::Semantic {
                self.base.report(
                    node.position_at(raw.offset + issue.span.start),
                    Kind::Semantic,
                    issue.message,
                );
            }
        }
    }

    /// `if:` conditions are expressions even without `${{ }}` delimiters,
    /// and their result must be a boolean.
    fn check_condition(&mut self, node: &StringNode, key: &str) {
        let exprs = node.expressions();
        let ty = if node.is_expression() {
            self.check_raw(node, &exprs[0], key)
        } else if exprs.is_empty() {
            let raw = RawExpression {
                source: node.value.clone(),
                text: node.value.clone(),
                offset: 0,
                pos: node.pos,
            };
            self.check_raw(node, &raw, key)
        } else {
            // Mixed text and expressions; the conditional rule flags it.
            self.check_string(node, key);
            None
        };

        if let Some(ty) = ty {
            if !ty.assignable_to(&ExprType::Bool) {
                self.base.report(
                    node.pos,
                    Kind::Semantic,
                    format!("\"if\" condition must evaluate to a bool but evaluates to {ty}"),
                );
            }
        }
    }

    fn check_env(&mut self, env: &Env, key: &str) {
        match env {
            Env::Vars(vars) => {
                for var in vars.values() {
                    self.check_string(&var.value, key);
                }
            }
            Env::Expression(node) => self.check_string(node, key),
        }
    }

    fn check_container(&mut self, container: &Container, base_key: &'static str) {
        if let Some(image) = &container.image {
            self.check_string(image, base_key);
        }
        if let Some(credentials) = &container.credentials {
            let key = match base_key {
                "jobs.<job_id>.container" => "jobs.<job_id>.container.credentials",
                _ => "jobs.<job_id>.services.<service_id>.credentials",
            };
            for node in [&credentials.username, &credentials.password]
                .into_iter()
                .flatten()
            {
                self.check_string(node, key);
            }
        }
        if let Some(env) = &container.env {
            self.check_env(env, "jobs.<job_id>.container.env");
        }
    }

    fn inputs_type(workflow: &Workflow) -> ExprType {
        let mut props: Vec<(String, ExprType)> = Vec::new();
        let mut add = |inputs: &indexmap::IndexMap<String, WorkflowInput>| {
            for (name, input) in inputs {
                let ty = match input.ty {
                    Some(InputType::Boolean) => ExprType::Bool,
                    Some(InputType::Number) => ExprType::Number,
                    _ => ExprType::String,
                };
                props.push((name.clone(), ty));
            }
        };
        if let Some(call) = workflow.workflow_call() {
            add(&call.inputs);
        }
        if let Some(dispatch) = workflow.workflow_dispatch() {
            add(&dispatch.inputs);
        }
        if props.is_empty() {
            ExprType::any_object()
        } else {
            ExprType::strict_object(props.iter().map(|(n, t)| (n.as_str(), t.clone())))
        }
    }

    fn secrets_type(workflow: &Workflow) -> ExprType {
        let mut props: Vec<(&str, ExprType)> = vec![("GITHUB_TOKEN", ExprType::String)];
        if let Some(call) = workflow.workflow_call() {
            props.extend(call.secrets.keys().map(|name| (name.as_str(), ExprType::String)));
        }
        // Repository and organization secrets are not statically known.
        ExprType::loose_object(props)
    }

    fn jobs_type(workflow: &Workflow) -> ExprType {
        let props: Vec<(&str, ExprType)> = workflow
            .jobs
            .iter()
            .map(|(id, job)| (id.as_str(), Self::job_result_type(job)))
            .collect();
        ExprType::strict_object(props)
    }

    fn job_result_type(job: &Job) -> ExprType {
        let outputs = ExprType::loose_object(
            job.outputs
                .keys()
                .map(|name| (name.as_str(), ExprType::String)),
        );
        ExprType::strict_object([("outputs", outputs), ("result", ExprType::String)])
    }

    fn matrix_type(matrix: &Matrix) -> ExprType {
        if matrix.expression.is_some() {
            return ExprType::any_object();
        }
        let mut props: indexmap::IndexMap<String, ExprType> = indexmap::IndexMap::new();
        for (name, row) in &matrix.rows {
            let ty = if row.expression.is_some() {
                ExprType::Unknown
            } else {
                row.values
                    .iter()
                    .map(Self::matrix_value_type)
                    .reduce(|a, b| ExprType::join(&a, &b))
                    .unwrap_or(ExprType::Unknown)
            };
            props.insert(name.to_ascii_lowercase(), ty);
        }
        for combination in &matrix.include {
            for (name, value) in &combination.values {
                let ty = Self::matrix_value_type(value);
                let name = name.to_ascii_lowercase();
                let merged = match props.get(&name) {
                    Some(existing) => ExprType::join(existing, &ty),
                    None => ty,
                };
                props.insert(name, merged);
            }
        }
        ExprType::strict_object(props.iter().map(|(n, t)| (n.as_str(), t.clone())))
    }

    fn matrix_value_type(value: &MatrixValue) -> ExprType {
        match value {
            MatrixValue::String(node) if node.contains_expression() => ExprType::Unknown,
            MatrixValue::String(_) => ExprType::String,
            MatrixValue::Number(..) => ExprType::Number,
            MatrixValue::Bool(..) => ExprType::Bool,
            MatrixValue::Other(_) => ExprType::Unknown,
        }
    }

    fn needs_type(&self, job: &Job) -> ExprType {
        let props: Vec<(String, ExprType)> = job
            .needs
            .iter()
            .filter_map(|needed| {
                let id = needed.value.to_ascii_lowercase();
                let ty = self.job_results.get(&id)?.clone();
                Some((id, ty))
            })
            .collect();
        ExprType::strict_object(props.iter().map(|(n, t)| (n.as_str(), t.clone())))
    }

    fn steps_type(&self) -> ExprType {
        let step_type = ExprType::strict_object([
            ("outputs", ExprType::any_object()),
            ("outcome", ExprType::String),
            ("conclusion", ExprType::String),
        ]);
        ExprType::strict_object(
            self.step_ids
                .iter()
                .map(|id| (id.as_str(), step_type.clone())),
        )
    }
}

impl Visitor for ExprRule {
    fn visit_workflow_pre(&mut self, workflow: &Workflow) -> anyhow::Result<()> {
        self.job_results = workflow
            .jobs
            .iter()
            .map(|(id, job)| (id.to_ascii_lowercase(), Self::job_result_type(job)))
            .collect();

        let mut env = TypeEnv::builtin();
        env.insert("inputs", Self::inputs_type(workflow));
        env.insert("secrets", Self::secrets_type(workflow));
        env.insert("jobs", Self::jobs_type(workflow));
        if let Some(config) = &self.base.config {
            if !config.config_variables.is_empty() {
                env.insert(
                    "vars",
                    ExprType::strict_object(
                        config
                            .config_variables
                            .iter()
                            .map(|name| (name.as_str(), ExprType::String)),
                    ),
                );
            }
        }
        self.workflow_env = env.clone();
        self.job_env = env;

        if let Some(run_name) = &workflow.run_name {
            self.check_string(run_name, "run-name");
        }
        if let Some(env) = &workflow.env {
            self.check_env(env, "env");
        }
        if let Some(concurrency) = &workflow.concurrency {
            if let Some(group) = &concurrency.group {
                self.check_string(group, "concurrency");
            }
        }
        if let Some(call) = workflow.workflow_call() {
            for input in call.inputs.values() {
                if let Some(default) = &input.default {
                    self.check_string(default, "on.workflow_call.inputs.<inputs_id>.default");
                }
            }
            for output in call.outputs.values() {
                if let Some(value) = &output.value {
                    self.check_string(value, "on.workflow_call.outputs.<output_id>.value");
                }
            }
        }
        Ok(())
    }

    fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
        self.step_ids.clear();
        self.job_env = self.workflow_env.clone();
        if let Some(strategy) = &job.strategy {
            if let Some(matrix) = &strategy.matrix {
                self.job_env.insert("matrix", Self::matrix_type(matrix));
            }
        }
        let needs = self.needs_type(job);
        self.job_env.insert("needs", needs);
        let steps = self.steps_type();
        self.job_env.insert("steps", steps);

        if let Some(name) = &job.name {
            self.check_string(name, "jobs.<job_id>.name");
        }
        if let Some(cond) = &job.if_cond {
            self.check_condition(cond, "jobs.<job_id>.if");
        }
        if let Some(runs_on) = &job.runs_on {
            for label in &runs_on.labels {
                self.check_string(label, "jobs.<job_id>.runs-on");
            }
            if let Some(group) = &runs_on.group {
                self.check_string(group, "jobs.<job_id>.runs-on");
            }
        }
        if let Some(environment) = &job.environment {
            if let Some(name) = &environment.name {
                self.check_string(name, "jobs.<job_id>.environment");
            }
        }
        if let Some(concurrency) = &job.concurrency {
            if let Some(group) = &concurrency.group {
                self.check_string(group, "jobs.<job_id>.concurrency");
            }
        }
        if let Some(env) = &job.env {
            self.check_env(env, "jobs.<job_id>.env");
        }
        if let Some(timeout) = &job.timeout_minutes {
            if let Some(expression) = &timeout.expression {
                self.check_string(expression, "jobs.<job_id>.timeout-minutes");
            }
        }
        if let Some(continue_on_error) = &job.continue_on_error {
            if let Some(expression) = &continue_on_error.expression {
                self.check_string(expression, "jobs.<job_id>.continue-on-error");
            }
        }
        if let Some(container) = &job.container {
            self.check_container(container, "jobs.<job_id>.container");
        }
        for service in job.services.values() {
            self.check_container(service, "jobs.<job_id>.services");
        }
        if let Some(strategy) = &job.strategy {
            if let Some(matrix) = &strategy.matrix {
                if let Some(expression) = &matrix.expression {
                    self.check_string(expression, "jobs.<job_id>.strategy");
                }
                for row in matrix.rows.values() {
                    if let Some(expression) = &row.expression {
                        self.check_string(expression, "jobs.<job_id>.strategy");
                    }
                }
            }
        }
        if let Some(call) = &job.workflow_call {
            if call.uses.contains_expression() {
                self.base.report(
                    call.uses.pos,
                    Kind::Semantic,
                    "expressions are not available in \"uses\"",
                );
            }
            for input in call.inputs.values() {
                self.check_string(input, "jobs.<job_id>.with.<with_id>");
            }
            if let CallSecrets::Map(map) = &call.secrets {
                for value in map.values() {
                    self.check_string(value, "jobs.<job_id>.secrets.<secrets_id>");
                }
            }
        }
        Ok(())
    }

    fn visit_job_post(&mut self, job: &Job) -> anyhow::Result<()> {
        // Outputs and environment URLs can reference steps, so they are
        // checked once every step id is known.
        for output in job.outputs.values() {
            self.check_string(output, "jobs.<job_id>.outputs.<output_id>");
        }
        if let Some(environment) = &job.environment {
            if let Some(url) = &environment.url {
                self.check_string(url, "jobs.<job_id>.environment.url");
            }
        }
        Ok(())
    }

    fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
        if let Some(name) = &step.name {
            self.check_string(name, "jobs.<job_id>.steps.name");
        }
        if let Some(cond) = &step.if_cond {
            self.check_condition(cond, "jobs.<job_id>.steps.if");
        }
        match &step.exec {
            Exec::Run {
                script,
                shell: _,
                working_directory,
            } => {
                self.check_string(script, "jobs.<job_id>.steps.run");
                if let Some(dir) = working_directory {
                    self.check_string(dir, "jobs.<job_id>.steps.working-directory");
                }
            }
            Exec::Action { uses, inputs } => {
                if uses.contains_expression() {
                    self.base.report(
                        uses.pos,
                        Kind::Semantic,
                        "expressions are not available in \"uses\"",
                    );
                }
                for input in inputs.values() {
                    self.check_string(input, "jobs.<job_id>.steps.with");
                }
            }
            Exec::Missing => {}
        }
        if let Some(env) = &step.env {
            self.check_env(env, "jobs.<job_id>.steps.env");
        }
        if let Some(timeout) = &step.timeout_minutes {
            if let Some(expression) = &timeout.expression {
                self.check_string(expression, "jobs.<job_id>.steps.timeout-minutes");
            }
        }
        if let Some(continue_on_error) = &step.continue_on_error {
            if let Some(expression) = &continue_on_error.expression {
                self.check_string(expression, "jobs.<job_id>.steps.continue-on-error");
            }
        }

        if let Some(id) = &step.id {
            self.step_ids.push(id.value.to_ascii_lowercase());
            let steps = self.steps_type();
            self.job_env.insert("steps", steps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::rules::testsupport::lint_rule;

    fn messages(source: &str) -> Vec<String> {
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        diagnostics.into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn test_clean_workflow() {
        let source = "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    if: github.ref == 'refs/heads/main'\n    steps:\n      - id: setup\n        run: echo ${{ github.sha }}\n      - run: echo ${{ steps.setup.outputs.value }}\n";
        assert_eq!(messages(source), Vec::<String>::new());
    }

    #[test]
    fn test_parse_error_position() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: echo ${{ github.ref == }}\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.starts_with("could not parse expression"));
        assert_eq!(diagnostics[0].line, 6);
    }

    #[test]
    fn test_unknown_property() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: echo ${{ runner.cpus }}\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("property \"cpus\""));
    }

    #[test]
    fn test_if_must_be_bool() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    if: github.ref\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("must evaluate to a bool"));
    }

    #[test]
    fn test_bare_if_condition_is_parsed() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    if: github.event_name == 'push' && success()\n    steps:\n      - run: ok\n";
        assert_eq!(messages(source), Vec::<String>::new());
    }

    #[test]
    fn test_matrix_typing() {
        let clean = "on: push\njobs:\n  a:\n    runs-on: x\n    strategy:\n      matrix:\n        os: [ubuntu-latest]\n    steps:\n      - run: echo ${{ matrix.os }}\n";
        assert_eq!(messages(clean), Vec::<String>::new());

        let broken = "on: push\njobs:\n  a:\n    runs-on: x\n    strategy:\n      matrix:\n        os: [ubuntu-latest]\n    steps:\n      - run: echo ${{ matrix.arch }}\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), broken);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("property \"arch\""));
    }

    #[test]
    fn test_inputs_typing_from_workflow_call() {
        let source = "on:\n  workflow_call:\n    inputs:\n      version:\n        type: string\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: echo ${{ inputs.version }}\n      - run: echo ${{ inputs.missing }}\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("property \"missing\""));
    }

    #[test]
    fn test_availability_of_secrets_in_job_if() {
        let source = "on: push\njobs:\n  a:\n    runs-on: x\n    if: secrets.DEPLOY != ''\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), source);
        assert_eq!(diagnostics.len(), 1);
        assert!(
            diagnostics[0]
                .message
                .contains("context \"secrets\" is not allowed here")
        );
    }

    #[test]
    fn test_hashfiles_in_step_if_only() {
        let ok = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - if: hashFiles('**/Cargo.lock') != ''\n        run: ok\n";
        assert_eq!(messages(ok), Vec::<String>::new());

        let bad = "on: push\njobs:\n  a:\n    runs-on: x\n    if: hashFiles('**/Cargo.lock') != ''\n    steps:\n      - run: ok\n";
        let (diagnostics, _) = lint_rule(ExprRule::new(), bad);
        assert_eq!(diagnostics.len(), 1);
        assert!(
            diagnostics[0]
                .message
                .contains("calling function \"hashFiles\" is not allowed here")
        );
    }
}
