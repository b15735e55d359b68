//! The double-dispatch walk that fans workflow events out to rules.

use crate::models::{Job, Step, Workflow};
use crate::rules::Rule;

/// Visiting callbacks, all optional.
///
/// Rules record diagnostics in their own state; a returned error aborts
/// the entire walk and is reserved for fatal conditions.
pub trait Visitor {
    fn visit_workflow_pre(&mut self, _workflow: &Workflow) -> anyhow::Result<()> {
        Ok(())
    }

    fn visit_workflow_post(&mut self, _workflow: &Workflow) -> anyhow::Result<()> {
        Ok(())
    }

    fn visit_job_pre(&mut self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    fn visit_job_post(&mut self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    fn visit_step(&mut self, _step: &Step) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Walks `workflow`, dispatching to every rule in registration order:
/// workflow-pre, then per job (in declaration order) job-pre, each step,
/// job-post, and finally workflow-post.
pub fn walk_workflow(workflow: &Workflow, rules: &mut [Box<dyn Rule>]) -> anyhow::Result<()> {
    for rule in rules.iter_mut() {
        rule.visit_workflow_pre(workflow)?;
    }
    for job in workflow.jobs.values() {
        for rule in rules.iter_mut() {
            rule.visit_job_pre(job)?;
        }
        for step in &job.steps {
            for rule in rules.iter_mut() {
                rule.visit_step(step)?;
            }
        }
        for rule in rules.iter_mut() {
            rule.visit_job_post(job)?;
        }
    }
    for rule in rules.iter_mut() {
        rule.visit_workflow_post(workflow)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use camino::Utf8Path;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::finding::{Diagnostic, Fix};
    use crate::parse::parse_workflow;

    struct Recorder {
        events: Rc<RefCell<Vec<String>>>,
    }

    impl Visitor for Recorder {
        fn visit_workflow_pre(&mut self, _workflow: &Workflow) -> anyhow::Result<()> {
            self.events.borrow_mut().push("workflow-pre".into());
            Ok(())
        }

        fn visit_workflow_post(&mut self, _workflow: &Workflow) -> anyhow::Result<()> {
            self.events.borrow_mut().push("workflow-post".into());
            Ok(())
        }

        fn visit_job_pre(&mut self, job: &Job) -> anyhow::Result<()> {
            self.events
                .borrow_mut()
                .push(format!("job-pre:{}", job.id.value));
            Ok(())
        }

        fn visit_job_post(&mut self, job: &Job) -> anyhow::Result<()> {
            self.events
                .borrow_mut()
                .push(format!("job-post:{}", job.id.value));
            Ok(())
        }

        fn visit_step(&mut self, step: &Step) -> anyhow::Result<()> {
            self.events.borrow_mut().push(format!("step:{}", step.index));
            Ok(())
        }
    }

    impl Rule for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn description(&self) -> &'static str {
            "records visitor events"
        }

        fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
            Vec::new()
        }

        fn take_fixes(&mut self) -> Vec<Fix> {
            Vec::new()
        }
    }

    #[test]
    fn test_event_order() {
        let outcome = parse_workflow(
            Utf8Path::new("t.yml"),
            "on: push\njobs:\n  one:\n    runs-on: x\n    steps:\n      - run: a\n      - run: b\n  two:\n    runs-on: x\n    steps:\n      - run: c\n",
        );
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut rules: Vec<Box<dyn Rule>> = vec![Box::new(Recorder {
            events: Rc::clone(&events),
        })];
        walk_workflow(&outcome.workflow, &mut rules).unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                "workflow-pre",
                "job-pre:one",
                "step:0",
                "step:1",
                "job-post:one",
                "job-pre:two",
                "step:0",
                "job-post:two",
                "workflow-post",
            ]
        );
    }
}
