//! End-to-end scenarios: full rule set over complete workflow inputs.

use camino::Utf8Path;
use flowlint::{fix, Diagnostic, LintState, Linter, ValidateResult};
use pretty_assertions::assert_eq;

fn lint(source: &str) -> ValidateResult {
    Linter::new(LintState::default())
        .lint_source(Utf8Path::new("workflow.yml"), source)
        .unwrap()
}

fn rule_diagnostics<'a>(result: &'a ValidateResult, rule: &str) -> Vec<&'a Diagnostic> {
    result
        .diagnostics
        .iter()
        .filter(|diagnostic| diagnostic.rule == rule)
        .collect()
}

/// Applies every registered fix, re-lints, and asserts the fixed rules
/// are quiet on the output.
fn assert_fixes_are_idempotent(source: &str, result: &ValidateResult) -> String {
    let patched = fix::apply_fixes(source, &result.fixes);
    let rerun = lint(&patched);
    for fix in &result.fixes {
        assert_eq!(
            rule_diagnostics(&rerun, fix.rule).len(),
            0,
            "rule {} still fires after its fix:\n{patched}",
            fix.rule
        );
    }
    patched
}

#[test]
fn test_code_injection_privileged_trigger() {
    let source = "on: pull_request_target\njobs:\n  t: { runs-on: ubuntu-latest, steps: [ { run: \"echo ${{ github.event.pull_request.title }}\" } ] }\n";
    let result = lint(source);

    assert_eq!(rule_diagnostics(&result, "code-injection-critical").len(), 1);
    assert_eq!(rule_diagnostics(&result, "code-injection-medium").len(), 0);

    let injection_fixes: Vec<_> = result
        .fixes
        .iter()
        .filter(|fix| fix.rule == "code-injection-critical")
        .collect();
    assert_eq!(injection_fixes.len(), 1);

    let patched = fix::apply_fixes(source, &result.fixes);
    assert!(patched.contains("PR_TITLE: \"${{ github.event.pull_request.title }}\""));
    // The run script is itself double-quoted, so the shell quotes around
    // the variable arrive escaped: the script reads `echo "$PR_TITLE"`.
    assert!(patched.contains(r#"echo \"$PR_TITLE\""#), "{patched}");

    let rerun = lint(&patched);
    assert_eq!(rule_diagnostics(&rerun, "code-injection-critical").len(), 0);
}

#[test]
fn test_code_injection_fix_output_snapshot() {
    let source = "on: pull_request_target\njobs:\n  t: { runs-on: ubuntu-latest, steps: [ { run: \"echo ${{ github.event.pull_request.title }}\" } ] }\n";
    let result = lint(source);
    let patched = fix::apply_fixes(source, &result.fixes);
    insta::assert_snapshot!(patched, @r#"
    on: pull_request_target
    jobs:
      t: { runs-on: ubuntu-latest, steps: [ { run: "echo \"$PR_TITLE\"", env: { PR_TITLE: "${{ github.event.pull_request.title }}" } } ] }
    # TODO: grant the minimal scopes this workflow needs
    permissions: {}
    "#);
}

#[test]
fn test_code_injection_normal_trigger() {
    let source = "on: pull_request\njobs:\n  t: { runs-on: ubuntu-latest, steps: [ { run: \"echo ${{ github.event.pull_request.title }}\" } ] }\n";
    let result = lint(source);

    assert_eq!(rule_diagnostics(&result, "code-injection-medium").len(), 1);
    assert_eq!(rule_diagnostics(&result, "code-injection-critical").len(), 0);
    assert!(result
        .fixes
        .iter()
        .any(|fix| fix.rule == "code-injection-medium"));
}

#[test]
fn test_critical_and_medium_are_mutually_exclusive() {
    // Mixed privileged and normal triggers classify as privileged.
    let source = "on: [pull_request, issue_comment]\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - run: echo ${{ github.event.issue.title }}\n      - run: echo ${{ github.head_ref }}\n";
    let result = lint(source);
    let critical = rule_diagnostics(&result, "code-injection-critical").len();
    let medium = rule_diagnostics(&result, "code-injection-medium").len();
    assert!(critical > 0);
    assert_eq!(medium, 0);
}

#[test]
fn test_cache_poisoning_scenario() {
    let source = "on: { issue_comment: { types: [created] } }\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n        with: { ref: \"${{ steps.x.outputs.head_sha }}\" }\n      - uses: actions/setup-python@v5\n        with: { python-version: \"3.11\", cache: \"pip\" }\n";
    let result = lint(source);

    let poisoning = rule_diagnostics(&result, "cache-poisoning");
    assert_eq!(poisoning.len(), 1);
    // At the setup-python step.
    assert_eq!(poisoning[0].line, 8);

    let fixes: Vec<_> = result
        .fixes
        .iter()
        .filter(|fix| fix.rule == "cache-poisoning")
        .collect();
    assert_eq!(fixes.len(), 1);

    let patched = fix::apply_fixes(source, &result.fixes);
    assert!(!patched.contains("ref:"), "{patched}");

    let rerun = lint(&patched);
    assert_eq!(rule_diagnostics(&rerun, "cache-poisoning").len(), 0);
}

#[test]
fn test_needs_cycle_scenario() {
    let source = "on: push\njobs:\n  a:\n    runs-on: x\n    needs: [b]\n    steps:\n      - run: ok\n  b:\n    runs-on: x\n    needs: [a]\n    steps:\n      - run: ok\n";
    let result = lint(source);
    let needs = rule_diagnostics(&result, "job-needs");
    assert!(!needs.is_empty());
    assert!(needs[0].message.contains("cyclic"));
    assert_eq!(needs[0].kind, flowlint::Kind::Semantic);
}

#[test]
fn test_unsound_contains_scenario() {
    let source = "on: push\njobs:\n  t:\n    runs-on: ubuntu-latest\n    if: contains('refs/heads/main refs/heads/develop', github.ref)\n    steps:\n      - run: ok\n";
    let result = lint(source);

    assert_eq!(rule_diagnostics(&result, "unsound-contains").len(), 1);
    let patched = assert_fixes_are_idempotent(source, &result);
    assert!(
        patched.contains(
            "contains(fromJSON('[\"refs/heads/main\", \"refs/heads/develop\"]'), github.ref)"
        ),
        "{patched}"
    );
}

#[test]
fn test_artifact_poisoning_scenario() {
    let source = "on: push\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/download-artifact@v4\n";
    let result = lint(source);

    assert_eq!(
        rule_diagnostics(&result, "artifact-poisoning-critical").len(),
        1
    );
    let patched = assert_fixes_are_idempotent(source, &result);
    assert!(
        patched.contains("path: \"${{ runner.temp }}/artifacts\""),
        "{patched}"
    );
}

#[test]
fn test_untrusted_checkout_fix_idempotence() {
    let source = "on: workflow_run\njobs:\n  t:\n    runs-on: ubuntu-latest\n    steps:\n      - uses: actions/checkout@v4\n        with:\n          ref: ${{ github.head_ref }}\n";
    let result = lint(source);
    assert_eq!(rule_diagnostics(&result, "untrusted-checkout").len(), 1);
    assert_fixes_are_idempotent(source, &result);
}
