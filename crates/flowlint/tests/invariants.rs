//! Cross-cutting invariants: positions, ordering, determinism, and the
//! boundary behaviors of expression position mapping.

use camino::{Utf8Path, Utf8PathBuf};
use flowlint::{CancelToken, LintState, Linter, ValidateResult};
use pretty_assertions::assert_eq;

fn lint(source: &str) -> ValidateResult {
    Linter::new(LintState::default())
        .lint_source(Utf8Path::new("workflow.yml"), source)
        .unwrap()
}

#[test]
fn test_every_diagnostic_is_positioned() {
    let sources = [
        "",
        "on: push\n",
        "not even a mapping",
        "on: [unclosed\n",
        "on: pull_request_target\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: echo ${{ github.event.pull_request.title }}\n",
    ];
    for source in sources {
        let result = lint(source);
        for diagnostic in &result.diagnostics {
            assert!(diagnostic.line >= 1, "{diagnostic}");
            assert!(diagnostic.column >= 1, "{diagnostic}");
        }
    }
}

#[test]
fn test_parse_always_returns_an_ast_or_diagnostics() {
    // Anything with a recognizable top-level key parses to a non-empty
    // model; garbage still produces diagnostics.
    let result = lint("on: push\njobs:\n  a:\n    runs-on: x\n    steps: [{run: ok}]\n");
    assert!(!result.workflow.jobs.is_empty());

    let result = lint("");
    assert!(!result.diagnostics.is_empty());
}

#[test]
fn test_visitor_is_deterministic() {
    let source = "on: [issues, push]\njobs:\n  b:\n    runs-on: x\n    steps:\n      - run: echo ${{ github.event.issue.title }}\n      - uses: actions/download-artifact@v4\n  a:\n    runs-on: x\n    needs: [b]\n    steps:\n      - run: echo ok >> $GITHUB_ENV\n";
    let first = lint(source);
    let second = lint(source);
    let render = |result: &ValidateResult| {
        result
            .diagnostics
            .iter()
            .map(|d| format!("{d} {}", d.kind))
            .collect::<Vec<_>>()
    };
    assert_eq!(render(&first), render(&second));
    let fixes = |result: &ValidateResult| {
        result
            .fixes
            .iter()
            .map(|fix| (fix.rule, fix.patches.len()))
            .collect::<Vec<_>>()
    };
    assert_eq!(fixes(&first), fixes(&second));
}

#[test]
fn test_lint_files_sorts_across_files() {
    let dir = std::env::temp_dir().join("flowlint-invariants-test");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let beta = dir.join("beta.yml");
    let alpha = dir.join("alpha.yml");
    std::fs::write(&beta, "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: ok\n")
        .unwrap();
    std::fs::write(&alpha, "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: ok\n")
        .unwrap();

    let paths = vec![
        Utf8PathBuf::from_path_buf(beta).unwrap(),
        Utf8PathBuf::from_path_buf(alpha).unwrap(),
    ];
    let results = Linter::new(LintState::default())
        .lint_files(&paths, &CancelToken::new())
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].path.as_str().ends_with("alpha.yml"));
    assert!(results[1].path.as_str().ends_with("beta.yml"));

    let all: Vec<(String, u32, u32)> = results
        .iter()
        .flat_map(|result| {
            result
                .diagnostics
                .iter()
                .map(|d| (d.path.to_string(), d.line, d.column))
        })
        .collect();
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
}

#[test]
fn test_cancellation_stops_between_files() {
    let dir = std::env::temp_dir().join("flowlint-cancel-test");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("wf.yml");
    std::fs::write(&path, "on: push\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: ok\n")
        .unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let results = Linter::new(LintState::default())
        .lint_files(&[Utf8PathBuf::from_path_buf(path).unwrap()], &cancel)
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_block_scalar_line_numbers() {
    // The expression sits on the third content line of the block scalar
    // that starts on line 6.
    let source = "on: issues\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: |\n          echo one\n          echo two\n          echo ${{ github.event.issue.title }}\n";
    let result = lint(source);
    let injection: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.rule == "code-injection-critical")
        .collect();
    assert_eq!(injection.len(), 1);
    assert_eq!(injection[0].line, 9);
}

#[test]
fn test_quoted_scalar_column_shift() {
    let source = "on: issues\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: \"echo ${{ github.event.issue.title }}\"\n";
    let result = lint(source);
    let injection: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.rule == "code-injection-critical")
        .collect();
    assert_eq!(injection.len(), 1);
    // `run:` value starts at column 14; the quote shifts content by one,
    // and the expression's inner text starts 8 bytes in.
    assert_eq!(injection[0].line, 6);
    assert_eq!(injection[0].column, 23);
}

#[test]
fn test_reserialization_is_byte_stable() {
    let source = "# leading comment\non: push # trailing\njobs:\n  t:\n    runs-on: x\n    steps:\n      - run: |\n          make all\n";
    let document = yamlcst::Document::parse(source).unwrap();
    assert_eq!(document.source(), source);
    // Applying zero patches is the identity.
    assert_eq!(yamlcst::patch::apply_all(source, &[]).unwrap(), source);
}
