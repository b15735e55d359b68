//! The flowlint command-line driver.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, ValueEnum};

use flowlint::catalog::{AdvisoryCatalog, GitHubCatalog, RepoCatalog};
use flowlint::reusable::ReusableWorkflowCache;
use flowlint::{fix, output, CancelToken, Config, Linter, LintState};

#[derive(Debug, Parser)]
#[command(name = "flowlint", version, about = "Lint WorkflowSpec CI/CD workflow files")]
struct Cli {
    /// Workflow files or directories to lint. Defaults to
    /// `.github/workflows`.
    inputs: Vec<Utf8PathBuf>,

    /// Apply registered autofixes in place after linting.
    #[arg(long)]
    fix: bool,

    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Plain)]
    format: Format,

    /// Path to a configuration file.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Disable the catalog-backed rules entirely (no network access).
    #[arg(long)]
    offline: bool,

    /// API token enabling the catalog-backed rules.
    #[arg(long, env = "FLOWLINT_GH_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Worker threads for multi-file analysis. Defaults to the number of
    /// available cores.
    #[arg(long)]
    jobs: Option<usize>,

    /// Disable ANSI colors.
    #[arg(long)]
    no_color: bool,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Plain,
    Json,
    Sarif,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            anstream::eprintln!("fatal: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbosity: &clap_verbosity_flag::Verbosity) {
    let level = verbosity.log_level_filter().to_string().to_lowercase();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(jobs) = cli.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("could not size the worker pool")?;
    }

    let config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => Config::default(),
    };

    let (repo_catalog, advisory_catalog) = build_catalogs(&cli)?;
    let state = LintState {
        config: Arc::new(config),
        repo_catalog,
        advisory_catalog,
        reusable_workflows: Arc::new(ReusableWorkflowCache::new(".".into())),
    };

    let paths = collect_inputs(&cli.inputs)?;
    if paths.is_empty() {
        anstream::eprintln!("no workflow files found");
        return Ok(ExitCode::SUCCESS);
    }

    let linter = Linter::new(state);
    let results = linter.lint_files(&paths, &CancelToken::new())?;

    match cli.format {
        Format::Plain => {
            let rendered = output::plain::render(&results, !cli.no_color, true);
            anstream::print!("{rendered}");
        }
        Format::Json => {
            let diagnostics: Vec<&flowlint::Diagnostic> =
                results.iter().flat_map(|r| &r.diagnostics).collect();
            anstream::println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        }
        Format::Sarif => {
            let sarif = output::sarif::build(&results);
            anstream::println!("{}", serde_json::to_string_pretty(&sarif)?);
        }
    }

    if cli.fix {
        for result in &results {
            if result.fixes.is_empty() {
                continue;
            }
            let patched = fix::apply_fixes(&result.source, &result.fixes);
            if patched != result.source {
                std::fs::write(&result.path, &patched)
                    .with_context(|| format!("could not write {}", result.path))?;
                anstream::eprintln!(
                    "applied {} fixes to {}",
                    result.fixes.len(),
                    result.path
                );
            }
        }
    }

    let total: usize = results.iter().map(|r| r.diagnostics.len()).sum();
    Ok(if total > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

fn build_catalogs(
    cli: &Cli,
) -> anyhow::Result<(Option<Arc<dyn RepoCatalog>>, Option<Arc<dyn AdvisoryCatalog>>)> {
    if cli.offline {
        return Ok((None, None));
    }
    let Some(token) = &cli.github_token else {
        tracing::debug!("no API token; catalog-backed rules are inconclusive");
        return Ok((None, None));
    };
    let catalog = Arc::new(GitHubCatalog::new(token)?);
    Ok((
        Some(catalog.clone() as Arc<dyn RepoCatalog>),
        Some(catalog as Arc<dyn AdvisoryCatalog>),
    ))
}

fn collect_inputs(inputs: &[Utf8PathBuf]) -> anyhow::Result<Vec<Utf8PathBuf>> {
    let defaults = vec![Utf8PathBuf::from(".github/workflows")];
    let roots = if inputs.is_empty() { &defaults } else { inputs };

    let mut paths = Vec::new();
    for root in roots {
        if root.is_file() {
            paths.push(root.clone());
            continue;
        }
        for entry in ignore::WalkBuilder::new(root).build() {
            let entry = entry?;
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                continue;
            };
            if matches!(path.extension(), Some("yml" | "yaml")) {
                paths.push(path.to_path_buf());
            }
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}
