mod display;

use actionguard_core::audit::{AuditReport, Auditor};
use actionguard_core::config::Config;
use actionguard_core::graph::{to_dot, to_mermaid};
use actionguard_core::providers::{ContentProvider, GitCloneProvider, GitHubApiProvider};
use actionguard_core::sarif::to_sarif;
use actionguard_core::store::{AnalysisRecord, RecordStore};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "actionguard",
    version,
    about = "Supply-chain auditor for GitHub Actions workflows and actions",
    long_about = "Audit GitHub Actions workflows and the actions they depend on.\n\nResolves every action transitively, then checks pinning, permissions, triggers, injection, secrets and unpinnable dependencies."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(
        short,
        long,
        global = true,
        default_value = "text",
        value_parser = ["text", "json", "sarif", "mermaid", "dot"]
    )]
    format: String,

    /// Treat the audited code as belonging to a public repository
    #[arg(long, global = true)]
    public: bool,

    /// Maximum action dependency depth to resolve
    #[arg(long, global = true)]
    max_depth: Option<usize>,

    /// Config file (defaults to $ACTIONGUARD_CONFIG or ./actionguard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Persist the result to the analysis store
    #[arg(long, global = true)]
    save: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Args)]
struct ProviderArgs {
    /// GitHub token for the REST API
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Read content from local git clones instead of the REST API
    #[arg(long)]
    clone: bool,

    /// Directory to keep clones in (temporary when unset)
    #[arg(long, requires = "clone")]
    clone_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every workflow in a repository and the actions they use
    Repo {
        /// Repository in owner/repo form
        repository: String,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Audit a single action and its transitive dependencies
    Action {
        /// Action reference, e.g. actions/checkout@v4
        reference: String,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Audit local workflow files; actions they use are resolved remotely
    Workflow {
        /// Workflow file or directory containing workflow files
        #[arg(default_value = ".github/workflows/")]
        path: PathBuf,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Inspect saved analyses
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List saved analyses, newest first
    List,
    /// Show a saved analysis
    Show { id: String },
    /// Delete a saved analysis
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(depth) = cli.max_depth {
        config.resolver.max_depth = depth;
    }
    tracing::debug!(
        max_depth = config.resolver.max_depth,
        publishers = config.trusted.prefixes().len(),
        "configuration loaded"
    );

    let blocking = match &cli.command {
        Commands::Repo { repository, provider } => {
            let auditor = build_auditor(&cli, provider, &config)?;
            let report = auditor
                .audit_target(Some(repository.as_str()), None)
                .await
                .with_context(|| format!("Failed to audit {}", repository))?;
            finish(&cli, &config, &report, repository, Some(repository.as_str()), None)?
        }
        Commands::Action { reference, provider } => {
            let auditor = build_auditor(&cli, provider, &config)?;
            let report = auditor
                .audit_target(None, Some(reference.as_str()))
                .await
                .with_context(|| format!("Failed to audit {}", reference))?;
            finish(&cli, &config, &report, reference, None, Some(reference.as_str()))?
        }
        Commands::Workflow { path, provider } => cmd_workflow(&cli, provider, &config, path).await?,
        Commands::History { command } => {
            cmd_history(&cli, &config, command)?;
            false
        }
    };

    if blocking {
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("ACTIONGUARD_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_provider(args: &ProviderArgs, config: &Config) -> Result<Box<dyn ContentProvider>> {
    if args.clone {
        let mut clone = config.clone.clone();
        if let Some(dir) = &args.clone_dir {
            clone.dir = Some(dir.clone());
        }
        let provider = GitCloneProvider::new(&clone).context("Failed to prepare clone directory")?;
        return Ok(Box::new(provider));
    }

    let mut github = config.github.clone();
    if args.token.is_some() {
        github.token = args.token.clone();
    }
    Ok(Box::new(GitHubApiProvider::from_config(&github)?))
}

fn build_auditor(cli: &Cli, args: &ProviderArgs, config: &Config) -> Result<Auditor> {
    let provider = build_provider(args, config)?;
    Ok(Auditor::from_config(provider, config).with_public(cli.public.then_some(true)))
}

/// Print the report, save it when asked, and report whether it blocks.
fn finish(
    cli: &Cli,
    config: &Config,
    report: &AuditReport,
    title: &str,
    repository: Option<&str>,
    action: Option<&str>,
) -> Result<bool> {
    emit(report, title, &cli.format)?;

    if cli.save {
        let record = AnalysisRecord::from_report(report, repository, action);
        RecordStore::new(&config.store.dir)
            .save(&record)
            .context("Failed to save analysis")?;
        eprintln!("Saved analysis {}", record.id);
    }

    Ok(report.statistics.has_blocking_findings())
}

fn emit(report: &AuditReport, title: &str, format: &str) -> Result<()> {
    match format {
        "json" => {
            let json = serde_json::json!({
                "method": report.method,
                "graph": report.export(),
                "statistics": report.statistics,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        "sarif" => println!("{}", serde_json::to_string_pretty(&to_sarif(&report.graph))?),
        "mermaid" => print!("{}", to_mermaid(&report.graph)),
        "dot" => print!("{}", to_dot(&report.graph)),
        _ => display::print_audit_report(&report.export(), &report.statistics, title),
    }
    Ok(())
}

fn discover_workflow_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let pattern = format!("{}/**/*.yml", path.display());
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .context("Failed to read glob pattern")?
            .chain(
                glob::glob(&format!("{}/**/*.yaml", path.display()))
                    .context("Failed to read glob pattern")?,
            )
            .filter_map(|r| r.ok())
            .collect();
        files.sort();
        return Ok(files);
    }

    anyhow::bail!("Path '{}' does not exist", path.display());
}

async fn cmd_workflow(cli: &Cli, args: &ProviderArgs, config: &Config, path: &Path) -> Result<bool> {
    let files = discover_workflow_files(path)?;
    if files.is_empty() {
        anyhow::bail!(
            "No workflow files found at '{}'. \
            Make sure the path points to a YAML workflow file or directory.",
            path.display()
        );
    }

    let auditor = build_auditor(cli, args, config)?;
    let mut blocking = false;
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let name = file.to_string_lossy();
        let report = auditor
            .audit_workflow_file(&name, &content)
            .await
            .with_context(|| format!("Failed to audit {}", file.display()))?;
        blocking |= finish(cli, config, &report, &name, None, None)?;
    }
    Ok(blocking)
}

fn cmd_history(cli: &Cli, config: &Config, command: &HistoryCommands) -> Result<()> {
    let store = RecordStore::new(&config.store.dir);
    match command {
        HistoryCommands::List => {
            let records = store.list().context("Failed to list analyses")?;
            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                display::print_history(&records);
            }
        }
        HistoryCommands::Show { id } => {
            let record = store.get(id)?;
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&record)?),
                "text" => display::print_audit_report(&record.graph, &record.statistics, record.subject()),
                other => anyhow::bail!("Format '{}' is not available for saved analyses", other),
            }
        }
        HistoryCommands::Delete { id } => {
            store.delete(id)?;
            println!("Deleted analysis {}", id);
        }
    }
    Ok(())
}
