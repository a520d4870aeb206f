//! Command-line entry point for one-off agent operations.
//!
//! The long-running approval flow lives in `fixbot-server`; this binary
//! covers config bootstrap and dry runs of the individual stages.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};

use fixbot::analyze::generate;
use fixbot::context::assemble;
use fixbot::core::repo_ref::{RepoRef, parse_issue_url};
use fixbot::io::config::{DEFAULT_CONFIG_FILE, FixbotConfig, Secrets, load_config, write_config};
use fixbot::io::validation::ValidationGate;
use fixbot::logging;
use fixbot::registry::AgentDeps;

#[derive(Parser)]
#[command(
    name = "fixbot",
    version,
    about = "Propose, validate, and publish fixes for tracker issues"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the repository context assembled for an issue.
    Context {
        /// Repository as `owner/name` or URL.
        #[arg(long)]
        repo: String,
        /// Issue number whose title/body steer file selection.
        #[arg(long)]
        issue: Option<u64>,
    },
    /// Analyze one issue and print the verdict as JSON (no proposal is stored, no mail is sent).
    Analyze {
        #[arg(long)]
        issue_url: String,
    },
    /// Run the lint/build/test gate in a directory.
    Validate {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init("warn");
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
        Command::Context { repo, issue } => cmd_context(&cli.config, &repo, issue).await,
        Command::Analyze { issue_url } => cmd_analyze(&cli.config, &issue_url).await,
        Command::Validate { dir } => cmd_validate(&cli.config, &dir).await,
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &FixbotConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn cmd_context(config_path: &Path, repo: &str, issue: Option<u64>) -> Result<()> {
    let config = load_config(config_path)?;
    let limits = config.context.clone();
    let deps = AgentDeps::from_config(config, &Secrets::from_env())?;
    let repo = RepoRef::parse(repo).ok_or_else(|| anyhow!("invalid repository '{repo}'"))?;
    let tracker = deps.trackers.tracker_for(&repo)?;
    let issue = match issue {
        Some(number) => Some(tracker.get_issue(number).await?),
        None => None,
    };
    println!("{}", assemble(tracker.as_ref(), issue.as_ref(), &limits).await);
    Ok(())
}

async fn cmd_analyze(config_path: &Path, issue_url: &str) -> Result<()> {
    let (repo, number) =
        parse_issue_url(issue_url).ok_or_else(|| anyhow!("not an issue URL: {issue_url}"))?;
    let config = load_config(config_path)?;
    let limits = config.context.clone();
    let deps = AgentDeps::from_config(config, &Secrets::from_env())?;
    let tracker = deps.trackers.tracker_for(&repo)?;
    let issue = tracker.get_issue(number).await?;
    let context = assemble(tracker.as_ref(), Some(&issue), &limits).await;
    let analysis = generate(deps.model.as_ref(), &issue, &tracker.repo_url(), &context).await;
    let rendered = serde_json::to_string_pretty(&analysis).context("serialize analysis")?;
    println!("{rendered}");
    Ok(())
}

async fn cmd_validate(config_path: &Path, dir: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let gate = ValidationGate::new(config.validation);
    let dir = dir.to_path_buf();
    let report = tokio::task::spawn_blocking(move || gate.validate(&dir))
        .await
        .context("validation task")?;
    for stage in &report.stages {
        let verdict = if stage.passed { "ok" } else { "FAILED" };
        println!("{:<8} {verdict} ({} ms)", stage.stage.as_str(), stage.duration_ms);
        if !stage.passed {
            if let Some(error) = &stage.error {
                println!("  {error}");
            }
            println!("{}", stage.output.trim_end());
        }
    }
    if !report.passed() {
        bail!("validation failed");
    }
    Ok(())
}
