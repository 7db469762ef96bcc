#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory as _, Parser, Subcommand};
use tracing::warn;

use crate::agents::runner::RunnerAgents;
use crate::config;
use crate::core::git::{GitClient, GitRepository};
use crate::core::github::GitHubClient;
use crate::output::table::Table;
use crate::sandbox::docker::DockerSandbox;
use crate::workflow::engine::{EngineSettings, WorkflowEngine};
use crate::workflow::request::{CodingRequest, Priority};
use crate::workflow::task::TaskRecord;

#[derive(Debug, Parser)]
#[command(
    name = "codeforge",
    version,
    about = "LLM-driven coding workflow engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Submit a coding request and follow it to completion
    Run(RunArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
    Version,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Natural-language requirements
    pub requirements: String,

    /// Target service (must be mapped under [repositories] in the config)
    #[arg(short = 's', long = "service")]
    pub service: String,

    /// Additional context for the agents
    #[arg(long = "context")]
    pub context: Option<String>,

    /// Base branch to work from
    #[arg(short = 'b', long = "branch", default_value = "main")]
    pub branch: String,

    /// Priority: low, medium, high, critical
    #[arg(short = 'p', long = "priority", default_value = "medium")]
    pub priority: String,

    /// Skip test generation and the sandbox run
    #[arg(long = "skip-tests")]
    pub skip_tests: bool,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    List,
    Set(ConfigSetArgs),
    Get(ConfigGetArgs),
    Path,
}

#[derive(Debug, Parser)]
pub struct ConfigSetArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Parser)]
pub struct ConfigGetArgs {
    pub key: String,
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "codeforge", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => match args.cmd {
            ConfigCmd::List => {
                print!("{}", config::list_resolved_toml()?);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Set(set) => {
                config::set_value_string(&set.key, &set.value)?;
                println!("Set {} = {}", set.key, set.value);
                Ok(ExitCode::SUCCESS)
            }
            ConfigCmd::Get(get) => {
                let val = config::get_value_string(&get.key)?;
                match val {
                    Some(v) => {
                        println!("{v}");
                        Ok(ExitCode::SUCCESS)
                    }
                    None => anyhow::bail!(
                        "configuration key '{}' not found - use 'codeforge config list' to see available keys",
                        get.key
                    ),
                }
            }
            ConfigCmd::Path => {
                let paths = config::default_paths()?;
                println!("{}", paths.config_file.display());
                Ok(ExitCode::SUCCESS)
            }
        },
        Commands::Run(args) => cmd_run(args).await,
        Commands::Version => Ok(cmd_version()),
    }
}

fn cmd_version() -> ExitCode {
    println!("codeforge version {}", env!("CARGO_PKG_VERSION"));
    ExitCode::SUCCESS
}

async fn load_cfg() -> anyhow::Result<crate::config::Config> {
    let cfg = tokio::task::spawn_blocking(|| -> anyhow::Result<crate::config::Config> {
        let (cfg, _doc, _paths) = config::load()?;
        Ok(cfg)
    })
    .await??;
    Ok(cfg)
}

async fn build_engine(cfg: &crate::config::Config) -> anyhow::Result<WorkflowEngine> {
    let workspace_dir = config::expand_path(&cfg.workspace.base_dir)?;

    let git = GitClient::new(
        cfg.git.executable.clone(),
        cfg.git.user_name.clone(),
        cfg.git.user_email.clone(),
    );
    git.version().await?;
    let github = GitHubClient::new(cfg.git.api_base.clone(), cfg.github_token());
    let repository = Arc::new(GitRepository::new(git, github));

    let agents = Arc::new(RunnerAgents::new(
        cfg.runner.executable.clone(),
        cfg.runner.args.clone(),
        Duration::from_secs(cfg.runner.timeout_seconds),
    ));

    let sandbox = DockerSandbox::new(
        cfg.sandbox.docker_executable.clone(),
        cfg.sandbox.image.clone(),
        cfg.sandbox.network_mode.clone(),
        Duration::from_secs(cfg.sandbox.command_timeout_seconds),
        Duration::from_secs(cfg.sandbox.test_timeout_seconds),
    );
    // Leftovers from interrupted earlier runs.
    match sandbox.force_cleanup_stale().await {
        Ok(0) => {}
        Ok(n) => println!("Removed {n} stale test container(s)"),
        Err(e) => warn!(error = %e, "stale container cleanup failed"),
    }

    let settings = EngineSettings {
        workspace_dir,
        max_concurrent_tasks: cfg.workspace.max_concurrent_tasks,
        cleanup_workspace: cfg.workspace.cleanup_on_completion,
        repositories: cfg.repositories.clone(),
    };

    Ok(WorkflowEngine::new(
        settings,
        agents,
        repository,
        Arc::new(sandbox),
    ))
}

fn parse_priority(s: &str) -> anyhow::Result<Priority> {
    Ok(match s.trim().to_lowercase().as_str() {
        "low" => Priority::Low,
        "medium" => Priority::Medium,
        "high" => Priority::High,
        "critical" => Priority::Critical,
        other => anyhow::bail!("invalid priority '{other}' (low|medium|high|critical)"),
    })
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let cfg = load_cfg().await?;
    let engine = build_engine(&cfg).await?;

    let mut request = CodingRequest::new(args.requirements, args.service);
    request.priority = parse_priority(&args.priority)?;
    request.context = args.context;
    request.base_branch = args.branch;
    request.skip_tests = args.skip_tests;

    let snapshot = engine.start_coding_workflow(request).await?;
    println!("Task {} started", snapshot.task_id);
    println!("Branch: {}", snapshot.branch_name);
    println!("Estimated duration: {}", snapshot.estimated_duration);
    println!();

    let record = follow_task(&engine, &snapshot.task_id).await?;
    print_summary(&record)?;

    if record.status == crate::workflow::task::TaskStatus::Completed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

/// Polls until the task is terminal; Ctrl-C requests cancellation and
/// keeps following until the engine confirms it.
async fn follow_task(engine: &WorkflowEngine, task_id: &str) -> anyhow::Result<TaskRecord> {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_line = String::new();
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                let accepted = engine.cancel_task(task_id, "interrupted by user").await;
                if accepted {
                    println!("\nCancellation requested; waiting for the current step...");
                } else {
                    println!("\nTask already finished");
                }
            }
            _ = ticker.tick() => {
                let Some(record) = engine.get_task_status(task_id).await else {
                    anyhow::bail!("task '{task_id}' disappeared from the registry");
                };
                let line = format!(
                    "[{:3}%] {} - {}",
                    record.progress_percentage, record.status, record.current_step
                );
                if line != last_line {
                    println!("{line}");
                    last_line = line;
                }
                if record.status.is_terminal() {
                    return Ok(record);
                }
            }
        }
    }
}

fn print_summary(record: &TaskRecord) -> anyhow::Result<()> {
    println!();
    let mut t = Table::new(["STEP", "STATUS", "DURATION", "ERROR"]);
    for step in &record.workflow_steps {
        t.row([
            step.step_name.clone(),
            step.status.clone(),
            step.duration_seconds
                .map_or_else(|| "-".to_owned(), |d| format!("{d:.1}s")),
            step.error_message.clone().unwrap_or_else(|| "-".to_owned()),
        ]);
    }
    t.print()?;
    println!();

    println!("Status: {}", record.status);
    if !record.code_changes.is_empty() {
        println!("Files changed: {}", record.code_changes.len());
    }
    if let Some(hash) = &record.commit_hash {
        println!("Commit: {hash}");
    }
    if let Some(url) = &record.pr_url {
        println!("Pull request: {url}");
    }
    if let Some(err) = &record.error_message {
        println!("Error: {err}");
    }
    Ok(())
}
