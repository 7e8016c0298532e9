mod assign_cmd;
mod config;
mod deploy_cmd;
mod monitor_cmd;
mod pipeline_cmd;
mod project_cmds;
mod test_cmd;
mod wiring;
mod worker_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::{CliOverrides, ResolvedConfig};

#[derive(Parser)]
#[command(name = "aidp", about = "Autonomous multi-agent development pipeline")]
struct Cli {
    /// Redis broker URL (overrides AIDP_REDIS_URL env var and config file)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    /// GitHub token for upstream calls (overrides AIDP_GITHUB_TOKEN env var and config file)
    #[arg(long, global = true)]
    github_token: Option<String>,

    /// Project workspace root (defaults to the resolved pipeline config's workspace root)
    #[arg(long, global = true)]
    workspace_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an aidp config file (no broker required)
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Manage registered projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Seed a project's planning tasks onto the broker
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Classify an upstream issue and enqueue it for an agent kind
    Assign { repo: String, issue: u64 },
    /// Run the active project's test suite directly
    Test,
    /// Run or inspect the worker pool
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Run or inspect the pipeline monitor
    Monitor {
        #[command(subcommand)]
        command: MonitorCommands,
    },
    /// Build, run, and route traffic to the active project's container
    Deploy,
    /// Re-run the deployment pipeline for the active project
    Redeploy,
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Register a new project
    Create {
        name: String,
        requirements: String,
        #[arg(long)]
        repo: Option<String>,
    },
    /// List registered projects
    List,
    /// Make a project the active one
    Switch { name: String },
    /// Remove a project's registration
    Delete { name: String },
}

#[derive(Subcommand)]
enum PipelineCommands {
    /// Enqueue the active project's planning tasks
    Run,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Run the worker pool in the foreground
    Start,
    Stop,
    Status,
}

#[derive(Subcommand)]
enum MonitorCommands {
    /// Run the pipeline monitor in the foreground
    Start,
    Stop,
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        return cmd_init(force);
    }

    let overrides = CliOverrides { redis_url: cli.redis_url, github_token: cli.github_token };
    let resolved = ResolvedConfig::resolve(&overrides);
    let workspace_root = cli.workspace_root.unwrap_or_else(|| resolved.pipeline.workspace_root.clone());
    std::fs::create_dir_all(&workspace_root)?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Project { command } => match command {
            ProjectCommands::Create { name, requirements, repo } => {
                project_cmds::run_create(&workspace_root, &name, &requirements, repo)
            }
            ProjectCommands::List => project_cmds::run_list(&workspace_root),
            ProjectCommands::Switch { name } => project_cmds::run_switch(&workspace_root, &name),
            ProjectCommands::Delete { name } => project_cmds::run_delete(&workspace_root, &name),
        },
        Commands::Pipeline { command } => match command {
            PipelineCommands::Run => pipeline_cmd::run(&resolved, &workspace_root).await,
        },
        Commands::Assign { repo, issue } => assign_cmd::run(&resolved, &repo, issue, &workspace_root).await,
        Commands::Test => test_cmd::run(&workspace_root).await,
        Commands::Worker { command } => match command {
            WorkerCommands::Start => worker_cmd::run_start(&resolved, &workspace_root).await,
            WorkerCommands::Stop => {
                worker_cmd::run_stop();
                Ok(())
            }
            WorkerCommands::Status => worker_cmd::run_status(&resolved).await,
        },
        Commands::Monitor { command } => match command {
            MonitorCommands::Start => monitor_cmd::run_start(&resolved, &workspace_root).await,
            MonitorCommands::Stop => {
                monitor_cmd::run_stop();
                Ok(())
            }
            MonitorCommands::Status => {
                monitor_cmd::run_status();
                Ok(())
            }
        },
        Commands::Deploy => deploy_cmd::run_deploy(&resolved, &workspace_root).await,
        Commands::Redeploy => deploy_cmd::run_redeploy(&resolved, &workspace_root).await,
    }
}

/// Execute the `aidp init` command: write a starter config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();
    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    config::save_config(&config::ConfigFile::default())?;

    println!("Config written to {}", path.display());
    println!("Set redis_url, github_token, and deployment_domain before running `aidp worker start`.");
    Ok(())
}
