use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use olbd::config::{DEFAULT_CONFIG_PATH, ServerConfig};
use olbd::core::{Orchestrator, Trigger, format_size, is_valid_project_id, list_archives};
use olbd::logging::{self, LogConfig};
use olbd::scheduler::Scheduler;
use olbd::store::ConfigStore;
use olbd::web::{WebServer, WebState};
use olbd::context;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "olbd")]
#[command(about = "Overleaf project backup daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard and run scheduled backups
    Daemon(ServerArgs),
    /// Run one backup batch and exit
    Run,
    /// List the archives kept for a project
    Archives { project_id: String },
}

#[derive(Args)]
struct ServerArgs {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

impl ServerArgs {
    fn apply(&self, server: &ServerConfig) -> ServerConfig {
        ServerConfig {
            host: self.host.clone().unwrap_or_else(|| server.host.clone()),
            port: self.port.unwrap_or(server.port),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init(LogConfig {
        json: cli.json_logs,
        verbose: cli.verbose,
    });

    let store = ConfigStore::open(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let ctx = context::AppContext::new(store);

    match &cli.command {
        Commands::Daemon(args) => {
            run_daemon(ctx, args).await.context("Failed to run daemon")?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run => run_once(ctx).await,
        Commands::Archives { project_id } => {
            run_archives(ctx, project_id).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_daemon(ctx: context::AppContext, args: &ServerArgs) -> Result<()> {
    let config = ctx.store.snapshot().await;
    let bind_addr = args.apply(&config.server).bind_addr()?;

    let orchestrator = Arc::new(Orchestrator::new(ctx));
    let scheduler = Arc::new(Scheduler::new(orchestrator.clone()));
    scheduler.apply(&config.backup);

    tracing::info!(
        config = %orchestrator.context().store.path().display(),
        backup_dir = %config.backup.backup_dir.display(),
        projects = config.projects.len(),
        "olbd starting"
    );

    let server = Arc::new(WebServer::new(
        WebState::new(orchestrator, scheduler.clone()),
        bind_addr,
    ));
    let mut handle = tokio::spawn({
        let server = server.clone();
        async move { server.start().await }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
        }
        // The server stopped on its own, e.g. the address was in use
        result = &mut handle => {
            scheduler.cancel();
            return result.context("Web server task failed")?;
        }
    }

    scheduler.cancel();
    server.shutdown();
    handle.await.context("Web server task failed")??;
    Ok(())
}

async fn run_once(ctx: context::AppContext) -> Result<ExitCode> {
    let orchestrator = Orchestrator::new(ctx);

    match orchestrator.run_now(Trigger::Cli).await {
        Ok(result) => {
            for outcome in &result.outcomes {
                if outcome.ok {
                    println!(
                        "ok    {:<30} {} ({}, pruned {})",
                        outcome.project_name,
                        outcome.archive.as_deref().unwrap_or_default(),
                        format_size(outcome.size_bytes),
                        outcome.pruned
                    );
                } else {
                    println!(
                        "FAIL  {:<30} {}",
                        outcome.project_name,
                        outcome.message.as_deref().unwrap_or_default()
                    );
                }
            }
            println!("success: {}  failure: {}", result.success, result.failure);

            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e) => {
            eprintln!("backup aborted: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_archives(ctx: context::AppContext, project_id: &str) -> Result<()> {
    if !is_valid_project_id(project_id) {
        anyhow::bail!("Invalid project id: {}", project_id);
    }

    let dir = ctx.store.snapshot().await.backup.backup_dir.join(project_id);
    let archives = list_archives(&dir)
        .with_context(|| format!("Failed to list archives in {}", dir.display()))?;

    if archives.is_empty() {
        println!("No archives for {}", project_id);
        return Ok(());
    }

    for archive in archives {
        let modified: chrono::DateTime<chrono::Local> = archive.modified.into();
        println!(
            "{}  {:>10}  {}",
            modified.format("%Y-%m-%d %H:%M:%S"),
            format_size(archive.size),
            archive.file_name()
        );
    }
    Ok(())
}
