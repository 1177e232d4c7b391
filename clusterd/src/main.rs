use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use clusterd::api::{ApiServer, AppState};
use clusterd::config::{LogArgs, ManagerArgs, ManagerConfig, RunnerArgs, RunnerConfig};
use clusterd::coordinator::Coordinator;
use clusterd::database::Database;
use clusterd::database::repositories::{JobRepository, SqlxJobRepository};
use clusterd::domain::Job;
use clusterd::logging;
use clusterd::notification::Notifier;
use clusterd::runner::{ExecutionEngine, HttpCoordinatorClient, LogServer, LogState, ReportQueue};

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributed capture job coordinator and runner")]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the coordinator API
    Manager(ManagerArgs),
    /// Lease and execute capture jobs
    Runner(RunnerArgs),
    /// Inspect the job store directly
    Job {
        #[arg(long, env = "DATABASE_URL", default_value = clusterd::config::DEFAULT_DATABASE_URL)]
        database_url: String,

        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Print one job, active or archived
    Get { id: i64 },
    /// Print all active jobs
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = logging::init_logging(cli.log.log_dir.as_deref(), cli.log.max_log_files)
        .context("failed to initialize logging")?;

    match cli.command {
        Command::Manager(args) => run_manager(ManagerConfig::try_from(args)?).await,
        Command::Runner(args) => run_runner(RunnerConfig::try_from(args)?).await,
        Command::Job {
            database_url,
            action,
        } => run_job_command(&database_url, action).await,
    }
}

async fn run_manager(config: ManagerConfig) -> anyhow::Result<()> {
    let shutdown = shutdown_token();
    let db = Database::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let notifier = Notifier::new(config.delivery.clone(), shutdown.clone(), info_span!("notifier"))?;
    let coordinator = Arc::new(Coordinator::new(&db, notifier, config.coordinator.clone()));
    let server = ApiServer::new(config.server.clone(), AppState::new(coordinator), shutdown.clone());

    info!(media_dir = %config.coordinator.media_dir.display(), "manager starting");
    let result = server.run().await;
    db.close().await;
    result.context("API server failed")
}

async fn run_runner(config: RunnerConfig) -> anyhow::Result<()> {
    let shutdown = shutdown_token();
    let span = info_span!("runner", name = %config.name);

    let client = Arc::new(HttpCoordinatorClient::new(
        config.coordinator_url.clone(),
        config.request_timeout,
    )?);
    // Not tied to `shutdown`: reports produced while stopping still drain.
    let queue_cancel = CancellationToken::new();
    let (reports, drain) = ReportQueue::spawn(
        client.clone(),
        config.report.clone(),
        queue_cancel.clone(),
        span.clone(),
    );

    info!(parent: &span, coordinator = %config.coordinator_url, work_dir = %config.work_dir.display(), "runner starting");
    let log_server_config = config.log_server.clone();
    let work_dir = config.work_dir.clone();
    let engine = ExecutionEngine::new(client, reports, config, span);

    let log_state = LogState::new(engine.running_job(), work_dir, log_server_config.follow_interval);
    let log_server = LogServer::new(log_server_config, log_state, shutdown.clone());
    let log_task = tokio::spawn(async move {
        if let Err(e) = log_server.run().await {
            warn!(error = %e, "runner log server failed");
        }
    });

    engine.run(shutdown).await;

    drop(engine);
    if let Err(e) = log_task.await {
        warn!(error = %e, "runner log server task failed");
    }
    if let Err(e) = drain.await {
        warn!(error = %e, "report queue task failed");
    }
    queue_cancel.cancel();
    Ok(())
}

async fn run_job_command(database_url: &str, action: JobAction) -> anyhow::Result<()> {
    let db = Database::connect(database_url).await?;
    let jobs = SqlxJobRepository::new(db.read.clone(), db.write.clone());

    match action {
        JobAction::Get { id } => {
            let job = jobs
                .get_job(id)
                .await?
                .map(Job::from)
                .with_context(|| format!("job {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobAction::List => {
            let active: Vec<Job> = jobs.list_active().await?.into_iter().map(Job::from).collect();
            println!("{}", serde_json::to_string_pretty(&active)?);
        }
    }

    db.close().await;
    Ok(())
}

/// Root token cancelled on Ctrl-C or SIGTERM.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown requested");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
