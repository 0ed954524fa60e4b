use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use solo::config::Backend;
use solo::prelude::*;
use solo::task::DEFAULT_SLEEP;
use solo::{Cli, Commands};

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => match Config::default_path() {
            Some(path) if path.exists() => Config::from_file(&path)
                .with_context(|| format!("cannot load config {}", path.display()))?,
            _ => Config::default(),
        },
    };
    if cli.memory {
        config.store.backend = Backend::Memory;
    }
    Ok(config)
}

/// Cancel the worker on Ctrl-C; the running gate releases its lease first
fn watch_interrupt(worker: &ExclusiveWorker) {
    let shutdown = worker.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Job interrupted. Cleaning up");
            shutdown.cancel();
        }
    });
}

async fn run_tasks(worker: &ExclusiveWorker, tasks: &[Arc<dyn Task>]) -> anyhow::Result<ExitCode> {
    watch_interrupt(worker);
    let report = worker.run(tasks).await.context("aborting run")?;

    for entry in &report.tasks {
        println!("{}: {}", entry.key, entry.outcome);
    }
    if report.interrupted {
        if report.release_failures() == 0 {
            println!("interrupted; held lease released");
        } else {
            println!("interrupted; lease release failed, the store will expire it");
        }
        return Ok(ExitCode::from(130));
    }
    if report.failures() > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let store = config.store.build()?;
    let worker = ExclusiveWorker::new(store, config.lease.spec(), config.namespace.clone());

    match cli.command {
        Commands::Run => {
            let tasks = config.build_tasks()?;
            if tasks.is_empty() {
                warn!("no tasks configured");
            }
            run_tasks(&worker, &tasks).await
        }
        Commands::Exec {
            id,
            duration,
            command,
        } => {
            let task: Arc<dyn Task> = if command.is_empty() {
                Arc::new(SleepTask::new(id, duration.unwrap_or(DEFAULT_SLEEP)))
            } else {
                Arc::new(
                    CommandTask::new(id, &command).ok_or_else(|| anyhow!("empty command"))?,
                )
            };
            run_tasks(&worker, &[task]).await
        }
        Commands::Leader { id } => {
            let key = worker.key_for(&id);
            match worker.leader(&id).await? {
                Some(lease) => println!("{}: held by lease {}", key, lease),
                None => println!("{}: free", key),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbosity);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
