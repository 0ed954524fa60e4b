// Units of work run under an exclusive lease

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::info;

/// Default duration of the simulated long-running job
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(30);

/// A task every worker knows by the same id.
///
/// `run` may be dropped mid-flight when the worker is interrupted; tasks
/// should hold nothing that must outlive the future.
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self) -> anyhow::Result<()>;
}

/// Simulates a long-running job by sleeping
#[derive(Debug, Clone)]
pub struct SleepTask {
    id: String,
    duration: Duration,
}

impl SleepTask {
    pub fn new(id: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: id.into(),
            duration,
        }
    }
}

#[async_trait]
impl Task for SleepTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> anyhow::Result<()> {
        info!("{}: working for {:?}", self.id, self.duration);
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Runs an external program; non-zero exit is a task failure
#[derive(Debug, Clone)]
pub struct CommandTask {
    id: String,
    program: String,
    args: Vec<String>,
}

impl CommandTask {
    /// `argv[0]` is the program. Returns `None` for an empty argv.
    pub fn new(id: impl Into<String>, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            id: id.into(),
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Task for CommandTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self) -> anyhow::Result<()> {
        info!("{}: running {} {:?}", self.id, self.program, self.args);
        // kill_on_drop so an aborted task does not leave the child running
        let status = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}
