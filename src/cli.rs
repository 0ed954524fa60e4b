use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "solo", version, about, long_about = None)]
pub struct Cli {
    /// Config file, defaults to ~/.solo/config.toml
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use a process-local store instead of the configured one
    #[arg(long)]
    pub memory: bool,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs every configured task this worker can lead, once
    Run,
    /// Runs a single ad-hoc task under its lock
    /// Without a command the task sleeps for --duration
    Exec {
        id: String,
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Shows which lease currently holds a task's lock
    Leader { id: String },
}
