//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// JobDaemon - job scheduling service
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Job scheduling service with an RPC job-management interface",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/jobdaemon/logs/jobdaemon.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// RPC socket to talk to, bypassing registry discovery
    #[arg(short, long, global = true, help = "RPC socket path (skips registry lookup)")]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the service in the foreground
    Run,

    /// Start the service in the background
    Start,

    /// Stop the running service
    Stop,

    /// Show service status
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Check the service answers RPC
    Ping,

    /// Manage job definitions
    Job {
        #[command(subcommand)]
        command: JobCommand,
    },

    /// Internal: Run as daemon process (used by `start`)
    #[command(hide = true)]
    RunDaemon,
}

#[derive(Debug, Subcommand)]
pub enum JobCommand {
    /// Create a job
    Create {
        /// Unique job name
        name: String,

        /// Command the job stands for
        command: String,

        /// Seconds between runs
        #[arg(short, long)]
        interval: u64,

        /// Create the job disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Show one job
    Get {
        id: String,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Change fields of a job
    Update {
        id: String,

        #[command(flatten)]
        changes: JobChanges,
    },

    /// Delete a job
    Delete { id: String },

    /// List jobs
    List {
        /// Only enabled jobs
        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        /// Only disabled jobs
        #[arg(long)]
        disabled: bool,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Args)]
pub struct JobChanges {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub command: Option<String>,

    #[arg(short, long)]
    pub interval: Option<u64>,

    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    #[arg(long)]
    pub disable: bool,
}

impl JobChanges {
    /// Requested enabled state, if either flag was given
    pub fn enabled(&self) -> Option<bool> {
        match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Output format for status and job commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// Log file location shown in help and status output
pub fn get_log_path() -> PathBuf {
    crate::config::data_dir().join("logs").join("jobdaemon.log")
}
