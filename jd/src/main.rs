//! JobDaemon - job scheduling service
//!
//! CLI entry point: runs the service and talks to a running one over RPC.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, error, info, warn};

use jobdaemon::cli::{Cli, Command, JobCommand, OutputFormat, get_log_path};
use jobdaemon::config::Config;
use jobdaemon::daemon::DaemonManager;
use jobdaemon::domain::{Job, JobPatch, NewJob};
use jobdaemon::lifecycle::{InitializationError, LifecycleError, ServiceLifecycle};
use jobdaemon::registry::{FileRegistry, ServiceRegistry};
use jobdaemon::rpc::{JobClient, RpcServer, ShutdownSignal};
use jobdaemon::scheduler::{SchedulingLoop, TickScheduler};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) if matches!(cli.command, Command::Run | Command::RunDaemon) => {
            exit_with(LifecycleError::from(InitializationError::ConfigLoad(format!("{e:#}"))))
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run | Command::RunDaemon => cmd_run(&config).await,
        Command::Start => cmd_start(cli.config.as_ref()).await,
        Command::Stop => cmd_stop(&config, cli.socket).await,
        Command::Status { format } => cmd_status(&config, cli.socket, format).await,
        Command::Ping => cmd_ping(&config, cli.socket).await,
        Command::Job { command } => cmd_job(&config, cli.socket, command).await,
    }
}

/// Resolve SIGINT/SIGTERM into the service's shutdown signal
///
/// Handlers are installed before returning so a signal that arrives during
/// startup is not lost.
fn shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(Box::pin(async move {
        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
        }
    }))
}

/// Run the service in this process until it is told to stop
async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
    let pid_guard = DaemonManager::new().register_self()?;

    if let Err(e) = run_service(config, shutdown).await {
        drop(pid_guard);
        exit_with(e);
    }
    Ok(())
}

/// Report a service failure and exit with its status code
fn exit_with(e: LifecycleError) -> ! {
    error!(error = %e, exit_code = e.exit_code(), "Service failed");
    eprintln!("{} {}", "error:".red().bold(), e);
    std::process::exit(e.exit_code());
}

async fn run_service(config: &Config, shutdown: ShutdownSignal) -> Result<(), LifecycleError> {
    if !config.database.is_memory() {
        if let Some(parent) = config.database.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(?parent, error = %e, "Failed to create database directory");
            }
        }
    }

    let mut server = RpcServer::from_config(&config.rpc).map_err(InitializationError::Registration)?;
    let registry: Arc<dyn ServiceRegistry> = Arc::new(FileRegistry::new(&config.registry.dir));
    let scheduler: Arc<dyn SchedulingLoop> = Arc::new(TickScheduler::from_config(&config.scheduler));

    let mut lifecycle = ServiceLifecycle::new(config.clone(), registry, scheduler);
    lifecycle.run(&mut server, shutdown).await
}

async fn cmd_start(config_path: Option<&PathBuf>) -> Result<()> {
    debug!("cmd_start: called");
    let daemon = DaemonManager::new();
    if let Some(pid) = daemon.running_pid() {
        println!("JobDaemon is already running (PID: {})", pid);
        return Ok(());
    }

    let pid = daemon.start(config_path.map(PathBuf::as_path))?;
    println!("JobDaemon started (PID: {})", pid);
    Ok(())
}

/// Ask the service to stop over RPC, falling back to SIGTERM
async fn cmd_stop(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!("cmd_stop: called");
    let daemon = DaemonManager::new();
    let pid = daemon.running_pid();
    let client = resolve_client(config, socket).await;

    match client.shutdown().await {
        Ok(()) => {
            let stopped = match pid {
                Some(pid) => daemon.wait_for_exit(pid, Duration::from_secs(5)),
                None => true,
            };
            if stopped {
                println!("JobDaemon stopped gracefully");
                return Ok(());
            }
            debug!("cmd_stop: RPC shutdown timed out, falling back to SIGTERM");
        }
        Err(e) => debug!(error = %e, "cmd_stop: RPC shutdown failed, falling back to SIGTERM"),
    }

    if pid.is_none() {
        println!("JobDaemon is not running");
        return Ok(());
    }
    daemon.stop()?;
    println!("JobDaemon stopped");
    Ok(())
}

async fn cmd_status(config: &Config, socket: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_status: called");
    let status = DaemonManager::new().status();
    let registry = FileRegistry::new(&config.registry.dir);
    let instances = registry.lookup(&config.service.name).await.unwrap_or_else(|e| {
        warn!(error = %e, "cmd_status: registry lookup failed");
        Vec::new()
    });
    let client = resolve_client(config, socket).await;
    let responding = client.ping().await.ok();

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "running": status.running,
                "pid": status.pid,
                "version": responding.as_ref().or(status.version.as_ref()),
                "responding": responding.is_some(),
                "socket": client.socket_path().to_string_lossy(),
                "registered_instances": instances.len(),
                "pid_file": status.pid_file.to_string_lossy(),
                "log_file": get_log_path().to_string_lossy(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            println!("JobDaemon Status");
            println!("----------------");
            match (status.pid, &responding) {
                (_, Some(version)) => println!("Status: {} (version {})", "running".green(), version),
                (Some(pid), None) => println!("Status: {} (PID {}, not answering RPC)", "unresponsive".yellow(), pid),
                (None, None) => println!("Status: {}", "stopped".red()),
            }
            if let Some(pid) = status.pid {
                println!("PID: {}", pid);
            }
            println!("Socket: {}", client.socket_path().display());
            println!("Registered instances: {}", instances.len());
            println!("PID file: {}", status.pid_file.display());
            println!("Log file: {}", get_log_path().display());
        }
    }
    Ok(())
}

async fn cmd_ping(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    debug!("cmd_ping: called");
    let client = resolve_client(config, socket).await;
    let version = client
        .ping()
        .await
        .with_context(|| format!("No response from {}", client.socket_path().display()))?;
    println!("JobDaemon is alive (version {})", version);
    Ok(())
}

async fn cmd_job(config: &Config, socket: Option<PathBuf>, command: JobCommand) -> Result<()> {
    debug!(?command, "cmd_job: called");
    let client = resolve_client(config, socket).await;
    match command {
        JobCommand::Create {
            name,
            command,
            interval,
            disabled,
        } => {
            let mut new = NewJob::new(name, command, interval);
            new.enabled = !disabled;
            let job = client.create_job(new).await?;
            println!("{} Created job {}", "✓".green(), job.id.cyan());
        }
        JobCommand::Get { id, format } => {
            let job = client.get_job(&id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
                OutputFormat::Text => print_job(&job),
            }
        }
        JobCommand::Update { id, changes } => {
            let patch = JobPatch {
                enabled: changes.enabled(),
                name: changes.name,
                command: changes.command,
                interval_secs: changes.interval,
            };
            let job = client.update_job(&id, patch).await?;
            println!("{} Updated job {}", "✓".green(), job.id.cyan());
        }
        JobCommand::Delete { id } => {
            client.delete_job(&id).await?;
            println!("{} Deleted job {}", "✓".green(), id);
        }
        JobCommand::List {
            enabled,
            disabled,
            format,
        } => {
            let filter = match (enabled, disabled) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let jobs = client.list_jobs(filter).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&jobs)?),
                OutputFormat::Text if jobs.is_empty() => println!("No jobs"),
                OutputFormat::Text => {
                    for job in &jobs {
                        let state = if job.enabled { "enabled".green() } else { "disabled".yellow() };
                        println!(
                            "{}  {:<24} every {:>6}s  {}  runs {}",
                            job.id.cyan(),
                            job.name,
                            job.interval_secs,
                            state,
                            job.run_count
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_job(job: &Job) {
    let timestamp = |at: Option<chrono::DateTime<chrono::Utc>>| at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
    println!("{} {}", job.id.cyan(), job.name.bold());
    println!("  command:  {}", job.command);
    println!("  interval: {}s", job.interval_secs);
    println!(
        "  enabled:  {}",
        if job.enabled { "yes".green() } else { "no".yellow() }
    );
    println!("  runs:     {}", job.run_count);
    println!("  last run: {}", timestamp(job.last_run_at));
    println!("  next run: {}", timestamp(job.next_run_at));
    println!("  created:  {}", job.created_at.to_rfc3339());
}

/// Client for `--socket`, else the registry's newest live instance, else the configured socket
async fn resolve_client(config: &Config, socket: Option<PathBuf>) -> JobClient {
    if let Some(path) = socket {
        return JobClient::with_socket_path(path);
    }
    let registry = FileRegistry::new(&config.registry.dir);
    match JobClient::discover(&registry, &config.service.name).await {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "resolve_client: discovery failed, using configured socket");
            JobClient::with_socket_path(config.rpc.socket_path.clone())
        }
    }
}
