//! Background process management for `jd start` / `jd stop`
//!
//! The running service is tracked by a small JSON PID file holding the
//! process id and the version that wrote it.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::runtime_dir;

/// Current version from git describe (set at compile time)
pub const VERSION: &str = env!("GIT_DESCRIBE");

/// How long `stop` waits for the process to exit before SIGKILL
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);

/// Contents of the PID file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub version: String,
    pub started_at: DateTime<Utc>,
}

/// Daemon status information
#[derive(Debug)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    /// Version recorded by the running process
    pub version: Option<String>,
    pub pid_file: PathBuf,
}

/// PID-file based process manager
#[derive(Debug, Clone)]
pub struct DaemonManager {
    pid_file: PathBuf,
}

impl Default for DaemonManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonManager {
    pub fn new() -> Self {
        Self::with_pid_file(runtime_dir().join("jobdaemon.pid"))
    }

    pub fn with_pid_file(pid_file: PathBuf) -> Self {
        debug!(?pid_file, "DaemonManager::with_pid_file: called");
        Self { pid_file }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    fn read_record(&self) -> Option<PidRecord> {
        let content = fs::read_to_string(&self.pid_file).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(pid_file = ?self.pid_file, error = %e, "Ignoring unreadable PID file");
                None
            }
        }
    }

    fn write_record(&self, record: &PidRecord) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }
        let content = serde_json::to_string(record).context("Failed to serialize PID record")?;
        fs::write(&self.pid_file, content).context("Failed to write PID file")?;
        debug!(pid = record.pid, path = ?self.pid_file, "Wrote PID file");
        Ok(())
    }

    fn remove_pid_file(&self) -> Result<()> {
        match fs::remove_file(&self.pid_file) {
            Ok(()) => {
                debug!(path = ?self.pid_file, "Removed PID file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to remove PID file"),
        }
    }

    /// PID of the running service, ignoring stale PID files
    pub fn running_pid(&self) -> Option<u32> {
        self.read_record().map(|r| r.pid).filter(|&pid| is_process_running(pid))
    }

    pub fn is_running(&self) -> bool {
        self.running_pid().is_some()
    }

    pub fn status(&self) -> DaemonStatus {
        let record = self.read_record().filter(|r| is_process_running(r.pid));
        DaemonStatus {
            running: record.is_some(),
            pid: record.as_ref().map(|r| r.pid),
            version: record.map(|r| r.version),
            pid_file: self.pid_file.clone(),
        }
    }

    /// Spawn `jd run-daemon` detached from the terminal
    ///
    /// Returns the child's PID. The child writes its own PID file once it is
    /// up; this writes a provisional one so a quick `status` sees it.
    pub fn start(&self, config_path: Option<&Path>) -> Result<u32> {
        debug!(?config_path, "DaemonManager::start: called");
        if let Some(pid) = self.running_pid() {
            return Err(eyre::eyre!("Daemon already running with PID {}", pid));
        }

        let exe = std::env::current_exe().context("Failed to get current executable")?;
        let mut command = Command::new(&exe);
        if let Some(path) = config_path {
            command.arg("--config").arg(path);
        }
        let child = command
            .arg("run-daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        let pid = child.id();
        self.write_record(&PidRecord {
            pid,
            version: VERSION.to_string(),
            started_at: Utc::now(),
        })?;
        info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Send SIGTERM and wait for the process to exit, escalating to SIGKILL
    pub fn stop(&self) -> Result<()> {
        debug!("DaemonManager::stop: called");
        let pid = self
            .running_pid()
            .ok_or_else(|| eyre::eyre!("Daemon is not running"))?;

        info!(pid, "Stopping daemon");
        signal(pid, nix::sys::signal::Signal::SIGTERM).context("Failed to send SIGTERM")?;

        if !self.wait_for_exit(pid, STOP_TIMEOUT) {
            warn!(pid, "Daemon did not stop gracefully, sending SIGKILL");
            let _ = signal(pid, nix::sys::signal::Signal::SIGKILL);
        }

        self.remove_pid_file()?;
        info!(pid, "Daemon stopped");
        Ok(())
    }

    /// Poll until `pid` exits or releases the PID file; false on timeout
    pub fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while is_process_running(pid) && self.read_record().is_some_and(|r| r.pid == pid) {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL);
        }
        true
    }

    /// Record the current process as the daemon
    ///
    /// The returned guard removes the PID file when dropped.
    pub fn register_self(&self) -> Result<PidFileGuard> {
        let record = PidRecord {
            pid: std::process::id(),
            version: VERSION.to_string(),
            started_at: Utc::now(),
        };
        self.write_record(&record)?;
        info!(pid = record.pid, version = VERSION, "Daemon registered");
        Ok(PidFileGuard { manager: self.clone() })
    }
}

/// Removes the PID file on drop
#[derive(Debug)]
pub struct PidFileGuard {
    manager: DaemonManager,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        // Only remove the file if it still names this process
        let ours = self
            .manager
            .read_record()
            .is_some_and(|r| r.pid == std::process::id());
        if ours {
            if let Err(e) = self.manager.remove_pid_file() {
                warn!(error = %e, "Failed to remove PID file");
            }
        }
    }
}

fn signal(pid: u32, sig: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), sig)
}

/// Check if a process with the given PID is running
fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 checks existence without affecting the process
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
