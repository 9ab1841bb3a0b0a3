//! Daemon Infrastructure - Background service hosting the sync scheduler
//!
//! This module provides PID file management, Unix daemonisation and graceful
//! shutdown on SIGINT/SIGTERM around a [`Scheduler`].

use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::sync::SyncEngine;
use anyhow::{Context, Result};
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Daemon state and control
pub struct Daemon {
    scheduler: Scheduler,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    pub fn new(engine: SyncEngine, config: &Config) -> Self {
        let scheduler = Scheduler::new(engine, config.sync.interval(), config.sync.sync_on_start);

        let pid_file_path = if config.daemon.pid_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.daemon.pid_file))
        };

        Self {
            scheduler,
            pid_file_path,
        }
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(&self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        info!("Starting RepoScout daemon");
        self.write_pid_file().context("Failed to write PID file")?;

        self.scheduler.start();
        let result = shutdown.await;
        if result.is_ok() {
            info!("Shutdown signal received, stopping daemon...");
        }

        self.scheduler.stop().await;
        self.cleanup().context("Failed to cleanup daemon")?;

        result
    }

    /// Write PID file for daemon process management
    fn write_pid_file(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            let pid = std::process::id();

            if let Some(parent) = pid_file.parent() {
                fs::create_dir_all(parent).context("Failed to create PID file directory")?;
            }

            fs::write(pid_file, pid.to_string()).context("Failed to write PID file")?;

            info!("PID file written: {} (PID: {})", pid_file.display(), pid);
        }

        Ok(())
    }

    /// Remove PID file
    fn cleanup(&self) -> Result<()> {
        if let Some(pid_file) = &self.pid_file_path {
            if pid_file.exists() {
                fs::remove_file(pid_file).context("Failed to remove PID file")?;
                info!("PID file removed: {}", pid_file.display());
            }
        }

        info!("Daemon cleanup completed");
        Ok(())
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT, Ctrl+C)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                debug!("SIGINT received");
            }
            _ = terminate.recv() => {
                debug!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        debug!("Ctrl+C received");
    }

    Ok(())
}

/// Detach from the terminal. Must run before the tokio runtime is built.
#[cfg(unix)]
pub fn daemonize(config: &Config) -> Result<()> {
    use daemonize::Daemonize;

    let mut daemonize = Daemonize::new().working_directory(".");

    if !config.daemon.log_file.is_empty() {
        let log_path = Path::new(&config.daemon.log_file);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let log_file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .context("Failed to open log file")?;

        daemonize = daemonize
            .stdout(log_file.try_clone().context("Failed to clone log file handle")?)
            .stderr(log_file);
    }

    daemonize.start().context("Failed to daemonize process")?;
    Ok(())
}

fn read_pid(pid_file: &Path) -> Result<Option<i32>> {
    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(pid_file).context("Failed to read PID file")?;
    let pid = pid_str.trim().parse::<i32>().context("Invalid PID in PID file")?;
    Ok(Some(pid))
}

/// Send SIGTERM to a running daemon. Returns false if none was found.
pub fn stop_daemon(config: &Config) -> Result<bool> {
    if !is_daemon_running(config)? {
        warn!("PID file not found, daemon may not be running");
        return Ok(false);
    }

    let Some(pid) = read_pid(Path::new(&config.daemon.pid_file))? else {
        return Ok(false);
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
            .context("Failed to send SIGTERM to daemon process")?;
    }

    #[cfg(not(unix))]
    {
        warn!("Daemon stop not implemented for this platform");
        return Ok(false);
    }

    info!("Shutdown signal sent to daemon process {}", pid);
    Ok(true)
}

/// Check if daemon is currently running by checking PID file.
/// A PID file left by a dead process is removed.
pub fn is_daemon_running(config: &Config) -> Result<bool> {
    if config.daemon.pid_file.is_empty() {
        return Ok(false);
    }

    let pid_file = Path::new(&config.daemon.pid_file);
    let Some(pid) = read_pid(pid_file)? else {
        return Ok(false);
    };

    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal;
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid), None) {
            Ok(_) => Ok(true),
            Err(Errno::ESRCH) => {
                let _ = fs::remove_file(pid_file);
                Ok(false)
            }
            // Exists but owned by someone else
            Err(_) => Ok(true),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(true)
    }
}
