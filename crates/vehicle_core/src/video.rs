use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("no streaming binary configured")]
    NotConfigured,
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to interrupt streaming process {pid}: {message}")]
    Signal { pid: u32, message: String },
}

/// Runs at most one external streaming process.
pub struct VideoSupervisor {
    binary: Option<PathBuf>,
    config: Option<PathBuf>,
    child: Option<Child>,
}

impl VideoSupervisor {
    pub fn new(binary: Option<PathBuf>, config: Option<PathBuf>) -> Self {
        Self {
            binary,
            config,
            child: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Spawns the streaming binary with inherited stdio. Does nothing while a process is held.
    pub fn run(&mut self) -> Result<(), VideoError> {
        if self.child.is_some() {
            debug!("streaming process already running");
            return Ok(());
        }

        let binary = self.binary.as_deref().ok_or(VideoError::NotConfigured)?;
        let mut command = Command::new(binary);
        if let Some(config) = &self.config {
            command.arg(config);
        }
        let child = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| VideoError::Spawn {
                binary: display(binary),
                source,
            })?;

        info!(pid = child.id(), binary = %binary.display(), "streaming process started");
        self.child = Some(child);
        Ok(())
    }

    /// Sends an interrupt and forgets the process without waiting for it to exit.
    pub fn stop(&mut self) -> Result<(), VideoError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let Some(pid) = child.id() else {
            debug!("streaming process already exited");
            return Ok(());
        };

        interrupt(pid)?;
        info!(pid, "streaming process interrupted");
        Ok(())
    }
}

impl Drop for VideoSupervisor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "failed to stop streaming process on drop");
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(unix)]
fn interrupt(pid: u32) -> Result<(), VideoError> {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let raw = i32::try_from(pid).map_err(|_| VideoError::Signal {
        pid,
        message: "pid out of range".into(),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGINT).map_err(|errno| VideoError::Signal {
        pid,
        message: errno.to_string(),
    })
}

#[cfg(not(unix))]
fn interrupt(pid: u32) -> Result<(), VideoError> {
    Err(VideoError::Signal {
        pid,
        message: "interrupt signals are only supported on unix".into(),
    })
}

#[cfg(test)]
#[path = "tests/video_tests.rs"]
mod tests;
