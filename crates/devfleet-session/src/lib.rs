use std::collections::BTreeSet;
use std::io;
use std::process::{Command, Stdio};

use devfleet_core::is_valid_device_id;
use thiserror::Error;
use tracing::{debug, info};

pub mod reconcile;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session named '{0}'")]
    NotFound(String),
    #[error("invalid session name '{0}'")]
    InvalidName(String),
    #[error("tmux failed: {0}")]
    Backend(String),
    #[error("failed to run tmux: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensure {
    Created,
    AlreadyRunning,
}

/// Named, detachable execution contexts hosting one device each.
///
/// `ensure_running` must be atomic as observed by concurrent callers: a
/// single create attempt whose duplicate-name failure is the no-op path,
/// never a separate exists check followed by a create.
pub trait SessionBackend {
    fn list_sessions(&self) -> Result<BTreeSet<String>, SessionError>;
    fn ensure_running(&self, id: &str, launch_command: &str) -> Result<Ensure, SessionError>;
    fn attach(&self, id: &str) -> Result<(), SessionError>;
    fn kill(&self, id: &str) -> Result<(), SessionError>;
}

const TMUX: &str = "tmux";

pub struct TmuxBackend;

impl SessionBackend for TmuxBackend {
    fn list_sessions(&self) -> Result<BTreeSet<String>, SessionError> {
        let output = Command::new(TMUX)
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()?;
        if !output.status.success() {
            // tmux exits non-zero when no server is running: no sessions.
            return Ok(BTreeSet::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn ensure_running(&self, id: &str, launch_command: &str) -> Result<Ensure, SessionError> {
        validate_name(id)?;
        let output = Command::new(TMUX)
            .args(["new-session", "-d", "-s", id, launch_command])
            .output()?;
        if output.status.success() {
            info!(id, "created detached session");
            return Ok(Ensure::Created);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_duplicate_session(&stderr) {
            debug!(id, "session already running");
            return Ok(Ensure::AlreadyRunning);
        }
        Err(SessionError::Backend(stderr.trim().to_string()))
    }

    fn attach(&self, id: &str) -> Result<(), SessionError> {
        validate_name(id)?;
        let status = Command::new(TMUX)
            .args(["attach-session", "-t", &exact_target(id)])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(SessionError::NotFound(id.to_string()))
        }
    }

    fn kill(&self, id: &str) -> Result<(), SessionError> {
        validate_name(id)?;
        let output = Command::new(TMUX)
            .args(["kill-session", "-t", &exact_target(id)])
            .output()?;
        if output.status.success() {
            info!(id, "killed session");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_session(&stderr) {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Err(SessionError::Backend(stderr.trim().to_string()))
    }
}

// `=` forces exact-name matching; bare targets prefix-match.
fn exact_target(id: &str) -> String {
    format!("={id}")
}

fn validate_name(id: &str) -> Result<(), SessionError> {
    if is_valid_device_id(id) {
        Ok(())
    } else {
        Err(SessionError::InvalidName(id.to_string()))
    }
}

fn is_duplicate_session(stderr: &str) -> bool {
    stderr.contains("duplicate session")
}

fn is_missing_session(stderr: &str) -> bool {
    stderr.contains("can't find session") || stderr.contains("no such session")
}
