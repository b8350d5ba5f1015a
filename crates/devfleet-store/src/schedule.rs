use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::info;

pub const REFRESH_INTERVAL_MINUTES: u32 = 5;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("failed to run crontab: {0}")]
    Io(#[from] std::io::Error),
    #[error("crontab exited with {0}")]
    Crontab(std::process::ExitStatus),
}

/// Host-level periodic task table keyed by the launcher artifact path.
/// `arm` is add-or-replace; both entries always travel together.
pub trait Scheduler {
    fn arm(&self, artifact: &Path) -> Result<(), ScheduleError>;
    fn disarm(&self, artifact: &Path) -> Result<(), ScheduleError>;
}

fn entries_for(artifact: &Path) -> [String; 2] {
    [
        format!("@reboot {}", artifact.display()),
        format!(
            "*/{} * * * * {}",
            REFRESH_INTERVAL_MINUTES,
            artifact.display()
        ),
    ]
}

/// Drop every line mentioning the artifact path, preserving the rest.
fn without_entries(table: &str, artifact: &Path) -> String {
    let needle = artifact.display().to_string();
    let kept: Vec<&str> = table
        .lines()
        .filter(|line| !line.contains(needle.as_str()))
        .collect();
    let mut rebuilt = kept.join("\n");
    if !rebuilt.is_empty() {
        rebuilt.push('\n');
    }
    rebuilt
}

fn with_entries(table: &str, artifact: &Path) -> String {
    let mut rebuilt = without_entries(table, artifact);
    for entry in entries_for(artifact) {
        rebuilt.push_str(&entry);
        rebuilt.push('\n');
    }
    rebuilt
}

/// Scheduler over the invoking user's crontab.
pub struct CrontabScheduler;

impl CrontabScheduler {
    fn read_table(&self) -> Result<String, ScheduleError> {
        let output = Command::new("crontab").arg("-l").output()?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            // crontab -l fails when no table is installed yet.
            Ok(String::new())
        }
    }

    fn write_table(&self, table: &str) -> Result<(), ScheduleError> {
        let mut child = Command::new("crontab")
            .arg("-")
            .stdin(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(table.as_bytes())?;
        }
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(ScheduleError::Crontab(status))
        }
    }
}

impl Scheduler for CrontabScheduler {
    fn arm(&self, artifact: &Path) -> Result<(), ScheduleError> {
        let table = self.read_table()?;
        self.write_table(&with_entries(&table, artifact))?;
        info!(artifact = %artifact.display(), "armed boot and interval triggers");
        Ok(())
    }

    fn disarm(&self, artifact: &Path) -> Result<(), ScheduleError> {
        let table = self.read_table()?;
        self.write_table(&without_entries(&table, artifact))?;
        info!(artifact = %artifact.display(), "disarmed boot and interval triggers");
        Ok(())
    }
}
