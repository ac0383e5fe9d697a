//! Status file for external monitoring
//!
//! A small text file overwritten at the start and end of each run so
//! that other tools can tell whether a scan is running, failed or
//! finished.

use chrono::Local;
use std::fmt;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Running,
    Error,
    Success,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
        })
    }
}

/// Render the status file body.
#[must_use]
pub fn render(kind: StatusKind, time: &str, message: &str) -> String {
    format!("STATUS: {kind}\nTIME: {time}\nMESSAGE: {message}\n")
}

/// Overwrite the status file. Failures are logged and otherwise
/// ignored.
pub fn write_status(path: &Path, kind: StatusKind, message: &str) {
    let time = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    if let Err(e) = std::fs::write(path, render(kind, &time, message)) {
        warn!(path = %path.display(), error = %e, "Failed to write status file");
    }
}
