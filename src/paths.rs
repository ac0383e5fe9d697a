//! Per-user file layout
//!
//! Every account gets its own directory under a common root:
//!
//! ```text
//! users/
//! └── john_at_gmail_com/
//!     ├── database.db
//!     ├── log_2025-01-07.txt
//!     └── status.txt
//! ```

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Default root for per-user directories.
pub const DEFAULT_USERS_DIR: &str = "./users";

/// Files belonging to one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPaths {
    pub dir: PathBuf,
    pub database: PathBuf,
    pub log: PathBuf,
    pub status: PathBuf,
}

impl UserPaths {
    /// Layout for `username` under `root`, with the log file named after
    /// `date`.
    #[must_use]
    pub fn new(root: &Path, username: &str, date: NaiveDate) -> Self {
        let dir = root.join(safe_dir_name(username));
        Self {
            database: dir.join("database.db"),
            log: dir.join(format!("log_{}.txt", date.format("%Y-%m-%d"))),
            status: dir.join("status.txt"),
            dir,
        }
    }
}

/// Turn a login name into a directory name without `@`, `.` or `+`.
#[must_use]
pub fn safe_dir_name(username: &str) -> String {
    username
        .replace('@', "_at_")
        .replace('.', "_")
        .replace('+', "_plus_")
}
