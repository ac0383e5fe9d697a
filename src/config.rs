//! IMAP connection and scan configuration

use crate::error::{Error, Result};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Smallest accepted batch width.
pub const MIN_BATCH_SIZE: u32 = 100;
/// Largest accepted batch width.
pub const MAX_BATCH_SIZE: u32 = 2000;
/// Batch width used when none is given.
pub const DEFAULT_BATCH_SIZE: u32 = 500;
/// Pause between two batches, a courtesy to the remote server.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// How the TLS layer is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// TLS from the first byte (IMAPS, usually port 993).
    #[default]
    Implicit,
    /// Plain TCP upgraded with the STARTTLS command (usually port 143).
    StartTls,
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "imaps" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Config(format!("Unknown TLS mode: {other}"))),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implicit => f.write_str("implicit"),
            Self::StartTls => f.write_str("starttls"),
        }
    }
}

/// IMAP connection configuration
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Mailbox to scan, opened read-only.
    pub mailbox: String,
    pub tls: TlsMode,
    /// Skip certificate verification (self-signed local bridges).
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `imap.gmail.com`)
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_MAILBOX` (default: `INBOX`)
    /// - `IMAP_TLS` (`implicit` or `starttls`, default: `implicit`)
    /// - `IMAP_ACCEPT_INVALID_CERTS` (default: `false`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            host: env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string()),
            port: env::var("IMAP_PORT")
                .unwrap_or_else(|_| "993".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?,
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
            mailbox: env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string()),
            tls: env::var("IMAP_TLS").map_or(Ok(TlsMode::default()), |v| v.parse())?,
            accept_invalid_certs: env::var("IMAP_ACCEPT_INVALID_CERTS")
                .is_ok_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        })
    }

    /// `host:port` as handed to the TCP connector.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split a `host:port` server string. The port defaults to 993.
///
/// # Errors
///
/// Returns [`Error::Config`] if the port is not a number.
pub fn parse_server(server: &str) -> Result<(String, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid port in '{server}': {e}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((server.to_string(), 993)),
    }
}

/// Tunables of the batch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    batch_size: u32,
    pub pause: Duration,
}

impl ScanOptions {
    /// Options with the given batch width, clamped to
    /// [`MIN_BATCH_SIZE`]..=[`MAX_BATCH_SIZE`].
    #[must_use]
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size: batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
            pause: DEFAULT_BATCH_PAUSE,
        }
    }

    #[must_use]
    pub const fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    #[must_use]
    pub const fn batch_size(&self) -> u32 {
        self.batch_size
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}
