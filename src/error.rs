//! Error types for the sender scanner

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Mailbox selection error: {0}")]
    Select(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// Whether the error aborts a whole run rather than a single batch.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Fetch(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
