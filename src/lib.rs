//! Resumable IMAP sender scanner
//!
//! Walks one mailbox in sequential batches over a read-only IMAP
//! session, extracts the distinct senders from the `From` headers and
//! stores them in SQLite. A checkpoint persisted after every batch lets
//! an interrupted run continue where it stopped without losing messages
//! or storing a sender twice.
//!
//! The entry points are [`scan`], which connects using an
//! [`ImapConfig`], and [`run_scan`], which works on any
//! [`MailboxSession`].

mod config;
mod connection;
mod error;
mod fetcher;
mod mailbox;
pub mod paths;
mod progress;
mod scanner;
mod sender;
pub mod status;
mod store;

pub use config::{
    DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE, ImapConfig, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
    ScanOptions, TlsMode, parse_server,
};
pub use connection::{ImapClient, ImapMailbox, ImapSession, authenticate, examine, open_transport};
pub use error::{Error, Result};
pub use fetcher::{BatchSenders, fetch_batch_senders};
pub use mailbox::{Batch, BatchPlan, MailboxSession, RawMessage};
pub use progress::{BatchProgress, ScanEvent, ScanReporter, ScanState, TracingReporter};
pub use scanner::{ScanReport, run_scan, scan};
pub use sender::{SenderIdentity, derive_display_name, resolve};
pub use store::{CheckpointStore, ScanCheckpoint, SenderRepository, SqliteStore, StoreStats};
