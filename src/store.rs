//! Durable scan state: the checkpoint and the sender set
//!
//! Both live in one SQLite database. The `scan_progress` table holds
//! exactly one row (`id = 1`), created when the database is opened for
//! the first time; the `senders` table is append-only and unique on
//! `email`.

use crate::error::{Error, Result};
use crate::sender::SenderIdentity;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Durable record of how far the scan got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScanCheckpoint {
    /// Highest message id below which everything has been processed.
    pub last_processed_id: u32,
    /// Mailbox size seen at the start of the latest run.
    pub total_message_count: u32,
    /// Reporting only, never used to decide where to resume.
    pub processed_count: u32,
}

impl ScanCheckpoint {
    /// First message id that still needs processing.
    #[must_use]
    pub const fn resume_id(&self) -> u32 {
        self.last_processed_id.saturating_add(1)
    }

    /// Share of the mailbox processed, in `0.0..=1.0`.
    #[must_use]
    pub fn completion_rate(&self) -> Option<f64> {
        (self.total_message_count > 0)
            .then(|| f64::from(self.processed_count) / f64::from(self.total_message_count))
    }
}

/// Load and persist the singleton checkpoint.
pub trait CheckpointStore {
    /// Read the current checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the checkpoint row is missing or
    /// the database cannot be read.
    fn load(&self) -> Result<ScanCheckpoint>;

    /// Overwrite the checkpoint in a single-row update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on I/O failure or if the row is
    /// missing.
    fn save(&self, checkpoint: &ScanCheckpoint) -> Result<()>;
}

/// The deduplicated set of discovered senders.
pub trait SenderRepository {
    /// Whether `email` is already stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the lookup fails. A failed lookup
    /// is never reported as `false`.
    fn exists(&self, email: &str) -> Result<bool>;

    /// Insert every sender whose address is not stored yet, all or
    /// nothing. Returns how many rows were added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the transaction fails; nothing is
    /// inserted in that case.
    fn insert_if_absent(&self, senders: &[SenderIdentity]) -> Result<usize>;

    /// Number of distinct senders stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the count query fails.
    fn count(&self) -> Result<usize>;
}

/// Summary of what the database holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub total_senders: usize,
    pub checkpoint: ScanCheckpoint,
    pub completion_rate: Option<f64>,
    /// Most recently added senders, newest first.
    pub recent_senders: Vec<SenderIdentity>,
}

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS senders (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        display_name TEXT,
        email        TEXT UNIQUE,
        created_at   DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS scan_progress (
        id                  INTEGER PRIMARY KEY CHECK (id = 1),
        last_processed_id   INTEGER DEFAULT 0,
        total_message_count INTEGER DEFAULT 0,
        processed_count     INTEGER DEFAULT 0,
        last_scan_timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_senders_email ON senders(email);
    CREATE INDEX IF NOT EXISTS idx_senders_created_at ON senders(created_at);

    INSERT OR IGNORE INTO scan_progress (id) VALUES (1);
";

/// SQLite-backed [`CheckpointStore`] and [`SenderRepository`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and make sure the schema
    /// and the checkpoint row exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the parent directory cannot be created
    /// and [`Error::Storage`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// A throwaway database, used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if SQLite cannot allocate it.
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// The `limit` most recently added senders, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the query fails.
    pub fn recent_senders(&self, limit: usize) -> Result<Vec<SenderIdentity>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT display_name, email
            FROM senders
            ORDER BY created_at DESC, id DESC
            LIMIT ?1
            ",
        )?;

        let rows = stmt.query_map(params![limit], |r| {
            Ok(SenderIdentity {
                display_name: r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                email_address: r.get(1)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Counts, checkpoint and the latest `recent_limit` senders.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if any of the queries fail.
    pub fn stats(&self, recent_limit: usize) -> Result<StoreStats> {
        let checkpoint = self.load()?;
        Ok(StoreStats {
            total_senders: self.count()?,
            checkpoint,
            completion_rate: checkpoint.completion_rate(),
            recent_senders: self.recent_senders(recent_limit)?,
        })
    }
}

impl CheckpointStore for SqliteStore {
    fn load(&self) -> Result<ScanCheckpoint> {
        let checkpoint = self
            .conn
            .query_row(
                r"
                SELECT last_processed_id, total_message_count, processed_count
                FROM scan_progress WHERE id = 1
                ",
                [],
                |r| {
                    Ok(ScanCheckpoint {
                        last_processed_id: r.get(0)?,
                        total_message_count: r.get(1)?,
                        processed_count: r.get(2)?,
                    })
                },
            )
            .optional()?;

        checkpoint.ok_or(Error::Storage(rusqlite::Error::QueryReturnedNoRows))
    }

    fn save(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        let updated = self.conn.execute(
            r"
            UPDATE scan_progress
            SET last_processed_id = ?1,
                total_message_count = ?2,
                processed_count = ?3,
                last_scan_timestamp = CURRENT_TIMESTAMP
            WHERE id = 1
            ",
            params![
                checkpoint.last_processed_id,
                checkpoint.total_message_count,
                checkpoint.processed_count
            ],
        )?;

        if updated == 0 {
            return Err(Error::Storage(rusqlite::Error::QueryReturnedNoRows));
        }
        debug!(?checkpoint, "Checkpoint saved");
        Ok(())
    }
}

impl SenderRepository for SqliteStore {
    fn exists(&self, email: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM senders WHERE email = ?1)",
            params![email],
            |r| r.get(0),
        )?)
    }

    fn insert_if_absent(&self, senders: &[SenderIdentity]) -> Result<usize> {
        if senders.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO senders (display_name, email) VALUES (?1, ?2)")?;
            for sender in senders {
                let added = stmt.execute(params![sender.display_name, sender.email_address])?;
                if added > 0 {
                    debug!(name = %sender.display_name, email = %sender.email_address, "New sender saved");
                }
                inserted += added;
            }
        }
        tx.commit()?;

        debug!(inserted, offered = senders.len(), "Sender batch saved");
        Ok(inserted)
    }

    fn count(&self) -> Result<usize> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM senders", [], |r| r.get(0))?)
    }
}
