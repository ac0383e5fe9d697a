//! Mailbox session abstraction and batch ranges
//!
//! The scan engine only needs two things from an open mailbox: its
//! current size and a way to stream the raw `From` headers of a range
//! of messages. [`MailboxSession`] captures exactly that, so the engine
//! runs the same against a live IMAP session and an in-memory script.

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

/// An inclusive range of message sequence numbers processed as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Batch {
    pub start: u32,
    pub end: u32,
}

impl Batch {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Number of message ids covered by the batch, 0 when empty.
    #[must_use]
    pub const fn len(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).saturating_add(1)
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end < self.start
    }

    #[must_use]
    pub const fn contains(&self, id: u32) -> bool {
        self.start <= id && id <= self.end
    }

    /// IMAP sequence-set form, e.g. `1:500`.
    #[must_use]
    pub fn sequence_set(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Consecutive batches of `width` ids from `start` up to `total`.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    next: Option<u32>,
    total: u32,
    width: u32,
}

impl BatchPlan {
    /// Plan batches covering `start..=total`. Empty when
    /// `start > total`.
    #[must_use]
    pub fn new(start: u32, total: u32, width: u32) -> Self {
        let start = start.max(1);
        Self {
            next: (start <= total).then_some(start),
            total,
            width: width.max(1),
        }
    }
}

impl Iterator for BatchPlan {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let start = self.next?;
        let end = start.saturating_add(self.width - 1).min(self.total);
        self.next = end.checked_add(1).filter(|n| *n <= self.total);
        Some(Batch::new(start, end))
    }
}

/// One message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Sequence number of the message in the mailbox.
    pub seq: u32,
    /// The requested header section, if the server returned one.
    pub header: Option<Vec<u8>>,
}

/// An open, authenticated, read-only mailbox.
pub trait MailboxSession: Send {
    /// Number of messages in the mailbox when it was opened.
    fn message_count(&self) -> u32;

    /// Stream the `From` header section of every message in `batch`
    /// into `sink`, returning once the range is fully delivered.
    ///
    /// Must not alter message flags. Returns
    /// [`Error::Fetch`](crate::Error::Fetch) if the range cannot be
    /// retrieved.
    fn fetch_headers(
        &mut self,
        batch: Batch,
        sink: mpsc::Sender<RawMessage>,
    ) -> impl Future<Output = Result<()>> + Send;
}
