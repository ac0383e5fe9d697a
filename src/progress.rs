//! Structured scan events
//!
//! The engine never prints. It describes what happens as
//! [`ScanEvent`]s handed to a [`ScanReporter`]; the library ships a
//! [`TracingReporter`] and the CLI adds a console one.

use crate::mailbox::Batch;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Init,
    Connecting,
    Authenticating,
    SelectingMailbox,
    Scanning,
    Complete,
    Failed,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::SelectingMailbox => "selecting mailbox",
            Self::Scanning => "scanning",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress after one successful batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub batch: Batch,
    pub total_messages: u32,
    /// Distinct senders seen in the batch.
    pub senders_found: usize,
    /// Senders that were not stored before this batch.
    pub new_senders: usize,
    pub elapsed: Duration,
    pub remaining: Duration,
}

impl BatchProgress {
    /// Build the progress record for a batch ending at `batch.end`, with
    /// a linear estimate of the time left.
    ///
    /// `run_start` is the first id processed in this run.
    #[must_use]
    pub fn estimate(
        batch: Batch,
        run_start: u32,
        total_messages: u32,
        elapsed: Duration,
        senders_found: usize,
        new_senders: usize,
    ) -> Self {
        let done = f64::from(batch.end.saturating_sub(run_start) + 1);
        let left = f64::from(total_messages.saturating_sub(batch.end));
        let remaining = elapsed.mul_f64(left / done);

        Self {
            batch,
            total_messages,
            senders_found,
            new_senders,
            elapsed,
            remaining,
        }
    }

    /// Share of the mailbox covered once this batch is done, in percent.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total_messages == 0 {
            return 100.0;
        }
        f64::from(self.batch.end) / f64::from(self.total_messages) * 100.0
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    StateChanged(ScanState),
    /// The mailbox was opened and the checkpoint read.
    Resuming {
        start_id: u32,
        total_messages: u32,
        previously_processed: u32,
    },
    /// Nothing to do: the mailbox is empty or fully processed.
    UpToDate { total_messages: u32 },
    BatchStarted(Batch),
    BatchCompleted(BatchProgress),
    /// The batch could not be fetched; the checkpoint stays put.
    BatchFailed { batch: Batch, error: String },
}

/// Receives scan events.
pub trait ScanReporter {
    fn report(&mut self, event: &ScanEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ScanReporter for TracingReporter {
    fn report(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::StateChanged(state) => info!(%state, "Scan state changed"),
            ScanEvent::Resuming {
                start_id,
                total_messages,
                previously_processed,
            } => info!(
                start_id,
                total_messages, previously_processed, "Starting processing"
            ),
            ScanEvent::UpToDate { total_messages } => {
                info!(total_messages, "All messages already processed");
            }
            ScanEvent::BatchStarted(batch) => info!(%batch, "Processing batch"),
            ScanEvent::BatchCompleted(p) => info!(
                batch = %p.batch,
                senders = p.senders_found,
                new_senders = p.new_senders,
                percent = format_args!("{:.2}", p.percent()),
                elapsed_secs = p.elapsed.as_secs(),
                remaining_secs = p.remaining.as_secs(),
                "Batch saved"
            ),
            ScanEvent::BatchFailed { batch, error } => {
                warn!(%batch, %error, "Batch failed, checkpoint held");
            }
        }
    }
}

impl<R: ScanReporter + ?Sized> ScanReporter for &mut R {
    fn report(&mut self, event: &ScanEvent) {
        (**self).report(event);
    }
}
