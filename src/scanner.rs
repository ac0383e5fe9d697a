//! Resumable scan orchestration
//!
//! A run walks `Init → Connecting → Authenticating → SelectingMailbox →
//! Scanning → Complete`, dropping to `Failed` on any fatal error. The
//! scanning phase processes the mailbox in sequential batches and
//! persists the checkpoint after every batch, so an interrupted run
//! resumes at the first id that was not fully processed.
//!
//! A batch that cannot be fetched does not stop the run, but it pins
//! `last_processed_id` at the position before it for the rest of the
//! run. Later batches still store their senders; the next run starts
//! again at the failed batch. The checkpoint therefore always marks a
//! contiguous prefix of processed ids.

use crate::config::{ImapConfig, ScanOptions};
use crate::connection::{authenticate, examine, open_transport};
use crate::error::Result;
use crate::fetcher::fetch_batch_senders;
use crate::mailbox::{Batch, BatchPlan, MailboxSession};
use crate::progress::{BatchProgress, ScanEvent, ScanReporter, ScanState};
use crate::sender::SenderIdentity;
use crate::store::{CheckpointStore, ScanCheckpoint, SenderRepository};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of a run that did not fail fatally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Senders stored for the first time during this run.
    pub new_senders: usize,
    /// Distinct senders in storage after the run.
    pub total_senders: usize,
    /// Batches fetched and persisted.
    pub completed_batches: usize,
    /// Batches whose fetch failed; a later run retries them.
    pub failed_batches: Vec<Batch>,
    /// Checkpoint as persisted at the end of the run.
    pub checkpoint: ScanCheckpoint,
}

/// Connect, log in, open the configured mailbox read-only and scan it.
///
/// # Errors
///
/// Returns [`Error::Connection`](crate::Error::Connection),
/// [`Error::Tls`](crate::Error::Tls), [`Error::Auth`](crate::Error::Auth)
/// or [`Error::Select`](crate::Error::Select) if the mailbox cannot be
/// opened, and [`Error::Storage`](crate::Error::Storage) if progress
/// cannot be persisted.
pub async fn scan<C, R, P>(
    config: &ImapConfig,
    checkpoints: &C,
    senders: &R,
    reporter: &mut P,
    options: &ScanOptions,
) -> Result<ScanReport>
where
    C: CheckpointStore + ?Sized,
    R: SenderRepository + ?Sized,
    P: ScanReporter + ?Sized,
{
    reporter.report(&ScanEvent::StateChanged(ScanState::Init));
    let result = open_and_scan(config, checkpoints, senders, reporter, options).await;
    finish(result, reporter)
}

async fn open_and_scan<C, R, P>(
    config: &ImapConfig,
    checkpoints: &C,
    senders: &R,
    reporter: &mut P,
    options: &ScanOptions,
) -> Result<ScanReport>
where
    C: CheckpointStore + ?Sized,
    R: SenderRepository + ?Sized,
    P: ScanReporter + ?Sized,
{
    reporter.report(&ScanEvent::StateChanged(ScanState::Connecting));
    let client = open_transport(config).await?;

    reporter.report(&ScanEvent::StateChanged(ScanState::Authenticating));
    let session = authenticate(client, config).await?;

    reporter.report(&ScanEvent::StateChanged(ScanState::SelectingMailbox));
    let mut mailbox = examine(session, &config.mailbox).await?;

    let result = scan_batches(&mut mailbox, checkpoints, senders, reporter, options).await;
    mailbox.logout().await;
    result
}

/// Scan an already opened mailbox from the stored checkpoint onwards.
///
/// # Errors
///
/// Returns [`Error::Storage`](crate::Error::Storage) if the checkpoint
/// or the sender set cannot be read or written. Batch fetch failures
/// are not errors; they are listed in [`ScanReport::failed_batches`].
pub async fn run_scan<S, C, R, P>(
    session: &mut S,
    checkpoints: &C,
    senders: &R,
    reporter: &mut P,
    options: &ScanOptions,
) -> Result<ScanReport>
where
    S: MailboxSession,
    C: CheckpointStore + ?Sized,
    R: SenderRepository + ?Sized,
    P: ScanReporter + ?Sized,
{
    let result = scan_batches(session, checkpoints, senders, reporter, options).await;
    finish(result, reporter)
}

fn finish<P: ScanReporter + ?Sized>(
    result: Result<ScanReport>,
    reporter: &mut P,
) -> Result<ScanReport> {
    match &result {
        Ok(report) => {
            info!(
                new_senders = report.new_senders,
                total_senders = report.total_senders,
                failed_batches = report.failed_batches.len(),
                "Scanning completed"
            );
            reporter.report(&ScanEvent::StateChanged(ScanState::Complete));
        }
        Err(e) => {
            warn!(error = %e, "Scan failed");
            reporter.report(&ScanEvent::StateChanged(ScanState::Failed));
        }
    }
    result
}

async fn scan_batches<S, C, R, P>(
    session: &mut S,
    checkpoints: &C,
    senders: &R,
    reporter: &mut P,
    options: &ScanOptions,
) -> Result<ScanReport>
where
    S: MailboxSession,
    C: CheckpointStore + ?Sized,
    R: SenderRepository + ?Sized,
    P: ScanReporter + ?Sized,
{
    reporter.report(&ScanEvent::StateChanged(ScanState::Scanning));

    let mut checkpoint = checkpoints.load()?;
    let total = session.message_count();
    checkpoint.total_message_count = total;
    checkpoints.save(&checkpoint)?;

    let mut report = ScanReport {
        new_senders: 0,
        total_senders: 0,
        completed_batches: 0,
        failed_batches: Vec::new(),
        checkpoint,
    };

    let start_id = checkpoint.resume_id();
    if total == 0 || start_id > total {
        reporter.report(&ScanEvent::UpToDate {
            total_messages: total,
        });
        report.total_senders = senders.count()?;
        return Ok(report);
    }

    reporter.report(&ScanEvent::Resuming {
        start_id,
        total_messages: total,
        previously_processed: checkpoint.processed_count,
    });

    let started = Instant::now();
    let mut pinned = false;

    for batch in BatchPlan::new(start_id, total, options.batch_size()) {
        reporter.report(&ScanEvent::BatchStarted(batch));

        let found = match fetch_batch_senders(session, batch).await {
            Ok(found) => found,
            Err(e) if !e.is_fatal() => {
                warn!(%batch, error = %e, "Batch processing error");
                if !pinned {
                    checkpoint.last_processed_id = batch.start - 1;
                    pinned = true;
                }
                checkpoints.save(&checkpoint)?;
                report.failed_batches.push(batch);
                reporter.report(&ScanEvent::BatchFailed {
                    batch,
                    error: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        let senders_found = found.senders.len();
        let fresh = unseen_senders(senders, found.senders)?;
        let inserted = senders.insert_if_absent(&fresh)?;

        if !pinned {
            checkpoint.last_processed_id = batch.end;
            checkpoint.processed_count = batch.end;
        }
        checkpoints.save(&checkpoint)?;

        report.new_senders += inserted;
        report.completed_batches += 1;
        reporter.report(&ScanEvent::BatchCompleted(BatchProgress::estimate(
            batch,
            start_id,
            total,
            started.elapsed(),
            senders_found,
            inserted,
        )));

        if !options.pause.is_zero() {
            tokio::time::sleep(options.pause).await;
        }
    }

    report.checkpoint = checkpoint;
    report.total_senders = senders.count()?;
    Ok(report)
}

/// Drop the senders that are already stored.
fn unseen_senders<R: SenderRepository + ?Sized>(
    repository: &R,
    found: Vec<SenderIdentity>,
) -> Result<Vec<SenderIdentity>> {
    let mut fresh = Vec::with_capacity(found.len());
    for sender in found {
        if !repository.exists(&sender.email_address)? {
            fresh.push(sender);
        }
    }
    Ok(fresh)
}
