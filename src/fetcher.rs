//! Per-batch sender extraction
//!
//! The session pushes raw messages into a bounded channel while this
//! side resolves and deduplicates them. Both halves are polled together
//! on the caller's task; the call returns once the transport has
//! delivered the whole range or failed.

use crate::error::{Error, Result};
use crate::mailbox::{Batch, MailboxSession, RawMessage};
use crate::sender::{self, SenderIdentity};
use mailparse::MailHeaderMap;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages buffered between the transport and the resolver.
const FETCH_BUFFER: usize = 50;

/// Senders found in one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSenders {
    /// Messages delivered by the server for the range.
    pub messages: usize,
    /// One identity per distinct address, in no particular order.
    pub senders: Vec<SenderIdentity>,
}

/// Fetch the `From` headers of `batch` and return the distinct senders.
///
/// Messages without a usable `From` header are skipped.
///
/// # Errors
///
/// Returns [`Error::Fetch`] if the session could not retrieve the range
/// or delivered fewer messages than the batch covers.
pub async fn fetch_batch_senders<S: MailboxSession>(
    session: &mut S,
    batch: Batch,
) -> Result<BatchSenders> {
    debug!(%batch, "Processing batch");

    let (tx, mut rx) = mpsc::channel::<RawMessage>(FETCH_BUFFER);

    let producer = session.fetch_headers(batch, tx);
    let consumer = async move {
        let mut by_address: HashMap<String, SenderIdentity> = HashMap::new();
        let mut messages = 0;
        let mut in_range = 0;
        while let Some(message) = rx.recv().await {
            messages += 1;
            if batch.contains(message.seq) {
                in_range += 1;
            }
            if let Some(identity) = sender_of(&message) {
                by_address
                    .entry(identity.email_address.clone())
                    .or_insert(identity);
            }
        }
        (messages, in_range, by_address)
    };

    let (fetched, (messages, in_range, by_address)) = tokio::join!(producer, consumer);
    fetched?;

    if in_range != batch.len() {
        return Err(Error::Fetch(format!(
            "FETCH {batch} delivered {in_range} of {} messages",
            batch.len()
        )));
    }

    let senders: Vec<SenderIdentity> = by_address.into_values().collect();
    debug!(
        %batch,
        messages,
        unique_senders = senders.len(),
        "Batch completed"
    );
    Ok(BatchSenders { messages, senders })
}

/// Resolve the sender of one raw message, if it has a usable one.
fn sender_of(message: &RawMessage) -> Option<SenderIdentity> {
    let Some(header) = message.header.as_deref() else {
        debug!(seq = message.seq, "Header section not found");
        return None;
    };

    let from = match mailparse::parse_headers(header) {
        Ok((headers, _)) => headers.get_first_value("From"),
        Err(e) => {
            debug!(seq = message.seq, error = %e, "Header parse failed");
            return None;
        }
    };

    let Some(from) = from.filter(|v| !v.trim().is_empty()) else {
        debug!(seq = message.seq, "No From header");
        return None;
    };

    let identity = sender::resolve(&from);
    if identity.is_empty() {
        debug!(seq = message.seq, from = %from, "Sender address unusable");
        return None;
    }
    Some(identity)
}
