//! Sender identities extracted from `From` headers
//!
//! A raw header value is resolved into a normalized
//! [`SenderIdentity`]: the address is lowercased and, when the header
//! carries no display name, one is derived from the address's local
//! part (`john.doe@x.com` becomes `John Doe`).
//!
//! Resolution never fails. Anything that does not parse as exactly one
//! mailbox yields the empty identity, which callers skip.

use mailparse::MailAddr;
use serde::Serialize;

/// A distinct message sender.
///
/// `email_address` is the identity key and is always lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SenderIdentity {
    pub display_name: String,
    pub email_address: String,
}

impl SenderIdentity {
    #[must_use]
    pub fn new(display_name: impl Into<String>, email_address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            email_address: email_address.into(),
        }
    }

    /// `true` for the "no usable sender" sentinel.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.email_address.is_empty()
    }
}

/// Resolve one raw `From` header value.
///
/// Returns the empty identity when the value is not a single valid
/// mailbox.
#[must_use]
pub fn resolve(from_header: &str) -> SenderIdentity {
    let Some((name, address)) = parse_single_mailbox(from_header) else {
        return SenderIdentity::default();
    };

    let email_address = address.to_lowercase();
    let display_name = match name {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => derive_display_name(&email_address),
    };

    SenderIdentity {
        display_name,
        email_address,
    }
}

/// Derive a human name from the local part of an address.
///
/// The local part is split on runs of `.`, `_` and `-`, each fragment
/// is title-cased and the fragments are joined with single spaces.
#[must_use]
pub fn derive_display_name(address: &str) -> String {
    let local = address.split('@').next().unwrap_or_default();

    local
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Parse `value` as exactly one mailbox with an optional display name.
fn parse_single_mailbox(value: &str) -> Option<(Option<String>, String)> {
    let addrs = mailparse::addrparse(value).ok()?;
    let [MailAddr::Single(info)] = addrs.as_slice() else {
        return None;
    };

    let address = info.addr.trim();
    if !address.contains('@') || address.chars().any(char::is_whitespace) {
        return None;
    }

    Some((info.display_name.clone(), address.to_string()))
}
