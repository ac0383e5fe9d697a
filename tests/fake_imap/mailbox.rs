//! Test data model for the fake IMAP server
//!
//! Provides a builder-style API for constructing mailbox state:
//!
//! ```ignore
//! let mailbox = MailboxBuilder::new()
//!     .folder("INBOX")
//!         .sender("Alice <alice@example.com>")
//!         .email(true, raw_rfc2822_bytes)
//!     .folder("Sent")
//!     .fail_fetch(101, 200)
//!     .build();
//! ```
//!
//! Messages have no UIDs here: the scanner addresses them by sequence
//! number, which is simply their 1-based position in the folder.

/// A complete mailbox: named folders plus the failures the server
/// should simulate.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    pub folders: Vec<Folder>,
    /// FETCH requests overlapping one of these inclusive ranges are
    /// answered with `NO`.
    pub failing_ranges: Vec<(u32, u32)>,
    /// Messages in these inclusive ranges are left out of FETCH
    /// responses that still complete with `OK`.
    pub omitted_ranges: Vec<(u32, u32)>,
    /// Answer every LOGIN with `NO`.
    pub reject_logins: bool,
}

impl Mailbox {
    /// Look up a folder by name (case-sensitive, matching real IMAP).
    pub fn get_folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn get_folder_mut(&mut self, name: &str) -> Option<&mut Folder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    /// Whether a FETCH of `start..=end` should fail.
    pub fn fetch_fails(&self, start: u32, end: u32) -> bool {
        self.failing_ranges
            .iter()
            .any(|&(from, to)| start <= to && from <= end)
    }

    /// Whether message `seq` is silently left out of FETCH responses.
    pub fn omits(&self, seq: u32) -> bool {
        self.omitted_ranges
            .iter()
            .any(|&(from, to)| (from..=to).contains(&seq))
    }
}

/// A single IMAP folder (e.g. "INBOX", "Sent", "Trash").
#[derive(Debug, Clone)]
pub struct Folder {
    pub name: String,
    pub emails: Vec<TestEmail>,
}

/// A test email stored in a folder.
///
/// - `seen`: whether the `\Seen` flag is set. A read-only scan must
///   never change it.
/// - `raw`: the complete RFC 2822 message (headers + body) as bytes.
#[derive(Debug, Clone)]
pub struct TestEmail {
    pub seen: bool,
    pub raw: Vec<u8>,
}

impl TestEmail {
    /// The `From` header lines of the message followed by the blank
    /// line that ends a header section, as returned for
    /// `BODY[HEADER.FIELDS (FROM)]`.
    pub fn from_header_section(&self) -> Vec<u8> {
        let text = String::from_utf8_lossy(&self.raw);
        let headers = text.split("\r\n\r\n").next().unwrap_or_default();

        let mut section = String::new();
        for line in headers.split("\r\n") {
            if line.to_ascii_lowercase().starts_with("from:") {
                section.push_str(line);
                section.push_str("\r\n");
            }
        }
        section.push_str("\r\n");
        section.into_bytes()
    }
}

/// Build a minimal RFC 2822 email from `from`.
pub fn raw_email(from: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: scanner@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Mon, 01 Jan 2024 12:00:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Hello."
    )
    .into_bytes()
}

/// Builder for constructing a `Mailbox` step by step.
///
/// Call `.folder(name)` to start a new folder, then chain `.email()` or
/// `.sender()` calls to add messages to it. Finish with `.build()`.
#[derive(Default)]
pub struct MailboxBuilder {
    mailbox: Mailbox,
}

impl MailboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new folder. Subsequent `.email()` calls add to this folder.
    pub fn folder(mut self, name: &str) -> Self {
        self.mailbox.folders.push(Folder {
            name: name.to_string(),
            emails: Vec::new(),
        });
        self
    }

    /// Add an email to the most recently added folder.
    ///
    /// # Panics
    ///
    /// Panics if called before any `.folder()` call.
    pub fn email(mut self, seen: bool, raw: &[u8]) -> Self {
        self.mailbox
            .folders
            .last_mut()
            .expect("call .folder() before .email()")
            .emails
            .push(TestEmail {
                seen,
                raw: raw.to_vec(),
            });
        self
    }

    /// Add an unread email sent by `from`.
    pub fn sender(self, from: &str) -> Self {
        let raw = raw_email(from, "Test");
        self.email(false, &raw)
    }

    /// Make FETCH fail for any range touching `start..=end`.
    pub fn fail_fetch(mut self, start: u32, end: u32) -> Self {
        self.mailbox.failing_ranges.push((start, end));
        self
    }

    /// Leave `start..=end` out of FETCH responses without failing them.
    pub fn omit_from_fetch(mut self, start: u32, end: u32) -> Self {
        self.mailbox.omitted_ranges.push((start, end));
        self
    }

    /// Refuse every login attempt.
    pub fn reject_logins(mut self) -> Self {
        self.mailbox.reject_logins = true;
        self
    }

    /// Consume the builder and return the finished `Mailbox`.
    pub fn build(self) -> Mailbox {
        self.mailbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_section_keeps_only_from() {
        let email = TestEmail {
            seen: false,
            raw: raw_email("Alice <alice@example.com>", "Hi"),
        };
        assert_eq!(
            email.from_header_section(),
            b"From: Alice <alice@example.com>\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn header_section_without_from_is_blank_line() {
        let email = TestEmail {
            seen: false,
            raw: b"Subject: none\r\n\r\nBody".to_vec(),
        };
        assert_eq!(email.from_header_section(), b"\r\n".to_vec());
    }

    #[test]
    fn failing_ranges_match_on_overlap() {
        let mailbox = MailboxBuilder::new().fail_fetch(101, 200).build();
        assert!(mailbox.fetch_fails(101, 200));
        assert!(mailbox.fetch_fails(150, 300));
        assert!(mailbox.fetch_fails(1, 101));
        assert!(!mailbox.fetch_fails(1, 100));
        assert!(!mailbox.fetch_fails(201, 250));
    }

    #[test]
    fn omitted_ranges_are_inclusive() {
        let mailbox = MailboxBuilder::new().omit_from_fetch(5, 6).build();
        assert!(!mailbox.omits(4));
        assert!(mailbox.omits(5));
        assert!(mailbox.omits(6));
        assert!(!mailbox.fetch_fails(5, 6));
    }
}
