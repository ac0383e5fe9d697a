//! In-process fake IMAP server for integration testing
//!
//! A scan drives one connection through this sequence:
//!
//! ```text
//!   S: * OK IMAP4rev1 Fake server ready        (plain TCP)
//!   C: A0001 STARTTLS
//!   S: A0001 OK Begin TLS negotiation now
//!      ... TLS handshake ...
//!   C: A0002 LOGIN testuser testpass
//!   S: A0002 OK LOGIN completed
//!   C: A0003 EXAMINE INBOX
//!   S: * 250 EXISTS
//!   S: A0003 OK [READ-ONLY] EXAMINE completed
//!   C: A0004 FETCH 1:100 BODY.PEEK[HEADER.FIELDS (FROM)]
//!   S: * 1 FETCH (BODY[HEADER.FIELDS (FROM)] {32}
//!   S: <32 bytes: "From: ..." and a blank line>)
//!   S: ...
//!   S: A0004 OK FETCH completed
//!   C: A0005 LOGOUT
//! ```
//!
//! Lines starting with `*` are untagged data; the tagged line echoes the
//! client's tag and ends the command. The `{32}` marker is a counted
//! literal: the client reads exactly that many raw bytes before looking
//! for the closing `)`.
//!
//! The server keeps the mailbox behind a mutex shared with the test, so
//! a test can change it between runs (heal failing ranges, deliver new
//! mail) and inspect which commands arrived.

use super::handlers::{handle_examine, handle_fetch, handle_login, handle_logout};
use super::io::write_line;
use super::mailbox::{Mailbox, raw_email};
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Commands received after TLS, without their tags (e.g.
/// `FETCH 1:100 BODY.PEEK[HEADER.FIELDS (FROM)]`).
type CommandLog = Mutex<Vec<String>>;

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. It speaks enough of the IMAP
/// protocol to exercise a full scan:
/// greeting -> STARTTLS -> TLS -> LOGIN -> EXAMINE -> FETCH -> LOGOUT.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    commands: Arc<CommandLog>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a new fake IMAP server with the given mailbox state.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP.
    ///
    /// The server runs until the `FakeImapServer` is dropped (the
    /// tokio task is aborted).
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests may race to install the provider, so we
        // ignore the error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");

        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let commands = Arc::new(CommandLog::default());

        // Spawn the accept loop. Each incoming connection gets its
        // own task that runs the IMAP state machine.
        let handle = {
            let mailbox = mailbox.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    let acceptor = acceptor.clone();
                    let mailbox = mailbox.clone();
                    let commands = commands.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, acceptor, &mailbox, &commands).await;
                    });
                }
            })
        };

        Self {
            port,
            mailbox,
            commands,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Every command received so far, in order, without tags.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Sequence sets of the FETCH commands received so far.
    pub fn fetched_ranges(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|c| c.strip_prefix("FETCH "))
            .filter_map(|rest| rest.split_whitespace().next())
            .map(str::to_string)
            .collect()
    }

    /// Forget the command history.
    pub fn clear_commands(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Let every FETCH succeed and return every message from now on.
    pub fn clear_failures(&self) {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.failing_ranges.clear();
        mailbox.omitted_ranges.clear();
    }

    /// Append an unread email from `from` to `folder`.
    pub fn deliver(&self, folder: &str, from: &str) {
        let raw = raw_email(from, "Late arrival");
        self.mailbox
            .lock()
            .unwrap()
            .get_folder_mut(folder)
            .expect("folder exists")
            .emails
            .push(super::mailbox::TestEmail { seen: false, raw });
    }

    /// `\Seen` flag of every email in `folder`, in sequence order.
    pub fn seen_flags(&self, folder: &str) -> Vec<bool> {
        self.mailbox
            .lock()
            .unwrap()
            .get_folder(folder)
            .map(|f| f.emails.iter().map(|e| e.seen).collect())
            .unwrap_or_default()
    }
}

/// Greet on plain TCP, wait for STARTTLS, upgrade, then hand the TLS
/// stream to the command loop. Anything but STARTTLS as the first
/// command ends the connection.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
    commands: &CommandLog,
) {
    let mut reader = BufReader::new(stream);
    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }
    let Some((tag, command)) = line.trim().split_once(' ') else {
        return;
    };

    if !command.eq_ignore_ascii_case("STARTTLS") {
        let _ = write_line(&mut reader, &format!("{tag} BAD Expected STARTTLS\r\n")).await;
        return;
    }
    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    if write_line(&mut reader, &resp).await.is_err() {
        return;
    }

    let Ok(tls_stream) = acceptor.accept(reader.into_inner()).await else {
        return;
    };
    handle_imap_session(tls_stream, mailbox, commands).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the authenticated IMAP command loop over an established
/// stream.
///
/// Uses `imap-codec`'s `CommandCodec` to parse each client command
/// into a strongly-typed `Command`, then dispatches to the
/// appropriate handler based on the `CommandBody` variant. Handlers
/// receive a snapshot (`Mailbox` clone) taken under lock, so state
/// changed by the test between commands is picked up.
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
    commands: &CommandLog,
) {
    let mut reader = BufReader::new(stream);
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some((_, rest)) = trimmed.split_once(' ') {
            commands.lock().unwrap().push(rest.to_string());
        }

        // Parse the command line using imap-codec.
        let line_bytes = line.as_bytes();
        let Ok((_, command)) = codec.decode(line_bytes) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Login { .. } => {
                if !handle_login(tag, snap.reject_logins, &mut reader).await {
                    break;
                }
            }
            CommandBody::Examine { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_examine(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: false,
                ..
            } => {
                handle_fetch(
                    tag,
                    &sequence_set,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
