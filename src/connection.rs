//! IMAP connection, TLS and read-only mailbox access
//!
//! Opening a mailbox happens in three steps that map onto the scan
//! states: [`open_transport`] (TCP + TLS, `Connecting`),
//! [`authenticate`] (`LOGIN`, `Authenticating`) and [`examine`]
//! (`EXAMINE`, `SelectingMailbox`). Each step fails with its own error
//! variant so the caller can tell where a run stopped.

use crate::config::{ImapConfig, TlsMode};
use crate::error::{Error, Result};
use crate::mailbox::{Batch, MailboxSession, RawMessage};
use async_imap::{Client, Session};
use futures::StreamExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

/// Only the `From` header, without setting `\Seen`.
const FROM_HEADER_QUERY: &str = "BODY.PEEK[HEADER.FIELDS (FROM)]";

type ImapStream = Compat<TlsStream<TcpStream>>;

/// A TLS-wrapped IMAP client that has not logged in yet.
pub type ImapClient = Client<ImapStream>;

/// A TLS-wrapped, authenticated IMAP session.
pub type ImapSession = Session<ImapStream>;

/// Connect over TCP and establish TLS as configured.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the server cannot be reached and
/// [`Error::Tls`] if STARTTLS or the handshake fails.
pub async fn open_transport(config: &ImapConfig) -> Result<ImapClient> {
    let addr = config.address();
    debug!(%addr, tls = %config.tls, "Connecting to IMAP server");

    let tcp_stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| Error::Connection(format!("Cannot reach {addr}: {e}")))?;

    let tcp_stream = match config.tls {
        TlsMode::Implicit => tcp_stream,
        TlsMode::StartTls => {
            let mut client = Client::new(tcp_stream.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
            client.into_inner().into_inner()
        }
    };

    let connector = tls_connector(config.accept_invalid_certs)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(Client::new(tls_stream.compat()))
}

/// Log in with the configured credentials.
///
/// # Errors
///
/// Returns [`Error::Auth`] if the server rejects the login.
pub async fn authenticate(client: ImapClient, config: &ImapConfig) -> Result<ImapSession> {
    debug!(user = %config.username, "Logging in");
    let session = client
        .login(&config.username, &config.password)
        .await
        .map_err(|(e, _)| Error::Auth(format!("Login failed: {e}")))?;

    info!("Connected to IMAP server");
    Ok(session)
}

/// Open `mailbox` read-only with `EXAMINE`.
///
/// # Errors
///
/// Returns [`Error::Select`] if the mailbox does not exist or cannot be
/// opened.
pub async fn examine(mut session: ImapSession, mailbox: &str) -> Result<ImapMailbox> {
    let info = match session.examine(mailbox).await {
        Ok(info) => info,
        Err(e) => {
            session.logout().await.ok();
            return Err(Error::Select(format!("Failed to select {mailbox}: {e}")));
        }
    };

    info!(mailbox, messages = info.exists, "Mailbox opened read-only");
    Ok(ImapMailbox {
        session,
        message_count: info.exists,
    })
}

/// A mailbox opened read-only on a live IMAP session.
pub struct ImapMailbox {
    session: ImapSession,
    message_count: u32,
}

impl ImapMailbox {
    /// End the session. Errors are ignored, the scan is already done.
    pub async fn logout(mut self) {
        self.session.logout().await.ok();
    }
}

impl MailboxSession for ImapMailbox {
    fn message_count(&self) -> u32 {
        self.message_count
    }

    async fn fetch_headers(&mut self, batch: Batch, sink: mpsc::Sender<RawMessage>) -> Result<()> {
        let mut messages = self
            .session
            .fetch(batch.sequence_set(), FROM_HEADER_QUERY)
            .await
            .map_err(|e| Error::Fetch(format!("FETCH {batch} failed: {e}")))?;

        // A tagged NO or BAD ends the stream like OK does, so a short
        // range is the only sign of a failed FETCH.
        let mut delivered = 0;
        while let Some(item) = messages.next().await {
            let fetch = item.map_err(|e| Error::Fetch(format!("FETCH {batch} aborted: {e}")))?;
            if batch.contains(fetch.message) {
                delivered += 1;
            }
            let message = RawMessage {
                seq: fetch.message,
                header: fetch.header().map(<[u8]>::to_vec),
            };
            if sink.send(message).await.is_err() {
                return Ok(());
            }
        }

        if delivered == batch.len() {
            Ok(())
        } else {
            Err(Error::Fetch(format!(
                "FETCH {batch} returned {delivered} of {} messages",
                batch.len()
            )))
        }
    }
}

fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Skips certificate chain validation but still checks handshake
/// signatures. Only used when `accept_invalid_certs` is set.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
