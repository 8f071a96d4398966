//! IMAP transport and TLS helpers
//!
//! Provides the low-level `open()` and the command wrappers used by
//! [`ImapBackend`](super::ImapBackend). Everything here is async; the
//! backend drives it from its own single-threaded runtime.

use crate::config::{BackendConfig, Security};
use crate::error::{Error, Result};
use futures::TryStreamExt;
use futures::io::{AsyncRead, AsyncWrite};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

/// Any byte stream an IMAP client can run over.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send> ImapStream for T {}

/// A not yet authenticated IMAP client.
pub type ImapClient = async_imap::Client<Box<dyn ImapStream>>;

/// An authenticated IMAP session.
pub type ImapSession = async_imap::Session<Box<dyn ImapStream>>;

/// Client TLS configuration, on the ring provider.
///
/// Certificates are checked against the webpki roots unless
/// `accept_invalid_certs` is set.
pub fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let builder =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.into(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn handshake(config: &BackendConfig, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
    let connector = tls_connector(config.accept_invalid_certs)?;
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

/// Open a transport to `config.host:config.port`.
///
/// With [`Security::StartTls`] the upgrade is negotiated on the cleartext
/// connection before the client is handed back.
pub async fn open(config: &BackendConfig) -> Result<ImapClient> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!("Connecting to IMAP server at {} ({})", addr, config.security);

    let tcp = TcpStream::connect(&addr).await?;
    let stream: Box<dyn ImapStream> = match config.security {
        Security::Plain => Box::new(tcp.compat()),
        Security::Tls => Box::new(handshake(config, tcp).await?.compat()),
        Security::StartTls => {
            let mut client = async_imap::Client::new(tcp.compat());
            client
                .run_command_and_check_ok("STARTTLS", None)
                .await
                .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
            let tcp = client.into_inner().into_inner();
            Box::new(handshake(config, tcp).await?.compat())
        }
    };

    info!("Connected to IMAP server at {}", addr);
    Ok(async_imap::Client::new(stream))
}

/// LOGIN on a freshly opened client.
pub async fn login(client: ImapClient, user: &str, password: &str) -> Result<ImapSession> {
    client
        .login(user, password)
        .await
        .map_err(|(e, _)| Error::Imap(format!("Login failed: {e}")))
}

/// SELECT a folder, returning its message count.
pub async fn select(session: &mut ImapSession, folder: &str) -> Result<u32> {
    let mailbox = session
        .select(folder)
        .await
        .map_err(|e| Error::Imap(format!("Failed to select {folder}: {e}")))?;
    Ok(mailbox.exists)
}

/// `UID SEARCH ALL`, sorted ascending.
pub async fn search_all(session: &mut ImapSession) -> Result<Vec<u32>> {
    let uids = session
        .uid_search("ALL")
        .await
        .map_err(|e| Error::Imap(format!("Search failed: {e}")))?;

    let mut uid_list: Vec<u32> = uids.into_iter().collect();
    uid_list.sort_unstable();
    Ok(uid_list)
}

/// `UID FETCH` with the given item list, collected eagerly.
pub async fn fetch(
    session: &mut ImapSession,
    uid_set: &str,
    query: &str,
) -> Result<Vec<async_imap::types::Fetch>> {
    let stream = session
        .uid_fetch(uid_set, query)
        .await
        .map_err(|e| Error::Imap(format!("Fetch failed: {e}")))?;

    stream
        .try_collect()
        .await
        .map_err(|e| Error::Imap(format!("Fetch error: {e}")))
}

/// `UID STORE` with a flag query such as `+FLAGS.SILENT (\Seen)`.
pub async fn store(session: &mut ImapSession, uid_set: &str, query: &str) -> Result<()> {
    let stream = session
        .uid_store(uid_set, query)
        .await
        .map_err(|e| Error::Imap(format!("Store failed: {e}")))?;

    let _: Vec<_> = stream
        .try_collect()
        .await
        .map_err(|e| Error::Imap(format!("Store error: {e}")))?;
    Ok(())
}

/// Comma-separated UID set for a FETCH or STORE.
pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Certificate verifier that accepts every certificate. Only used when
/// the account opts into `accept_invalid_certs`.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
