//! Listener TLS: PEM loading and self-signed certificate generation

use crate::config::TlsFiles;
use crate::error::{Error, Result};
use chrono::{Datelike, Days, NaiveDate, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Validity of generated certificates.
const GENERATED_VALIDITY_DAYS: u64 = 365;

/// Build the acceptor for `files`, generating a self-signed pair first
/// when asked to and neither file exists yet.
///
/// # Errors
///
/// Returns an error if generation fails, either file cannot be read, or
/// rustls rejects the certificate and key.
pub fn acceptor(files: &TlsFiles) -> Result<TlsAcceptor> {
    if files.generate && !files.cert.exists() && !files.key.exists() {
        generate(&files.cert, &files.key)?;
    }
    let (certs, key) = load(&files.cert, &files.key)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| Error::Tls(format!("Invalid certificate or key: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))
}

/// Read a certificate chain and a private key from PEM files.
///
/// # Errors
///
/// Returns an error if a file cannot be read or holds no certificate or
/// private key.
pub fn load(
    cert: &Path,
    key: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = rustls_pemfile::certs(&mut open(cert)?)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Tls(format!("{}: {e}", cert.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificate found", cert.display())));
    }

    let key = rustls_pemfile::private_key(&mut open(key)?)
        .map_err(|e| Error::Tls(format!("{}: {e}", key.display())))?
        .ok_or_else(|| Error::Tls(format!("{}: no private key found", key.display())))?;

    Ok((certs, key))
}

fn ymd(date: NaiveDate) -> Result<(i32, u8, u8)> {
    let month = u8::try_from(date.month()).map_err(|e| Error::Tls(e.to_string()))?;
    let day = u8::try_from(date.day()).map_err(|e| Error::Tls(e.to_string()))?;
    Ok((date.year(), month, day))
}

/// Write a self-signed certificate for `localhost`, valid from today,
/// and its private key. The key file is only readable by its owner.
///
/// # Errors
///
/// Returns an error if certificate generation fails or either file
/// cannot be written. An existing key file is never overwritten.
pub fn generate(cert: &Path, key: &Path) -> Result<()> {
    let today = Utc::now().date_naive();
    let until = today
        .checked_add_days(Days::new(GENERATED_VALIDITY_DAYS))
        .ok_or_else(|| Error::Tls("certificate expiry out of range".into()))?;

    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .map_err(|e| Error::Tls(e.to_string()))?;
    let (y, m, d) = ymd(today)?;
    params.not_before = rcgen::date_time_ymd(y, m, d);
    let (y, m, d) = ymd(until)?;
    params.not_after = rcgen::date_time_ymd(y, m, d);

    let key_pair = rcgen::KeyPair::generate().map_err(|e| Error::Tls(e.to_string()))?;
    let certificate = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Tls(e.to_string()))?;

    let mut key_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(key)?;
    key_file.write_all(key_pair.serialize_pem().as_bytes())?;
    std::fs::write(cert, certificate.pem())?;

    info!(
        "Generated self-signed certificate {} (key {}), valid until {}",
        cert.display(),
        key.display(),
        until
    );
    Ok(())
}
