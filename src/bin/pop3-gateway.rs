#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! POP3 gateway daemon serving IMAP mailboxes

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use pop3_gateway::pop3::Hooks;
use pop3_gateway::{
    AccountDirectory, BackendConfig, Controller, DirectoryAdapter, FixedAccount, FixedAdapter,
    Folder, ImapConnector, Security, ServerConfig, TlsFiles,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Event, Level, Subscriber, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

#[derive(Parser)]
#[command(name = "pop3-gateway")]
#[command(about = "Serve the unseen messages of IMAP mailboxes over POP3")]
struct Args {
    #[command(subcommand)]
    backend: Backend,

    /// Port to listen on
    #[arg(long, short = 'P', default_value_t = 1100, global = true)]
    listen_port: u16,

    /// Listen on all IPv4 interfaces instead of ::1
    #[arg(long, short = 'r', global = true)]
    listen_all: bool,

    /// Host name announced in the greeting
    #[arg(long, short = 'd', global = true)]
    hostname: Option<String>,

    /// Keep running as the current user instead of switching to `nobody`
    #[arg(long, short = 'n', global = true)]
    no_setuid: bool,

    /// Prefix log lines with syslog priorities for journald
    #[arg(long, short = 'l', global = true)]
    systemd_logging: bool,

    /// TLS certificate (PEM)
    #[arg(long, requires = "ssl_key", global = true)]
    ssl_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long, requires = "ssl_cert", global = true)]
    ssl_key: Option<PathBuf>,

    /// Generate a self-signed certificate if neither file exists
    #[arg(long, requires = "ssl_cert", global = true)]
    ssl_generate: bool,

    /// Backend folder to serve
    #[arg(long, default_value = "INBOX", global = true)]
    folder: String,
}

#[derive(Subcommand)]
enum Backend {
    /// Serve every user from one IMAP server
    Fixed {
        /// IMAP server; `IMAP_*` environment variables are used when unset.
        /// The other flags below override either source.
        #[arg(long, short = 'H')]
        imap_host: Option<String>,

        /// IMAP port [default: 993]
        #[arg(long, short = 'p')]
        imap_port: Option<u16>,

        /// `tls`, `starttls` or `plain` [default: tls]
        #[arg(long, short = 's')]
        imap_security: Option<Security>,

        /// Do not verify the IMAP server certificate
        #[arg(long)]
        accept_invalid_certs: bool,
    },

    /// Read each user's IMAP server from a JSON file named after them
    Directory {
        #[arg(long, short = 'p')]
        path: PathBuf,
    },
}

/// Log lines prefixed with the `sd-daemon` priority of their level.
struct SystemdFormat;

const fn priority(level: Level) -> u8 {
    match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        _ => 7,
    }
}

impl<S, N> FormatEvent<S, N> for SystemdFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "<{}>", priority(*event.metadata().level()))?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{{{fields}}}")?;
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_logging(systemd: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if systemd {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .event_format(SystemdFormat)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn server_config(args: &Args) -> ServerConfig {
    let listen_host = if args.listen_all { "0.0.0.0" } else { "::1" };
    let mut config = ServerConfig::new(listen_host, args.listen_port);
    config.hostname.clone_from(&args.hostname);
    config.drop_privileges = (!args.no_setuid).then(|| "nobody".to_string());
    if let (Some(cert), Some(key)) = (&args.ssl_cert, &args.ssl_key) {
        config.tls = Some(TlsFiles {
            cert: cert.clone(),
            key: key.clone(),
            generate: args.ssl_generate,
        });
    }
    config
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.systemd_logging);

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let config = server_config(&args);
    let folder = Folder::from(args.folder.as_str());
    let connector = Arc::new(ImapConnector);

    match &args.backend {
        Backend::Fixed {
            imap_host,
            imap_port,
            imap_security,
            accept_invalid_certs,
        } => {
            let base = match imap_host {
                Some(host) => BackendConfig {
                    host: host.clone(),
                    port: 993,
                    security: Security::default(),
                    accept_invalid_certs: false,
                },
                None => BackendConfig::from_env()?,
            };
            let backend =
                with_overrides(base, *imap_port, *imap_security, *accept_invalid_certs);
            info!(
                "Serving {} from {}:{} ({})",
                folder, backend.host, backend.port, backend.security
            );
            let account = Arc::new(FixedAccount(backend));
            serve(config, move || {
                FixedAdapter::new(Arc::clone(&account), Arc::clone(&connector))
                    .with_folder(folder.clone())
            })
            .await
        }
        Backend::Directory { path } => {
            info!("Serving {} with accounts from {}", folder, path.display());
            let directory = Arc::new(AccountDirectory::new(path));
            serve(config, move || {
                DirectoryAdapter::new(Arc::clone(&directory), Arc::clone(&connector))
                    .with_folder(folder.clone())
            })
            .await
        }
    }
}

/// Apply the explicit `fixed` flags over the configured backend.
fn with_overrides(
    mut backend: BackendConfig,
    port: Option<u16>,
    security: Option<Security>,
    accept_invalid_certs: bool,
) -> BackendConfig {
    if let Some(port) = port {
        backend.port = port;
    }
    if let Some(security) = security {
        backend.security = security;
    }
    backend.accept_invalid_certs |= accept_invalid_certs;
    backend
}

async fn serve<F, H>(config: ServerConfig, factory: F) -> anyhow::Result<()>
where
    F: Fn() -> H + Send + Sync + 'static,
    H: Hooks + 'static,
{
    let setuid = config.drop_privileges.is_some();
    let mut controller = Controller::new(config, factory);
    controller.start().with_context(|| {
        if setuid {
            "Failed to start POP3 gateway (try --no-setuid)"
        } else {
            "Failed to start POP3 gateway"
        }
    })?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("Interrupted, shutting down");
    controller.stop();
    Ok(())
}
