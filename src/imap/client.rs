use crate::config::AccountConfig;
use crate::imap::error::ImapError;
use async_imap::{Client as AsyncImapClient, Session as AsyncImapSession};
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::TryStreamExt;
use log::{debug, info};
use rustls::pki_types::ServerName as PkiServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream as TokioTcpStream;
use tokio::time::timeout;
use tokio_rustls::{client::TlsStream as TokioTlsStreamClient, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

// --- Type Aliases ---

type BaseTcpStream = TokioTcpStream;
type BaseTlsStream = TokioTlsStreamClient<BaseTcpStream>;

// Compatibility wrappers for async_imap
type TlsCompatStream = Compat<BaseTlsStream>;
type PlainCompatStream = Compat<BaseTcpStream>;

type TlsImapSession = AsyncImapSession<TlsCompatStream>;
type PlainImapSession = AsyncImapSession<PlainCompatStream>;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_CHUNK: usize = 50;

/// One raw mailbox message as fetched, before normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub internal_date: Option<DateTime<Utc>>,
    pub body: Vec<u8>,
}

/// A logged-in session over either a TLS or a plain transport, depending on
/// the account's transport-security flag.
pub enum MailSession {
    Tls(TlsImapSession),
    Plain(PlainImapSession),
}

macro_rules! on_session {
    ($sess:expr, $s:ident => $body:expr) => {
        match $sess {
            MailSession::Tls($s) => $body,
            MailSession::Plain($s) => $body,
        }
    };
}

/// Builds a rustls connector backed by the platform's native root store.
fn build_tls_connector() -> Result<TlsConnector, ImapError> {
    let mut root_cert_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    let (added, ignored) = root_cert_store.add_parsable_certificates(certs);
    debug!("Loaded {} native certs, ignored {}.", added, ignored);
    if root_cert_store.is_empty() {
        return Err(ImapError::Tls(
            "Root certificate store is empty after loading native certs".to_string(),
        ));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

async fn login_tls(
    account: &AccountConfig,
    tcp_stream: BaseTcpStream,
) -> Result<TlsImapSession, ImapError> {
    let server_name: PkiServerName<'static> = PkiServerName::try_from(account.host.clone())
        .map_err(|_| ImapError::Connection(format!("Invalid server name: {}", account.host)))?;
    let connector = build_tls_connector()?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ImapError::Tls(e.to_string()))?;
    debug!("TLS handshake successful for {}", account.host);

    let client = AsyncImapClient::new(tls_stream.compat());
    match timeout(LOGIN_TIMEOUT, client.login(&account.user, &account.pass)).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err((e, _client))) => Err(ImapError::Auth(e.to_string())),
        Err(_) => Err(ImapError::Timeout("Login timed out".to_string())),
    }
}

async fn login_plain(
    account: &AccountConfig,
    tcp_stream: BaseTcpStream,
) -> Result<PlainImapSession, ImapError> {
    let client = AsyncImapClient::new(tcp_stream.compat());
    match timeout(LOGIN_TIMEOUT, client.login(&account.user, &account.pass)).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err((e, _client))) => Err(ImapError::Auth(e.to_string())),
        Err(_) => Err(ImapError::Timeout("Login timed out".to_string())),
    }
}

impl MailSession {
    /// Establishes a connection for the account and logs in.
    pub async fn connect(account: &AccountConfig) -> Result<Self, ImapError> {
        debug!(
            "Attempting TCP connection to {}:{}...",
            account.host, account.port
        );
        let tcp_stream = BaseTcpStream::connect((account.host.as_str(), account.port)).await?;

        let session = if account.tls {
            MailSession::Tls(login_tls(account, tcp_stream).await?)
        } else {
            MailSession::Plain(login_plain(account, tcp_stream).await?)
        };
        info!(
            "IMAP login successful for {} at {}:{}",
            account.user, account.host, account.port
        );
        Ok(session)
    }

    pub async fn select_folder(&mut self, folder: &str) -> Result<(), ImapError> {
        on_session!(self, s => {
            s.select(folder)
                .await
                .map(|_| ())
                .map_err(|e| match e {
                    async_imap::error::Error::No(msg) => ImapError::FolderNotFound(msg),
                    other => ImapError::from(other),
                })
        })
    }

    /// UID SEARCH for messages received on or after the given date.
    pub async fn search_since(&mut self, since: NaiveDate) -> Result<Vec<u32>, ImapError> {
        // IMAP date-text, e.g. "SINCE 24-Jul-2026"
        let query = format!("SINCE {}", since.format("%d-%b-%Y"));
        let uids = on_session!(self, s => {
            s.uid_search(&query).await.map_err(ImapError::from)
        })?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    /// Fetches full message bodies for the given UIDs, in bounded chunks.
    pub async fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<RawMessage>, ImapError> {
        let mut messages = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(FETCH_CHUNK) {
            let sequence = chunk
                .iter()
                .map(|uid| uid.to_string())
                .collect::<Vec<_>>()
                .join(",");
            let fetched: Vec<RawMessage> = on_session!(self, s => {
                let mut stream = s
                    .uid_fetch(&sequence, "(UID INTERNALDATE BODY[])")
                    .await
                    .map_err(ImapError::from)?;
                let mut out = Vec::new();
                while let Some(fetch) = stream.try_next().await.map_err(ImapError::from)? {
                    let uid = match fetch.uid {
                        Some(uid) => uid,
                        None => continue,
                    };
                    let body = match fetch.body() {
                        Some(body) => body.to_vec(),
                        None => continue,
                    };
                    out.push(RawMessage {
                        uid,
                        internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                        body,
                    });
                }
                Ok::<_, ImapError>(out)
            })?;
            messages.extend(fetched);
        }
        Ok(messages)
    }

    pub async fn logout(self) -> Result<(), ImapError> {
        match self {
            MailSession::Tls(mut s) => s.logout().await.map_err(ImapError::from),
            MailSession::Plain(mut s) => s.logout().await.map_err(ImapError::from),
        }
    }
}
