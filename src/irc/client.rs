//! TCP/TLS implementation of [`Connector`] and [`Session`].
//!
//! A connection is registered synchronously inside [`IrcConnector::connect`]
//! (optional SASL PLAIN or EXTERNAL, `NICK`/`USER`, wait for `001`). After
//! that the read half moves into a reader task that turns lines into
//! [`SessionEvent`]s; the write half stays with the returned session, which
//! aborts the reader when dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use super::codec::LineCodec;
use super::protocol::{self, Line};
use super::{Connection, Connector, IrcError, Session, SessionEvent};

/// Time allowed for the TCP (and TLS) connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed from socket open to `001`.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Buffered inbound events between the reader task and the manager.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Give up after this many nickname collisions during registration.
const MAX_NICK_ATTEMPTS: usize = 5;

/// Byte stream the session runs over (plain TCP or TLS).
trait IrcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcStream for T {}

type BoxedStream = Box<dyn IrcStream>;

/// SASL PLAIN credentials.
#[derive(Clone)]
pub struct SaslPlain {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl std::fmt::Debug for SaslPlain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslPlain")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// SASL mechanism negotiated during registration.
#[derive(Debug, Clone)]
pub enum Sasl {
    /// Account name and password.
    Plain(SaslPlain),
    /// The server authenticates the TLS client certificate.
    External {
        /// Authorization identity; the certificate's own when unset.
        identity: Option<String>,
    },
}

impl Sasl {
    fn mechanism(&self) -> &'static str {
        match self {
            Self::Plain(_) => "PLAIN",
            Self::External { .. } => "EXTERNAL",
        }
    }

    fn response(&self) -> String {
        match self {
            Self::Plain(plain) => sasl_plain_payload(plain),
            Self::External { identity: None } => "+".to_owned(),
            Self::External {
                identity: Some(identity),
            } => base64::engine::general_purpose::STANDARD.encode(identity),
        }
    }
}

/// PEM client certificate chain and its private key.
#[derive(Debug, Clone)]
pub struct ClientCert {
    /// Certificate chain, leaf first.
    pub cert_file: PathBuf,
    /// Private key (PKCS#8, PKCS#1 or SEC1).
    pub key_file: PathBuf,
}

/// TLS options; the bundled web PKI roots are trusted unless `ca_file` is set.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM bundle of trusted roots replacing the bundled ones.
    pub ca_file: Option<PathBuf>,
    /// Certificate presented to the server.
    pub client_cert: Option<ClientCert>,
}

/// Everything needed to open a session.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Wrap the socket in TLS. Plain TCP when unset.
    pub tls: Option<TlsSettings>,
    /// Desired nickname; `_` is appended on collision.
    pub nickname: String,
    /// Real name sent with `USER`.
    pub realname: String,
    /// Optional SASL authentication.
    pub sasl: Option<Sasl>,
}

/// Connects to an IRC server over TCP, optionally wrapped in TLS.
pub struct IrcConnector {
    settings: ClientSettings,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for IrcConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcConnector")
            .field("settings", &self.settings)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl IrcConnector {
    /// Build a connector, loading any configured CA bundle and client certificate.
    ///
    /// # Errors
    ///
    /// Returns [`IrcError::Tls`] if a PEM file cannot be read or holds no
    /// usable certificate or key.
    pub fn new(settings: ClientSettings) -> Result<Self, IrcError> {
        let tls = settings.tls.as_ref().map(tls_connector).transpose()?;
        Ok(Self { settings, tls })
    }

    async fn open_stream(&self) -> Result<BoxedStream, IrcError> {
        let address = (self.settings.host.as_str(), self.settings.port);
        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| IrcError::Timeout("connect"))??;
        tcp.set_nodelay(true)?;

        match &self.tls {
            None => Ok(Box::new(tcp)),
            Some(connector) => {
                let name = ServerName::try_from(self.settings.host.clone())
                    .map_err(|e| IrcError::Tls(format!("invalid server name: {e}")))?;
                let stream = tokio::time::timeout(CONNECT_TIMEOUT, connector.connect(name, tcp))
                    .await
                    .map_err(|_| IrcError::Timeout("tls handshake"))??;
                Ok(Box::new(stream))
            }
        }
    }
}

#[async_trait]
impl Connector for IrcConnector {
    async fn connect(&self) -> Result<Connection, IrcError> {
        let stream = self.open_stream().await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut lines = FramedRead::new(read_half, LineCodec::default());
        let mut writer = LineWriter { inner: write_half };

        let nick = tokio::time::timeout(
            REGISTRATION_TIMEOUT,
            register(&mut lines, &mut writer, &self.settings),
        )
        .await
        .map_err(|_| IrcError::Timeout("registration"))??;

        info!(server = %self.server(), nick = %nick, "registered with IRC server");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_loop(lines, tx, nick));

        Ok(Connection {
            session: Box::new(TcpSession { writer, reader }),
            events: rx,
        })
    }

    fn server(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }
}

/// Writes CRLF-terminated lines.
struct LineWriter {
    inner: WriteHalf<BoxedStream>,
}

impl LineWriter {
    async fn write_line(&mut self, line: &str) -> Result<(), IrcError> {
        trace!(line, "irc >>");
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await?;
        self.inner.flush().await?;
        Ok(())
    }
}

type LineReader = FramedRead<ReadHalf<BoxedStream>, LineCodec>;

fn tls_error(path: &Path, e: impl std::fmt::Display) -> IrcError {
    IrcError::Tls(format!("{}: {e}", path.display()))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, IrcError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| tls_error(path, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path, e))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found"));
    }
    Ok(certs)
}

/// Build the rustls client config for `tls`.
fn tls_connector(tls: &TlsSettings) -> Result<TlsConnector, IrcError> {
    let mut roots = RootCertStore::empty();
    match &tls.ca_file {
        Some(path) => {
            for cert in load_certs(path)? {
                roots.add(cert).map_err(|e| tls_error(path, e))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let config = match &tls.client_cert {
        None => builder.with_no_client_auth(),
        Some(cert) => {
            let chain = load_certs(&cert.cert_file)?;
            let key = PrivateKeyDer::from_pem_file(&cert.key_file)
                .map_err(|e| tls_error(&cert.key_file, e))?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| tls_error(&cert.cert_file, e))?
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Run the registration handshake and return the nick the server accepted.
async fn register(
    lines: &mut LineReader,
    writer: &mut LineWriter,
    settings: &ClientSettings,
) -> Result<String, IrcError> {
    let mut nick = settings.nickname.clone();
    let mut nick_attempts = 1;

    if settings.sasl.is_some() {
        writer.write_line("CAP REQ :sasl").await?;
    }
    writer.write_line(&protocol::nick(&nick)).await?;
    writer
        .write_line(&protocol::user(&settings.nickname, &settings.realname))
        .await?;

    loop {
        let Some(raw) = lines.next().await.transpose()? else {
            return Err(IrcError::Closed);
        };
        trace!(line = %raw, "irc <<");
        let Some(line) = Line::parse(&raw) else {
            continue;
        };

        match line.command.as_str() {
            "PING" => writer.write_line(&protocol::pong(line.param(0))).await?,
            "CAP" => match line.param(1) {
                "ACK" if line.param(2).split(' ').any(|cap| cap == "sasl") => {
                    if let Some(sasl) = &settings.sasl {
                        writer
                            .write_line(&format!("AUTHENTICATE {}", sasl.mechanism()))
                            .await?;
                    }
                }
                "NAK" => return Err(IrcError::Sasl("server does not support sasl".to_owned())),
                _ => {}
            },
            "AUTHENTICATE" if line.param(0) == "+" => {
                let Some(sasl) = &settings.sasl else {
                    return Err(IrcError::Sasl("unexpected authentication prompt".to_owned()));
                };
                writer
                    .write_line(&format!("AUTHENTICATE {}", sasl.response()))
                    .await?;
            }
            // RPL_SASLSUCCESS
            "903" => writer.write_line("CAP END").await?,
            // ERR_NICKLOCKED, ERR_SASLFAIL, ERR_SASLTOOLONG, ERR_SASLABORTED
            "902" | "904" | "905" | "906" => {
                return Err(IrcError::Sasl(line.params.last().cloned().unwrap_or_default()));
            }
            // ERR_NICKNAMEINUSE, ERR_NICKCOLLISION
            "433" | "436" => {
                if nick_attempts >= MAX_NICK_ATTEMPTS {
                    return Err(IrcError::Registration(format!(
                        "nickname {} unavailable",
                        settings.nickname
                    )));
                }
                nick_attempts = nick_attempts.saturating_add(1);
                nick.push('_');
                warn!(nick = %nick, "nickname in use, retrying");
                writer.write_line(&protocol::nick(&nick)).await?;
            }
            // ERR_YOUREBANNEDCREEP, ERR_PASSWDMISMATCH
            "465" | "464" => {
                return Err(IrcError::Registration(line.params.last().cloned().unwrap_or_default()));
            }
            "ERROR" => return Err(IrcError::Server(line.param(0).to_owned())),
            // RPL_WELCOME
            "001" => {
                let accepted = line.param(0);
                if !accepted.is_empty() {
                    nick = accepted.to_owned();
                }
                return Ok(nick);
            }
            _ => {}
        }
    }
}

/// Base64 `authzid\0authcid\0password` for SASL PLAIN.
pub fn sasl_plain_payload(sasl: &SaslPlain) -> String {
    let raw = format!("{0}\0{0}\0{1}", sasl.username, sasl.password);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Forward parsed inbound lines until the socket closes or the manager goes away.
async fn read_loop(mut lines: LineReader, tx: mpsc::Sender<SessionEvent>, mut nick: String) {
    loop {
        let raw = match lines.next().await {
            Some(Ok(raw)) => raw,
            None => {
                debug!("irc read side reached end of stream");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "irc read failed");
                break;
            }
        };
        trace!(line = %raw, "irc <<");

        let Some(line) = Line::parse(&raw) else {
            continue;
        };
        if line.command == "NICK" && line.source_nick() == Some(nick.as_str()) {
            nick = line.param(0).to_owned();
        }
        if tx.send(classify(&line, &nick)).await.is_err() {
            break;
        }
    }
}

/// Map a parsed line to the event the manager cares about.
pub fn classify(line: &Line, own_nick: &str) -> SessionEvent {
    let from_self = line
        .source_nick()
        .is_some_and(|source| source.eq_ignore_ascii_case(own_nick));

    match line.command.as_str() {
        "PING" => SessionEvent::Ping(line.param(0).to_owned()),
        "PONG" => SessionEvent::Pong,
        "JOIN" if from_self => SessionEvent::Joined(line.param(0).to_owned()),
        "PART" if from_self => SessionEvent::Left(line.param(0).to_owned()),
        "KICK" if line.param(1).eq_ignore_ascii_case(own_nick) => {
            SessionEvent::Left(line.param(0).to_owned())
        }
        "PRIVMSG" if !protocol::is_channel(line.param(0)) => {
            let from = line.source_nick().unwrap_or_default().to_owned();
            let text = line.param(1);
            match protocol::ctcp_body(text) {
                Some(body) => SessionEvent::CtcpQuery {
                    from,
                    command: body
                        .split(' ')
                        .next()
                        .unwrap_or_default()
                        .to_ascii_uppercase(),
                },
                None => SessionEvent::Query {
                    from,
                    text: text.to_owned(),
                },
            }
        }
        "ERROR" => SessionEvent::ServerError(line.param(0).to_owned()),
        _ => SessionEvent::Other,
    }
}

/// Write side of a registered TCP/TLS session.
struct TcpSession {
    writer: LineWriter,
    reader: JoinHandle<()>,
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Session for TcpSession {
    async fn join(&mut self, channel: &str) -> Result<(), IrcError> {
        self.writer.write_line(&protocol::join(channel)).await
    }

    async fn send(&mut self, target: &str, text: &str) -> Result<(), IrcError> {
        for line in protocol::privmsg_lines(target, text) {
            self.writer.write_line(&line).await?;
        }
        Ok(())
    }

    async fn notice(&mut self, target: &str, text: &str) -> Result<(), IrcError> {
        self.writer.write_line(&protocol::notice(target, text)).await
    }

    async fn ping(&mut self, token: &str) -> Result<(), IrcError> {
        self.writer.write_line(&protocol::ping(token)).await
    }

    async fn pong(&mut self, token: &str) -> Result<(), IrcError> {
        self.writer.write_line(&protocol::pong(token)).await
    }

    async fn quit(&mut self, reason: &str) -> Result<(), IrcError> {
        self.writer.write_line(&protocol::quit(reason)).await?;
        self.writer.inner.shutdown().await?;
        Ok(())
    }
}
