//! TCP client: registration handshake and inbound classification.

use std::io::Write;
use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

use cpthook::irc::client::{
    classify, sasl_plain_payload, ClientCert, ClientSettings, IrcConnector, Sasl, SaslPlain,
    TlsSettings,
};
use cpthook::irc::protocol::Line;
use cpthook::irc::{Connection, Connector, IrcError, Session, SessionEvent};

fn line(raw: &str) -> Line {
    match Line::parse(raw) {
        Some(line) => line,
        None => panic!("line should parse: {raw:?}"),
    }
}

#[test]
fn classifies_server_ping() {
    assert_eq!(
        classify(&line("PING :token"), "bot"),
        SessionEvent::Ping("token".to_owned())
    );
}

#[test]
fn classifies_own_join_part_and_kick() {
    assert_eq!(
        classify(&line(":bot!b@h JOIN #ops"), "bot"),
        SessionEvent::Joined("#ops".to_owned())
    );
    assert_eq!(
        classify(&line(":bot!b@h PART #ops :bye"), "bot"),
        SessionEvent::Left("#ops".to_owned())
    );
    assert_eq!(
        classify(&line(":op!o@h KICK #ops bot :out"), "bot"),
        SessionEvent::Left("#ops".to_owned())
    );
    assert_eq!(classify(&line(":alice!a@h JOIN #ops"), "bot"), SessionEvent::Other);
}

#[test]
fn classifies_direct_messages() {
    assert_eq!(
        classify(&line(":alice!a@h PRIVMSG bot :\x01version\x01"), "bot"),
        SessionEvent::CtcpQuery {
            from: "alice".to_owned(),
            command: "VERSION".to_owned(),
        }
    );
    assert_eq!(
        classify(&line(":alice!a@h PRIVMSG bot :hello"), "bot"),
        SessionEvent::Query {
            from: "alice".to_owned(),
            text: "hello".to_owned(),
        }
    );
    assert_eq!(
        classify(&line(":alice!a@h PRIVMSG #ops :hello all"), "bot"),
        SessionEvent::Other
    );
}

#[test]
fn classifies_server_error() {
    assert_eq!(
        classify(&line("ERROR :Closing link"), "bot"),
        SessionEvent::ServerError("Closing link".to_owned())
    );
}

#[test]
fn sasl_plain_payload_encodes_identity_twice() {
    let sasl = SaslPlain {
        username: "bot".to_owned(),
        password: "hunter2".to_owned(),
    };
    let encoded = sasl_plain_payload(&sasl);
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded);
    assert_eq!(decoded.ok(), Some(b"bot\0bot\0hunter2".to_vec()));

    let debug = format!("{sasl:?}");
    assert!(!debug.contains("hunter2"));
}

struct FakeServer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl FakeServer {
    async fn expect(&mut self, wanted: &str) {
        let next = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line()).await;
        match next {
            Ok(Ok(Some(got))) => assert_eq!(got, wanted),
            other => panic!("expected {wanted:?}, got {other:?}"),
        }
    }

    async fn say(&mut self, raw: &str) {
        self.say_bytes(format!("{raw}\r\n").as_bytes()).await;
    }

    async fn say_bytes(&mut self, raw: &[u8]) {
        let written = self.writer.write_all(raw).await;
        assert!(written.is_ok());
    }
}

async fn listen() -> (TcpListener, u16) {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) => panic!("bind failed: {e}"),
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => panic!("no local addr: {e}"),
    };
    (listener, port)
}

async fn accept(listener: &TcpListener) -> FakeServer {
    let (stream, _) = match listener.accept().await {
        Ok(pair) => pair,
        Err(e) => panic!("accept failed: {e}"),
    };
    let (read, writer) = stream.into_split();
    FakeServer {
        lines: BufReader::new(read).lines(),
        writer,
    }
}

fn settings(port: u16, sasl: Option<Sasl>) -> ClientSettings {
    ClientSettings {
        host: "127.0.0.1".to_owned(),
        port,
        tls: None,
        nickname: "bot".to_owned(),
        realname: "Notifier".to_owned(),
        sasl,
    }
}

fn connector(settings: ClientSettings) -> IrcConnector {
    match IrcConnector::new(settings) {
        Ok(connector) => connector,
        Err(e) => panic!("connector should build: {e}"),
    }
}

async fn connect(connector: &IrcConnector) -> Connection {
    match connector.connect().await {
        Ok(connection) => connection,
        Err(e) => panic!("connect failed: {e}"),
    }
}

#[tokio::test]
async fn registers_with_nick_retry_and_forwards_events() {
    let (listener, port) = listen().await;
    let connector = connector(settings(port, None));
    assert_eq!(connector.server(), format!("127.0.0.1:{port}"));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv 433 * bot :Nickname is already in use").await;
        server.expect("NICK bot_").await;
        server.say(":srv 001 bot_ :Welcome").await;
        server.say("PING :keep").await;
        server.say(":bot_!b@h JOIN #ops").await;
        server.expect("JOIN #ops").await;
        server.expect("PRIVMSG #ops :hello").await;
        server
    });

    let Connection {
        mut session,
        mut events,
    } = match connector.connect().await {
        Ok(connection) => connection,
        Err(e) => panic!("connect failed: {e}"),
    };

    assert_eq!(events.recv().await, Some(SessionEvent::Ping("keep".to_owned())));
    assert_eq!(events.recv().await, Some(SessionEvent::Joined("#ops".to_owned())));

    assert!(session.join("#ops").await.is_ok());
    assert!(session.send("#ops", "hello").await.is_ok());

    let server = match server.await {
        Ok(server) => server,
        Err(e) => panic!("server task failed: {e}"),
    };
    drop(server);
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn authenticates_with_sasl_plain() {
    let (listener, port) = listen().await;
    let sasl = SaslPlain {
        username: "bot".to_owned(),
        password: "secret".to_owned(),
    };
    let payload = sasl_plain_payload(&sasl);
    let connector = connector(settings(port, Some(Sasl::Plain(sasl))));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("CAP REQ :sasl").await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv CAP * ACK :sasl").await;
        server.expect("AUTHENTICATE PLAIN").await;
        server.say("AUTHENTICATE +").await;
        server.expect(&format!("AUTHENTICATE {payload}")).await;
        server.say(":srv 903 bot :SASL authentication successful").await;
        server.expect("CAP END").await;
        server.say(":srv 001 bot :Welcome").await;
        server
    });

    let connected = connector.connect().await;
    assert!(connected.is_ok());
    assert!(server.await.is_ok());
}

#[tokio::test]
async fn sasl_failure_aborts_registration() {
    let (listener, port) = listen().await;
    let sasl = SaslPlain {
        username: "bot".to_owned(),
        password: "wrong".to_owned(),
    };
    let connector = connector(settings(port, Some(Sasl::Plain(sasl))));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("CAP REQ :sasl").await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv CAP * ACK :sasl").await;
        server.expect("AUTHENTICATE PLAIN").await;
        server.say("AUTHENTICATE +").await;
        let _payload = server.lines.next_line().await;
        server.say(":srv 904 bot :SASL authentication failed").await;
        server
    });

    let connected = connector.connect().await;
    assert!(matches!(connected, Err(IrcError::Sasl(_))));
    assert!(server.await.is_ok());
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let (listener, port) = listen().await;
    drop(listener);
    let connector = connector(settings(port, None));
    assert!(connector.connect().await.is_err());
}

#[tokio::test]
async fn undecodable_bytes_do_not_end_the_session() {
    let (listener, port) = listen().await;
    let connector = connector(settings(port, None));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv 001 bot :Welcome").await;
        server.say_bytes(b":alice!a@h PRIVMSG #ops :caf\xe9\r\n").await;
        server.say_bytes(b":alice!a@h PRIVMSG bot :na\xefve\r\n").await;
        server.say("PING :still-here").await;
        server
    });

    let Connection { session, mut events } = connect(&connector).await;
    assert_eq!(events.recv().await, Some(SessionEvent::Other));
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Query {
            from: "alice".to_owned(),
            text: "na\u{fffd}ve".to_owned(),
        })
    );
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Ping("still-here".to_owned()))
    );

    assert!(server.await.is_ok());
    drop(session);
}

#[tokio::test]
async fn dropping_the_session_closes_the_socket() {
    let (listener, port) = listen().await;
    let connector = connector(settings(port, None));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv 001 bot :Welcome").await;
        let eof = tokio::time::timeout(Duration::from_secs(5), server.lines.next_line()).await;
        assert!(matches!(eof, Ok(Ok(None))), "socket still open: {eof:?}");
    });

    let Connection {
        session,
        mut events,
    } = connect(&connector).await;
    drop(session);

    assert!(server.await.is_ok());
    let ended = tokio::time::timeout(Duration::from_secs(5), events.recv()).await;
    assert!(matches!(ended, Ok(None)));
}

#[tokio::test]
async fn authenticates_with_sasl_external() {
    let (listener, port) = listen().await;
    let connector = connector(settings(port, Some(Sasl::External { identity: None })));

    let server = tokio::spawn(async move {
        let mut server = accept(&listener).await;
        server.expect("CAP REQ :sasl").await;
        server.expect("NICK bot").await;
        server.expect("USER bot 0 * :Notifier").await;
        server.say(":srv CAP * ACK :sasl").await;
        server.expect("AUTHENTICATE EXTERNAL").await;
        server.say("AUTHENTICATE +").await;
        server.expect("AUTHENTICATE +").await;
        server.say(":srv 903 bot :SASL authentication successful").await;
        server.expect("CAP END").await;
        server.say(":srv 001 bot :Welcome").await;
        server
    });

    let connected = connector.connect().await;
    assert!(connected.is_ok());
    assert!(server.await.is_ok());
}

fn pem_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(e) => panic!("should create temp file: {e}"),
    };
    assert!(file.write_all(contents.as_bytes()).is_ok());
    file
}

fn tls_settings(tls: TlsSettings) -> ClientSettings {
    ClientSettings {
        tls: Some(tls),
        ..settings(6697, None)
    }
}

#[test]
fn bundled_roots_build_a_tls_connector() {
    assert!(IrcConnector::new(tls_settings(TlsSettings::default())).is_ok());
}

#[test]
fn ca_file_without_certificates_is_rejected() {
    let file = pem_file("not a certificate\n");
    let built = IrcConnector::new(tls_settings(TlsSettings {
        ca_file: Some(file.path().to_path_buf()),
        client_cert: None,
    }));
    assert!(matches!(built, Err(IrcError::Tls(msg)) if msg.contains("no certificates")));
}

#[test]
fn unreadable_client_certificate_is_rejected() {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => panic!("should create temp dir: {e}"),
    };
    let built = IrcConnector::new(tls_settings(TlsSettings {
        ca_file: None,
        client_cert: Some(ClientCert {
            cert_file: dir.path().join("bot.crt"),
            key_file: dir.path().join("bot.key"),
        }),
    }));
    assert!(matches!(built, Err(IrcError::Tls(msg)) if msg.contains("bot.crt")));
}
