//! IRC client with SASL PLAIN support.
//!
//! This is the main entry point for SDK consumers. It manages the TCP
//! connection, IRC registration, CAP/SASL negotiation, keepalive, and emits
//! events. Supports both plaintext and TLS connections.
//!
//! Commands sent through a [`ClientHandle`] before registration completes
//! are queued and flushed once the server sends `001`.
//!
//! ## Reconnection
//!
//! The SDK does not reconnect on its own. Listen for
//! [`Event::Disconnected`] and dial again, pacing attempts with
//! [`ReconnectConfig::next_delay`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::Engine;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::Message;

/// Nick collisions tolerated during registration before giving up.
const MAX_NICK_RETRIES: usize = 5;

/// Account credentials for SASL PLAIN.
#[derive(Debug, Clone)]
pub struct SaslCredentials {
    pub account: String,
    pub password: String,
}

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Server password sent with `PASS`.
    pub password: Option<String>,
    /// Use TLS.
    pub tls: bool,
    /// Skip TLS certificate verification (for self-signed certs).
    pub tls_insecure: bool,
    /// Authenticate with SASL PLAIN during registration.
    pub sasl: Option<SaslCredentials>,
    /// Idle time before we PING the server. Twice this with no traffic is a timeout.
    pub keepalive: Duration,
    /// Bound on TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "herald".to_string(),
            user: "herald".to_string(),
            realname: "herald announce monitor".to_string(),
            password: None,
            tls: false,
            tls_insecure: false,
            sasl: None,
            keepalive: Duration::from_secs(240),
            connect_timeout: Duration::from_secs(120),
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { channel: String, key: Option<String> },
    Part { channel: String, reason: Option<String> },
    Privmsg { target: String, text: String },
    Mode { target: String, flags: String, arg: Option<String> },
    Raw(String),
    Quit(Option<String>),
}

impl Command {
    /// Wire form of the command, without the line terminator.
    pub fn to_line(&self) -> String {
        let msg = match self {
            Command::Join { channel, key } => {
                let mut params = vec![channel.clone()];
                params.extend(key.iter().cloned());
                Message::new("JOIN", params)
            }
            Command::Part { channel, reason } => {
                let mut params = vec![channel.clone()];
                params.extend(reason.iter().cloned());
                Message::new("PART", params)
            }
            Command::Privmsg { target, text } => {
                Message::new("PRIVMSG", vec![target.clone(), text.clone()])
            }
            Command::Mode { target, flags, arg } => {
                let mut params = vec![target.clone(), flags.clone()];
                params.extend(arg.iter().cloned());
                Message::new("MODE", params)
            }
            Command::Raw(line) => return line.clone(),
            Command::Quit(reason) => Message::new("QUIT", reason.iter().cloned().collect()),
        };
        msg.to_string()
    }
}

/// A handle to a running IRC client connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    /// Wrap a command channel. The receiving end is normally owned by the
    /// protocol task started with [`connect_with_stream`].
    pub fn new(cmd_tx: mpsc::Sender<Command>) -> Self {
        Self { cmd_tx }
    }

    pub async fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("connection closed"))?;
        Ok(())
    }

    pub async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        self.send(Command::Join {
            channel: channel.to_string(),
            key: key.map(|s| s.to_string()),
        })
        .await
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) -> Result<()> {
        self.send(Command::Part {
            channel: channel.to_string(),
            reason: reason.map(|s| s.to_string()),
        })
        .await
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::Privmsg {
            target: target.to_string(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn mode(&self, target: &str, flags: &str, arg: Option<&str>) -> Result<()> {
        self.send(Command::Mode {
            target: target.to_string(),
            flags: flags.to_string(),
            arg: arg.map(|s| s.to_string()),
        })
        .await
    }

    pub async fn raw(&self, line: &str) -> Result<()> {
        self.send(Command::Raw(line.to_string())).await
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.send(Command::Quit(message.map(|s| s.to_string()))).await
    }

    /// True once the protocol task has exited.
    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

/// Establish TCP (and optionally TLS) connection to the server, bounded by
/// `config.connect_timeout`.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    match tokio::time::timeout(config.connect_timeout, dial(config)).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!(
            "connect to {} timed out after {}s",
            config.server_addr,
            config.connect_timeout.as_secs()
        ),
    }
}

async fn dial(config: &ConnectConfig) -> Result<EstablishedConnection> {
    // Auto-detect TLS from port if not explicitly set
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let tls_config = if config.tls_insecure {
        tracing::debug!("TLS: insecure mode (skipping cert verification)");
        rustls_insecure_config()
    } else {
        tracing::debug!("TLS: verifying server certificate...");
        rustls_default_config()
    };
    let connector = TlsConnector::from(Arc::new(tls_config));
    let host = config
        .server_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(&config.server_addr)
        .trim_start_matches('[')
        .trim_end_matches(']');
    let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(tls_stream))
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

/// Connect using an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The IRC protocol runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    match conn {
        EstablishedConnection::Plain(tcp) => connect_with_io(tcp, config),
        EstablishedConnection::Tls(tls) => connect_with_io(tls, config),
    }
}

/// Run the protocol over any byte stream (TCP, TLS, in-memory duplex).
///
/// Exactly one [`Event::Disconnected`] is emitted when the task ends.
pub fn connect_with_io<S>(stream: S, config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let (reader, writer) = tokio::io::split(stream);
        let reason = match run_irc(BufReader::new(reader), writer, &config, &event_tx, cmd_rx).await {
            Ok(reason) => reason,
            Err(e) => e.to_string(),
        };
        tracing::debug!(server = %config.server_addr, %reason, "IRC connection closed");
        let _ = event_tx.send(Event::Disconnected { reason }).await;
    });

    (ClientHandle::new(cmd_tx), event_rx)
}

fn install_crypto_provider() {
    // Install a crypto provider for rustls.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn rustls_insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
        .with_no_client_auth()
}

#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    tracing::trace!(line, ">>");
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}

/// Drive one connection until it closes. Returns the disconnect reason.
async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_line(&mut writer, "CAP LS 302").await?;
    if let Some(ref pass) = config.password {
        write_line(&mut writer, &format!("PASS {pass}")).await?;
    }
    write_line(&mut writer, &format!("NICK {}", config.nick)).await?;
    write_line(&mut writer, &format!("USER {} 0 * :{}", config.user, config.realname)).await?;

    let mut registered = false;
    let mut quitting = false;
    let mut nick_tries: usize = 0;
    let mut cap_ls: Vec<String> = Vec::new();
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut server_error: Option<String> = None;
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = Instant::now();
    let mut last_ping_sent: Option<Instant> = None;

    loop {
        // One outstanding keepalive PING at a time; a second interval of
        // silence after it is a timeout.
        let ping_outstanding = last_ping_sent.is_some_and(|sent| sent >= last_activity);
        let deadline = if ping_outstanding {
            last_activity + config.keepalive * 2
        } else {
            last_activity + config.keepalive
        };

        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(server_error.unwrap_or_else(|| "EOF".to_string()));
                }

                last_activity = Instant::now();
                // Servers relay whatever encoding the sender used.
                let line = String::from_utf8_lossy(&line_buf).into_owned();
                line_buf.clear();
                tracing::trace!(line = %line.trim_end(), "<<");

                let Some(msg) = Message::parse(&line) else {
                    continue;
                };

                let nick = msg.nick().unwrap_or("").to_string();
                match msg.command.as_str() {
                    "CAP" => {
                        handle_cap(&msg, config, &mut cap_ls, &mut writer).await?;
                    }
                    "AUTHENTICATE" => {
                        if msg.param(0) == "+" {
                            if let Some(ref sasl) = config.sasl {
                                let payload = format!("{0}\0{0}\0{1}", sasl.account, sasl.password);
                                let encoded = base64::engine::general_purpose::STANDARD.encode(payload);
                                writer.write_all(format!("AUTHENTICATE {encoded}\r\n").as_bytes()).await?;
                            }
                        }
                    }
                    // RPL_SASLSUCCESS
                    "903" => {
                        let account = config.sasl.as_ref().map(|s| s.account.clone()).unwrap_or_default();
                        let _ = event_tx.send(Event::Authenticated { account }).await;
                        write_line(&mut writer, "CAP END").await?;
                    }
                    // ERR_NICKLOCKED, ERR_SASLFAIL, ERR_SASLTOOLONG, ERR_SASLABORTED
                    "902" | "904" | "905" | "906" => {
                        let reason = msg.params.last().cloned().unwrap_or_default();
                        let _ = event_tx.send(Event::AuthFailed { reason }).await;
                        write_line(&mut writer, "CAP END").await?;
                    }
                    // ERR_NICKNAMEINUSE
                    "433" if !registered => {
                        nick_tries += 1;
                        if nick_tries > MAX_NICK_RETRIES {
                            return Ok("nick in use".to_string());
                        }
                        let alt = format!("{}{}", config.nick, "_".repeat(nick_tries));
                        write_line(&mut writer, &format!("NICK {alt}")).await?;
                    }
                    "001" => {
                        let nick = msg.param(0).to_string();
                        let _ = event_tx.send(Event::Registered { nick }).await;
                        registered = true;
                        // Flush any commands that were queued before registration
                        for cmd in pending_commands.drain(..) {
                            write_line(&mut writer, &cmd.to_line()).await?;
                        }
                    }
                    // RPL_ISUPPORT
                    "005" => {
                        let tokens = if msg.params.len() > 2 {
                            msg.params[1..msg.params.len() - 1].to_vec()
                        } else {
                            Vec::new()
                        };
                        let _ = event_tx.send(Event::ISupport { tokens }).await;
                    }
                    "376" | "422" => {
                        let _ = event_tx.send(Event::Ready).await;
                    }
                    "PING" => {
                        let token = msg.param(0);
                        writer.write_all(format!("PONG :{token}\r\n").as_bytes()).await?;
                        let _ = event_tx.send(Event::Ping).await;
                    }
                    "PONG" => {
                        let _ = event_tx.send(Event::Pong).await;
                    }
                    "JOIN" => {
                        let channel = msg.param(0).to_string();
                        let _ = event_tx.send(Event::Joined { channel, nick }).await;
                    }
                    // RPL_ENDOFNAMES
                    "366" => {
                        let channel = msg.param(1).to_string();
                        let _ = event_tx.send(Event::NamesEnd { channel }).await;
                    }
                    "PART" => {
                        let channel = msg.param(0).to_string();
                        let _ = event_tx.send(Event::Parted { channel, nick }).await;
                    }
                    "KICK" => {
                        let _ = event_tx.send(Event::Kicked {
                            channel: msg.param(0).to_string(),
                            nick: msg.param(1).to_string(),
                            by: nick,
                            reason: msg.param(2).to_string(),
                        }).await;
                    }
                    "INVITE" => {
                        let channel = msg.param(1).to_string();
                        let _ = event_tx.send(Event::Invited { channel, by: nick }).await;
                    }
                    "MODE" => {
                        let _ = event_tx.send(Event::ModeChanged {
                            target: msg.param(0).to_string(),
                            mode: msg.param(1).to_string(),
                            arg: msg.params.get(2).cloned(),
                            set_by: nick,
                        }).await;
                    }
                    "NICK" => {
                        let new_nick = msg.param(0).to_string();
                        let _ = event_tx.send(Event::NickChanged { old_nick: nick, new_nick }).await;
                    }
                    "PRIVMSG" => {
                        let _ = event_tx.send(Event::Message {
                            from: nick,
                            target: msg.param(0).to_string(),
                            text: msg.param(1).to_string(),
                        }).await;
                    }
                    "NOTICE" => {
                        // Server notices carry a bare host name as prefix.
                        let from = msg
                            .prefix
                            .as_deref()
                            .filter(|p| p.contains('!'))
                            .map(|_| nick);
                        let _ = event_tx.send(Event::Notice {
                            from,
                            target: msg.param(0).to_string(),
                            text: msg.param(1).to_string(),
                        }).await;
                    }
                    // ERR_NOSUCHNICK
                    "401" => {
                        let nick = msg.param(1).to_string();
                        let _ = event_tx.send(Event::NoSuchNick { nick }).await;
                    }
                    "403" | "405" | "471" | "473" | "474" | "475" | "477" => {
                        let _ = event_tx.send(Event::JoinFailed {
                            channel: msg.param(1).to_string(),
                            reason: msg.params.last().cloned().unwrap_or_default(),
                        }).await;
                    }
                    "ERROR" => {
                        let reason = msg.param(0).to_string();
                        tracing::warn!(server = %config.server_addr, %reason, "Server closed link");
                        server_error = Some(reason);
                    }
                    _ => {}
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                let is_quit = matches!(cmd, Command::Quit(_));
                if registered || is_quit {
                    write_line(&mut writer, &cmd.to_line()).await?;
                    if is_quit {
                        if !registered {
                            return Ok("quit".to_string());
                        }
                        quitting = true;
                    }
                } else {
                    // Queue until registered; commands silently wait
                    pending_commands.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if quitting {
                    return Ok("quit".to_string());
                }
                if ping_outstanding {
                    return Ok("ping timeout".to_string());
                }
                writer.write_all(b"PING :keepalive\r\n").await?;
                last_ping_sent = Some(Instant::now());
            }
        }
    }
}

async fn handle_cap<W: AsyncWrite + Unpin>(
    msg: &Message,
    config: &ConnectConfig,
    cap_ls: &mut Vec<String>,
    writer: &mut W,
) -> Result<()> {
    let subcmd = msg.param(1).to_ascii_uppercase();
    match subcmd.as_str() {
        "LS" => {
            // Multi-line LS: `CAP * LS * :caps...` until the last line.
            let more = msg.params.len() >= 4 && msg.param(2) == "*";
            let caps = msg.params.last().map(|s| s.as_str()).unwrap_or("");
            cap_ls.extend(caps.split_whitespace().map(|s| s.to_string()));
            if more {
                return Ok(());
            }
            let offers_sasl = cap_ls.iter().any(|c| c == "sasl" || c.starts_with("sasl="));
            cap_ls.clear();
            if offers_sasl && config.sasl.is_some() {
                write_line(writer, "CAP REQ :sasl").await?;
            } else {
                write_line(writer, "CAP END").await?;
            }
        }
        "ACK" => {
            let caps = msg.params.last().map(|s| s.as_str()).unwrap_or("");
            if caps.split_whitespace().any(|c| c == "sasl") {
                write_line(writer, "AUTHENTICATE PLAIN").await?;
            } else {
                write_line(writer, "CAP END").await?;
            }
        }
        "NAK" => {
            write_line(writer, "CAP END").await?;
        }
        _ => {}
    }
    Ok(())
}

// ── Reconnect helper ──

/// Backoff policy for reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay to use after `current`: exponential growth plus up to 25% jitter,
    /// capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let current_ms = current.as_millis() as u64;
        let jitter = rand_jitter(current_ms / 4);
        let next = (current_ms as f64 * self.backoff_factor) as u64 + jitter;
        Duration::from_millis(next.min(self.max_delay.as_millis() as u64))
    }
}

/// Random value in `0..max`.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, DuplexStream, Lines, ReadHalf, WriteHalf};

    struct FakeServer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn expect(&mut self, expected: &str) {
            let line = tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
                .await
                .expect("timed out waiting for client line")
                .unwrap()
                .expect("client closed");
            assert_eq!(line, expected);
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        }

        async fn send_bytes(&mut self, line: &[u8]) {
            self.writer.write_all(line).await.unwrap();
            self.writer.write_all(b"\r\n").await.unwrap();
        }
    }

    fn start(config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>, FakeServer) {
        let (client_io, server_io) = tokio::io::duplex(8192);
        let (handle, events) = connect_with_io(client_io, config);
        let (r, w) = tokio::io::split(server_io);
        let server = FakeServer {
            lines: BufReader::new(r).lines(),
            writer: w,
        };
        (handle, events, server)
    }

    async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn register(server: &mut FakeServer) {
        server.expect("CAP LS 302").await;
        server.expect("NICK herald").await;
        server.expect("USER herald 0 * :herald announce monitor").await;
        server.send(":irc.test CAP * LS :multi-prefix").await;
        server.expect("CAP END").await;
        server.send(":irc.test 001 herald :Welcome").await;
    }

    #[tokio::test]
    async fn test_registration_flushes_pending_commands() {
        let (handle, mut events, mut server) = start(ConnectConfig::default());
        handle.join("#announce", Some("secret")).await.unwrap();
        register(&mut server).await;

        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert_eq!(
            next_event(&mut events).await,
            Event::Registered { nick: "herald".into() }
        );
        server.expect("JOIN #announce secret").await;
    }

    #[tokio::test]
    async fn test_server_password_sent_before_nick() {
        let config = ConnectConfig {
            password: Some("hunter2".into()),
            ..Default::default()
        };
        let (_handle, _events, mut server) = start(config);
        server.expect("CAP LS 302").await;
        server.expect("PASS hunter2").await;
        server.expect("NICK herald").await;
    }

    #[tokio::test]
    async fn test_sasl_plain() {
        let config = ConnectConfig {
            sasl: Some(SaslCredentials {
                account: "acct".into(),
                password: "pw".into(),
            }),
            ..Default::default()
        };
        let (_handle, mut events, mut server) = start(config);
        server.expect("CAP LS 302").await;
        server.expect("NICK herald").await;
        server.expect("USER herald 0 * :herald announce monitor").await;
        server.send(":irc.test CAP * LS * :multi-prefix").await;
        server.send(":irc.test CAP * LS :sasl=PLAIN,EXTERNAL").await;
        server.expect("CAP REQ :sasl").await;
        server.send(":irc.test CAP * ACK :sasl").await;
        server.expect("AUTHENTICATE PLAIN").await;
        server.send("AUTHENTICATE +").await;
        let expected = base64::engine::general_purpose::STANDARD.encode("acct\0acct\0pw");
        server.expect(&format!("AUTHENTICATE {expected}")).await;
        server.send(":irc.test 903 herald :SASL authentication successful").await;
        server.expect("CAP END").await;

        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert_eq!(
            next_event(&mut events).await,
            Event::Authenticated { account: "acct".into() }
        );
    }

    #[tokio::test]
    async fn test_nick_collision_appends_underscore() {
        let (_handle, _events, mut server) = start(ConnectConfig::default());
        server.expect("CAP LS 302").await;
        server.expect("NICK herald").await;
        server.expect("USER herald 0 * :herald announce monitor").await;
        server.send(":irc.test 433 * herald :Nickname is already in use").await;
        server.expect("NICK herald_").await;
        server.send(":irc.test 433 * herald_ :Nickname is already in use").await;
        server.expect("NICK herald__").await;
    }

    #[tokio::test]
    async fn test_ping_answered_and_events_translated() {
        let (_handle, mut events, mut server) = start(ConnectConfig::default());
        register(&mut server).await;
        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert!(matches!(next_event(&mut events).await, Event::Registered { .. }));

        server.send("PING :irc.test").await;
        server.expect("PONG :irc.test").await;
        assert_eq!(next_event(&mut events).await, Event::Ping);

        server.send(":irc.test 005 herald BOT=B CHANTYPES=# :are supported by this server").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::ISupport { tokens: vec!["BOT=B".into(), "CHANTYPES=#".into()] }
        );

        server.send(":Bot!b@h INVITE herald :#announce").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::Invited { channel: "#announce".into(), by: "Bot".into() }
        );

        server.send(":irc.test 366 herald #announce :End of /NAMES list.").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::NamesEnd { channel: "#announce".into() }
        );

        server.send(":irc.test 475 herald #vip :Cannot join channel (+k)").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::JoinFailed { channel: "#vip".into(), reason: "Cannot join channel (+k)".into() }
        );

        server.send(":irc.test NOTICE herald :*** server notice").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::Notice { from: None, target: "herald".into(), text: "*** server notice".into() }
        );
    }

    #[tokio::test]
    async fn test_latin1_line_decoded_lossily() {
        let (_handle, mut events, mut server) = start(ConnectConfig::default());
        register(&mut server).await;
        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert!(matches!(next_event(&mut events).await, Event::Registered { .. }));

        server.send_bytes(b":Bot!b@h PRIVMSG #announce :Caf\xe9 release").await;
        assert_eq!(
            next_event(&mut events).await,
            Event::Message {
                from: "Bot".into(),
                target: "#announce".into(),
                text: "Caf\u{FFFD} release".into(),
            }
        );

        server.send("PING :irc.test").await;
        server.expect("PONG :irc.test").await;
        assert_eq!(next_event(&mut events).await, Event::Ping);
    }

    #[tokio::test]
    async fn test_disconnect_reports_server_error() {
        let (_handle, mut events, mut server) = start(ConnectConfig::default());
        server.expect("CAP LS 302").await;
        server.send("ERROR :Closing Link: banned").await;
        drop(server);

        assert_eq!(next_event(&mut events).await, Event::Connected);
        assert_eq!(
            next_event(&mut events).await,
            Event::Disconnected { reason: "Closing Link: banned".into() }
        );
    }

    #[test]
    fn test_command_lines() {
        let part = Command::Part { channel: "#c".into(), reason: None };
        assert_eq!(part.to_line(), "PART #c");
        let mode = Command::Mode { target: "herald".into(), flags: "+B".into(), arg: None };
        assert_eq!(mode.to_line(), "MODE herald +B");
        assert_eq!(Command::Quit(None).to_line(), "QUIT");
    }

    #[test]
    fn test_next_delay_capped() {
        let cfg = ReconnectConfig::default();
        let next = cfg.next_delay(Duration::from_secs(15));
        assert!(next >= Duration::from_secs(30));
        assert!(next < Duration::from_secs(34));
        assert_eq!(cfg.next_delay(Duration::from_secs(200)), Duration::from_secs(300));
    }
}
