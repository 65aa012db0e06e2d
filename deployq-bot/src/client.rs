//! Minimal IRC client for the deploy bot.
//!
//! Manages the TCP (optionally TLS) connection, NICK/USER registration and
//! keepalive, and turns server lines into [`Event`]s. Outbound traffic goes
//! through a cloneable [`ClientHandle`] backed by an mpsc channel, so any
//! task can talk to the server without owning the socket.
//!
//! ## Reconnection
//!
//! [`run_with_reconnect`] wraps the whole lifecycle: it reconnects with
//! exponential backoff (2→4→8→16→30s cap by default) and rejoins the
//! configured channels once the server has accepted registration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::Message;

/// How often we probe an idle connection.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Silence after which the connection is considered dead.
const PING_TIMEOUT: Duration = Duration::from_secs(120);
/// Alternate nicks tried when ours is taken.
const MAX_NICK_TRIES: u32 = 5;

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
    /// Use TLS.
    pub tls: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "deployq".to_string(),
            user: "deployq".to_string(),
            realname: "deploy queue bot".to_string(),
            tls: false,
        }
    }
}

/// Commands the bot can send through the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Privmsg { target: String, text: String },
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }

    /// A handle wired to a bare channel instead of a connection.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        (Self { cmd_tx }, cmd_rx)
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish the TCP (and optionally TLS) connection to the server.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    // Port 6697 is TLS by convention
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

    let connector = TlsConnector::from(Arc::new(tls_config()));
    let host = config
        .server_addr
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(&config.server_addr);
    let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
    let tls = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls)))
}

fn tls_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Run the IRC protocol over an established connection.
///
/// Returns a handle for sending commands and a receiver for events. The
/// protocol runs in a spawned task; its end is reported as
/// [`Event::Disconnected`].
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (ClientHandle { cmd_tx }, event_rx)
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_line(&mut writer, &format!("NICK {}", config.nick)).await?;
    send_line(
        &mut writer,
        &format!("USER {} 0 * :{}", config.user, config.realname),
    )
    .await?;

    let mut nick = config.nick.clone();
    let mut nick_tries: u32 = 0;
    let mut registered = false;
    // JOINs and messages sent before 001 are dropped by servers
    let mut pending: Vec<Command> = Vec::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = Instant::now();
    let mut keepalive = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);

    loop {
        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                if result? == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }
                last_activity = Instant::now();

                // Clients send whatever encoding they like; bad bytes become U+FFFD
                let parsed = Message::parse(&String::from_utf8_lossy(&line_buf));
                line_buf.clear();
                let Some(msg) = parsed else { continue };

                match msg.command.as_str() {
                    "PING" => {
                        let token = msg.params.first().map(String::as_str).unwrap_or("");
                        send_line(&mut writer, &format!("PONG :{token}")).await?;
                    }
                    // RPL_WELCOME
                    "001" => {
                        registered = true;
                        if let Some(confirmed) = msg.params.first() {
                            nick = confirmed.clone();
                        }
                        tracing::debug!(nick = %nick, "Registered");
                        let _ = event_tx.send(Event::Registered { nick: nick.clone() }).await;
                        for cmd in pending.drain(..) {
                            execute_command(&mut writer, cmd).await?;
                        }
                    }
                    // ERR_NICKNAMEINUSE
                    "433" if !registered => {
                        nick_tries += 1;
                        if nick_tries > MAX_NICK_TRIES {
                            let _ = event_tx.send(Event::Disconnected { reason: "Nick in use".to_string() }).await;
                            break;
                        }
                        let alt = format!("{}{}", config.nick, nick_tries);
                        tracing::debug!(nick = %alt, "Nick taken, trying alternate");
                        send_line(&mut writer, &format!("NICK {alt}")).await?;
                    }
                    "JOIN" => {
                        if let (Some(from), Some(channel)) = (msg.nick(), msg.params.first()) {
                            let _ = event_tx.send(Event::Joined {
                                channel: channel.clone(),
                                nick: from.to_string(),
                            }).await;
                        }
                    }
                    "PRIVMSG" => {
                        if let (Some(from), [target, text, ..]) = (msg.nick(), msg.params.as_slice()) {
                            let _ = event_tx.send(Event::Message {
                                from: from.to_string(),
                                target: target.clone(),
                                text: text.clone(),
                            }).await;
                        }
                    }
                    "NICK" => {
                        if let (Some(old), Some(new)) = (msg.nick(), msg.params.first()) {
                            if old == nick {
                                nick = new.clone();
                            }
                            let _ = event_tx.send(Event::NickChanged {
                                old_nick: old.to_string(),
                                new_nick: new.clone(),
                            }).await;
                        }
                    }
                    "NOTICE" => {
                        if let Some(text) = msg.params.last() {
                            let _ = event_tx.send(Event::ServerNotice { text: text.clone() }).await;
                        }
                    }
                    "ERROR" => {
                        let reason = msg.params.last().cloned().unwrap_or_else(|| "ERROR".to_string());
                        let _ = event_tx.send(Event::Disconnected { reason }).await;
                        break;
                    }
                    _ => {}
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Quit(reason)) => {
                        execute_command(&mut writer, Command::Quit(reason)).await?;
                        let _ = event_tx.send(Event::Disconnected { reason: "Quit".to_string() }).await;
                        break;
                    }
                    Some(cmd) if !registered => pending.push(cmd),
                    Some(cmd) => execute_command(&mut writer, cmd).await?,
                    None => break,
                }
            }

            _ = keepalive.tick() => {
                let idle = last_activity.elapsed();
                if idle > PING_TIMEOUT {
                    let _ = event_tx.send(Event::Disconnected { reason: "Ping timeout".to_string() }).await;
                    break;
                }
                if idle > PING_INTERVAL {
                    send_line(&mut writer, &format!("PING :{nick}")).await?;
                }
            }
        }
    }

    Ok(())
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: Command) -> Result<()> {
    let (command, params) = match cmd {
        Command::Join(channel) => ("JOIN", vec![channel]),
        Command::Privmsg { target, text } => ("PRIVMSG", vec![target, text]),
        Command::Quit(Some(reason)) => ("QUIT", vec![reason]),
        Command::Quit(None) => ("QUIT", vec![]),
    };
    let msg = Message {
        command: command.to_string(),
        params,
        ..Default::default()
    };
    send_line(writer, &msg.to_string()).await
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    // A stray newline would smuggle a second command onto the wire
    let line: String = line.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

// ── Reconnect helper ──

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Channels to rejoin after reconnecting.
    pub channels: Vec<String>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            channels: Vec::new(),
        }
    }
}

impl ReconnectConfig {
    fn next_delay(&self, delay: Duration) -> Duration {
        let jitter = rand_jitter(delay.as_millis() as u64 / 4);
        Duration::from_millis(
            ((delay.as_millis() as f64 * self.backoff_factor) as u64 + jitter)
                .min(self.max_delay.as_millis() as u64),
        )
    }
}

type HandlerFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>;

/// Run an event loop with automatic reconnection.
///
/// The `handler` is called for each event. Handler errors are logged and
/// do not stop the loop. Never returns under normal operation.
pub async fn run_with_reconnect<F>(
    config: ConnectConfig,
    reconnect_config: ReconnectConfig,
    handler: F,
) -> Result<()>
where
    F: Fn(ClientHandle, Event) -> HandlerFuture + Send + Sync,
{
    let mut delay = reconnect_config.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        let conn = match establish_connection(&config).await {
            Ok(c) => {
                consecutive_failures = 0;
                delay = reconnect_config.initial_delay;
                c
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = reconnect_config.next_delay(delay);
                continue;
            }
        };

        let (handle, mut events) = connect_with_stream(conn, config.clone());

        while let Some(event) = events.recv().await {
            if matches!(&event, Event::Registered { .. }) {
                for ch in &reconnect_config.channels {
                    let _ = handle.join(ch).await;
                }
            }
            let disconnected = matches!(&event, Event::Disconnected { .. });
            if let Err(e) = handler(handle.clone(), event).await {
                tracing::error!(error = %e, "Handler error");
            }
            if disconnected {
                break;
            }
        }

        tracing::info!(delay_secs = delay.as_secs(), "Disconnected, will reconnect");
        tokio::time::sleep(delay).await;
        delay = reconnect_config.next_delay(delay);
    }
}

/// Jitter in `0..max` from the clock's sub-second nanos.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max
}
