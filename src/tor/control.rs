//! Tor Control Port client
//!
//! Commands are written under a lock and their replies are matched in
//! order by a background reader task. Asynchronous `650` events are
//! forwarded to an event channel handed out at connect time.

use super::circuit::{CircuitId, RelayId};
use super::protocol::{FrameReader, Reply};
use super::TorError;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Cookie file name Tor writes into its data directory
pub const COOKIE_FILE: &str = "control_auth_cookie";

/// Common system cookie file locations
const COOKIE_PATHS: &[&str] = &[
    "/run/tor/control.authcookie",
    "/var/run/tor/control.authcookie",
    "/var/lib/tor/control_auth_cookie",
];

/// Receiver of asynchronous events
pub type EventReceiver = mpsc::UnboundedReceiver<Reply>;

/// Commands awaiting replies, in the order they were written
#[derive(Default)]
struct Pending {
    waiters: VecDeque<oneshot::Sender<Result<Reply, TorError>>>,
    closed: bool,
}

type PendingReplies = Arc<Mutex<Pending>>;

/// How to reach and authenticate to a control port
#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    /// Cookie file to try before the system locations
    pub cookie_path: Option<PathBuf>,
}

/// Connection to Tor control port
pub struct TorController {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingReplies,
    reader: JoinHandle<()>,
}

impl TorController {
    /// Connect, authenticate and start the reader task
    pub async fn connect(settings: &ControlSettings) -> Result<(Self, EventReceiver), TorError> {
        let addr = format!("{}:{}", settings.host, settings.port);
        debug!("Connecting to Tor control port: {}", addr);

        let stream = TcpStream::connect(&addr).await?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingReplies = Arc::new(Mutex::new(Pending::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&pending), events_tx));

        let controller = Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            reader,
        };

        if let Some(password) = &settings.password {
            controller.authenticate_password(password).await?;
        } else {
            controller.authenticate_cookie(settings.cookie_path.as_ref()).await?;
        }

        info!("Authenticated to Tor control port at {}", addr);
        Ok((controller, events_rx))
    }

    /// Authenticate with password (hex-encoded for HashedControlPassword)
    async fn authenticate_password(&self, password: &str) -> Result<(), TorError> {
        let password_hex = data_encoding::HEXLOWER.encode(password.as_bytes());
        self.send_command(&format!("AUTHENTICATE {}", password_hex))
            .await?;
        Ok(())
    }

    /// Authenticate with the first readable cookie file, else null auth
    async fn authenticate_cookie(&self, preferred: Option<&PathBuf>) -> Result<(), TorError> {
        let candidates = preferred
            .cloned()
            .into_iter()
            .chain(COOKIE_PATHS.iter().map(PathBuf::from));

        for path in candidates {
            if let Ok(cookie) = std::fs::read(&path) {
                debug!("Authenticating with cookie from {:?}", path);
                let cookie_hex = data_encoding::HEXLOWER.encode(&cookie);
                self.send_command(&format!("AUTHENTICATE {}", cookie_hex))
                    .await?;
                return Ok(());
            }
        }

        debug!("No cookie file found, trying null authentication");
        self.send_command("AUTHENTICATE").await?;
        Ok(())
    }

    /// Send a command and wait for its reply
    ///
    /// Error replies become `TorError::Control`.
    pub async fn send_command(&self, cmd: &str) -> Result<Reply, TorError> {
        let cmd_preview = if cmd.len() > 100 { &cmd[..100] } else { cmd };
        debug!("Sending Tor command: {}", cmd_preview.trim());

        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            self.enqueue(tx)?;
            let line = format!("{}\r\n", cmd.trim_end());
            if let Err(e) = write_line(&mut writer, &line).await {
                // The reply slot we queued will never be answered
                if let Ok(mut pending) = self.pending.lock() {
                    pending.waiters.pop_back();
                }
                return Err(e);
            }
        }

        rx.await.map_err(|_| TorError::ConnectionClosed)?.and_then(Reply::into_result)
    }

    fn enqueue(&self, tx: oneshot::Sender<Result<Reply, TorError>>) -> Result<(), TorError> {
        let mut pending = self.pending.lock().map_err(|_| TorError::ConnectionClosed)?;
        if pending.closed {
            return Err(TorError::ConnectionClosed);
        }
        pending.waiters.push_back(tx);
        Ok(())
    }

    /// Get information about the Tor daemon
    ///
    /// Returns the value with the `keyword=` prefix removed.
    pub async fn get_info(&self, keyword: &str) -> Result<String, TorError> {
        let reply = self.send_command(&format!("GETINFO {}", keyword)).await?;
        let prefix = format!("{}=", keyword);

        let mut lines: Vec<&str> = reply.lines.iter().map(String::as_str).collect();
        // Final "OK" line carries no data
        if lines.last() == Some(&"OK") {
            lines.pop();
        }
        if let Some(first) = lines.first_mut() {
            let value: &str = *first;
            *first = value.strip_prefix(prefix.as_str()).unwrap_or(value);
        }
        Ok(lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Subscribe to asynchronous events
    pub async fn set_events(&self, events: &[&str]) -> Result<(), TorError> {
        self.send_command(&format!("SETEVENTS {}", events.join(" ")))
            .await?;
        Ok(())
    }

    /// Check if Tor is fully bootstrapped
    pub async fn is_bootstrapped(&self) -> Result<bool, TorError> {
        let response = self.get_info("status/bootstrap-phase").await?;
        Ok(response.contains("PROGRESS=100"))
    }

    /// Get circuit status
    pub async fn get_circuit_status(&self) -> Result<String, TorError> {
        self.get_info("circuit-status").await
    }

    /// Ask Tor to build a new general purpose circuit along `path`
    ///
    /// Returns once Tor has assigned the circuit id; the build itself
    /// completes later and is reported through `CIRC` events.
    pub async fn extend_circuit(&self, path: &[RelayId]) -> Result<CircuitId, TorError> {
        let hops = path
            .iter()
            .map(|r| r.fingerprint())
            .collect::<Vec<_>>()
            .join(",");
        let reply = self
            .send_command(&format!("EXTENDCIRCUIT 0 {} purpose=general", hops))
            .await?;

        // "250 EXTENDED <id>"
        reply
            .first_line()
            .strip_prefix("EXTENDED ")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| {
                TorError::Control(format!("unexpected EXTENDCIRCUIT reply: {}", reply.first_line()))
            })
    }

    /// Ask Tor to shut down cleanly
    pub async fn signal_shutdown(&self) -> Result<(), TorError> {
        self.send_command("SIGNAL SHUTDOWN").await?;
        Ok(())
    }
}

impl Drop for TorController {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<(), TorError> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Route replies to waiting commands and events to the event channel
async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingReplies,
    events: mpsc::UnboundedSender<Reply>,
) {
    let mut reader = BufReader::new(read_half);
    let mut frames = FrameReader::new();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Tor control connection reached EOF");
                break;
            },
            Ok(_) => {},
            Err(e) => {
                warn!("Error reading from Tor control port: {}", e);
                break;
            },
        }
        trace!("Control line: {:?}", line.trim_end());

        let reply = match frames.push_line(&line) {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => {
                warn!("Discarding malformed control data: {}", e);
                frames = FrameReader::new();
                continue;
            },
        };

        if reply.is_event() {
            // Receiver gone just means nobody listens for events
            let _ = events.send(reply);
            continue;
        }

        let waiter = pending.lock().ok().and_then(|mut p| p.waiters.pop_front());
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(reply));
            },
            None => warn!("Unsolicited control reply: {:?}", reply),
        }
    }

    if let Ok(mut pending) = pending.lock() {
        pending.closed = true;
        for tx in pending.waiters.drain(..) {
            let _ = tx.send(Err(TorError::ConnectionClosed));
        }
    }
}
