//! Shared Tor session
//!
//! One daemon per probe run. `TorService` is created at startup and
//! handed to every test that needs Tor; the first caller launches the
//! daemon and later callers share the same session.

use super::attacher::{dispatch_event, CircuitAttacher, CircuitListener, RetryPolicy};
use super::bootstrap::BootstrapProgress;
use super::circuit::{CircuitEvent, RelayId};
use super::control::{EventReceiver, TorController};
use super::directory::RelayDirectory;
use super::launcher::{ProcessLauncher, TorProcess};
use super::workspace::ShutdownHooks;
use super::TorError;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Attacher driving circuits through the live controller
pub type TorAttacher = CircuitAttacher<Arc<TorController>>;

/// A bootstrapped daemon with its control connection
pub struct TorSession {
    process: Mutex<Option<TorProcess>>,
    controller: Arc<TorController>,
    directory: Arc<RelayDirectory>,
    attacher: Arc<TorAttacher>,
    torrc: String,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl TorSession {
    pub fn controller(&self) -> &Arc<TorController> {
        &self.controller
    }

    pub fn directory(&self) -> &Arc<RelayDirectory> {
        &self.directory
    }

    pub fn attacher(&self) -> &Arc<TorAttacher> {
        &self.attacher
    }

    pub fn torrc(&self) -> &str {
        &self.torrc
    }

    /// Stop the event pump and the daemon
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Err(e) = self.controller.signal_shutdown().await {
            debug!("SIGNAL SHUTDOWN failed: {}", e);
        }
        if let Some(mut process) = self.process.lock().await.take() {
            if let Err(e) = process.kill().await {
                warn!("Failed to stop tor: {}", e);
            }
        }
        self.pump.abort();
    }
}

/// Process-wide handle to the Tor daemon
pub struct TorService {
    launcher: ProcessLauncher,
    policy: RetryPolicy,
    hooks: Arc<ShutdownHooks>,
    relay_pool: Vec<RelayId>,
    session: OnceCell<Arc<TorSession>>,
}

impl TorService {
    pub fn new(launcher: ProcessLauncher, policy: RetryPolicy, hooks: Arc<ShutdownHooks>) -> Self {
        Self {
            launcher,
            policy,
            hooks,
            relay_pool: Vec::new(),
            session: OnceCell::new(),
        }
    }

    /// Relays to use for default paths before falling back to random ones
    pub fn with_relay_pool(mut self, relays: Vec<RelayId>) -> Self {
        self.relay_pool = relays;
        self
    }

    pub fn hooks(&self) -> &Arc<ShutdownHooks> {
        &self.hooks
    }

    pub fn relay_pool(&self) -> &[RelayId] {
        &self.relay_pool
    }

    /// Hand the configured relay pool to a freshly fetched directory
    pub fn seed_pool(&self, directory: &RelayDirectory) {
        if !self.relay_pool.is_empty() {
            debug!("Seeding relay pool with {} relays", self.relay_pool.len());
        }
        self.seed_pool(&directory);
    }

    /// The running session, launching the daemon on first use
    ///
    /// A failed launch is not cached; the next call tries again.
    pub async fn session(&self) -> Result<Arc<TorSession>, TorError> {
        self.session
            .get_or_try_init(|| self.start())
            .await
            .map(Arc::clone)
    }

    pub fn is_running(&self) -> bool {
        self.session.initialized()
    }

    /// Close the session if one was started
    pub async fn shutdown(&self) {
        if let Some(session) = self.session.get() {
            info!("Shutting down tor");
            session.close().await;
        }
    }

    async fn start(&self) -> Result<Arc<TorSession>, TorError> {
        let mut process = self.launcher.launch(&self.hooks).await?;

        let (controller, events) = match TorController::connect(process.control()).await {
            Ok(connected) => connected,
            Err(e) => {
                let _ = process.kill().await;
                return Err(TorError::Bootstrap(format!(
                    "control connection failed: {}",
                    e
                )));
            },
        };
        let controller = Arc::new(controller);
        controller.set_events(&["CIRC", "STATUS_CLIENT"]).await?;

        let directory = Arc::new(RelayDirectory::fetch(&controller).await?);
        self.seed_pool(&directory);

        let attacher = CircuitAttacher::new(Arc::clone(&controller), Arc::clone(&directory), self.policy);

        let cancel = CancellationToken::new();
        let listener: Arc<dyn CircuitListener> = attacher.clone();
        let pump = spawn_event_pump(events, listener, cancel.clone());

        let torrc = process.torrc().to_string();
        Ok(Arc::new(TorSession {
            process: Mutex::new(Some(process)),
            controller,
            directory,
            attacher,
            torrc,
            cancel,
            pump,
        }))
    }
}

/// Feed control port events to `listener` until cancelled or closed
pub fn spawn_event_pump(
    mut events: EventReceiver,
    listener: Arc<dyn CircuitListener>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("Control event stream closed");
                        break;
                    };
                    let body = event.first_line();
                    if let Some(circ) = CircuitEvent::parse(body) {
                        dispatch_event(listener.as_ref(), &circ);
                    } else if let Some(progress) = BootstrapProgress::from_status(body) {
                        debug!("Tor status: {}", progress);
                    }
                },
            }
        }
    })
}
