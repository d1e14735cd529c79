//! Custom circuit building
//!
//! Tracks in-flight circuit build requests and resolves them as `CIRC`
//! events arrive. A failed circuit is retried with the same waiter, so
//! the caller only ever sees a built circuit (or a terminal error).
//!
//! Tor assigns the circuit id in the `EXTENDCIRCUIT` reply, but events
//! for that id can be routed to us before the requesting task has
//! registered its waiter. Events for unknown circuits are parked while
//! any build request is outstanding and claimed on registration.

use super::circuit::{Circuit, CircuitEvent, CircuitId, RelayId};
use super::control::TorController;
use super::directory::{RelayDirectory, DEFAULT_PATH_LEN};
use super::TorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Outbound half: ask the network layer to start building a circuit
#[async_trait]
pub trait CircuitBuilder: Send + Sync + 'static {
    /// Start a build along `path`, returning the id Tor assigned
    async fn build_circuit(&self, path: &[RelayId]) -> Result<CircuitId, TorError>;
}

#[async_trait]
impl CircuitBuilder for TorController {
    async fn build_circuit(&self, path: &[RelayId]) -> Result<CircuitId, TorError> {
        self.extend_circuit(path).await
    }
}

#[async_trait]
impl<B: CircuitBuilder + ?Sized> CircuitBuilder for Arc<B> {
    async fn build_circuit(&self, path: &[RelayId]) -> Result<CircuitId, TorError> {
        (**self).build_circuit(path).await
    }
}

/// Observer of circuit lifecycle events
pub trait CircuitListener: Send + Sync {
    fn circuit_extend(&self, circuit: &Circuit, relay: &RelayId);
    fn circuit_built(&self, circuit: &Circuit);
    fn circuit_failed(&self, circuit: &Circuit, reason: &str);
}

/// Route a parsed event to the matching listener callback
pub fn dispatch_event(listener: &dyn CircuitListener, event: &CircuitEvent) {
    match event {
        CircuitEvent::Extend { circuit, relay } => listener.circuit_extend(circuit, relay),
        CircuitEvent::Built(circuit) => listener.circuit_built(circuit),
        CircuitEvent::Failed { circuit, reason } => listener.circuit_failed(circuit, reason),
        CircuitEvent::Other(circuit) => {
            debug!("Circuit {} is {:?}", circuit.id, circuit.status);
        },
    }
}

/// How failed circuits are retried
///
/// A retry rebuilds the same explicit path; default paths are chosen
/// afresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    /// `None` retries for as long as failures keep arriving
    pub max_retries: Option<u32>,
    /// Pause before each retry, plus up to 25% jitter
    pub delay: Duration,
}

type Waiter = oneshot::Sender<Result<Circuit, TorError>>;

/// Pending future for a requested circuit
#[derive(Debug)]
pub struct CircuitRequest {
    rx: oneshot::Receiver<Result<Circuit, TorError>>,
}

impl Future for CircuitRequest {
    type Output = Result<Circuit, TorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(TorError::Cancelled)))
    }
}

/// A request waiting on a circuit id
struct PendingCircuit {
    waiter: Waiter,
    /// Explicit path from the caller, reused on retry
    requested_path: Option<Vec<RelayId>>,
    retries: u32,
}

/// Event seen for a circuit nobody was registered for yet
enum Parked {
    Built(Circuit),
    Failed(String),
}

#[derive(Default)]
struct AttacherState {
    waiting: Vec<(CircuitId, PendingCircuit)>,
    builds_in_flight: usize,
    parked: HashMap<CircuitId, Parked>,
    built: Vec<Circuit>,
}

/// Builds circuits on request and resolves them from circuit events
pub struct CircuitAttacher<B> {
    builder: B,
    directory: Arc<RelayDirectory>,
    policy: RetryPolicy,
    state: Mutex<AttacherState>,
    this: Weak<Self>,
}

impl<B: CircuitBuilder> CircuitAttacher<B> {
    pub fn new(builder: B, directory: Arc<RelayDirectory>, policy: RetryPolicy) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            builder,
            directory,
            policy,
            state: Mutex::new(AttacherState::default()),
            this: this.clone(),
        })
    }

    pub fn directory(&self) -> &Arc<RelayDirectory> {
        &self.directory
    }

    /// Request a new circuit
    ///
    /// With no path, three hops come from the relay pool when it still
    /// holds three, otherwise a random entry guard plus two random
    /// routers. An explicit path needs at least three hops and is
    /// rejected before anything is registered.
    ///
    /// Retries after a failure keep an explicit path as given; only a
    /// request without a path picks new hops for each attempt.
    pub fn request_circuit_build(
        &self,
        path: Option<Vec<RelayId>>,
    ) -> Result<CircuitRequest, TorError> {
        if let Some(path) = &path {
            if path.len() < DEFAULT_PATH_LEN {
                return Err(TorError::InvalidPath(format!(
                    "circuits must be at least {} hops, got {}",
                    DEFAULT_PATH_LEN,
                    path.len()
                )));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.spawn_build(PendingCircuit {
            waiter: tx,
            requested_path: path,
            retries: 0,
        });
        Ok(CircuitRequest { rx })
    }

    /// Number of waiters registered under a circuit id
    pub fn pending_count(&self) -> usize {
        self.lock().waiting.len()
    }

    /// Whether a waiter is registered for `circuit`
    pub fn waiting_on(&self, circuit: &Circuit) -> bool {
        self.lock().waiting.iter().any(|(id, _)| *id == circuit.id)
    }

    /// Whether `relay` is a hop in one of the circuits built for us
    pub fn is_hop_in_use(&self, relay: &RelayId) -> bool {
        self.lock().built.iter().any(|c| c.contains(relay))
    }

    /// Circuits resolved so far
    pub fn built_circuits(&self) -> Vec<Circuit> {
        self.lock().built.clone()
    }

    fn spawn_build(&self, pending: PendingCircuit) {
        match self.this.upgrade() {
            Some(attacher) => {
                tokio::spawn(attacher.run_build(pending));
            },
            None => {
                let _ = pending.waiter.send(Err(TorError::Cancelled));
            },
        }
    }

    async fn run_build(self: Arc<Self>, pending: PendingCircuit) {
        if pending.retries > 0 && !self.policy.delay.is_zero() {
            tokio::time::sleep(crate::util::rand::jitter(self.policy.delay)).await;
        }

        let path = match pending.requested_path.clone().or_else(|| self.select_path()) {
            Some(path) => path,
            None => {
                warn!("No relays available for a new circuit");
                let _ = pending.waiter.send(Err(TorError::NoRelays));
                return;
            },
        };

        info!(
            "Requesting a circuit: {}",
            path.iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join("->")
        );

        self.lock().builds_in_flight += 1;
        let result = self.builder.build_circuit(&path).await;

        let id = match result {
            Ok(id) => id,
            Err(e) => {
                self.finish_request();
                error!("Circuit build request failed: {}", e);
                let _ = pending.waiter.send(Err(e));
                return;
            },
        };

        let parked = {
            let mut state = self.lock();
            let parked = state.parked.remove(&id);
            match parked {
                None => {
                    debug!("Circuit {} is in progress ...", id);
                    state.waiting.push((id, pending));
                    drop(state);
                    self.finish_request();
                    return;
                },
                Some(parked) => {
                    if let Parked::Built(circuit) = &parked {
                        state.built.push(circuit.clone());
                    }
                    parked
                },
            }
        };
        self.finish_request();

        match parked {
            Parked::Built(circuit) => {
                info!("Circuit {} built ...", id);
                let _ = pending.waiter.send(Ok(circuit));
            },
            Parked::Failed(reason) => {
                info!("Circuit {} failed for reason {}", id, reason);
                self.retry(pending);
            },
        }
    }

    /// Account for a finished `build_circuit` call
    fn finish_request(&self) {
        let mut state = self.lock();
        state.builds_in_flight = state.builds_in_flight.saturating_sub(1);
        if state.builds_in_flight == 0 {
            state.parked.clear();
        }
    }

    fn select_path(&self) -> Option<Vec<RelayId>> {
        self.directory
            .take_pooled_path()
            .or_else(|| self.directory.random_path())
    }

    fn retry(&self, mut pending: PendingCircuit) {
        if pending.waiter.is_closed() {
            debug!("Dropping retry for a cancelled circuit request");
            return;
        }
        if let Some(max) = self.policy.max_retries {
            if pending.retries >= max {
                warn!("Giving up on circuit after {} retries", max);
                let _ = pending.waiter.send(Err(TorError::RetriesExhausted(max)));
                return;
            }
        }
        pending.retries += 1;
        debug!("Trying to build a circuit again (retry {})", pending.retries);
        self.spawn_build(pending);
    }

    fn lock(&self) -> MutexGuard<'_, AttacherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<B: CircuitBuilder> CircuitListener for CircuitAttacher<B> {
    fn circuit_extend(&self, circuit: &Circuit, relay: &RelayId) {
        if !circuit.is_general() {
            return;
        }
        if self.waiting_on(circuit) {
            info!("Circuit {} ({})", circuit.id, relay);
        }
    }

    fn circuit_built(&self, circuit: &Circuit) {
        if !circuit.is_general() {
            return;
        }

        let resolved: Vec<PendingCircuit> = {
            let mut state = self.lock();
            let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiting)
                .into_iter()
                .partition(|(id, _)| *id == circuit.id);
            state.waiting = rest;

            if matched.is_empty() {
                if state.builds_in_flight > 0 {
                    state.parked.insert(circuit.id, Parked::Built(circuit.clone()));
                }
                return;
            }
            state.built.push(circuit.clone());
            matched.into_iter().map(|(_, pending)| pending).collect()
        };

        info!("Circuit {} built ...", circuit.id);
        info!("Full path of {}: {}", circuit.id, circuit.path_string());
        for pending in resolved {
            let _ = pending.waiter.send(Ok(circuit.clone()));
        }
    }

    fn circuit_failed(&self, circuit: &Circuit, reason: &str) {
        if !circuit.is_general() {
            return;
        }

        let pending = {
            let mut state = self.lock();
            match state.waiting.iter().position(|(id, _)| *id == circuit.id) {
                Some(pos) => state.waiting.remove(pos).1,
                None => {
                    if state.builds_in_flight > 0 {
                        state
                            .parked
                            .insert(circuit.id, Parked::Failed(reason.to_string()));
                    }
                    return;
                },
            }
        };

        info!("Circuit {} failed for reason {}", circuit.id, reason);
        self.retry(pending);
    }
}
