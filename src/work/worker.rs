//! Bounded-concurrency work dispatcher
//!
//! Admission goes through a fair semaphore, so items start in push order
//! and at most `parallelism` handlers run at once. The permit moves into
//! the spawned task and is released when the task ends, whatever the
//! handler did.

use super::{RunState, WorkItem};
use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Per-item logic of a test
#[async_trait]
pub trait ItemHandler<T>: Send + Sync + 'static {
    async fn handle(&self, item: WorkItem<T>) -> Result<()>;
}

#[async_trait]
impl<T, F, Fut> ItemHandler<T> for F
where
    T: Send + 'static,
    F: Fn(WorkItem<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, item: WorkItem<T>) -> Result<()> {
        (self)(item).await
    }
}

/// Worker tuning
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Maximum concurrent handler invocations
    pub parallelism: usize,
    /// Optional deadline for a single item
    pub item_timeout: Option<Duration>,
}

impl WorkerOptions {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            item_timeout: None,
        }
    }

    pub fn with_item_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }
}

/// How one handler invocation ended
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(anyhow::Error),
    TimedOut(Duration),
    Panicked,
}

/// Runs pushed work items with at most N handlers active
pub struct Worker<T, H> {
    handler: Arc<H>,
    slots: Arc<Semaphore>,
    parallelism: usize,
    item_timeout: Option<Duration>,
    state: Arc<Mutex<RunState>>,
    tasks: JoinSet<()>,
    _item: PhantomData<fn(T)>,
}

impl<T, H> Worker<T, H>
where
    T: Send + 'static,
    H: ItemHandler<T>,
{
    /// Create a worker; a parallelism of zero is raised to one
    pub fn new(options: WorkerOptions, handler: H) -> Self {
        let parallelism = options.parallelism.max(1);
        Self {
            handler: Arc::new(handler),
            slots: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            item_timeout: options.item_timeout,
            state: Arc::new(Mutex::new(RunState::default())),
            tasks: JoinSet::new(),
            _item: PhantomData,
        }
    }

    /// Record the offset the producer resumed from
    pub fn set_resume_offset(&mut self, resume: usize) {
        lock(&self.state).resume_offset = resume;
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Snapshot of the current run state
    pub fn state(&self) -> RunState {
        lock(&self.state).clone()
    }

    /// Enqueue an item
    ///
    /// Waits until a slot is free, then starts the handler and returns.
    /// The wait ends as soon as any running handler finishes.
    pub async fn push(&mut self, item: WorkItem<T>) {
        self.reap_finished();

        let permit = match Arc::clone(&self.slots).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Worker closed, dropping item {}", item.index);
                return;
            },
        };

        {
            let mut state = lock(&self.state);
            state.total += 1;
            state.in_flight += 1;
        }

        let handler = Arc::clone(&self.handler);
        let state = Arc::clone(&self.state);
        let item_timeout = self.item_timeout;
        let index = item.index;

        self.tasks.spawn(async move {
            let _permit = permit;
            debug!("Starting item {}", index);

            let outcome = run_handler(handler.as_ref(), item, item_timeout).await;

            let mut state = lock(&state);
            state.in_flight = state.in_flight.saturating_sub(1);
            match outcome {
                Outcome::Completed => {
                    debug!("Item {} completed", index);
                    state.completed.insert(index);
                },
                Outcome::Failed(e) => {
                    error!("Item {} failed: {:#}", index, e);
                    state.failed.insert(index);
                },
                Outcome::TimedOut(after) => {
                    error!("Item {} timed out after {:?}", index, after);
                    state.failed.insert(index);
                },
                Outcome::Panicked => {
                    error!("Item {} handler panicked", index);
                    state.failed.insert(index);
                },
            }
        });
    }

    /// Wait for every admitted item to finish and return the final state
    pub async fn drain(mut self) -> RunState {
        while let Some(result) = self.tasks.join_next().await {
            log_join_error(result);
        }
        self.state()
    }

    /// Like [`drain`](Self::drain), but aborts the handlers still running
    /// once `cancel` fires
    ///
    /// Aborted items stay counted in `in_flight` and are neither completed
    /// nor failed, so the safe resume offset does not move past them.
    pub async fn drain_or_abort(mut self, cancel: &CancellationToken) -> RunState {
        let mut aborted = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !aborted => {
                    aborted = true;
                    debug!("Aborting {} running items", self.tasks.len());
                    self.tasks.abort_all();
                },
                next = self.tasks.join_next() => match next {
                    Some(result) => log_join_error(result),
                    None => break,
                },
            }
        }
        self.state()
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_join_error(result);
        }
    }
}

fn log_join_error(result: Result<(), JoinError>) {
    match result {
        Ok(()) => {},
        Err(e) if e.is_cancelled() => {},
        Err(e) => warn!("Worker task ended abnormally: {}", e),
    }
}

async fn run_handler<T, H>(handler: &H, item: WorkItem<T>, item_timeout: Option<Duration>) -> Outcome
where
    T: Send + 'static,
    H: ItemHandler<T>,
{
    let call = AssertUnwindSafe(handler.handle(item)).catch_unwind();

    let result = match item_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => return Outcome::TimedOut(limit),
        },
        None => call.await,
    };

    match result {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(_) => Outcome::Panicked,
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
