//! Completion tokens for asynchronous receive and send, and the per-handle
//! queues that complete them.
//!
//! An asynchronous call either finishes on the spot ([`Submission::Ready`])
//! or hands back an [`AsyncResult`] that a background worker completes
//! later. Each token reaches exactly one terminal state, Completed or
//! Failed, and keeps reporting it for as long as it lives.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::Notify;

use crate::driver::DriverHandle;
use crate::error::{DivertError, Result};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Results that report how many bytes they moved.
pub trait Transfer: Send + 'static {
    fn transferred(&self) -> usize;
}

impl Transfer for usize {
    fn transferred(&self) -> usize {
        *self
    }
}

/// Outcome of waiting on a token with a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The operation finished and moved this many bytes.
    Completed(usize),
    /// The timeout elapsed first. The operation is still pending.
    TimedOut,
}

enum Slot<T> {
    Pending,
    Completed(T),
    /// Completed, and the value was handed out by `take`.
    Taken(usize),
    Failed(DivertError),
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
    notify: Notify,
}

/// The caller's side of one pending operation.
pub struct AsyncResult<T> {
    shared: Arc<Shared<T>>,
}

/// The worker's side of one pending operation. Dropping it before calling
/// [`Completer::complete`] fails the token with [`DivertError::HandleClosed`].
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// Creates a linked pending token and its completer.
pub fn pending<T>() -> (Completer<T>, AsyncResult<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        cond: Condvar::new(),
        notify: Notify::new(),
    });
    (
        Completer {
            shared: Some(shared.clone()),
        },
        AsyncResult { shared },
    )
}

impl<T> Completer<T> {
    /// Moves the token to its terminal state. Only the first call counts.
    pub fn complete(mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            Self::finish(&shared, result);
        }
    }

    fn finish(shared: &Shared<T>, result: Result<T>) {
        {
            let mut slot = lock(&shared.slot);
            if !matches!(*slot, Slot::Pending) {
                return;
            }
            *slot = match result {
                Ok(value) => Slot::Completed(value),
                Err(error) => Slot::Failed(error),
            };
        }
        shared.cond.notify_all();
        shared.notify.notify_waiters();
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Self::finish(&shared, Err(DivertError::HandleClosed));
        }
    }
}

impl<T: Transfer> AsyncResult<T> {
    fn status(slot: &Slot<T>) -> Result<Option<WaitStatus>> {
        match slot {
            Slot::Pending => Ok(None),
            Slot::Completed(value) => Ok(Some(WaitStatus::Completed(value.transferred()))),
            Slot::Taken(length) => Ok(Some(WaitStatus::Completed(*length))),
            Slot::Failed(error) => Err(error.clone()),
        }
    }

    /// Blocks until the operation finishes or `timeout` elapses.
    ///
    /// # Returns
    /// - `Ok(WaitStatus::Completed(len))` - The operation succeeded
    /// - `Ok(WaitStatus::TimedOut)` - Still pending; waiting again is allowed
    /// - `Err(DivertError)` - The operation failed; every later wait returns
    ///   the same error
    pub fn wait(&self, timeout: Duration) -> Result<WaitStatus> {
        let slot = lock(&self.shared.slot);
        let (slot, _) = self
            .shared
            .cond
            .wait_timeout_while(slot, timeout, |slot| matches!(slot, Slot::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        Self::status(&slot).map(|status| status.unwrap_or(WaitStatus::TimedOut))
    }

    /// Blocks until the operation finishes, however long that takes.
    pub fn join(&self) -> Result<usize> {
        let slot = lock(&self.shared.slot);
        let slot = self
            .shared
            .cond
            .wait_while(slot, |slot| matches!(slot, Slot::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        match Self::status(&slot)? {
            Some(WaitStatus::Completed(length)) => Ok(length),
            _ => Err(DivertError::InvalidOperation(
                "token left the pending state without a result".to_string(),
            )),
        }
    }

    /// Async version of [`AsyncResult::wait`] for use inside a tokio runtime.
    pub async fn wait_async(&self, timeout: Duration) -> Result<WaitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before looking at the slot so a completion in
            // between is not missed.
            notified.as_mut().enable();

            let status = Self::status(&lock(&self.shared.slot))?;
            if let Some(status) = status {
                return Ok(status);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let slot = lock(&self.shared.slot);
                return Self::status(&slot).map(|status| status.unwrap_or(WaitStatus::TimedOut));
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*lock(&self.shared.slot), Slot::Pending)
    }

    /// Bytes moved, once the operation has completed successfully.
    pub fn length(&self) -> Option<usize> {
        Self::status(&lock(&self.shared.slot)).ok().flatten().and_then(|status| match status {
            WaitStatus::Completed(length) => Some(length),
            WaitStatus::TimedOut => None,
        })
    }

    /// The failure, once the operation has failed.
    pub fn error(&self) -> Option<DivertError> {
        match &*lock(&self.shared.slot) {
            Slot::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Hands out the completed value, or the failure.
    ///
    /// Returns `None` while pending and after the value was already taken;
    /// `wait` and `length` keep reporting the completion either way.
    pub fn take(&self) -> Option<Result<T>> {
        let mut slot = lock(&self.shared.slot);
        match &*slot {
            Slot::Pending | Slot::Taken(_) => None,
            Slot::Failed(error) => Some(Err(error.clone())),
            Slot::Completed(value) => {
                let length = value.transferred();
                match std::mem::replace(&mut *slot, Slot::Taken(length)) {
                    Slot::Completed(value) => Some(Ok(value)),
                    _ => None,
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for AsyncResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*lock(&self.shared.slot) {
            Slot::Pending => "Pending",
            Slot::Completed(_) | Slot::Taken(_) => "Completed",
            Slot::Failed(_) => "Failed",
        };
        f.debug_struct("AsyncResult").field("state", &state).finish()
    }
}

/// What an asynchronous call produced.
#[derive(Debug)]
pub enum Submission<T> {
    /// Finished immediately; no token was created.
    Ready(T),
    /// Queued behind the handle's worker.
    Pending(AsyncResult<T>),
}

impl<T> Submission<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Submission::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Submission::Ready(value) => Some(value),
            Submission::Pending(_) => None,
        }
    }

    pub fn pending(self) -> Option<AsyncResult<T>> {
        match self {
            Submission::Pending(token) => Some(token),
            Submission::Ready(_) => None,
        }
    }
}

/// A queued operation. It owns its completer, so dropping an unrun job
/// fails its token.
pub(crate) type Job = Box<dyn FnOnce(&dyn DriverHandle) + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    busy: bool,
    closed: bool,
    worker: Option<JoinHandle<()>>,
}

/// A FIFO lane of slow-path operations for one direction of one handle,
/// served by a lazily spawned worker thread.
pub(crate) struct IoQueue {
    name: &'static str,
    handle: Arc<dyn DriverHandle>,
    state: Mutex<QueueState>,
    cond: Condvar,
}

/// Holds the lane locked, so a fast-path attempt and the decision to queue
/// happen atomically with respect to the worker.
pub(crate) struct QueueGuard<'a> {
    queue: &'a Arc<IoQueue>,
    state: MutexGuard<'a, QueueState>,
}

impl IoQueue {
    pub fn new(name: &'static str, handle: Arc<dyn DriverHandle>) -> Arc<IoQueue> {
        Arc::new(IoQueue {
            name,
            handle,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                busy: false,
                closed: false,
                worker: None,
            }),
            cond: Condvar::new(),
        })
    }

    pub fn lock(self: &Arc<Self>) -> QueueGuard<'_> {
        QueueGuard {
            queue: self,
            state: lock(&self.state),
        }
    }

    /// Fails every queued job and stops the worker once its current job
    /// returns.
    ///
    /// With `join_worker` the call also waits for that job, so the driver
    /// handle must already be closed for a job blocked in the driver to
    /// wake up. Without it the worker is left to finish on its own.
    pub fn close(&self, join_worker: bool) {
        let (jobs, worker) = {
            let mut state = lock(&self.state);
            state.closed = true;
            (std::mem::take(&mut state.jobs), state.worker.take())
        };
        self.cond.notify_all();
        if !jobs.is_empty() {
            debug!("{} queue closed with {} pending operations", self.name, jobs.len());
        }
        drop(jobs);

        if let Some(worker) = worker.filter(|_| join_worker) {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                debug!("{} worker panicked", self.name);
            }
        }
    }

    fn run(&self) {
        loop {
            let job = {
                let mut state = lock(&self.state);
                loop {
                    if state.closed {
                        return;
                    }
                    if let Some(job) = state.jobs.pop_front() {
                        state.busy = true;
                        break job;
                    }
                    state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            };
            trace!("{} worker running queued operation", self.name);
            job(&*self.handle);
            lock(&self.state).busy = false;
        }
    }
}

impl QueueGuard<'_> {
    /// No job is queued or running, so an immediate attempt cannot overtake
    /// an earlier operation.
    pub fn is_idle(&self) -> bool {
        !self.state.busy && self.state.jobs.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    pub fn push(mut self, job: Job) -> Result<()> {
        if self.state.closed {
            // Dropping the job fails its token.
            return Err(DivertError::HandleClosed);
        }
        if self.state.worker.is_none() {
            let queue = Arc::clone(self.queue);
            let worker = thread::Builder::new()
                .name(format!("divert-{}", self.queue.name))
                .spawn(move || queue.run())?;
            debug!("spawned {} worker", self.queue.name);
            self.state.worker = Some(worker);
        }
        self.state.jobs.push_back(job);
        drop(self.state);
        self.queue.cond.notify_one();
        Ok(())
    }
}
