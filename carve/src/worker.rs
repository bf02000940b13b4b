//! Background job layer.
//!
//! Engine passes are synchronous loops. The binary runs each one on a
//! dedicated worker thread so the async frontend stays responsive and can
//! cancel mid-stream: [`spawn_job`] pairs a `std::thread` with a
//! [`CancellationToken`] and delivers the result through a [`ResultSlot`].
//! Distinct jobs over distinct sources may run concurrently; they share
//! nothing but the slots their consumers hand them.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};

pub use tokio_util::sync::CancellationToken;

/// Single-value handoff cell between a worker and its consumer.
///
/// `take` is get-and-clear; `put` is last-write-wins, so a new result
/// silently replaces an unread prior one. Clones share the same cell,
/// which lets successive jobs feed one consumer.
pub struct ResultSlot<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Store a result, displacing any unread one.
    pub fn put(&self, value: T) {
        let mut value = value;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(displaced)) => {
                    let _ = self.rx.try_recv();
                    value = displaced;
                }
                // Unreachable while the slot holds its own receiver.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Remove and return the stored result, if any.
    pub fn take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Default for ResultSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), rx: self.rx.clone() }
    }
}

/// Run `job` on a dedicated worker thread, delivering its result into
/// `slot`. The job receives a token it is expected to poll; cancelling the
/// returned handle flips it.
pub fn spawn_job<T, F>(name: &'static str, slot: &ResultSlot<T>, job: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> T + Send + 'static,
{
    let token = CancellationToken::new();
    let job_token = token.clone();
    let job_slot = slot.clone();
    let thread = thread::spawn(move || {
        debug!("{name} worker started");
        job_slot.put(job(&job_token));
        debug!("{name} worker finished");
    });
    JobHandle { name, token, slot: slot.clone(), thread: Some(thread) }
}

/// Owner side of one background job.
pub struct JobHandle<T> {
    name: &'static str,
    token: CancellationToken,
    slot: ResultSlot<T>,
    thread: Option<JoinHandle<()>>,
}

impl<T> JobHandle<T> {
    /// Ask the job to stop at its next cancellation check.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the worker thread has exited, result delivered or not.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Non-blocking result check. Reaps the worker thread once its result
    /// has arrived.
    pub fn try_take(&mut self) -> Option<T> {
        let result = self.slot.take();
        if result.is_some() {
            self.join();
        }
        result
    }

    /// Block until the job completes, then hand back its result. `None`
    /// means the worker panicked before storing one.
    pub fn wait(mut self) -> Option<T> {
        self.join();
        self.slot.take()
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("{} worker panicked", self.name);
            }
        }
    }
}

impl<T> Drop for JobHandle<T> {
    /// An abandoned job is told to stop; the thread detaches and winds
    /// down at its next token poll.
    fn drop(&mut self) {
        self.token.cancel();
    }
}
