// Background Worker
//
// A single long-lived thread that runs blocking side effects (native cancel,
// disconnecting temporary connections) on behalf of the engine. Callers
// either fire and forget or wait for completion with a bound.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};
use parking_lot::Mutex;
use thiserror::Error;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by the background worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Background worker has shut down")]
    Disconnected,
    #[error("Background task did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Background task panicked")]
    Panicked,
}

/// Runs submitted closures one after another on its own thread
pub struct BackgroundWorker {
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundWorker {
    /// Start the worker thread with the given name
    pub fn start(name: &str) -> Result<Self, WorkerError> {
        let (sender, receiver) = channel::unbounded::<Task>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(receiver))
            .map_err(|e| {
                error!("Could not start background worker: {}", e);
                WorkerError::Disconnected
            })?;
        Ok(BackgroundWorker {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(receiver: Receiver<Task>) {
        for task in receiver.iter() {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!("Background task panicked");
            }
        }
        debug!("Background worker stopped");
    }

    /// Queue a task without waiting for it
    pub fn submit<F>(&self, task: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.send(Box::new(task)).map_err(|_| WorkerError::Disconnected),
            None => Err(WorkerError::Disconnected),
        }
    }

    /// Queue a task and wait up to `timeout` for its result.
    ///
    /// On timeout the task keeps running; its result is discarded.
    pub fn submit_and_wait<F, T>(&self, task: F, timeout: Duration) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task));
            // The waiter may have given up already
            let _ = reply_tx.send(outcome.map_err(|_| WorkerError::Panicked));
        })?;

        match reply_rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(WorkerError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Stop accepting tasks and wait for the queued ones to finish
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Background worker thread panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
