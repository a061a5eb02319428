//! Serialized workers.
//!
//! Every database handle is pinned to exactly one of these: a named OS thread
//! that owns its state and drains a FIFO command channel. Submission is
//! synchronous (block until the closure ran), fire-and-forget, or awaitable
//! through a tokio oneshot for async callers.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_STAMP: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Opaque identity of a serialized worker. Connections carry the stamp of the
/// worker they are pinned to; operations verify the caller runs on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueStamp(u64);

/// The stamp of the worker the current thread belongs to, if any.
pub(crate) fn current_stamp() -> Option<QueueStamp> {
    CURRENT_STAMP.with(|stamp| stamp.get().map(QueueStamp))
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Command<S> {
    Run(Job<S>),
    Shutdown,
}

/// A single-threaded cooperative worker owning state `S`.
pub(crate) struct SerialWorker<S> {
    sender: Sender<Command<S>>,
    stamp: QueueStamp,
    label: String,
}

impl<S: 'static> SerialWorker<S> {
    /// Spawn the worker thread, run `init` on it, and fail if `init` does.
    pub(crate) fn spawn<F>(label: &str, init: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let stamp = QueueStamp(NEXT_STAMP.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel::<Command<S>>();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_label = label.to_owned();

        thread::Builder::new()
            .name(format!("sqlite-worker-{label}"))
            .spawn(move || {
                CURRENT_STAMP.with(|current| current.set(Some(stamp.0)));
                let state = match init() {
                    Ok(state) => {
                        let _ = init_tx.send(Ok(()));
                        state
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                debug!(worker = %thread_label, "serialized worker started");
                run_worker(state, &receiver);
                debug!(worker = %thread_label, "serialized worker stopped");
            })
            .map_err(|err| {
                Error::WorkerClosed(format!("failed to spawn worker thread: {err}"))
            })?;

        init_rx
            .recv()
            .map_err(|_| Error::WorkerClosed(format!("worker {label} died during setup")))??;

        Ok(Self {
            sender,
            stamp,
            label: label.to_owned(),
        })
    }

    pub(crate) fn stamp(&self) -> QueueStamp {
        self.stamp
    }

    fn send(&self, command: Command<S>) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| Error::WorkerClosed(format!("worker {} is gone", self.label)))
    }

    /// Run `f` on the worker and block until it returns.
    pub(crate) fn run_sync<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<T>(1);
        self.send(Command::Run(Box::new(move |state| {
            let _ = tx.send(f(state));
        })))?;
        rx.recv()
            .map_err(|_| Error::WorkerClosed(format!("worker {} dropped a reply", self.label)))
    }

    /// Schedule `f` on the worker without waiting for it. FIFO with respect
    /// to every other submission.
    pub(crate) fn run_async<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.send(Command::Run(Box::new(f)))
    }

    /// Run `f` on the worker; await its result without blocking the calling
    /// task.
    pub(crate) async fn run_awaitable<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<T>();
        self.send(Command::Run(Box::new(move |state| {
            let _ = tx.send(f(state));
        })))?;
        rx.await
            .map_err(|_| Error::WorkerClosed(format!("worker {} dropped a reply", self.label)))
    }
}

impl<S> Drop for SerialWorker<S> {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

fn run_worker<S>(mut state: S, receiver: &Receiver<Command<S>>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(job) => job(&mut state),
            Command::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submissions_run_in_fifo_order() {
        let worker = SerialWorker::spawn("fifo-test", || Ok(Vec::<u32>::new())).unwrap();
        for n in 0..10 {
            worker.run_async(move |log| log.push(n)).unwrap();
        }
        let log = worker.run_sync(|log| log.clone()).unwrap();
        assert_eq!(log, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn worker_threads_carry_their_stamp() {
        let worker = SerialWorker::spawn("stamp-test", || Ok(())).unwrap();
        let stamp = worker.stamp();
        let seen = worker.run_sync(move |_: &mut ()| current_stamp()).unwrap();
        assert_eq!(seen, Some(stamp));
        assert_eq!(current_stamp(), None);
    }

    #[test]
    fn failed_init_propagates() {
        let result =
            SerialWorker::<()>::spawn("init-fail", || Err(Error::Schema("nope".into())));
        assert!(matches!(result, Err(Error::Schema(_))));
    }
}
