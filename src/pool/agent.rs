//! Single-threaded mutator agent.
//!
//! All state-changing pool operations are serialized through one
//! dedicated thread. The embedded interpreter has known races when
//! containers are constructed concurrently without external
//! coordination, so construction within one batch is parallelized by the
//! creation executor while distinct operations run strictly one at a
//! time here.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Task executed on the mutator thread.
pub type AgentTask = Box<dyn FnOnce() + Send>;

/// Serial executor for state-changing pool operations.
///
/// Exactly one task runs at a time, in submission order. Submission
/// never blocks the caller.
pub struct MutatorAgent {
    task_tx: Option<mpsc::Sender<AgentTask>>,
    handle: Option<JoinHandle<()>>,
}

impl MutatorAgent {
    /// Spawns the agent thread.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (task_tx, task_rx) = mpsc::channel::<AgentTask>();

        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    task();
                }
                tracing::debug!("mutator agent stopped");
            })
            .expect("Failed to spawn mutator agent thread");

        tracing::debug!(agent = %name, "mutator agent started");

        Self {
            task_tx: Some(task_tx),
            handle: Some(handle),
        }
    }

    /// Appends a task to the mailbox and returns immediately.
    pub fn submit(&self, task: AgentTask) {
        // A send failure means the agent thread is gone; dropping the
        // task fulfills any completion waiter it carries.
        if let Some(tx) = &self.task_tx {
            let _ = tx.send(task);
        }
    }
}

impl Drop for MutatorAgent {
    fn drop(&mut self) {
        // Closing the mailbox lets the thread drain queued tasks and exit.
        drop(self.task_tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// One-shot waiter for an asynchronously dispatched pool operation.
///
/// The waiter resolves when the operation signals completion or when the
/// signalling half is dropped, so a caller can never hang on it.
pub struct Completion {
    rx: mpsc::Receiver<()>,
}

impl Completion {
    pub(crate) fn new() -> (CompletionHandle, Completion) {
        let (tx, rx) = mpsc::sync_channel(1);
        (CompletionHandle { tx }, Completion { rx })
    }

    /// Blocks until the operation has finished.
    pub fn wait(self) {
        let _ = self.rx.recv();
    }

    /// Blocks up to `timeout`; returns true once the operation finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => true,
            Err(mpsc::RecvTimeoutError::Timeout) => false,
        }
    }
}

/// Signalling half of a [`Completion`].
pub(crate) struct CompletionHandle {
    tx: mpsc::SyncSender<()>,
}

impl CompletionHandle {
    pub(crate) fn signal(self) {
        let _ = self.tx.try_send(());
    }
}
