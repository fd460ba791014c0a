//! Bounded thread pool for parallel worker construction.

use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::error::{PoolError, PoolResult};

/// A fallible construction job.
pub type CreationJob = Box<dyn FnOnce() -> PoolResult<()> + Send>;

struct QueuedJob {
    run: CreationJob,
    result_tx: mpsc::Sender<PoolResult<()>>,
}

/// Bounded worker-thread pool that runs batches of construction tasks.
///
/// Used only from the mutator agent. A batch is submitted as a whole and
/// joined as a whole; one batch completes before the next is dispatched.
pub struct CreationExecutor {
    job_tx: Option<mpsc::Sender<QueuedJob>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl CreationExecutor {
    /// Spawns `thread_count` construction threads (at least one).
    pub fn new(thread_count: usize, name: impl Into<String>) -> Self {
        let name = name.into();
        let thread_count = thread_count.max(1);
        let (job_tx, job_rx) = mpsc::channel::<QueuedJob>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut threads = Vec::with_capacity(thread_count);
        for id in 0..thread_count {
            let rx = Arc::clone(&job_rx);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || Self::worker_loop(id, rx))
                .expect("Failed to spawn creation thread");
            threads.push(handle);
        }

        tracing::debug!(
            pool = %name,
            threads = thread_count,
            "creation executor started"
        );

        Self {
            job_tx: Some(job_tx),
            threads: Mutex::new(threads),
            thread_count,
        }
    }

    fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<QueuedJob>>>) {
        loop {
            let job = {
                let guard = rx.lock().unwrap();
                guard.recv()
            };
            match job {
                Ok(QueuedJob { run, result_tx }) => {
                    let _ = result_tx.send(run());
                }
                Err(_) => break,
            }
        }
        tracing::debug!(worker = id, "creation thread stopped");
    }

    /// Runs a batch of jobs and waits for all of them to finish.
    ///
    /// Returns the first observed failure's underlying error; later jobs
    /// in the batch still run to completion.
    pub fn run_batch(&self, jobs: Vec<CreationJob>) -> PoolResult<()> {
        let total = jobs.len();
        let (result_tx, result_rx) = mpsc::channel();

        let job_tx = match &self.job_tx {
            Some(tx) => tx,
            None => return Err(Self::stopped_error()),
        };
        for run in jobs {
            let queued = QueuedJob {
                run,
                result_tx: result_tx.clone(),
            };
            if job_tx.send(queued).is_err() {
                return Err(Self::stopped_error());
            }
        }
        drop(result_tx);

        let mut first_err = None;
        for _ in 0..total {
            match result_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(Self::stopped_error());
                    }
                    break;
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Number of construction threads.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn stopped_error() -> PoolError {
        PoolError::Corrupted {
            context: "creation executor is stopped".into(),
            cause: "construction job channel closed".into(),
        }
    }
}

impl Drop for CreationExecutor {
    fn drop(&mut self) {
        // Closing the job channel signals the threads to exit.
        drop(self.job_tx.take());
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}
