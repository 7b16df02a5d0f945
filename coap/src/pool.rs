//! A bounded FIFO job queue backed by a fixed number of dedicated OS
//! threads. Each controller (route group) owns one; `schedule` enqueues a
//! closure, `shutdown` drains the queue and joins every worker.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{debug, warn};

/// Error returned when a job could not be run.
#[derive(Debug)]
pub enum PoolError {
  /// The job panicked while executing.
  Panicked,
  /// The pool has already been shut down.
  ShuttingDown,
}

impl std::fmt::Display for PoolError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      | PoolError::Panicked => write!(f, "job panicked"),
      | PoolError::ShuttingDown => write!(f, "pool is shutting down"),
    }
  }
}

impl std::error::Error for PoolError {}

enum Job {
  Run(Box<dyn FnOnce() + Send + 'static>),
  Stop,
}

/// A fixed-size worker pool. Jobs submitted via [`Pool::run`] block the
/// caller until a worker has executed them and returned a result.
pub struct Pool {
  tx: SyncSender<Job>,
  size: usize,
  workers: Mutex<Vec<JoinHandle<()>>>,
  errors: Arc<std::sync::atomic::AtomicU64>,
}

impl Pool {
  /// Spawn `size` worker threads backed by a queue that holds up to `size
  /// * 4` pending jobs before `schedule` blocks the caller.
  pub fn new(size: usize) -> Self {
    let size = size.max(1);
    let (tx, rx) = sync_channel::<Job>(size * 4);
    let rx = Arc::new(Mutex::new(rx));
    let errors = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let workers = (0..size).map(|id| spawn_worker(id, rx.clone())).collect();

    Pool { tx, size, workers: Mutex::new(workers), errors }
  }

  /// Enqueue `job` to run on a worker thread. Blocks if the queue is full.
  pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
    if self.tx.send(Job::Run(Box::new(job))).is_err() {
      warn!("scheduled a job after the pool was shut down");
    }
  }

  /// Run `f` on a worker thread and block until it completes, returning
  /// its result. Used by the dispatcher, which needs the handler's
  /// output before it can reply.
  pub fn run<F, R>(&self, f: F) -> Result<R, PoolError>
  where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
  {
    let (result_tx, result_rx) = std::sync::mpsc::sync_channel(1);
    self.schedule(move || {
      let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
      let _ = result_tx.send(result);
    });

    match result_rx.recv() {
      | Ok(Ok(r)) => Ok(r),
      | Ok(Err(_)) => {
        self.errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Err(PoolError::Panicked)
      },
      | Err(_) => Err(PoolError::ShuttingDown),
    }
  }

  /// Number of jobs that have panicked since the pool was created.
  pub fn error_count(&self) -> u64 {
    self.errors.load(std::sync::atomic::Ordering::Relaxed)
  }

  /// Send one `Stop` sentinel per worker, then join all of them. Safe to
  /// call more than once; a second call just joins an already-empty
  /// worker list.
  pub fn shutdown(&self) {
    for _ in 0..self.size {
      let _ = self.tx.send(Job::Stop);
    }
    let mut workers = self.workers.lock().unwrap();
    for handle in workers.drain(..) {
      let _ = handle.join();
    }
  }
}

fn spawn_worker(id: usize, rx: Arc<Mutex<Receiver<Job>>>) -> JoinHandle<()> {
  std::thread::Builder::new().name(format!("coap-worker-{id}"))
                              .spawn(move || loop {
                                let job = {
                                  let rx = rx.lock().unwrap();
                                  rx.recv()
                                };
                                match job {
                                  | Ok(Job::Run(job)) => job(),
                                  | Ok(Job::Stop) | Err(_) => {
                                    debug!("worker {id} shutting down");
                                    break;
                                  },
                                }
                              })
                              .expect("failed to spawn worker thread")
}
