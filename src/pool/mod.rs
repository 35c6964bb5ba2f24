// src/pool/mod.rs

//! The handshake offload pool: N dedicated worker threads sharing one MPMC
//! submission channel.
//!
//! The channel is the only mutable state shared across threads. Any thread
//! may submit; any worker may claim any item, which is the whole load
//! balancer: there is no central dispatcher and no pre-assignment of
//! connections to workers.

mod request;
mod worker;

pub use request::{HandshakeResult, HandshakeTicket};

pub(crate) use request::HandshakeRequest;

use crate::engine::{TlsContext, TlsEngine};
use crate::error::OffloadError;
use crate::session::Multiplexer;
use worker::Worker;

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Pool tunables. No dynamic reconfiguration at runtime.
#[derive(Debug, Clone)]
pub struct PoolConfig {
  /// Number of worker threads (and multiplexer instances). Must be >= 1.
  pub worker_count: usize,
  /// How long an empty worker sleeps before re-checking the submission
  /// channel. Bounds first-submission latency after an idle stretch.
  pub idle_interval: Duration,
  /// Upper bound on one multiplexer wait. Bounds how long a busy worker can
  /// go without picking up new submissions.
  pub wait_timeout: Duration,
  /// Upper bound on joining each worker thread during `stop`.
  pub join_timeout: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: 2,
      idle_interval: Duration::from_millis(1),
      wait_timeout: Duration::from_millis(10),
      join_timeout: Duration::from_secs(5),
    }
  }
}

/// The public entry point: submit accepted sockets, stop when done.
///
/// `submit` never blocks on I/O. `stop` is idempotent and safe from any
/// thread; after it returns, every ticket ever handed out has resolved.
pub struct HandshakePool {
  submit_tx: kanal::Sender<HandshakeRequest>,
  // Kept so `stop` can sweep requests no worker ever dequeued.
  submit_rx: kanal::Receiver<HandshakeRequest>,
  stop: Arc<AtomicBool>,
  workers: Mutex<Vec<JoinHandle<()>>>,
  join_timeout: Duration,
}

impl HandshakePool {
  /// Builds the pool: all multiplexers first (so OS resource exhaustion
  /// fails the whole construction instead of leaving a half-started pool),
  /// then one named thread per worker.
  pub fn new(
    engine: Arc<dyn TlsEngine>,
    tls_context: Arc<TlsContext>,
    config: PoolConfig,
  ) -> Result<Self, OffloadError> {
    if config.worker_count == 0 {
      return Err(OffloadError::InvalidArgument(
        "worker_count must be at least 1".into(),
      ));
    }

    let (submit_tx, submit_rx) = kanal::unbounded::<HandshakeRequest>();
    let stop = Arc::new(AtomicBool::new(false));

    let mut multiplexers = Vec::with_capacity(config.worker_count);
    for _ in 0..config.worker_count {
      // On error, guards already in the vec destroy their instances.
      multiplexers.push(Multiplexer::create(engine.clone())?);
    }

    let mut handles = Vec::with_capacity(config.worker_count);
    for (id, multiplexer) in multiplexers.into_iter().enumerate() {
      let worker = Worker::new(
        id,
        engine.clone(),
        tls_context.clone(),
        multiplexer,
        submit_rx.clone(),
        stop.clone(),
        config.idle_interval,
        config.wait_timeout,
      );
      let spawned = std::thread::Builder::new()
        .name(format!("tls-offload-worker-{id}"))
        .spawn(move || worker.run());
      match spawned {
        Ok(handle) => handles.push(handle),
        Err(e) => {
          // Stop the workers that did start before reporting the failure.
          stop.store(true, Ordering::Release);
          return Err(OffloadError::ThreadSpawn(format!("worker {id}: {e}")));
        }
      }
    }

    info!(workers = config.worker_count, "TLS handshake offload pool started");
    Ok(Self {
      submit_tx,
      submit_rx,
      stop,
      workers: Mutex::new(handles),
      join_timeout: config.join_timeout,
    })
  }

  /// Hands one accepted socket to the pool. Returns immediately; the ticket
  /// resolves exactly once with the terminal [`HandshakeResult`].
  ///
  /// Submitting to a stopped pool resolves the ticket immediately with
  /// [`HandshakeResult::PoolClosed`] instead of enqueueing into a dead pool.
  pub fn submit(&self, client_fd: RawFd) -> HandshakeTicket {
    let (request, ticket) = HandshakeRequest::new(client_fd);

    if self.stop.load(Ordering::Acquire) {
      request.complete(HandshakeResult::PoolClosed);
      return ticket;
    }

    if self.submit_tx.send(request).is_err() {
      // Channel gone; the dropped request resolves the ticket as PoolClosed.
      warn!(fd = client_fd, "submission channel closed; failing handshake request");
      return ticket;
    }

    // A stop() racing with the enqueue above may already have finished its
    // final sweep; sweep again so this request cannot be stranded. Dequeue
    // is destructive, so exactly-once resolution holds either way.
    if self.stop.load(Ordering::Acquire) {
      self.drain_undequeued();
    }

    ticket
  }

  /// Stops every worker and resolves everything still pending. Idempotent;
  /// concurrent callers serialize on the join list and all return only once
  /// the pool is fully drained.
  pub fn stop(&self) {
    if !self.stop.swap(true, Ordering::AcqRel) {
      debug!("stopping TLS handshake offload pool");
    }

    let mut workers = self.workers.lock();
    for handle in workers.drain(..) {
      join_with_timeout(handle, self.join_timeout);
    }
    drop(workers);

    // Requests submitted too late for any worker's final drain pass.
    self.drain_undequeued();
  }

  fn drain_undequeued(&self) {
    let mut drained = 0usize;
    while let Ok(Some(request)) = self.submit_rx.try_recv() {
      request.complete(HandshakeResult::PoolClosed);
      drained += 1;
    }
    if drained > 0 {
      debug!(drained, "resolved undequeued handshake requests as PoolClosed");
    }
  }
}

impl Drop for HandshakePool {
  fn drop(&mut self) {
    self.stop();
  }
}

impl std::fmt::Debug for HandshakePool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HandshakePool")
      .field("stopped", &self.stop.load(Ordering::Relaxed))
      .field("queued", &self.submit_rx.len())
      .finish_non_exhaustive()
  }
}

/// Joins one worker within `timeout`. Both of a worker's blocking points are
/// time-bounded, so exceeding the timeout means the thread is wedged; it is
/// detached and reported rather than waited on forever. A worker panic is a
/// fatal defect and is re-raised on the stopping thread.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
  let deadline = Instant::now() + timeout;
  while !handle.is_finished() {
    if Instant::now() >= deadline {
      warn!(
        thread = handle.thread().name().unwrap_or("<unnamed>"),
        "worker did not stop within the join timeout; detaching"
      );
      return;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
  if let Err(panic) = handle.join() {
    std::panic::resume_unwind(panic);
  }
}
