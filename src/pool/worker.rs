// src/pool/worker.rs

//! One worker: an OS thread owning one multiplexer and a private table of
//! in-flight handshakes.
//!
//! The loop multiplexes "accept new work" and "service I/O readiness" on a
//! single thread by bounding both blocking points: an idle sleep while the
//! table is empty, and a short multiplexer wait otherwise. The wait timeout
//! is what lets the worker return to the submission channel while other
//! connections are mid-handshake; the idle sleep is what keeps an empty
//! worker off the CPU. They are separate tunables because they trade off
//! different things (first-submission latency vs. pickup latency under
//! load).

use crate::engine::{HandshakeStep, TlsContext, TlsEngine};
use crate::pool::request::{HandshakeRequest, HandshakeResult};
use crate::session::{Multiplexer, TlsSession};

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

/// A connection mid-handshake. The session handle is owned here from
/// creation until either success (moved to the caller) or destruction.
struct Pending {
  request: HandshakeRequest,
  session: TlsSession,
}

pub(crate) struct Worker {
  id: usize,
  engine: Arc<dyn TlsEngine>,
  tls_context: Arc<TlsContext>,
  multiplexer: Multiplexer,
  submissions: kanal::Receiver<HandshakeRequest>,
  stop: Arc<AtomicBool>,
  idle_interval: Duration,
  wait_timeout: Duration,
  // Owned by this thread alone; no lock by construction.
  table: HashMap<RawFd, Pending>,
}

impl Worker {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    id: usize,
    engine: Arc<dyn TlsEngine>,
    tls_context: Arc<TlsContext>,
    multiplexer: Multiplexer,
    submissions: kanal::Receiver<HandshakeRequest>,
    stop: Arc<AtomicBool>,
    idle_interval: Duration,
    wait_timeout: Duration,
  ) -> Self {
    Self {
      id,
      engine,
      tls_context,
      multiplexer,
      submissions,
      stop,
      idle_interval,
      wait_timeout,
      table: HashMap::new(),
    }
  }

  /// The steady-state loop. Runs on the worker's dedicated thread until the
  /// stop flag is observed, then drains the local table so no session handle
  /// leaks and no caller stays blocked.
  pub(crate) fn run(mut self) {
    debug!(worker = self.id, "TLS offload worker started");
    while !self.stop.load(Ordering::Acquire) {
      self.drain_submissions();

      if self.table.is_empty() {
        // Nothing registered with the multiplexer; waiting on it would be
        // pointless. Costs up to one idle_interval of latency for the first
        // submission after an idle stretch.
        std::thread::sleep(self.idle_interval);
        continue;
      }

      if let Some(fd) = self.engine.wait_one(self.multiplexer.raw(), self.wait_timeout) {
        self.service_ready(fd);
      }
      // On timeout: loop back to pick up new submissions.
    }
    self.shutdown_drain();
    debug!(worker = self.id, "TLS offload worker stopped");
  }

  /// Non-blocking dequeue until the shared channel is empty. Whichever
  /// worker dequeues a request is its sole owner from that point on.
  fn drain_submissions(&mut self) {
    loop {
      match self.submissions.try_recv() {
        Ok(Some(request)) => self.admit(request),
        Ok(None) => break,
        Err(_) => {
          // Channel torn down; the pool is gone. Treat as stop.
          self.stop.store(true, Ordering::Release);
          break;
        }
      }
    }
  }

  fn admit(&mut self, mut request: HandshakeRequest) {
    let fd = request.client_fd();
    let Some(raw) = self
      .engine
      .create_session(&self.tls_context, fd, self.multiplexer.raw())
    else {
      warn!(worker = self.id, fd, "native session creation failed");
      request.complete(HandshakeResult::ConnectionCreationFailed);
      return;
    };
    request.assign(self.id);
    trace!(worker = self.id, fd, "session created");

    let pending = Pending {
      request,
      session: TlsSession::new(raw, self.engine.clone()),
    };
    // Immediate first step: resumed sessions often complete here with zero
    // readiness waits.
    if let Some(pending) = self.advance(fd, pending) {
      self.table.insert(fd, pending);
    }
  }

  fn service_ready(&mut self, fd: RawFd) {
    let Some(pending) = self.table.remove(&fd) else {
      // The multiplexer only knows descriptors this worker registered, so a
      // miss means the local table is corrupt. Crash loudly instead of
      // silently servicing connections against broken state.
      error!(
        worker = self.id,
        fd, "multiplexer reported a descriptor with no table entry"
      );
      panic!("tls-offload worker {}: ready fd {} not in local table", self.id, fd);
    };
    if let Some(pending) = self.advance(fd, pending) {
      self.table.insert(fd, pending);
    }
  }

  /// One non-blocking handshake step. Returns the entry back when the
  /// connection stays in flight.
  fn advance(&mut self, fd: RawFd, pending: Pending) -> Option<Pending> {
    match self
      .engine
      .advance_handshake(pending.session.raw(), fd, self.multiplexer.raw())
    {
      HandshakeStep::Complete => {
        trace!(worker = self.id, fd, "handshake complete");
        let Pending { request, session } = pending;
        request.complete(HandshakeResult::Success(session));
        None
      }
      HandshakeStep::WantRead | HandshakeStep::WantWrite => {
        // The native layer has re-armed the multiplexer registration for
        // the required direction; just keep the entry.
        Some(pending)
      }
      HandshakeStep::Error => {
        debug!(
          worker = self.id,
          fd,
          assigned = ?pending.request.assigned_worker(),
          "handshake failed"
        );
        let Pending { request, session } = pending;
        drop(session); // destroy before the caller can observe Failed
        request.complete(HandshakeResult::Failed);
        None
      }
    }
  }

  /// Resolves every in-flight connection as `PoolClosed`, destroying its
  /// session first. The multiplexer guard is dropped with the worker after
  /// this returns.
  fn shutdown_drain(&mut self) {
    if !self.table.is_empty() {
      debug!(
        worker = self.id,
        abandoned = self.table.len(),
        "destroying in-flight sessions on shutdown"
      );
    }
    for (_fd, pending) in self.table.drain() {
      let Pending { request, session } = pending;
      drop(session);
      request.complete(HandshakeResult::PoolClosed);
    }
  }
}
