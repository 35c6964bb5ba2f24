// src/pool/request.rs

//! The unit of work flowing through the submission channel and the
//! caller-facing completion handle.

use crate::session::TlsSession;

use std::future::Future;
use std::os::fd::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tracing::trace;

/// Terminal outcome of one submitted socket. Every ticket resolves with
/// exactly one of these tags.
#[derive(Debug)]
pub enum HandshakeResult {
  /// Handshake complete. Ownership of the native session transfers to the
  /// caller, who is responsible for its eventual destruction and for all
  /// subsequent read/write calls.
  Success(TlsSession),
  /// The native layer could not bind a session to the socket; no session
  /// exists and nothing was registered with a multiplexer.
  ConnectionCreationFailed,
  /// A handshake step reported a protocol or I/O error. The worker already
  /// destroyed the session before signaling this result.
  Failed,
  /// The pool was stopped while this request was pending. Any session was
  /// already destroyed before signaling.
  PoolClosed,
}

/// One socket handed to the pool, paired with its write-once completion.
///
/// Before dequeue the request belongs to the shared channel and nothing
/// mutates it; after dequeue it is owned by exactly one worker until a
/// terminal [`HandshakeResult`] consumes it.
pub(crate) struct HandshakeRequest {
  client_fd: RawFd,
  assigned_worker: Option<usize>,
  completion: oneshot::Sender<HandshakeResult>,
}

impl HandshakeRequest {
  pub(crate) fn new(client_fd: RawFd) -> (Self, HandshakeTicket) {
    let (completion, receiver) = oneshot::channel();
    let request = Self {
      client_fd,
      assigned_worker: None,
      completion,
    };
    (request, HandshakeTicket { receiver })
  }

  pub(crate) fn client_fd(&self) -> RawFd {
    self.client_fd
  }

  /// Records which worker dequeued this request. Set once, diagnostics only.
  pub(crate) fn assign(&mut self, worker_id: usize) {
    debug_assert!(
      self.assigned_worker.is_none(),
      "handshake request for fd {} reassigned across workers",
      self.client_fd
    );
    self.assigned_worker = Some(worker_id);
  }

  pub(crate) fn assigned_worker(&self) -> Option<usize> {
    self.assigned_worker
  }

  /// Resolves the completion. Consuming `self` makes a second resolution
  /// unrepresentable.
  pub(crate) fn complete(self, result: HandshakeResult) {
    let Self {
      client_fd, completion, ..
    } = self;
    if completion.send(result).is_err() {
      // The caller dropped its ticket; the result (and any session in it)
      // is cleaned up by Drop on the unsent value.
      trace!(fd = client_fd, "handshake ticket dropped before resolution");
    }
  }
}

impl std::fmt::Debug for HandshakeRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HandshakeRequest")
      .field("client_fd", &self.client_fd)
      .field("assigned_worker", &self.assigned_worker)
      .finish_non_exhaustive()
  }
}

/// Read-once completion handle returned by `submit`.
///
/// Resolves exactly once; await it from async code or call
/// [`HandshakeTicket::wait`] from a plain thread. If the pool ever drops a
/// request without resolving it (a defect path), the closed channel is
/// reported as [`HandshakeResult::PoolClosed`] so the caller is never
/// stranded.
#[derive(Debug)]
pub struct HandshakeTicket {
  receiver: oneshot::Receiver<HandshakeResult>,
}

impl HandshakeTicket {
  /// Blocks the current thread until the handshake reaches a terminal
  /// state. Must not be called from an async context.
  pub fn wait(self) -> HandshakeResult {
    self.receiver.blocking_recv().unwrap_or(HandshakeResult::PoolClosed)
  }

  /// Non-blocking probe. `None` means the handshake is still in flight.
  pub fn try_take(&mut self) -> Option<HandshakeResult> {
    match self.receiver.try_recv() {
      Ok(result) => Some(result),
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => Some(HandshakeResult::PoolClosed),
    }
  }
}

impl Future for HandshakeTicket {
  type Output = HandshakeResult;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    Pin::new(&mut self.receiver)
      .poll(cx)
      .map(|result| result.unwrap_or(HandshakeResult::PoolClosed))
  }
}
