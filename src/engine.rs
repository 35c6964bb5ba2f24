// src/engine.rs

//! The contract this crate consumes from the native TLS layer.
//!
//! The native layer owns the TLS protocol state machines, the OS readiness
//! multiplexers (epoll or equivalent), and the registration of socket
//! descriptors with those multiplexers. This crate never dereferences the
//! handles it is given; it only threads them back into later calls and
//! enforces create/destroy pairing through the RAII wrappers in
//! [`crate::session`].

use crate::error::OffloadError;

use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::time::Duration;

/// Opaque handle to one OS-level readiness multiplexer instance owned by the
/// native layer. The pointee is implementation-defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawMultiplexer(NonNull<libc::c_void>);

impl RawMultiplexer {
  pub fn from_ptr(ptr: NonNull<libc::c_void>) -> Self {
    Self(ptr)
  }

  pub fn as_ptr(&self) -> *mut libc::c_void {
    self.0.as_ptr()
  }
}

/// Opaque handle to one per-connection TLS session owned by the native
/// layer. Valid from `create_session` until the matching `destroy_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawSession(NonNull<libc::c_void>);

impl RawSession {
  pub fn from_ptr(ptr: NonNull<libc::c_void>) -> Self {
    Self(ptr)
  }

  pub fn as_ptr(&self) -> *mut libc::c_void {
    self.0.as_ptr()
  }
}

/// Shared, immutable TLS context (certificate and key material) owned by the
/// embedding application, not by the pool. Every worker receives the same
/// reference and only ever passes it back to [`TlsEngine::create_session`].
pub struct TlsContext {
  ptr: NonNull<libc::c_void>,
}

// The context is read-only by contract and outlives the pool; handing the
// same pointer to every worker thread is safe under that contract.
unsafe impl Send for TlsContext {}
unsafe impl Sync for TlsContext {}

impl TlsContext {
  /// Wraps a native TLS context pointer.
  ///
  /// # Safety
  ///
  /// `ptr` must point to a valid native TLS context that remains alive and
  /// unmodified for as long as any pool constructed from it is running.
  pub unsafe fn from_ptr(ptr: NonNull<libc::c_void>) -> Self {
    Self { ptr }
  }

  pub fn as_ptr(&self) -> *mut libc::c_void {
    self.ptr.as_ptr()
  }
}

impl std::fmt::Debug for TlsContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TlsContext").field("ptr", &self.ptr).finish()
  }
}

/// Outcome of one non-blocking handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
  /// The handshake finished; the session is ready for application data.
  Complete,
  /// The handshake needs the socket to become readable before continuing.
  WantRead,
  /// The handshake needs the socket to become writable before continuing.
  WantWrite,
  /// The native layer reported a protocol or I/O error; the session must be
  /// destroyed and the connection abandoned.
  Error,
}

/// The native TLS engine driving multiplexers and handshake state machines.
///
/// Implementations are typically thin FFI shims over a C library. Contract
/// the pool relies on:
///
/// - `create_session` registers `fd` with `multiplexer`; from then on
///   `wait_one` on that multiplexer may report `fd` ready.
/// - After `advance_handshake` returns [`HandshakeStep::WantRead`] or
///   [`HandshakeStep::WantWrite`], the native layer has re-armed the
///   multiplexer registration for the required readiness direction.
/// - `wait_one` blocks for at most `timeout` and reports at most one ready
///   descriptor.
pub trait TlsEngine: Send + Sync + 'static {
  fn create_multiplexer(&self) -> Result<RawMultiplexer, OffloadError>;

  fn destroy_multiplexer(&self, multiplexer: RawMultiplexer);

  /// Binds a new TLS session to `(context, fd, multiplexer)`. Returns `None`
  /// when the native layer cannot allocate or register the session.
  fn create_session(
    &self,
    context: &TlsContext,
    fd: RawFd,
    multiplexer: RawMultiplexer,
  ) -> Option<RawSession>;

  fn advance_handshake(&self, session: RawSession, fd: RawFd, multiplexer: RawMultiplexer)
    -> HandshakeStep;

  fn destroy_session(&self, session: RawSession);

  /// Waits up to `timeout` for one descriptor registered with `multiplexer`
  /// to become ready. `None` means the wait timed out.
  fn wait_one(&self, multiplexer: RawMultiplexer, timeout: Duration) -> Option<RawFd>;
}
