// src/session.rs

//! Owned wrappers for native handles.
//!
//! The native layer hands out raw create/destroy pairs; these wrappers turn
//! that manual discipline into move semantics. A [`TlsSession`] destroys its
//! handle in `Drop` unless it was consumed with [`TlsSession::into_raw`], so
//! double-destroy and destroy-after-transfer are unrepresentable.

use crate::engine::{RawMultiplexer, RawSession, TlsEngine};
use crate::error::OffloadError;

use std::mem::ManuallyDrop;
use std::sync::Arc;

/// Exclusive owner of one native multiplexer instance. Held by exactly one
/// worker thread for the worker's whole lifetime.
pub(crate) struct Multiplexer {
  raw: RawMultiplexer,
  engine: Arc<dyn TlsEngine>,
}

// The raw handle is opaque to us and only ever used from the one worker
// thread that owns this guard.
unsafe impl Send for Multiplexer {}

impl Multiplexer {
  pub(crate) fn create(engine: Arc<dyn TlsEngine>) -> Result<Self, OffloadError> {
    let raw = engine.create_multiplexer()?;
    Ok(Self { raw, engine })
  }

  pub(crate) fn raw(&self) -> RawMultiplexer {
    self.raw
  }
}

impl Drop for Multiplexer {
  fn drop(&mut self) {
    self.engine.destroy_multiplexer(self.raw);
  }
}

impl std::fmt::Debug for Multiplexer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Multiplexer").field("raw", &self.raw).finish_non_exhaustive()
  }
}

/// Exclusive owner of one native TLS session handle.
///
/// While a handshake is in flight the session lives in its worker's local
/// table. On success it is moved into [`crate::HandshakeResult::Success`]
/// and ownership passes to the caller, who may keep the wrapper (drop
/// destroys the handle) or take the raw handle with [`TlsSession::into_raw`]
/// for the native read/write path.
pub struct TlsSession {
  raw: RawSession,
  engine: ManuallyDrop<Arc<dyn TlsEngine>>,
}

// Ownership of the handle is exclusive; moving the wrapper between threads
// moves that exclusivity with it.
unsafe impl Send for TlsSession {}

impl TlsSession {
  pub(crate) fn new(raw: RawSession, engine: Arc<dyn TlsEngine>) -> Self {
    Self {
      raw,
      engine: ManuallyDrop::new(engine),
    }
  }

  pub fn raw(&self) -> RawSession {
    self.raw
  }

  /// Releases ownership of the native handle without destroying it. The
  /// caller becomes responsible for the eventual `destroy_session` call.
  pub fn into_raw(mut self) -> RawSession {
    let raw = self.raw;
    unsafe { ManuallyDrop::drop(&mut self.engine) };
    std::mem::forget(self);
    raw
  }
}

impl Drop for TlsSession {
  fn drop(&mut self) {
    self.engine.destroy_session(self.raw);
    unsafe { ManuallyDrop::drop(&mut self.engine) };
  }
}

impl std::fmt::Debug for TlsSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TlsSession").field("raw", &self.raw).finish_non_exhaustive()
  }
}
