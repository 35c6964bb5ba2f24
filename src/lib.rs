// src/lib.rs

//! tls-offload - a non-blocking TLS-handshake offload pool.
//!
//! A fixed set of dedicated worker threads, each driving its own OS-level
//! I/O multiplexer, cooperatively completes TLS handshakes for sockets
//! handed over by an accept loop. Submitting a socket never blocks; the
//! caller receives a [`HandshakeTicket`] that resolves exactly once with a
//! [`HandshakeResult`].
//!
//! The TLS protocol itself lives behind the [`TlsEngine`] trait: an opaque
//! native layer that owns the multiplexer instances and per-connection
//! session state. This crate only schedules that layer's non-blocking
//! handshake steps across worker threads and guarantees handle ownership
//! and completion invariants.

/// Contract consumed from the native TLS/multiplexer layer.
pub mod engine;
/// Defines custom error types used throughout the library.
pub mod error;
/// The worker pool, shared submission channel, and completion types.
pub mod pool;
/// Owned RAII wrappers around native multiplexer and session handles.
pub mod session;

// Re-export core types for user convenience, making them accessible directly
// from the crate root (e.g., `tls_offload::HandshakePool`).
pub use engine::{HandshakeStep, RawMultiplexer, RawSession, TlsContext, TlsEngine};
pub use error::OffloadError;
pub use pool::{HandshakePool, HandshakeResult, HandshakeTicket, PoolConfig};
pub use session::TlsSession;
