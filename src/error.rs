use std::io;
use thiserror::Error;

/// Errors surfaced by pool construction and the native-engine contract.
///
/// Per-connection handshake outcomes are never reported through this type;
/// they are delivered as [`crate::HandshakeResult`] values on the ticket
/// returned by `submit`.
#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum OffloadError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("Invalid argument provided: {0}")]
  InvalidArgument(String),

  // --- Boot-time resource errors ---
  #[error("Multiplexer creation failed: {0}")]
  MultiplexerCreation(String), // OS resource exhaustion at startup; fatal, non-retryable

  #[error("Worker thread spawn failed: {0}")]
  ThreadSpawn(String),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}
