// tests/common/mod.rs

//! A scripted in-memory `TlsEngine` for driving the pool in tests.
//!
//! Handles are minted as opaque non-null pointer values; the engine keys its
//! internal maps on the pointer bits and never dereferences anything. Each
//! fd can carry a script of handshake steps; an exhausted (or absent)
//! script completes the handshake. A `WantRead`/`WantWrite` step flags the
//! fd ready on its multiplexer so the next `wait_one` reports it.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use tls_offload::{
  HandshakeStep, OffloadError, RawMultiplexer, RawSession, TlsContext, TlsEngine,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Default level filter; can be overridden by the RUST_LOG env variable.
    let default_filter = "tls_offload=trace,info";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true) // Show module path
      .with_test_writer() // Write to test output capture
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

/// The pool never dereferences the context; any stable non-null value works.
pub fn test_context() -> Arc<TlsContext> {
  setup_tracing(); // Ensure tracing is initialized before the pool spins up
  let ptr = NonNull::new(0x1000 as *mut c_void).unwrap();
  Arc::new(unsafe { TlsContext::from_ptr(ptr) })
}

#[derive(Default)]
struct EngineState {
  next_handle: u64,
  /// mux key -> fds the native layer has flagged ready.
  ready: HashMap<u64, VecDeque<RawFd>>,
  /// session key -> (fd, mux key).
  sessions: HashMap<u64, (RawFd, u64)>,
  /// fd -> remaining scripted steps.
  scripts: HashMap<RawFd, VecDeque<HandshakeStep>>,
  /// fds whose handshake never progresses and never re-arms readiness.
  stalled: HashSet<RawFd>,
  /// fds for which create_session reports failure.
  refuse_create: HashSet<RawFd>,
  /// Fail create_multiplexer once this many instances exist.
  fail_multiplexer_after: Option<u64>,

  muxes_created: u64,
  muxes_destroyed: u64,
  sessions_created: u64,
  sessions_destroyed: u64,
  wait_calls: u64,
  /// fd -> mux key recorded at session creation, for ownership checks.
  registrations: HashMap<RawFd, u64>,
}

impl EngineState {
  fn mint(&mut self) -> NonNull<c_void> {
    self.next_handle += 1;
    NonNull::new(self.next_handle as usize as *mut c_void).unwrap()
  }
}

fn key(ptr: *mut c_void) -> u64 {
  ptr as u64
}

pub struct MockEngine {
  state: Mutex<EngineState>,
}

impl MockEngine {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(EngineState::default()),
    })
  }

  /// Scripts the step sequence for `fd`. Steps past the end complete.
  pub fn script(&self, fd: RawFd, steps: &[HandshakeStep]) {
    self.state.lock().scripts.insert(fd, steps.iter().copied().collect());
  }

  /// `fd` forever answers `WantRead` and never becomes ready again.
  pub fn stall(&self, fd: RawFd) {
    self.state.lock().stalled.insert(fd);
  }

  pub fn refuse_session(&self, fd: RawFd) {
    self.state.lock().refuse_create.insert(fd);
  }

  pub fn fail_multiplexer_after(&self, created: u64) {
    self.state.lock().fail_multiplexer_after = Some(created);
  }

  /// Flags `fd` ready on every live multiplexer without any session backing
  /// it, as a misbehaving native layer would.
  pub fn inject_ready(&self, fd: RawFd) {
    let mut state = self.state.lock();
    for queue in state.ready.values_mut() {
      queue.push_back(fd);
    }
  }

  pub fn sessions_created(&self) -> u64 {
    self.state.lock().sessions_created
  }

  pub fn sessions_destroyed(&self) -> u64 {
    self.state.lock().sessions_destroyed
  }

  pub fn wait_calls(&self) -> u64 {
    self.state.lock().wait_calls
  }

  pub fn muxes_created(&self) -> u64 {
    self.state.lock().muxes_created
  }

  pub fn muxes_destroyed(&self) -> u64 {
    self.state.lock().muxes_destroyed
  }

  /// Multiplexer key the fd's session was registered with.
  pub fn registered_mux(&self, fd: RawFd) -> Option<u64> {
    self.state.lock().registrations.get(&fd).copied()
  }
}

impl TlsEngine for MockEngine {
  fn create_multiplexer(&self) -> Result<RawMultiplexer, OffloadError> {
    let mut state = self.state.lock();
    if let Some(limit) = state.fail_multiplexer_after {
      if state.muxes_created >= limit {
        return Err(OffloadError::MultiplexerCreation(
          "scripted descriptor exhaustion".into(),
        ));
      }
    }
    let ptr = state.mint();
    state.ready.insert(key(ptr.as_ptr()), VecDeque::new());
    state.muxes_created += 1;
    Ok(RawMultiplexer::from_ptr(ptr))
  }

  fn destroy_multiplexer(&self, multiplexer: RawMultiplexer) {
    let mut state = self.state.lock();
    let removed = state.ready.remove(&key(multiplexer.as_ptr()));
    assert!(removed.is_some(), "multiplexer destroyed twice or never created");
    state.muxes_destroyed += 1;
  }

  fn create_session(
    &self,
    _context: &TlsContext,
    fd: RawFd,
    multiplexer: RawMultiplexer,
  ) -> Option<RawSession> {
    let mut state = self.state.lock();
    if state.refuse_create.contains(&fd) {
      return None;
    }
    assert!(
      !state.sessions.values().any(|(owned_fd, _)| *owned_fd == fd),
      "fd {fd} already owned by a live session; worker tables must be disjoint"
    );
    let mux_key = key(multiplexer.as_ptr());
    let ptr = state.mint();
    state.sessions.insert(key(ptr.as_ptr()), (fd, mux_key));
    state.registrations.insert(fd, mux_key);
    state.sessions_created += 1;
    Some(RawSession::from_ptr(ptr))
  }

  fn advance_handshake(
    &self,
    session: RawSession,
    fd: RawFd,
    multiplexer: RawMultiplexer,
  ) -> HandshakeStep {
    let mut state = self.state.lock();
    let mux_key = key(multiplexer.as_ptr());
    let (session_fd, session_mux) = *state
      .sessions
      .get(&key(session.as_ptr()))
      .expect("handshake advanced on a destroyed session");
    assert_eq!(session_fd, fd, "session advanced with a foreign fd");
    assert_eq!(session_mux, mux_key, "session advanced on a foreign multiplexer");

    if state.stalled.contains(&fd) {
      return HandshakeStep::WantRead;
    }

    let step = state
      .scripts
      .get_mut(&fd)
      .and_then(|steps| steps.pop_front())
      .unwrap_or(HandshakeStep::Complete);
    if matches!(step, HandshakeStep::WantRead | HandshakeStep::WantWrite) {
      // Simulate the native layer re-arming the registration and the peer
      // responding: the fd is ready again on the next wait.
      state
        .ready
        .get_mut(&mux_key)
        .expect("session registered with a destroyed multiplexer")
        .push_back(fd);
    }
    step
  }

  fn destroy_session(&self, session: RawSession) {
    let mut state = self.state.lock();
    let removed = state.sessions.remove(&key(session.as_ptr()));
    assert!(removed.is_some(), "session destroyed twice or never created");
    state.sessions_destroyed += 1;
  }

  fn wait_one(&self, multiplexer: RawMultiplexer, timeout: Duration) -> Option<RawFd> {
    let ready = {
      let mut state = self.state.lock();
      state.wait_calls += 1;
      state
        .ready
        .get_mut(&key(multiplexer.as_ptr()))
        .expect("wait on a destroyed multiplexer")
        .pop_front()
    };
    if ready.is_none() {
      // Block like epoll would, without holding the engine lock.
      std::thread::sleep(timeout);
    }
    ready
  }
}

/// Polls `predicate` until it holds or `deadline` elapses.
pub fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
  let start = std::time::Instant::now();
  while start.elapsed() < deadline {
    if predicate() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
  predicate()
}
