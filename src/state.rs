//! # Application State Management
//!
//! State shared by every connection task. Only two pieces of it are ever
//! mutated after startup:
//!
//! - **SessionCounter**: how many sessions are currently admitted
//! - **accepting**: cleared once a shutdown signal arrives
//!
//! ## Arc + Atomics
//! Connections run as independent tasks on several worker threads, so the
//! shared pieces are wrapped in `Arc` and mutated with atomics rather than
//! locks. Nothing here is held across an `.await`.
//!
//! ## Session permits
//! Admission hands out a `SessionPermit`. Dropping the permit releases the
//! slot, so the count goes down exactly once on every way a connection can
//! end: clean close, peer disconnect, send failure or panic unwinding.

use crate::config::AppConfig;
use crate::synthesis::SynthesisClient;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// State shared across all HTTP handlers and connection tasks.
///
/// Cloning is cheap: every field is either `Arc`-backed or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration, fixed for the lifetime of the process
    pub config: Arc<AppConfig>,

    /// Admitted-session gate
    pub sessions: Arc<SessionCounter>,

    /// Client for the upstream TTS provider
    pub synthesizer: Arc<SynthesisClient>,

    /// False once the service is shutting down
    accepting: Arc<AtomicBool>,

    /// Source of connection identities
    connection_seq: Arc<AtomicU64>,

    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let synthesizer = SynthesisClient::new(&config);
        Self {
            sessions: Arc::new(SessionCounter::new(config.sessions.max_concurrent_sessions)),
            synthesizer: Arc::new(synthesizer),
            config: Arc::new(config),
            accepting: Arc::new(AtomicBool::new(true)),
            connection_seq: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Next connection identity, starting at 1.
    pub fn next_connection_id(&self) -> u64 {
        self.connection_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop admitting new sessions; admitted ones keep running.
    pub fn mark_unavailable(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Counts admitted sessions against a fixed capacity.
///
/// ## Invariant:
/// `0 <= active() <= capacity()` at every instant. Increments only happen
/// through `try_admit`, which checks and increments in one atomic step;
/// decrements only happen when a `SessionPermit` is dropped.
#[derive(Debug)]
pub struct SessionCounter {
    active: AtomicUsize,
    capacity: usize,
}

impl SessionCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            capacity,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.active() >= self.capacity
    }

    /// Take a slot if one is free.
    pub fn try_admit(self: &Arc<Self>) -> Option<SessionPermit> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .ok()
            .map(|_| SessionPermit {
                counter: Arc::clone(self),
            })
    }
}

/// One admitted session. Releases its slot when dropped.
#[derive(Debug)]
pub struct SessionPermit {
    counter: Arc<SessionCounter>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.counter.active.fetch_sub(1, Ordering::SeqCst);
    }
}
