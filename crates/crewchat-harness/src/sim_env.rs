//! Simulation environment with a virtual clock and seeded randomness.
//!
//! Time only moves when the harness advances it, so timeouts, reconnect delays
//! and heart-beats are reproducible to the millisecond. Clones share the clock
//! and the RNG.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use crewchat_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Point on the virtual timeline, measured from the start of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    nanos: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha8Rng>>,
    epoch: DateTime<Utc>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment whose random sequence is fixed by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).single().unwrap_or_default(),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }

    /// Move the clock to `at`. Never moves it backwards.
    pub fn advance_to(&self, at: SimInstant) {
        let target = u64::try_from(at.0.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_max(target, Ordering::SeqCst);
    }

    /// Current virtual time.
    pub fn instant(&self) -> SimInstant {
        SimInstant(Duration::from_nanos(self.nanos.load(Ordering::SeqCst)))
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        self.instant()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant().elapsed()).unwrap_or_default();
        self.epoch + elapsed
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
