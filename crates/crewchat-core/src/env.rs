//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). Enables
//! deterministic simulation (virtual clock, seeded RNG) and production use with
//! real system resources.

use std::{
    fmt,
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Monotonic instant usable by the state machines.
///
/// Blanket-implemented for every type with the required arithmetic, including
/// `std::time::Instant`.
pub trait Moment:
    Copy + Ord + Send + Sync + fmt::Debug + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> Moment for T where
    T: Copy + Ord + Send + Sync + fmt::Debug + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - Given the same seed, simulation environments produce the same random
///   sequence
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Moment;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time, used to stamp locally created messages.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Used for message correlation ids and history request ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
