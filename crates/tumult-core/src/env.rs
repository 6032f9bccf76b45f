//! Environment abstraction for deterministic runs.
//!
//! The `Environment` trait decouples the runtime from system resources (time,
//! sleeping, randomness). The runner injects a system-backed implementation;
//! the harness injects a seeded one with a virtual clock, so a simulation can
//! be replayed exactly.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// Boxed sleep future returned by [`Environment::sleep`].
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Abstract environment providing time, randomness, and async sleeping.
///
/// The trait is object safe: the model holds it as `Arc<dyn Environment>` and
/// hands it to every activity run.
pub trait Environment: Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: This method MUST return values that never decrease
    ///   within a single execution context.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Sleep;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Determinism during simulations: Given the same RNG seed, this produces
    ///   the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random index in `0..bound`. Returns 0 when `bound` is 0.
    #[allow(clippy::cast_possible_truncation)]
    fn random_index(&self, bound: usize) -> usize {
        if bound == 0 {
            return 0;
        }
        (self.random_u64() % bound as u64) as usize
    }
}
