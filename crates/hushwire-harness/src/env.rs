//! Deterministic environment implementation.

#![allow(clippy::disallowed_types, reason = "Mutex only held for synchronous state access")]

use std::{
    ops::Sub,
    sync::{Arc, Mutex},
    time::Duration,
};

use hushwire_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall-clock origin of the virtual clock, in Unix milliseconds.
pub const MOCK_EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Virtual instant measured from the start of the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(Duration);

impl Sub for MockInstant {
    type Output = Duration;

    fn sub(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

struct MockState {
    elapsed: Duration,
    wall_reads: u64,
    rng: ChaCha20Rng,
}

/// Deterministic [`Environment`] with a virtual clock and a seeded RNG.
///
/// Sleeps complete immediately and advance the clock by the requested
/// duration. Each wall-clock reading additionally ticks one millisecond,
/// so consecutive timestamps are always distinct. Clones share state, so
/// a test can advance the clock it handed to the code under test.
#[derive(Clone)]
pub struct MockEnv {
    state: Arc<Mutex<MockState>>,
}

impl MockEnv {
    /// Environment seeded for reproducible randomness.
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                elapsed: Duration::ZERO,
                wall_reads: 0,
                rng: ChaCha20Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Advance the virtual clock.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn advance(&self, duration: Duration) {
        self.state.lock().expect("Mutex poisoned").elapsed += duration;
    }

    /// Virtual time advanced since the environment was created.
    ///
    /// # Panics
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn elapsed(&self) -> Duration {
        self.state.lock().expect("Mutex poisoned").elapsed
    }
}

impl Environment for MockEnv {
    type Instant = MockInstant;

    #[allow(clippy::expect_used)]
    fn now(&self) -> MockInstant {
        MockInstant(self.state.lock().expect("Mutex poisoned").elapsed)
    }

    #[allow(clippy::expect_used)]
    fn unix_millis(&self) -> u64 {
        let mut state = self.state.lock().expect("Mutex poisoned");
        let reading = MOCK_EPOCH_MILLIS + state.elapsed.as_millis() as u64 + state.wall_reads;
        state.wall_reads += 1;
        reading
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.lock().expect("Mutex poisoned").rng.fill_bytes(buffer);
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}
